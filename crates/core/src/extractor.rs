use crate::error::IngestError;
use crate::models::UploadedDocument;
use lopdf::Document;
use tracing::{debug, warn};

pub trait PdfExtractor: Send + Sync {
    /// Returns the text of every page in page order.
    fn extract_text(&self, bytes: &[u8]) -> Result<String, IngestError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LopdfExtractor;

impl PdfExtractor for LopdfExtractor {
    fn extract_text(&self, bytes: &[u8]) -> Result<String, IngestError> {
        let document =
            Document::load_mem(bytes).map_err(|error| IngestError::PdfParse(error.to_string()))?;

        let mut text = String::new();
        for page_no in document.get_pages().into_keys() {
            let page_text = document
                .extract_text(&[page_no])
                .map_err(|error| IngestError::PdfParse(error.to_string()))?;
            text.push_str(&page_text);
        }

        Ok(text)
    }
}

pub fn extract_batch(documents: &[UploadedDocument]) -> Result<String, IngestError> {
    extract_batch_with(&LopdfExtractor, documents)
}

/// Extracts every document or none of them.
///
/// Unreadable documents take precedence: when any are present only their
/// names are reported, even if other documents in the batch are empty.
pub fn extract_batch_with<E>(
    extractor: &E,
    documents: &[UploadedDocument],
) -> Result<String, IngestError>
where
    E: PdfExtractor + ?Sized,
{
    if documents.is_empty() {
        return Err(IngestError::NoDocuments);
    }

    let mut text = String::new();
    let mut unreadable = Vec::new();
    let mut empty = Vec::new();

    for document in documents {
        match extractor.extract_text(&document.bytes) {
            Ok(document_text) if document_text.trim().is_empty() => {
                warn!(document = %document.name, "pdf has no extractable text");
                empty.push(document.name.clone());
            }
            Ok(document_text) => {
                debug!(document = %document.name, chars = document_text.chars().count(), "extracted pdf text");
                text.push_str(&document_text);
            }
            Err(error) => {
                warn!(document = %document.name, %error, "unreadable pdf");
                unreadable.push(document.name.clone());
            }
        }
    }

    if !unreadable.is_empty() {
        return Err(IngestError::UnreadableDocuments(unreadable));
    }

    if !empty.is_empty() {
        return Err(IngestError::EmptyDocuments(empty));
    }

    Ok(text)
}
