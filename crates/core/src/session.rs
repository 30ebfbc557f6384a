use crate::chat::ChatModel;
use crate::chunking::split_text;
use crate::conversation::{Answer, Conversation};
use crate::embeddings::Embedder;
use crate::error::{ChatError, IngestError};
use crate::extractor::extract_batch;
use crate::index::build_index;
use crate::models::{DocumentFingerprint, ProcessSummary, SessionSettings, Turn, UploadedDocument};
use crate::telemetry::{RunRecord, RunTracer};
use chrono::Utc;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{info, warn};

pub enum SessionState {
    Idle,
    Ready(Conversation),
}

/// Everything one user's browser session owns: the active conversation, if
/// any, and the transcript shown on the page.
pub struct Session {
    state: SessionState,
    transcript: Vec<Turn>,
    settings: SessionSettings,
    embedder: Arc<dyn Embedder>,
    model: Arc<dyn ChatModel>,
    tracer: Option<Arc<RunTracer>>,
}

impl Session {
    pub fn new(
        settings: SessionSettings,
        embedder: Arc<dyn Embedder>,
        model: Arc<dyn ChatModel>,
        tracer: Option<Arc<RunTracer>>,
    ) -> Self {
        Self {
            state: SessionState::Idle,
            transcript: Vec::new(),
            settings,
            embedder,
            model,
            tracer,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state, SessionState::Ready(_))
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn transcript(&self) -> &[Turn] {
        &self.transcript
    }

    /// Runs extraction, chunking and indexing, then binds a fresh
    /// conversation. On any failure the current state is kept as is.
    pub async fn process(
        &mut self,
        documents: Vec<UploadedDocument>,
    ) -> Result<ProcessSummary, IngestError> {
        if documents.is_empty() {
            return Err(IngestError::NoDocuments);
        }
        self.settings.chunking.validate()?;

        let fingerprints: Vec<DocumentFingerprint> = documents.iter().map(fingerprint).collect();
        info!(documents = fingerprints.len(), "processing upload");

        let text = tokio::task::spawn_blocking(move || extract_batch(&documents))
            .await
            .map_err(|error| IngestError::Join(error.to_string()))??;

        let text_chars = text.chars().count();
        let chunks = split_text(&text, self.settings.chunking);
        if chunks.is_empty() {
            return Err(IngestError::NoChunks);
        }
        let chunk_count = chunks.len();

        let index = build_index(self.embedder.as_ref(), chunks).await?;
        let dimensions = index.dimensions();

        self.state = SessionState::Ready(Conversation::new(
            Arc::clone(&self.embedder),
            index,
            Arc::clone(&self.model),
            self.settings.top_k,
        ));

        info!(
            documents = fingerprints.len(),
            text_chars,
            chunks = chunk_count,
            dimensions,
            "documents processed"
        );

        Ok(ProcessSummary {
            documents: fingerprints,
            text_chars,
            chunk_count,
            dimensions,
        })
    }

    /// Answers `question` from the processed documents. Asking before any
    /// successful processing is rejected with [`ChatError::NotReady`].
    pub async fn ask(&mut self, question: &str) -> Result<String, ChatError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(ChatError::EmptyQuestion);
        }

        let SessionState::Ready(conversation) = &mut self.state else {
            return Err(ChatError::NotReady);
        };

        let started = Utc::now();
        let result = conversation.answer(question).await;

        if let Some(tracer) = &self.tracer {
            let outcome = match &result {
                Ok(answer) => {
                    let source_chunks: Vec<usize> =
                        answer.sources.iter().map(|hit| hit.chunk.index).collect();
                    Ok(json!({
                        "answer": answer.reply,
                        "standalone_question": answer.query,
                        "source_chunks": source_chunks,
                    }))
                }
                Err(error) => Err(error.to_string()),
            };
            let inputs = json!({ "question": question });
            let run = RunRecord::chain("conversational_retrieval", inputs, started).finish(outcome);
            let tracer = Arc::clone(tracer);
            tokio::spawn(async move { tracer.record(run).await });
        }

        match result {
            Ok(Answer { reply, sources, .. }) => {
                info!(sources = sources.len(), "question answered");
                self.transcript.push(Turn::user(question));
                self.transcript.push(Turn::bot(reply.clone()));
                Ok(reply)
            }
            Err(error) => {
                warn!(%error, "question failed");
                Err(error)
            }
        }
    }
}

fn fingerprint(document: &UploadedDocument) -> DocumentFingerprint {
    let mut hasher = Sha256::new();
    hasher.update(&document.bytes);
    DocumentFingerprint {
        name: document.name.clone(),
        checksum: format!("{:x}", hasher.finalize()),
        size_bytes: document.bytes.len(),
    }
}
