use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("no documents were uploaded")]
    NoDocuments,

    #[error("unreadable documents: {}", .0.join(", "))]
    UnreadableDocuments(Vec<String>),

    #[error("documents without extractable text: {}", .0.join(", "))]
    EmptyDocuments(Vec<String>),

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("no text chunks could be generated")]
    NoChunks,

    #[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),

    #[error("embedding failed: {0}")]
    Embedding(String),

    #[error("embedding model could not be loaded: {0}")]
    ModelLoad(String),

    #[error("index construction failed: {0}")]
    Index(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("background task failed: {0}")]
    Join(String),
}

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("no documents have been processed yet")]
    NotReady,

    #[error("question is empty")]
    EmptyQuestion,

    #[error("retrieval failed: {0}")]
    Retrieval(#[from] IngestError),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("chat api error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("invalid chat response: {0}")]
    Parse(String),
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;
