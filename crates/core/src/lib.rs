pub mod chat;
pub mod chunking;
pub mod conversation;
pub mod embeddings;
pub mod error;
pub mod extractor;
#[cfg(any(test, feature = "test-support"))]
pub mod fixtures;
pub mod index;
pub mod local_embedder;
pub mod models;
pub mod session;
pub mod telemetry;

#[cfg(test)]
mod test_support;

pub use chat::{
    ChatEndpointConfig, ChatMessage, ChatModel, ChatPrompt, OpenAiCompatibleChat, Role,
    DEFAULT_CHAT_BASE_URL, DEFAULT_CHAT_MODEL,
};
pub use chunking::{split_text, ChunkingConfig, DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE};
pub use conversation::{
    build_prompt, condense_question, Answer, Conversation, NOT_FOUND_REPLY, SYSTEM_PROMPT,
};
pub use embeddings::{
    CharacterNgramEmbedder, Embedder, EmbeddingEndpointConfig, HttpEmbedder,
    DEFAULT_EMBEDDING_DIMENSIONS, DEFAULT_EMBEDDING_MODEL,
};
pub use error::{ChatError, IngestError};
pub use extractor::{extract_batch, extract_batch_with, LopdfExtractor, PdfExtractor};
pub use index::{build_index, FlatIndex, DEFAULT_TOP_K};
pub use local_embedder::{LocalBertEmbedder, DEFAULT_MODEL_DIR};
pub use models::{
    Chunk, DocumentFingerprint, ProcessSummary, ScoredChunk, SessionSettings, Speaker, Turn,
    UploadedDocument,
};
pub use session::{Session, SessionState};
pub use telemetry::{RunRecord, RunTracer, TelemetryConfig, DEFAULT_TELEMETRY_ENDPOINT};
