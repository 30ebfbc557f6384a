use serde::{Deserialize, Serialize};

use crate::chunking::ChunkingConfig;

/// A file received from the upload form.
#[derive(Debug, Clone)]
pub struct UploadedDocument {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl UploadedDocument {
    pub fn new(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub index: usize,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    /// Squared euclidean distance to the query; lower is closer.
    pub distance: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    User,
    Bot,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub speaker: Speaker,
    pub message: String,
}

impl Turn {
    pub fn user(message: impl Into<String>) -> Self {
        Self {
            speaker: Speaker::User,
            message: message.into(),
        }
    }

    pub fn bot(message: impl Into<String>) -> Self {
        Self {
            speaker: Speaker::Bot,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DocumentFingerprint {
    pub name: String,
    pub checksum: String,
    pub size_bytes: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessSummary {
    pub documents: Vec<DocumentFingerprint>,
    pub text_chars: usize,
    pub chunk_count: usize,
    pub dimensions: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    pub top_k: usize,
    pub chunking: ChunkingConfig,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            top_k: crate::index::DEFAULT_TOP_K,
            chunking: ChunkingConfig::default(),
        }
    }
}
