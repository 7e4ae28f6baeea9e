use serde::{Deserialize, Serialize};

/// Structural marker for where a chunk sits in its source document.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LocationHint {
    /// 1-based page number in the uploaded document.
    Page { number: u32 },
    /// Offset from the start of the meeting recording.
    Timestamp { offset_ms: u64 },
}

/// A retrievable passage of meeting text.
///
/// Content is immutable once stored; a revised passage is written as a new chunk
/// that supersedes this one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Chunk {
    pub chunk_id: String,
    pub source_id: String,
    pub ordinal: u32,
    pub content: String,
    pub content_sha256: String,
    pub location_hints: Vec<LocationHint>,
    pub created_at: String, // RFC3339
}

/// Ingestion input for a chunk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewChunk {
    /// Derived from source, ordinal and content when absent.
    pub chunk_id: Option<String>,
    pub source_id: String,
    pub ordinal: u32,
    pub content: String,
    #[serde(default)]
    pub location_hints: Vec<LocationHint>,
    /// Defaults to the insertion time.
    pub created_at: Option<String>,
}

impl NewChunk {
    pub fn new(source_id: impl Into<String>, ordinal: u32, content: impl Into<String>) -> Self {
        Self {
            chunk_id: None,
            source_id: source_id.into(),
            ordinal,
            content: content.into(),
            location_hints: Vec::new(),
            created_at: None,
        }
    }

    pub fn with_id(mut self, chunk_id: impl Into<String>) -> Self {
        self.chunk_id = Some(chunk_id.into());
        self
    }

    pub fn with_hints(mut self, hints: Vec<LocationHint>) -> Self {
        self.location_hints = hints;
        self
    }
}

/// A meeting (or other document) that owns chunks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Source {
    pub source_id: String,
    pub title: String,
    pub created_at: String, // RFC3339
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceInput {
    pub source_id: String,
    pub title: String,
    pub created_at: Option<String>,
}

/// Persisted embedding row, as loaded into the in-memory index.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEmbedding {
    pub chunk_id: String,
    pub source_id: String,
    pub vector: Vec<f32>,
    pub model: Option<String>,
}
