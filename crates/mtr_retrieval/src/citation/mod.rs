use std::collections::HashMap;

use mtr_core::domain::{Chunk, LocationHint};
use mtr_core::error::{codes, AppError};
use mtr_core::repo::chunks::get_chunk;
use mtr_core::repo::sources::get_source;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::index::ScoredChunk;

/// A ranked chunk enriched with provenance for display and answer grounding.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Citation {
    pub chunk_id: String,
    pub source_id: String,
    pub source_title: String,
    pub ordinal: u32,
    pub excerpt: String,
    pub truncated: bool,
    pub location_hints: Vec<LocationHint>,
    pub similarity: f32,
}

/// Read access to stored chunks.
pub trait ChunkLookup {
    fn chunk(&self, chunk_id: &str) -> Result<Option<Chunk>, AppError>;
}

/// Resolves a source id to its display title.
pub trait SourceDirectory {
    fn source_title(&self, source_id: &str) -> Result<Option<String>, AppError>;
}

impl ChunkLookup for Connection {
    fn chunk(&self, chunk_id: &str) -> Result<Option<Chunk>, AppError> {
        get_chunk(self, chunk_id)
    }
}

impl SourceDirectory for Connection {
    fn source_title(&self, source_id: &str) -> Result<Option<String>, AppError> {
        Ok(get_source(self, source_id)?.map(|s| s.title))
    }
}

fn fetch_chunk(chunks: &dyn ChunkLookup, chunk_id: &str) -> Result<Chunk, AppError> {
    // One retry: the chunk may have been removed between search and assembly.
    for _ in 0..2 {
        if let Some(chunk) = chunks.chunk(chunk_id)? {
            return Ok(chunk);
        }
    }
    Err(
        AppError::new(codes::DANGLING_REFERENCE, "Ranked chunk no longer exists")
            .with_details(format!("chunk_id={chunk_id}"))
            .with_retryable(true),
    )
}

/// Turn ranked hits into citations, preserving order.
///
/// Hits whose chunk has disappeared are dropped with a warning.
pub fn assemble(
    chunks: &dyn ChunkLookup,
    sources: &dyn SourceDirectory,
    ranked: &[ScoredChunk],
    excerpt_length: usize,
) -> Result<Vec<Citation>, AppError> {
    let mut titles: HashMap<String, String> = HashMap::new();
    let mut out = Vec::with_capacity(ranked.len());

    for hit in ranked {
        let chunk = match fetch_chunk(chunks, &hit.chunk_id) {
            Ok(chunk) => chunk,
            Err(e) if e.is(codes::DANGLING_REFERENCE) => {
                tracing::warn!(chunk_id = %hit.chunk_id, "dropping citation for removed chunk");
                continue;
            }
            Err(e) => return Err(e),
        };

        let source_title = match titles.get(&chunk.source_id) {
            Some(title) => title.clone(),
            None => {
                let title = sources
                    .source_title(&chunk.source_id)?
                    .unwrap_or_else(|| chunk.source_id.clone());
                titles.insert(chunk.source_id.clone(), title.clone());
                title
            }
        };

        let (excerpt, truncated) = excerpt(&chunk.content, excerpt_length);
        out.push(Citation {
            chunk_id: chunk.chunk_id,
            source_id: chunk.source_id,
            source_title,
            ordinal: chunk.ordinal,
            excerpt,
            truncated,
            location_hints: chunk.location_hints,
            similarity: hit.similarity,
        });
    }

    Ok(out)
}

/// Leading `max_chars` characters of `text`, cut back to a word boundary.
///
/// A single word longer than the bound is cut mid-word. Returns the excerpt and
/// whether anything was dropped.
pub fn excerpt(text: &str, max_chars: usize) -> (String, bool) {
    let t = text.trim();
    let cut = match t.char_indices().nth(max_chars) {
        Some((idx, _)) => idx,
        None => return (t.to_string(), false),
    };

    let head = &t[..cut];
    let at_boundary = t[cut..].starts_with(char::is_whitespace);
    if at_boundary {
        return (head.trim_end().to_string(), true);
    }
    match head.rfind(char::is_whitespace) {
        Some(pos) => (head[..pos].trim_end().to_string(), true),
        None => (head.to_string(), true),
    }
}
