use mtr_core::error::{codes, AppError};
use mtr_core::repo::embeddings::EmbeddingWrite;
use serde::{Deserialize, Serialize};

use crate::engine::RetrievalEngine;

use super::Embedder;

pub const DEFAULT_BACKFILL_BATCH_SIZE: usize = 64;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackfillInput {
    pub model: String,
    pub source_id: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_batch_size() -> usize {
    DEFAULT_BACKFILL_BATCH_SIZE
}

impl BackfillInput {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            source_id: None,
            batch_size: DEFAULT_BACKFILL_BATCH_SIZE,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackfillReport {
    pub model: String,
    pub pending: u32,
    pub embedded: u32,
    pub batches: u32,
    pub generation: u64,
}

/// Embed every chunk that lacks a vector from `input.model`.
///
/// Chunks are visited in chunk id order and written in batches; each batch is
/// committed and published on its own, so an embedder failure keeps the
/// batches already written.
pub fn backfill_embeddings(
    engine: &RetrievalEngine,
    embedder: &dyn Embedder,
    input: BackfillInput,
) -> Result<BackfillReport, AppError> {
    let model = input.model.trim().to_string();
    if model.is_empty() {
        return Err(AppError::new(codes::INVALID_OPTIONS, "Embedding model is required"));
    }
    if input.batch_size == 0 {
        return Err(AppError::new(
            codes::INVALID_OPTIONS,
            "batch_size must be positive",
        ));
    }

    let pending = engine.chunks_pending_embedding(Some(model.as_str()), input.source_id.as_deref())?;
    let mut report = BackfillReport {
        model: model.clone(),
        pending: pending.len() as u32,
        embedded: 0,
        batches: 0,
        generation: engine.index_status().generation,
    };

    for batch in pending.chunks(input.batch_size) {
        let mut writes = Vec::with_capacity(batch.len());
        for chunk in batch {
            let vector = embedder.embed(&model, &chunk.content).map_err(|e| {
                let details = e.details.clone().unwrap_or_default();
                e.with_details(format!("chunk_id={}; {details}", chunk.chunk_id))
            })?;
            writes.push(EmbeddingWrite {
                chunk_id: chunk.chunk_id.clone(),
                vector,
                model: Some(model.clone()),
            });
        }
        report.generation = engine.upsert_embeddings(writes)?;
        report.embedded += batch.len() as u32;
        report.batches += 1;
    }

    tracing::info!(
        model = %report.model,
        pending = report.pending,
        embedded = report.embedded,
        batches = report.batches,
        "embedding backfill complete"
    );
    Ok(report)
}
