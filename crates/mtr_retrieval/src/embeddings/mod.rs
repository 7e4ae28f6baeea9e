use mtr_core::error::AppError;

/// External embedding model. The engine never computes embeddings itself.
pub trait Embedder {
    fn embed(&self, model: &str, input: &str) -> Result<Vec<f32>, AppError>;
}

pub mod backfill;

pub use backfill::{backfill_embeddings, BackfillInput, BackfillReport};
