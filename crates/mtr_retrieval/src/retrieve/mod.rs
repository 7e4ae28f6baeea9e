use mtr_core::config::{RetrievalDefaults, MAX_TOP_K};
use mtr_core::error::{codes, AppError};
use serde::{Deserialize, Serialize};

use crate::cancel::CancelToken;
use crate::citation::{assemble, ChunkLookup, Citation, SourceDirectory};
use crate::index::EmbeddingIndex;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrieveOptions {
    pub top_k: usize,
    /// Applied after ranking, before the result is capped at `top_k`.
    pub min_similarity: Option<f32>,
    /// `None` searches every source; an empty list searches none.
    pub scope_source_ids: Option<Vec<String>>,
    pub excerpt_length: usize,
}

impl Default for RetrieveOptions {
    fn default() -> Self {
        Self::from(&RetrievalDefaults::default())
    }
}

impl From<&RetrievalDefaults> for RetrieveOptions {
    fn from(d: &RetrievalDefaults) -> Self {
        Self {
            top_k: d.top_k,
            min_similarity: d.min_similarity,
            scope_source_ids: None,
            excerpt_length: d.excerpt_length,
        }
    }
}

impl RetrieveOptions {
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn with_min_similarity(mut self, min_similarity: f32) -> Self {
        self.min_similarity = Some(min_similarity);
        self
    }

    pub fn with_scope<I, S>(mut self, source_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scope_source_ids = Some(source_ids.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_excerpt_length(mut self, excerpt_length: usize) -> Self {
        self.excerpt_length = excerpt_length;
        self
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.top_k == 0 || self.top_k > MAX_TOP_K {
            return Err(AppError::new(codes::INVALID_K, "top_k is out of range")
                .with_details(format!("top_k={}; max={MAX_TOP_K}", self.top_k)));
        }
        if self.excerpt_length == 0 {
            return Err(AppError::new(
                codes::INVALID_OPTIONS,
                "excerpt_length must be positive",
            ));
        }
        if let Some(min) = self.min_similarity {
            if !min.is_finite() {
                return Err(AppError::new(
                    codes::INVALID_OPTIONS,
                    "min_similarity must be finite",
                ));
            }
        }
        Ok(())
    }
}

/// Rank, threshold and cite the chunks most similar to `query`.
///
/// Zero citations is a normal outcome, not an error.
pub fn retrieve(
    index: &EmbeddingIndex,
    chunks: &dyn ChunkLookup,
    sources: &dyn SourceDirectory,
    query: &[f32],
    options: &RetrieveOptions,
    cancel: &CancelToken,
) -> Result<Vec<Citation>, AppError> {
    options.validate()?;

    let mut ranked = index.search(
        query,
        options.top_k,
        options.scope_source_ids.as_deref(),
        cancel,
    )?;
    if let Some(min) = options.min_similarity {
        ranked.retain(|hit| hit.similarity >= min);
    }
    ranked.truncate(options.top_k);

    let citations = assemble(chunks, sources, &ranked, options.excerpt_length)?;
    tracing::debug!(
        ranked = ranked.len(),
        cited = citations.len(),
        top_k = options.top_k,
        "retrieval complete"
    );
    Ok(citations)
}
