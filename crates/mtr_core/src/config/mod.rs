use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Largest embedding dimension the engine accepts.
pub const MAX_DIMENSION: usize = 4096;

/// Largest `top_k` a single retrieval may request.
pub const MAX_TOP_K: usize = 1_000;

pub const DEFAULT_TOP_K: usize = 5;
pub const DEFAULT_EXCERPT_LENGTH: usize = 200;
pub const DEFAULT_SHARD_COUNT: usize = 64;

/// Number of visited vectors between cancellation checks during a scan.
pub const DEFAULT_SCAN_BATCH_SIZE: usize = 1_024;

/// Defaults applied to retrievals that do not override them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalDefaults {
    pub top_k: usize,
    pub min_similarity: Option<f32>,
    pub excerpt_length: usize,
}

impl Default for RetrievalDefaults {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            min_similarity: None,
            excerpt_length: DEFAULT_EXCERPT_LENGTH,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Corpus-wide embedding dimension `D`.
    pub dimension: usize,
    #[serde(default = "default_shard_count")]
    pub shard_count: usize,
    #[serde(default = "default_scan_batch_size")]
    pub scan_batch_size: usize,
    #[serde(default)]
    pub retrieval: RetrievalDefaults,
}

fn default_shard_count() -> usize {
    DEFAULT_SHARD_COUNT
}

fn default_scan_batch_size() -> usize {
    DEFAULT_SCAN_BATCH_SIZE
}

impl EngineConfig {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            shard_count: DEFAULT_SHARD_COUNT,
            scan_batch_size: DEFAULT_SCAN_BATCH_SIZE,
            retrieval: RetrievalDefaults::default(),
        }
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.dimension == 0 || self.dimension > MAX_DIMENSION {
            return Err(AppError::new("CONFIG_INVALID", "dimension must be in 1..=4096")
                .with_details(format!("dimension={}", self.dimension)));
        }
        if self.shard_count == 0 {
            return Err(AppError::new("CONFIG_INVALID", "shard_count must be positive"));
        }
        if self.scan_batch_size == 0 {
            return Err(AppError::new(
                "CONFIG_INVALID",
                "scan_batch_size must be positive",
            ));
        }
        if self.retrieval.top_k == 0 || self.retrieval.top_k > MAX_TOP_K {
            return Err(AppError::new("CONFIG_INVALID", "retrieval.top_k must be in 1..=1000")
                .with_details(format!("top_k={}", self.retrieval.top_k)));
        }
        if self.retrieval.excerpt_length == 0 {
            return Err(AppError::new(
                "CONFIG_INVALID",
                "retrieval.excerpt_length must be positive",
            ));
        }
        if let Some(min) = self.retrieval.min_similarity {
            if !min.is_finite() {
                return Err(AppError::new(
                    "CONFIG_INVALID",
                    "retrieval.min_similarity must be finite",
                ));
            }
        }
        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<EngineConfig, AppError> {
    let raw = fs::read_to_string(path).map_err(|e| {
        AppError::new("CONFIG_READ_FAILED", "Failed to read engine config")
            .with_details(format!("path={}; err={}", path.display(), e))
    })?;
    let config: EngineConfig = serde_json::from_str(&raw).map_err(|e| {
        AppError::new("CONFIG_INVALID", "Failed to decode engine config")
            .with_details(format!("path={}; err={}", path.display(), e))
    })?;
    config.validate()?;
    Ok(config)
}
