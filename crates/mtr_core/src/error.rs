use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable error codes shared by the storage and retrieval layers.
pub mod codes {
    pub const DIMENSION_MISMATCH: &str = "DIMENSION_MISMATCH";
    pub const UNKNOWN_CHUNK: &str = "UNKNOWN_CHUNK";
    pub const DUPLICATE_CHUNK: &str = "DUPLICATE_CHUNK";
    pub const INVALID_K: &str = "INVALID_K";
    pub const DANGLING_REFERENCE: &str = "DANGLING_REFERENCE";
    pub const CANCELLED: &str = "CANCELLED";

    pub const INVALID_CHUNK: &str = "INVALID_CHUNK";
    pub const INVALID_VECTOR: &str = "INVALID_VECTOR";
    pub const INVALID_OPTIONS: &str = "INVALID_OPTIONS";
    pub const INVALID_SOURCE: &str = "INVALID_SOURCE";
}

/// Single structured error shape used across the engine layers.
///
/// `code` is the machine-readable kind (see [`codes`]); `details` carries the
/// underlying cause for diagnostics and is never needed to branch on.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppError {
    pub code: String,
    pub message: String,
    pub details: Option<String>,
    pub retryable: bool,
}

impl AppError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
            retryable: false,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn is(&self, code: &str) -> bool {
        self.code == code
    }

    pub fn dimension_mismatch(expected: usize, got: usize) -> Self {
        Self::new(
            codes::DIMENSION_MISMATCH,
            "Vector length does not match the corpus dimension",
        )
        .with_details(format!("expected={expected}; got={got}"))
    }

    pub fn cancelled() -> Self {
        Self::new(codes::CANCELLED, "Search was cancelled")
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {}
