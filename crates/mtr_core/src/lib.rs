pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod normalize;
pub mod repo;
pub mod workspace;

#[cfg(test)]
mod tests {
    use super::error::{codes, AppError};

    #[test]
    fn app_error_is_structured() {
        let err = AppError::new("DB_TEST", "db failed").with_retryable(false);
        assert_eq!(err.code, "DB_TEST");
        assert_eq!(err.message, "db failed");
        assert!(!err.retryable);
    }

    #[test]
    fn dimension_mismatch_carries_both_lengths() {
        let err = AppError::dimension_mismatch(384, 3);
        assert!(err.is(codes::DIMENSION_MISMATCH));
        assert_eq!(err.details.as_deref(), Some("expected=384; got=3"));
        assert_eq!(err.to_string(), format!("[{}] {}", err.code, err.message));
    }
}
