use time::format_description::well_known::Rfc3339;
use time::{OffsetDateTime, UtcOffset};

use crate::error::AppError;

pub fn now_rfc3339_utc() -> Result<String, AppError> {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .map_err(|e| AppError::new("TIME_FORMAT_FAILED", "Failed to format time").with_details(e.to_string()))
}

/// Canonicalize a caller-supplied RFC3339 timestamp to UTC.
///
/// Anything that does not parse as RFC3339 is rejected; ingestion never guesses a timezone.
pub fn canonicalize_rfc3339(raw: &str) -> Result<String, AppError> {
    let parsed = OffsetDateTime::parse(raw.trim(), &Rfc3339).map_err(|e| {
        AppError::new("INVALID_TIMESTAMP", "Timestamp must be RFC3339")
            .with_details(format!("value={raw}; err={e}"))
    })?;
    parsed
        .to_offset(UtcOffset::UTC)
        .format(&Rfc3339)
        .map_err(|e| AppError::new("TIME_FORMAT_FAILED", "Failed to format time").with_details(e.to_string()))
}
