pub mod chunks;
pub mod embeddings;
pub mod sources;

use crate::error::AppError;

pub(crate) fn db_err(code: &'static str, message: &'static str) -> impl FnOnce(rusqlite::Error) -> AppError {
    move |e| AppError::new(code, message).with_details(e.to_string())
}

pub(crate) fn ordinal_from_sql(col: usize, raw: i64) -> rusqlite::Result<u32> {
    u32::try_from(raw).map_err(|_| rusqlite::Error::IntegralValueOutOfRange(col, raw))
}
