use rusqlite::{params, Connection, OptionalExtension};

use crate::domain::{Source, SourceInput};
use crate::error::{codes, AppError};
use crate::normalize::timestamps::{canonicalize_rfc3339, now_rfc3339_utc};

use super::chunks::delete_chunks_for_source;
use super::db_err;

/// Register a source, or retitle an existing one.
pub fn upsert_source(conn: &Connection, input: SourceInput) -> Result<Source, AppError> {
    if input.source_id.trim().is_empty() {
        return Err(AppError::new(codes::INVALID_SOURCE, "Source id is required"));
    }
    let title = input.title.trim().to_string();
    if title.is_empty() {
        return Err(AppError::new(codes::INVALID_SOURCE, "Source title is required")
            .with_details(format!("source_id={}", input.source_id)));
    }
    let created_at = match input.created_at.as_deref() {
        Some(raw) => canonicalize_rfc3339(raw)?,
        None => now_rfc3339_utc()?,
    };

    conn.execute(
        "INSERT INTO sources(source_id, title, created_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(source_id) DO UPDATE SET title = excluded.title",
        params![input.source_id, title, created_at],
    )
    .map_err(db_err("DB_WRITE_FAILED", "Failed to write source"))?;

    get_source(conn, &input.source_id)?.ok_or_else(|| {
        AppError::new("DB_WRITE_FAILED", "Source missing after write")
            .with_details(format!("source_id={}", input.source_id))
    })
}

pub fn get_source(conn: &Connection, source_id: &str) -> Result<Option<Source>, AppError> {
    conn.query_row(
        "SELECT source_id, title, created_at FROM sources WHERE source_id = ?1",
        [source_id],
        |row| {
            Ok(Source {
                source_id: row.get(0)?,
                title: row.get(1)?,
                created_at: row.get(2)?,
            })
        },
    )
    .optional()
    .map_err(db_err("DB_QUERY_FAILED", "Failed to load source"))
}

pub fn list_sources(conn: &Connection) -> Result<Vec<Source>, AppError> {
    let mut stmt = conn
        .prepare("SELECT source_id, title, created_at FROM sources ORDER BY source_id ASC")
        .map_err(db_err("DB_QUERY_FAILED", "Failed to prepare sources query"))?;
    let rows = stmt
        .query_map([], |row| {
            Ok(Source {
                source_id: row.get(0)?,
                title: row.get(1)?,
                created_at: row.get(2)?,
            })
        })
        .map_err(db_err("DB_QUERY_FAILED", "Failed to query sources"))?;

    let mut out = Vec::new();
    for r in rows {
        out.push(r.map_err(db_err("DB_QUERY_FAILED", "Failed to decode source row"))?);
    }
    Ok(out)
}

pub fn count_sources(conn: &Connection) -> Result<u64, AppError> {
    let n: i64 = conn
        .query_row("SELECT COUNT(*) FROM sources", [], |row| row.get(0))
        .map_err(db_err("DB_QUERY_FAILED", "Failed to count sources"))?;
    Ok(n.max(0) as u64)
}

/// Delete a source record and all of its chunks; returns removed chunk ids.
pub fn delete_source(conn: &mut Connection, source_id: &str) -> Result<Vec<String>, AppError> {
    let tx = conn
        .transaction()
        .map_err(db_err("DB_TX_FAILED", "Failed to start source delete transaction"))?;
    let removed = delete_chunks_for_source(&tx, source_id)?;
    tx.execute("DELETE FROM sources WHERE source_id = ?1", [source_id])
        .map_err(db_err("DB_WRITE_FAILED", "Failed to delete source"))?;
    tx.commit()
        .map_err(db_err("DB_TX_FAILED", "Failed to commit source delete transaction"))?;
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    #[test]
    fn retitles_without_touching_created_at() {
        let mut conn = db::open_in_memory().unwrap();
        db::migrate(&mut conn).unwrap();

        let first = upsert_source(
            &conn,
            SourceInput {
                source_id: "meeting-1".to_string(),
                title: "Q1 Planning".to_string(),
                created_at: Some("2026-01-05T09:00:00Z".to_string()),
            },
        )
        .unwrap();
        let second = upsert_source(
            &conn,
            SourceInput {
                source_id: "meeting-1".to_string(),
                title: "  Q1 Planning (final) ".to_string(),
                created_at: Some("2026-03-01T00:00:00Z".to_string()),
            },
        )
        .unwrap();

        assert_eq!(second.title, "Q1 Planning (final)");
        assert_eq!(second.created_at, first.created_at);
        assert_eq!(list_sources(&conn).unwrap().len(), 1);
    }

    #[test]
    fn blank_title_is_rejected() {
        let mut conn = db::open_in_memory().unwrap();
        db::migrate(&mut conn).unwrap();
        let err = upsert_source(
            &conn,
            SourceInput {
                source_id: "meeting-1".to_string(),
                title: " ".to_string(),
                created_at: None,
            },
        )
        .unwrap_err();
        assert!(err.is(codes::INVALID_SOURCE));
    }
}
