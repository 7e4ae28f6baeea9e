use std::collections::HashSet;

use rusqlite::{params, Connection, OptionalExtension};

use crate::domain::{Chunk, LocationHint, NewChunk};
use crate::error::{codes, AppError};
use crate::normalize::timestamps::{canonicalize_rfc3339, now_rfc3339_utc};
use crate::normalize::{derive_chunk_id, normalize_text, sha256_hex};

use super::{db_err, ordinal_from_sql};

const CHUNK_COLUMNS: &str =
    "chunk_id, source_id, ordinal, content, content_sha256, location_hints_json, created_at";

fn decode_chunk_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Chunk> {
    let hints_json: String = row.get(5)?;
    let location_hints: Vec<LocationHint> = serde_json::from_str(&hints_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(Chunk {
        chunk_id: row.get(0)?,
        source_id: row.get(1)?,
        ordinal: ordinal_from_sql(2, row.get(2)?)?,
        content: row.get(3)?,
        content_sha256: row.get(4)?,
        location_hints,
        created_at: row.get(6)?,
    })
}

/// Validate and normalize ingestion input into the stored shape.
fn prepare_chunk(input: NewChunk) -> Result<Chunk, AppError> {
    if input.source_id.trim().is_empty() {
        return Err(AppError::new(codes::INVALID_CHUNK, "Chunk source id is required"));
    }
    let content = normalize_text(&input.content);
    if content.trim().is_empty() {
        return Err(AppError::new(codes::INVALID_CHUNK, "Chunk content must not be empty")
            .with_details(format!(
                "source_id={}; ordinal={}",
                input.source_id, input.ordinal
            )));
    }
    let content_sha256 = sha256_hex(content.as_bytes());

    let chunk_id = match input.chunk_id {
        Some(id) if id.trim().is_empty() => {
            return Err(AppError::new(codes::INVALID_CHUNK, "Chunk id must not be blank"));
        }
        Some(id) => id,
        None => derive_chunk_id(&input.source_id, input.ordinal, &content_sha256),
    };

    let created_at = match input.created_at.as_deref() {
        Some(raw) => canonicalize_rfc3339(raw)?,
        None => now_rfc3339_utc()?,
    };

    Ok(Chunk {
        chunk_id,
        source_id: input.source_id,
        ordinal: input.ordinal,
        content,
        content_sha256,
        location_hints: input.location_hints,
        created_at,
    })
}

fn ensure_not_stored(conn: &Connection, chunk: &Chunk) -> Result<(), AppError> {
    let id_taken: bool = conn
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM chunks WHERE chunk_id = ?1)",
            [&chunk.chunk_id],
            |row| row.get(0),
        )
        .map_err(db_err("DB_QUERY_FAILED", "Failed to check chunk id"))?;
    if id_taken {
        return Err(AppError::new(codes::DUPLICATE_CHUNK, "Chunk id already exists")
            .with_details(format!("chunk_id={}", chunk.chunk_id)));
    }

    let slot_taken: bool = conn
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM chunks WHERE source_id = ?1 AND ordinal = ?2)",
            params![chunk.source_id, chunk.ordinal],
            |row| row.get(0),
        )
        .map_err(db_err("DB_QUERY_FAILED", "Failed to check chunk ordinal"))?;
    if slot_taken {
        return Err(AppError::new(
            codes::DUPLICATE_CHUNK,
            "Chunk ordinal already exists for source",
        )
        .with_details(format!(
            "source_id={}; ordinal={}",
            chunk.source_id, chunk.ordinal
        )));
    }
    Ok(())
}

fn insert_chunk_row(conn: &Connection, chunk: &Chunk) -> Result<(), AppError> {
    ensure_not_stored(conn, chunk)?;
    let hints_json = serde_json::to_string(&chunk.location_hints).map_err(|e| {
        AppError::new("DB_WRITE_FAILED", "Failed to encode location hints")
            .with_details(e.to_string())
    })?;
    conn.execute(
        "INSERT INTO chunks(chunk_id, source_id, ordinal, content, content_sha256, location_hints_json, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            chunk.chunk_id,
            chunk.source_id,
            chunk.ordinal,
            chunk.content,
            chunk.content_sha256,
            hints_json,
            chunk.created_at
        ],
    )
    .map_err(|e| {
        AppError::new("DB_WRITE_FAILED", "Failed to insert chunk")
            .with_details(format!("chunk_id={}; err={}", chunk.chunk_id, e))
    })?;
    Ok(())
}

pub fn put_chunk(conn: &mut Connection, input: NewChunk) -> Result<Chunk, AppError> {
    let chunk = prepare_chunk(input)?;
    let tx = conn
        .transaction()
        .map_err(db_err("DB_TX_FAILED", "Failed to start chunk transaction"))?;
    insert_chunk_row(&tx, &chunk)?;
    tx.commit()
        .map_err(db_err("DB_TX_FAILED", "Failed to commit chunk transaction"))?;
    Ok(chunk)
}

/// Insert every chunk of one source, or none of them.
pub fn put_chunks(
    conn: &mut Connection,
    source_id: &str,
    batch: Vec<NewChunk>,
) -> Result<Vec<Chunk>, AppError> {
    let mut prepared = Vec::with_capacity(batch.len());
    let mut seen_ids = HashSet::new();
    let mut seen_ordinals = HashSet::new();

    for input in batch {
        if input.source_id != source_id {
            return Err(AppError::new(
                codes::INVALID_CHUNK,
                "Batch chunk belongs to a different source",
            )
            .with_details(format!(
                "batch_source_id={source_id}; chunk_source_id={}",
                input.source_id
            )));
        }
        let chunk = prepare_chunk(input)?;
        if !seen_ids.insert(chunk.chunk_id.clone()) {
            return Err(AppError::new(codes::DUPLICATE_CHUNK, "Chunk id repeated in batch")
                .with_details(format!("chunk_id={}", chunk.chunk_id)));
        }
        if !seen_ordinals.insert(chunk.ordinal) {
            return Err(AppError::new(
                codes::DUPLICATE_CHUNK,
                "Chunk ordinal repeated in batch",
            )
            .with_details(format!("source_id={source_id}; ordinal={}", chunk.ordinal)));
        }
        prepared.push(chunk);
    }

    let tx = conn
        .transaction()
        .map_err(db_err("DB_TX_FAILED", "Failed to start batch transaction"))?;
    for chunk in prepared.iter() {
        // Dropping `tx` on error rolls the whole batch back.
        insert_chunk_row(&tx, chunk)?;
    }
    tx.commit()
        .map_err(db_err("DB_TX_FAILED", "Failed to commit batch transaction"))?;

    prepared.sort_by(|a, b| a.ordinal.cmp(&b.ordinal));
    tracing::info!(source_id, chunk_count = prepared.len(), "stored chunk batch");
    Ok(prepared)
}

pub fn get_chunk(conn: &Connection, chunk_id: &str) -> Result<Option<Chunk>, AppError> {
    let sql = format!("SELECT {CHUNK_COLUMNS} FROM chunks WHERE chunk_id = ?1");
    conn.query_row(&sql, [chunk_id], decode_chunk_row)
        .optional()
        .map_err(|e| {
            AppError::new("DB_QUERY_FAILED", "Failed to load chunk")
                .with_details(format!("chunk_id={chunk_id}; err={e}"))
        })
}

pub fn list_chunks_by_source(conn: &Connection, source_id: &str) -> Result<Vec<Chunk>, AppError> {
    let sql = format!(
        "SELECT {CHUNK_COLUMNS} FROM chunks WHERE source_id = ?1 ORDER BY ordinal ASC"
    );
    let mut stmt = conn
        .prepare(&sql)
        .map_err(db_err("DB_QUERY_FAILED", "Failed to prepare chunk list query"))?;
    let rows = stmt
        .query_map([source_id], decode_chunk_row)
        .map_err(db_err("DB_QUERY_FAILED", "Failed to query chunks"))?;

    let mut out = Vec::new();
    for r in rows {
        out.push(r.map_err(db_err("DB_QUERY_FAILED", "Failed to decode chunk row"))?);
    }
    Ok(out)
}

pub(crate) fn delete_chunks_for_source(
    conn: &Connection,
    source_id: &str,
) -> Result<Vec<String>, AppError> {
    let mut removed: Vec<String> = {
        let mut stmt = conn
            .prepare("SELECT chunk_id FROM chunks WHERE source_id = ?1")
            .map_err(db_err("DB_QUERY_FAILED", "Failed to prepare chunk id query"))?;
        let rows = stmt
            .query_map([source_id], |row| row.get::<_, String>(0))
            .map_err(db_err("DB_QUERY_FAILED", "Failed to query chunk ids"))?;
        let mut ids = Vec::new();
        for r in rows {
            ids.push(r.map_err(db_err("DB_QUERY_FAILED", "Failed to decode chunk id"))?);
        }
        ids
    };

    // Embeddings follow through ON DELETE CASCADE.
    conn.execute("DELETE FROM chunks WHERE source_id = ?1", [source_id])
        .map_err(|e| {
            AppError::new("DB_WRITE_FAILED", "Failed to delete chunks")
                .with_details(format!("source_id={source_id}; err={e}"))
        })?;

    removed.sort();
    Ok(removed)
}

/// Delete every chunk of a source together with its embeddings.
///
/// Idempotent; returns the removed chunk ids (sorted) so in-memory indexes can drop them.
pub fn remove_source_chunks(conn: &mut Connection, source_id: &str) -> Result<Vec<String>, AppError> {
    let tx = conn
        .transaction()
        .map_err(db_err("DB_TX_FAILED", "Failed to start removal transaction"))?;
    let removed = delete_chunks_for_source(&tx, source_id)?;
    tx.commit()
        .map_err(db_err("DB_TX_FAILED", "Failed to commit removal transaction"))?;
    Ok(removed)
}

/// Retire `old_chunk_id` and store `replacement` in its slot, atomically.
///
/// The replacement must keep the source and ordinal of the chunk it supersedes.
/// The retired chunk's embedding is dropped with it.
pub fn supersede_chunk(
    conn: &mut Connection,
    old_chunk_id: &str,
    replacement: NewChunk,
) -> Result<Chunk, AppError> {
    let chunk = prepare_chunk(replacement)?;
    let tx = conn
        .transaction()
        .map_err(db_err("DB_TX_FAILED", "Failed to start supersede transaction"))?;

    let old = get_chunk(&tx, old_chunk_id)?.ok_or_else(|| {
        AppError::new(codes::UNKNOWN_CHUNK, "Chunk to supersede does not exist")
            .with_details(format!("chunk_id={old_chunk_id}"))
    })?;
    if old.source_id != chunk.source_id || old.ordinal != chunk.ordinal {
        return Err(AppError::new(
            codes::INVALID_CHUNK,
            "Replacement must keep the source and ordinal of the superseded chunk",
        )
        .with_details(format!(
            "old={}#{}; new={}#{}",
            old.source_id, old.ordinal, chunk.source_id, chunk.ordinal
        )));
    }
    if old.chunk_id == chunk.chunk_id {
        return Err(AppError::new(
            codes::DUPLICATE_CHUNK,
            "Replacement has the same id as the superseded chunk",
        )
        .with_details(format!("chunk_id={old_chunk_id}")));
    }

    tx.execute("DELETE FROM chunks WHERE chunk_id = ?1", [old_chunk_id])
        .map_err(db_err("DB_WRITE_FAILED", "Failed to retire chunk"))?;
    insert_chunk_row(&tx, &chunk)?;
    tx.commit()
        .map_err(db_err("DB_TX_FAILED", "Failed to commit supersede transaction"))?;
    Ok(chunk)
}

pub fn count_chunks(conn: &Connection) -> Result<u64, AppError> {
    let n: i64 = conn
        .query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))
        .map_err(db_err("DB_QUERY_FAILED", "Failed to count chunks"))?;
    Ok(n.max(0) as u64)
}

/// Chunks lacking an embedding, or whose embedding came from a different model.
///
/// Ordered by chunk id so repeated backfills visit chunks in the same order.
pub fn chunks_pending_embedding(
    conn: &Connection,
    model: Option<&str>,
    source_id: Option<&str>,
) -> Result<Vec<Chunk>, AppError> {
    let sql = format!(
        "SELECT {cols} FROM chunks c
         LEFT JOIN chunk_embeddings e ON e.chunk_id = c.chunk_id
         WHERE (e.chunk_id IS NULL OR e.model IS NOT ?1)
           AND (?2 IS NULL OR c.source_id = ?2)
         ORDER BY c.chunk_id ASC",
        cols = CHUNK_COLUMNS
            .split(", ")
            .map(|c| format!("c.{c}"))
            .collect::<Vec<_>>()
            .join(", ")
    );
    let mut stmt = conn
        .prepare(&sql)
        .map_err(db_err("DB_QUERY_FAILED", "Failed to prepare pending chunk query"))?;
    let rows = stmt
        .query_map(params![model, source_id], decode_chunk_row)
        .map_err(db_err("DB_QUERY_FAILED", "Failed to query pending chunks"))?;

    let mut out = Vec::new();
    for r in rows {
        out.push(r.map_err(db_err("DB_QUERY_FAILED", "Failed to decode chunk row"))?);
    }
    Ok(out)
}
