use rusqlite::{params, Connection, OptionalExtension};

use crate::domain::StoredEmbedding;
use crate::error::{codes, AppError};
use crate::normalize::timestamps::now_rfc3339_utc;

use super::db_err;

/// One embedding write, as supplied by the embedding-computation collaborator.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingWrite {
    pub chunk_id: String,
    pub vector: Vec<f32>,
    pub model: Option<String>,
}

impl EmbeddingWrite {
    pub fn new(chunk_id: impl Into<String>, vector: Vec<f32>) -> Self {
        Self {
            chunk_id: chunk_id.into(),
            vector,
            model: None,
        }
    }
}

/// Reject vectors that may never enter the corpus.
pub fn validate_vector(vector: &[f32], dimension: usize) -> Result<(), AppError> {
    if vector.len() != dimension {
        return Err(AppError::dimension_mismatch(dimension, vector.len()));
    }
    if let Some(pos) = vector.iter().position(|v| !v.is_finite()) {
        return Err(AppError::new(codes::INVALID_VECTOR, "Vector contains non-finite values")
            .with_details(format!("position={pos}")));
    }
    Ok(())
}

// Little-endian f32, four bytes per component; exact round trip.
pub fn encode_vector_blob(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(std::mem::size_of_val(vector));
    for &value in vector {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

pub fn decode_vector_blob(blob: &[u8], dimension: usize) -> Result<Vec<f32>, AppError> {
    let expected_len = dimension * std::mem::size_of::<f32>();
    if blob.len() != expected_len {
        return Err(AppError::new("DB_CORRUPT", "Stored vector has unexpected length")
            .with_details(format!("expected_bytes={expected_len}; got={}", blob.len())));
    }
    Ok(blob
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

fn source_of_chunk(conn: &Connection, chunk_id: &str) -> Result<String, AppError> {
    conn.query_row(
        "SELECT source_id FROM chunks WHERE chunk_id = ?1",
        [chunk_id],
        |row| row.get::<_, String>(0),
    )
    .optional()
    .map_err(db_err("DB_QUERY_FAILED", "Failed to look up chunk"))?
    .ok_or_else(|| {
        AppError::new(codes::UNKNOWN_CHUNK, "Chunk does not exist")
            .with_details(format!("chunk_id={chunk_id}"))
    })
}

fn write_row(conn: &Connection, write: &EmbeddingWrite, updated_at: &str) -> Result<(), AppError> {
    conn.execute(
        "INSERT INTO chunk_embeddings(chunk_id, dimension, vector, model, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(chunk_id) DO UPDATE SET
           dimension = excluded.dimension,
           vector = excluded.vector,
           model = excluded.model,
           updated_at = excluded.updated_at",
        params![
            write.chunk_id,
            write.vector.len() as i64,
            encode_vector_blob(&write.vector),
            write.model,
            updated_at
        ],
    )
    .map_err(|e| {
        AppError::new("DB_WRITE_FAILED", "Failed to write embedding")
            .with_details(format!("chunk_id={}; err={}", write.chunk_id, e))
    })?;
    Ok(())
}

/// Store embeddings for existing chunks, all or nothing.
///
/// Returns the owning source id of each written chunk, in input order.
pub fn upsert_embeddings(
    conn: &mut Connection,
    writes: &[EmbeddingWrite],
    dimension: usize,
) -> Result<Vec<String>, AppError> {
    for w in writes {
        validate_vector(&w.vector, dimension).map_err(|e| {
            let details = e.details.clone().unwrap_or_default();
            e.with_details(format!("chunk_id={}; {details}", w.chunk_id))
        })?;
    }

    let updated_at = now_rfc3339_utc()?;
    let tx = conn
        .transaction()
        .map_err(db_err("DB_TX_FAILED", "Failed to start embedding transaction"))?;
    let mut sources = Vec::with_capacity(writes.len());
    for w in writes {
        sources.push(source_of_chunk(&tx, &w.chunk_id)?);
        write_row(&tx, w, &updated_at)?;
    }
    tx.commit()
        .map_err(db_err("DB_TX_FAILED", "Failed to commit embedding transaction"))?;
    Ok(sources)
}

pub fn upsert_embedding(
    conn: &mut Connection,
    write: &EmbeddingWrite,
    dimension: usize,
) -> Result<String, AppError> {
    let mut sources = upsert_embeddings(conn, std::slice::from_ref(write), dimension)?;
    sources.pop().ok_or_else(|| {
        AppError::new("DB_WRITE_FAILED", "Embedding write returned no source")
    })
}

pub fn delete_embedding(conn: &Connection, chunk_id: &str) -> Result<bool, AppError> {
    let n = conn
        .execute("DELETE FROM chunk_embeddings WHERE chunk_id = ?1", [chunk_id])
        .map_err(db_err("DB_WRITE_FAILED", "Failed to delete embedding"))?;
    Ok(n > 0)
}

pub fn get_embedding(
    conn: &Connection,
    chunk_id: &str,
    dimension: usize,
) -> Result<Option<Vec<f32>>, AppError> {
    let blob: Option<Vec<u8>> = conn
        .query_row(
            "SELECT vector FROM chunk_embeddings WHERE chunk_id = ?1",
            [chunk_id],
            |row| row.get(0),
        )
        .optional()
        .map_err(db_err("DB_QUERY_FAILED", "Failed to load embedding"))?;
    blob.map(|b| decode_vector_blob(&b, dimension)).transpose()
}

/// Every stored embedding joined with its chunk's source, ordered by chunk id.
pub fn load_embeddings(conn: &Connection, dimension: usize) -> Result<Vec<StoredEmbedding>, AppError> {
    let mut stmt = conn
        .prepare(
            "SELECT e.chunk_id, c.source_id, e.dimension, e.vector, e.model
             FROM chunk_embeddings e
             JOIN chunks c ON c.chunk_id = e.chunk_id
             ORDER BY e.chunk_id ASC",
        )
        .map_err(db_err("DB_QUERY_FAILED", "Failed to prepare embedding load"))?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, Vec<u8>>(3)?,
                row.get::<_, Option<String>>(4)?,
            ))
        })
        .map_err(db_err("DB_QUERY_FAILED", "Failed to query embeddings"))?;

    let mut out = Vec::new();
    for r in rows {
        let (chunk_id, source_id, stored_dim, blob, model) =
            r.map_err(db_err("DB_QUERY_FAILED", "Failed to decode embedding row"))?;
        if stored_dim != dimension as i64 {
            return Err(AppError::dimension_mismatch(dimension, stored_dim.max(0) as usize)
                .with_details(format!(
                    "chunk_id={chunk_id}; expected={dimension}; stored={stored_dim}"
                )));
        }
        let vector = decode_vector_blob(&blob, dimension)?;
        out.push(StoredEmbedding {
            chunk_id,
            source_id,
            vector,
            model,
        });
    }
    Ok(out)
}

pub fn count_embeddings(conn: &Connection) -> Result<u64, AppError> {
    let n: i64 = conn
        .query_row("SELECT COUNT(*) FROM chunk_embeddings", [], |row| row.get(0))
        .map_err(db_err("DB_QUERY_FAILED", "Failed to count embeddings"))?;
    Ok(n.max(0) as u64)
}
