use std::path::{Path, PathBuf};

use mtr_core::config::EngineConfig;
use mtr_core::db;
use mtr_core::domain::{Chunk, NewChunk, Source, SourceInput};
use mtr_core::error::AppError;
use mtr_core::repo::{chunks, embeddings, sources};
use mtr_core::repo::embeddings::EmbeddingWrite;
use mtr_core::workspace::create_workspace_connection;
use parking_lot::Mutex;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::cancel::CancelToken;
use crate::citation::{ChunkLookup, Citation, SourceDirectory};
use crate::index::{EmbeddingIndex, IndexEntry, IndexSnapshot, IndexStatus, ScoredChunk};
use crate::retrieve::{retrieve, RetrieveOptions};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EngineStatus {
    pub db_path: Option<String>,
    pub dimension: usize,
    pub source_count: u64,
    pub chunk_count: u64,
    pub embedding_count: u64,
    pub indexed_vectors: usize,
    pub generation: u64,
}

/// Chunk store, embedding index and planner over one corpus database.
///
/// Database access is serialized on a single connection. Searches run on the
/// in-memory index and never take that lock; index publishes happen while it
/// is held so the index never runs ahead of, or behind, committed rows.
pub struct RetrievalEngine {
    conn: Mutex<Connection>,
    index: EmbeddingIndex,
    config: EngineConfig,
    db_path: Option<PathBuf>,
}

// Per-call locking, so an assembly retry can observe a concurrent removal.
struct LockedConnection<'a>(&'a Mutex<Connection>);

impl ChunkLookup for LockedConnection<'_> {
    fn chunk(&self, chunk_id: &str) -> Result<Option<Chunk>, AppError> {
        let conn = self.0.lock();
        chunks::get_chunk(&conn, chunk_id)
    }
}

impl SourceDirectory for LockedConnection<'_> {
    fn source_title(&self, source_id: &str) -> Result<Option<String>, AppError> {
        let conn = self.0.lock();
        Ok(sources::get_source(&conn, source_id)?.map(|s| s.title))
    }
}

impl RetrievalEngine {
    /// Open (creating if needed) the corpus at `db_path` and load its vectors.
    pub fn open(db_path: &Path, config: EngineConfig) -> Result<Self, AppError> {
        config.validate()?;
        let conn = create_workspace_connection(db_path)?;
        Self::from_connection(conn, config, Some(db_path.to_path_buf()))
    }

    pub fn open_in_memory(config: EngineConfig) -> Result<Self, AppError> {
        config.validate()?;
        let mut conn = db::open_in_memory()?;
        db::migrate(&mut conn)?;
        Self::from_connection(conn, config, None)
    }

    fn from_connection(
        conn: Connection,
        config: EngineConfig,
        db_path: Option<PathBuf>,
    ) -> Result<Self, AppError> {
        db::ensure_dimension(&conn, config.dimension)?;
        let stored = embeddings::load_embeddings(&conn, config.dimension)?;
        let loaded = stored.len();

        let index = EmbeddingIndex::new(
            config.dimension,
            config.shard_count,
            config.scan_batch_size,
        );
        index.load(stored)?;

        tracing::info!(
            db_path = ?db_path,
            dimension = config.dimension,
            vectors = loaded,
            "opened retrieval engine"
        );
        Ok(Self {
            conn: Mutex::new(conn),
            index,
            config,
            db_path,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Pin the currently published vectors for reads.
    ///
    /// Writes go through the engine so the index only ever holds vectors of
    /// stored chunks.
    pub fn snapshot(&self) -> IndexSnapshot {
        self.index.snapshot()
    }

    pub fn index_status(&self) -> IndexStatus {
        self.index.status()
    }

    pub fn default_options(&self) -> RetrieveOptions {
        RetrieveOptions::from(&self.config.retrieval)
    }

    // Sources

    pub fn register_source(&self, input: SourceInput) -> Result<Source, AppError> {
        let conn = self.conn.lock();
        sources::upsert_source(&conn, input)
    }

    pub fn get_source(&self, source_id: &str) -> Result<Option<Source>, AppError> {
        let conn = self.conn.lock();
        sources::get_source(&conn, source_id)
    }

    pub fn list_sources(&self) -> Result<Vec<Source>, AppError> {
        let conn = self.conn.lock();
        sources::list_sources(&conn)
    }

    /// Delete a source record with all its chunks and embeddings.
    pub fn delete_source(&self, source_id: &str) -> Result<Vec<String>, AppError> {
        let mut conn = self.conn.lock();
        let removed = sources::delete_source(&mut conn, source_id)?;
        let dropped = self.index.remove_many(&removed);
        tracing::info!(source_id, chunks = removed.len(), vectors = dropped, "deleted source");
        Ok(removed)
    }

    // Chunks

    pub fn put_chunk(&self, input: NewChunk) -> Result<Chunk, AppError> {
        let mut conn = self.conn.lock();
        chunks::put_chunk(&mut conn, input)
    }

    pub fn put_chunks(&self, source_id: &str, batch: Vec<NewChunk>) -> Result<Vec<Chunk>, AppError> {
        let mut conn = self.conn.lock();
        chunks::put_chunks(&mut conn, source_id, batch)
    }

    pub fn get_chunk(&self, chunk_id: &str) -> Result<Option<Chunk>, AppError> {
        let conn = self.conn.lock();
        chunks::get_chunk(&conn, chunk_id)
    }

    pub fn list_chunks(&self, source_id: &str) -> Result<Vec<Chunk>, AppError> {
        let conn = self.conn.lock();
        chunks::list_chunks_by_source(&conn, source_id)
    }

    /// Replace a chunk with revised content at the same ordinal.
    ///
    /// The old chunk's embedding goes with it; the replacement starts unembedded.
    pub fn supersede_chunk(&self, old_chunk_id: &str, replacement: NewChunk) -> Result<Chunk, AppError> {
        let mut conn = self.conn.lock();
        let chunk = chunks::supersede_chunk(&mut conn, old_chunk_id, replacement)?;
        self.index.remove(old_chunk_id);
        Ok(chunk)
    }

    /// Remove every chunk of a source. Idempotent; the source record is kept.
    pub fn remove_source(&self, source_id: &str) -> Result<Vec<String>, AppError> {
        let mut conn = self.conn.lock();
        let removed = chunks::remove_source_chunks(&mut conn, source_id)?;
        let dropped = self.index.remove_many(&removed);
        tracing::info!(source_id, chunks = removed.len(), vectors = dropped, "removed source chunks");
        Ok(removed)
    }

    pub fn chunks_pending_embedding(
        &self,
        model: Option<&str>,
        source_id: Option<&str>,
    ) -> Result<Vec<Chunk>, AppError> {
        let conn = self.conn.lock();
        chunks::chunks_pending_embedding(&conn, model, source_id)
    }

    // Embeddings

    /// Store and publish one embedding. On error the previous vector, if any,
    /// stays in place both on disk and in the index.
    pub fn upsert_embedding(&self, write: EmbeddingWrite) -> Result<u64, AppError> {
        let mut conn = self.conn.lock();
        let source_id = embeddings::upsert_embedding(&mut conn, &write, self.config.dimension)?;
        let generation = self.index.upsert(&write.chunk_id, &source_id, write.vector)?;
        tracing::debug!(chunk_id = %write.chunk_id, generation, "upserted embedding");
        Ok(generation)
    }

    /// Store and publish a batch of embeddings, all or nothing.
    pub fn upsert_embeddings(&self, writes: Vec<EmbeddingWrite>) -> Result<u64, AppError> {
        let mut conn = self.conn.lock();
        let source_ids = embeddings::upsert_embeddings(&mut conn, &writes, self.config.dimension)?;

        let entries = writes
            .into_iter()
            .zip(source_ids)
            .map(|(w, source_id)| IndexEntry {
                chunk_id: w.chunk_id,
                source_id,
                vector: w.vector,
            })
            .collect::<Vec<_>>();
        let count = entries.len();
        let generation = self.index.upsert_many(entries)?;
        tracing::debug!(count, generation, "upserted embeddings");
        Ok(generation)
    }

    pub fn remove_embedding(&self, chunk_id: &str) -> Result<bool, AppError> {
        let conn = self.conn.lock();
        let existed = embeddings::delete_embedding(&conn, chunk_id)?;
        self.index.remove(chunk_id);
        Ok(existed)
    }

    pub fn get_embedding(&self, chunk_id: &str) -> Result<Option<Vec<f32>>, AppError> {
        let conn = self.conn.lock();
        embeddings::get_embedding(&conn, chunk_id, self.config.dimension)
    }

    // Queries

    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        scope: Option<&[String]>,
    ) -> Result<Vec<ScoredChunk>, AppError> {
        self.index.search(query, k, scope, &CancelToken::new())
    }

    pub fn retrieve(&self, query: &[f32], options: &RetrieveOptions) -> Result<Vec<Citation>, AppError> {
        self.retrieve_with_cancel(query, options, &CancelToken::new())
    }

    pub fn retrieve_with_cancel(
        &self,
        query: &[f32],
        options: &RetrieveOptions,
        cancel: &CancelToken,
    ) -> Result<Vec<Citation>, AppError> {
        let store = LockedConnection(&self.conn);
        retrieve(&self.index, &store, &store, query, options, cancel)
    }

    pub fn status(&self) -> Result<EngineStatus, AppError> {
        let conn = self.conn.lock();
        let index = self.index.status();
        Ok(EngineStatus {
            db_path: self.db_path.as_ref().map(|p| p.display().to_string()),
            dimension: index.dimension,
            source_count: sources::count_sources(&conn)?,
            chunk_count: chunks::count_chunks(&conn)?,
            embedding_count: embeddings::count_embeddings(&conn)?,
            indexed_vectors: index.vector_count,
            generation: index.generation,
        })
    }
}
