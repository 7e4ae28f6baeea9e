use std::collections::HashSet;
use std::sync::Arc;

use mtr_core::domain::StoredEmbedding;
use mtr_core::error::{codes, AppError};
use mtr_core::repo::embeddings::validate_vector;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::cancel::CancelToken;

mod generation;
mod similarity;
mod topk;

use generation::{Generation, NextGeneration, StoredVector};
use topk::TopK;

pub use similarity::{cosine_similarity, l2_norm};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoredChunk {
    pub chunk_id: String,
    pub source_id: String,
    pub similarity: f32,
}

/// One vector to publish. The caller vouches that the chunk exists.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub chunk_id: String,
    pub source_id: String,
    pub vector: Vec<f32>,
}

impl From<StoredEmbedding> for IndexEntry {
    fn from(e: StoredEmbedding) -> Self {
        Self {
            chunk_id: e.chunk_id,
            source_id: e.source_id,
            vector: e.vector,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexStatus {
    pub dimension: usize,
    pub vector_count: usize,
    pub generation: u64,
}

/// In-memory embedding index.
///
/// Searches run against an immutable [`IndexSnapshot`]. Writers build the next
/// generation copy-on-write and publish it with a pointer swap, so a reader sees
/// the state before a write or after it, never a mix.
pub struct EmbeddingIndex {
    dimension: usize,
    scan_batch_size: usize,
    current: RwLock<Arc<Generation>>,
    writer: Mutex<()>,
}

impl EmbeddingIndex {
    pub fn new(dimension: usize, shard_count: usize, scan_batch_size: usize) -> Self {
        Self {
            dimension,
            scan_batch_size: scan_batch_size.max(1),
            current: RwLock::new(Arc::new(Generation::empty(shard_count))),
            writer: Mutex::new(()),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.current.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, chunk_id: &str) -> bool {
        self.current.read().get(chunk_id).is_some()
    }

    /// The published generation; holding it pins that state for the caller.
    pub fn snapshot(&self) -> IndexSnapshot {
        IndexSnapshot {
            generation: Arc::clone(&self.current.read()),
            dimension: self.dimension,
            scan_batch_size: self.scan_batch_size,
        }
    }

    pub fn status(&self) -> IndexStatus {
        let current = self.current.read();
        IndexStatus {
            dimension: self.dimension,
            vector_count: current.len(),
            generation: current.number,
        }
    }

    pub fn check_vector(&self, vector: &[f32]) -> Result<(), AppError> {
        validate_vector(vector, self.dimension)
    }

    pub fn upsert(&self, chunk_id: &str, source_id: &str, vector: Vec<f32>) -> Result<u64, AppError> {
        self.upsert_many(vec![IndexEntry {
            chunk_id: chunk_id.to_string(),
            source_id: source_id.to_string(),
            vector,
        }])
    }

    /// Publish a batch of vectors as a single generation.
    ///
    /// Every vector is validated before anything is published; on error the
    /// current generation is untouched. Returns the generation now visible.
    pub fn upsert_many(&self, entries: Vec<IndexEntry>) -> Result<u64, AppError> {
        for e in &entries {
            self.check_vector(&e.vector).map_err(|err| {
                let details = err.details.clone().unwrap_or_default();
                err.with_details(format!("chunk_id={}; {details}", e.chunk_id))
            })?;
            if e.chunk_id.is_empty() {
                return Err(AppError::new(codes::UNKNOWN_CHUNK, "Index entry has an empty chunk id"));
            }
        }

        let _writer = self.writer.lock();
        let base = Arc::clone(&self.current.read());
        if entries.is_empty() {
            return Ok(base.number);
        }

        let mut next = NextGeneration::new(&base);
        for e in entries {
            let values = e.vector.into_boxed_slice();
            let norm = l2_norm(&values);
            next.insert(
                Arc::from(e.chunk_id),
                StoredVector {
                    source_id: Arc::from(e.source_id),
                    values,
                    norm,
                },
            );
        }
        Ok(self.publish(next.finish()))
    }

    /// Returns whether the chunk had a vector. Absent ids are not an error.
    pub fn remove(&self, chunk_id: &str) -> bool {
        self.remove_many(&[chunk_id]) == 1
    }

    pub fn remove_many<S: AsRef<str>>(&self, chunk_ids: &[S]) -> usize {
        let _writer = self.writer.lock();
        let base = Arc::clone(&self.current.read());

        let mut next = NextGeneration::new(&base);
        let mut removed = 0usize;
        for id in chunk_ids {
            if next.remove(id.as_ref()) {
                removed += 1;
            }
        }
        if !next.is_unchanged() {
            self.publish(next.finish());
        }
        removed
    }

    /// Load persisted vectors, typically once at open.
    pub fn load(&self, stored: Vec<StoredEmbedding>) -> Result<u64, AppError> {
        self.upsert_many(stored.into_iter().map(IndexEntry::from).collect())
    }

    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        scope: Option<&[String]>,
        cancel: &CancelToken,
    ) -> Result<Vec<ScoredChunk>, AppError> {
        self.snapshot().search(query, k, scope, cancel)
    }

    fn publish(&self, next: Generation) -> u64 {
        let number = next.number;
        let len = next.len();
        *self.current.write() = Arc::new(next);
        tracing::debug!(generation = number, vectors = len, "published index generation");
        number
    }
}

/// A pinned, immutable view of the index.
#[derive(Clone)]
pub struct IndexSnapshot {
    generation: Arc<Generation>,
    dimension: usize,
    scan_batch_size: usize,
}

impl IndexSnapshot {
    pub fn generation(&self) -> u64 {
        self.generation.number
    }

    pub fn len(&self) -> usize {
        self.generation.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn vector(&self, chunk_id: &str) -> Option<Vec<f32>> {
        self.generation.get(chunk_id).map(|v| v.values.to_vec())
    }

    /// Exact top-`k` by cosine similarity, ties broken by ascending chunk id.
    ///
    /// `scope`, when given, restricts candidates to those sources; an empty
    /// scope matches nothing. The token is polled every `scan_batch_size`
    /// visited vectors, in scope or not.
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        scope: Option<&[String]>,
        cancel: &CancelToken,
    ) -> Result<Vec<ScoredChunk>, AppError> {
        validate_vector(query, self.dimension)?;
        if k == 0 {
            return Err(AppError::new(codes::INVALID_K, "k must be positive"));
        }
        cancel.check()?;

        let allowed: Option<HashSet<&str>> =
            scope.map(|ids| ids.iter().map(String::as_str).collect());
        if allowed.as_ref().is_some_and(HashSet::is_empty) {
            return Ok(Vec::new());
        }

        let (hits, compared) = self.scan(query, k, allowed.as_ref(), || cancel.check())?;
        tracing::debug!(
            generation = self.generation.number,
            visited = self.len(),
            compared,
            k,
            returned = hits.len(),
            scoped = allowed.is_some(),
            "index search"
        );
        Ok(hits)
    }

    fn scan<F>(
        &self,
        query: &[f32],
        k: usize,
        allowed: Option<&HashSet<&str>>,
        mut poll: F,
    ) -> Result<(Vec<ScoredChunk>, usize), AppError>
    where
        F: FnMut() -> Result<(), AppError>,
    {
        let query_norm = l2_norm(query);
        let mut top = TopK::new(k);
        let mut visited = 0usize;
        let mut compared = 0usize;
        for (chunk_id, stored) in self.generation.iter() {
            visited += 1;
            if visited % self.scan_batch_size == 0 {
                poll().map_err(|e| {
                    e.with_details(format!("visited={visited}; compared={compared}"))
                })?;
            }
            if allowed.is_some_and(|ids| !ids.contains(&*stored.source_id)) {
                continue;
            }
            compared += 1;
            let score = cosine_similarity(query, &stored.values, query_norm, stored.norm);
            top.offer(score, chunk_id, &stored.source_id);
        }
        Ok((top.into_ranked(), compared))
    }
}
