use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;

use ordered_float::OrderedFloat;

use super::ScoredChunk;

// Preallocation cap; larger k still works, the heap just grows.
const MAX_PREALLOC: usize = 1_024;

#[derive(Debug, Clone)]
struct Candidate {
    score: OrderedFloat<f32>,
    chunk_id: Arc<str>,
    source_id: Arc<str>,
}

// "Greater" means ranked worse: lower score, or equal score and larger id.
// The max-heap top is therefore the next entry to evict.
impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .score
            .cmp(&self.score)
            .then_with(|| self.chunk_id.cmp(&other.chunk_id))
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

/// Bounded selection of the `k` best (score desc, chunk id asc) entries.
pub(crate) struct TopK {
    k: usize,
    heap: BinaryHeap<Candidate>,
}

impl TopK {
    pub(crate) fn new(k: usize) -> Self {
        Self {
            k,
            heap: BinaryHeap::with_capacity(k.min(MAX_PREALLOC) + 1),
        }
    }

    pub(crate) fn offer(&mut self, score: f32, chunk_id: &Arc<str>, source_id: &Arc<str>) {
        let candidate = Candidate {
            score: OrderedFloat(score),
            chunk_id: Arc::clone(chunk_id),
            source_id: Arc::clone(source_id),
        };
        if self.heap.len() >= self.k {
            match self.heap.peek() {
                Some(worst) if candidate >= *worst => return,
                _ => {}
            }
        }
        self.heap.push(candidate);
        if self.heap.len() > self.k {
            self.heap.pop();
        }
    }

    /// Best first.
    pub(crate) fn into_ranked(self) -> Vec<ScoredChunk> {
        self.heap
            .into_sorted_vec()
            .into_iter()
            .map(|c| ScoredChunk {
                chunk_id: c.chunk_id.to_string(),
                source_id: c.source_id.to_string(),
                similarity: c.score.into_inner(),
            })
            .collect()
    }
}
