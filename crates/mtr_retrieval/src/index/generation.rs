use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug)]
pub(crate) struct StoredVector {
    pub(crate) source_id: Arc<str>,
    pub(crate) values: Box<[f32]>,
    pub(crate) norm: f64,
}

pub(crate) type Shard = BTreeMap<Arc<str>, Arc<StoredVector>>;

/// One immutable, published version of the vector set.
///
/// Vectors are spread over a fixed number of shards by chunk id so that a write
/// copies only the shards it touches; untouched shards are shared with the
/// previous generation.
#[derive(Debug)]
pub(crate) struct Generation {
    pub(crate) number: u64,
    shards: Vec<Arc<Shard>>,
    len: usize,
}

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

fn shard_hash(chunk_id: &str) -> u64 {
    let mut h = FNV_OFFSET;
    for b in chunk_id.as_bytes() {
        h ^= u64::from(*b);
        h = h.wrapping_mul(FNV_PRIME);
    }
    h
}

impl Generation {
    pub(crate) fn empty(shard_count: usize) -> Self {
        let shard_count = shard_count.max(1);
        Self {
            number: 0,
            shards: (0..shard_count).map(|_| Arc::new(Shard::new())).collect(),
            len: 0,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    fn shard_of(&self, chunk_id: &str) -> usize {
        (shard_hash(chunk_id) % self.shards.len() as u64) as usize
    }

    pub(crate) fn get(&self, chunk_id: &str) -> Option<&Arc<StoredVector>> {
        self.shards[self.shard_of(chunk_id)].get(chunk_id)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (&Arc<str>, &Arc<StoredVector>)> {
        self.shards.iter().flat_map(|s| s.iter())
    }
}

/// Copy-on-write edit of a generation; `finish` yields its successor.
pub(crate) struct NextGeneration<'a> {
    base: &'a Generation,
    touched: BTreeMap<usize, Shard>,
    len: usize,
}

impl<'a> NextGeneration<'a> {
    pub(crate) fn new(base: &'a Generation) -> Self {
        Self {
            base,
            touched: BTreeMap::new(),
            len: base.len,
        }
    }

    fn shard_mut(&mut self, chunk_id: &str) -> &mut Shard {
        let base = self.base;
        let idx = base.shard_of(chunk_id);
        self.touched
            .entry(idx)
            .or_insert_with(|| Shard::clone(&base.shards[idx]))
    }

    pub(crate) fn insert(&mut self, chunk_id: Arc<str>, vector: StoredVector) {
        let replaced = self
            .shard_mut(&chunk_id)
            .insert(Arc::clone(&chunk_id), Arc::new(vector));
        if replaced.is_none() {
            self.len += 1;
        }
    }

    pub(crate) fn remove(&mut self, chunk_id: &str) -> bool {
        let idx = self.base.shard_of(chunk_id);
        let present = match self.touched.get(&idx) {
            Some(edited) => edited.contains_key(chunk_id),
            None => self.base.shards[idx].contains_key(chunk_id),
        };
        if !present {
            return false;
        }
        self.shard_mut(chunk_id).remove(chunk_id);
        self.len -= 1;
        true
    }

    pub(crate) fn is_unchanged(&self) -> bool {
        self.touched.is_empty()
    }

    pub(crate) fn finish(mut self) -> Generation {
        let shards = self
            .base
            .shards
            .iter()
            .enumerate()
            .map(|(idx, shard)| match self.touched.remove(&idx) {
                Some(edited) => Arc::new(edited),
                None => Arc::clone(shard),
            })
            .collect();
        Generation {
            number: self.base.number + 1,
            shards,
            len: self.len,
        }
    }
}
