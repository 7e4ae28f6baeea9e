/// Scale checks for the in-memory index. Run with `--ignored`.
use std::time::Instant;

use mtr_retrieval::index::{EmbeddingIndex, IndexEntry};
use mtr_retrieval::CancelToken;

const DIM: usize = 64;

fn synthetic_vector(i: usize) -> Vec<f32> {
    (0..DIM)
        .map(|d| (((i * 31 + d * 17) % 97) as f32 / 97.0) - 0.5)
        .collect()
}

fn build(n: usize) -> EmbeddingIndex {
    let index = EmbeddingIndex::new(DIM, 64, 1024);
    let entries = (0..n)
        .map(|i| IndexEntry {
            chunk_id: format!("chunk-{i:07}"),
            source_id: format!("meeting-{}", i % 500),
            vector: synthetic_vector(i),
        })
        .collect();
    index.upsert_many(entries).unwrap();
    index
}

#[test]
#[ignore]
fn stress_search_100k_vectors() {
    let start = Instant::now();
    let index = build(100_000);
    eprintln!("index build (100K x {DIM}): {:?}", start.elapsed());

    let query = synthetic_vector(42);
    let start = Instant::now();
    let hits = index.search(&query, 10, None, &CancelToken::new()).unwrap();
    let elapsed = start.elapsed();
    eprintln!("unscoped search (100K): {elapsed:?}");

    assert_eq!(hits.len(), 10);
    assert!((hits[0].similarity - 1.0).abs() < 1e-5);
    assert!(elapsed.as_secs() < 2, "search should finish in under 2s");
}

#[test]
#[ignore]
fn stress_single_upsert_copies_one_shard() {
    let index = build(100_000);

    let start = Instant::now();
    for i in 0..1_000 {
        index
            .upsert(&format!("extra-{i:04}"), "meeting-new", synthetic_vector(i))
            .unwrap();
    }
    let elapsed = start.elapsed();
    eprintln!("1000 single upserts on 100K index: {elapsed:?}");

    assert_eq!(index.len(), 101_000);
    assert!(elapsed.as_secs() < 10, "copy-on-write upserts should stay cheap");
}

#[test]
#[ignore]
fn stress_scoped_search_matches_filtered_unscoped() {
    let index = build(50_000);
    let query = synthetic_vector(7);
    let scope = vec!["meeting-7".to_string(), "meeting-8".to_string()];

    let scoped = index
        .search(&query, 20, Some(scope.as_slice()), &CancelToken::new())
        .unwrap();
    let unscoped: Vec<_> = index
        .search(&query, 50_000, None, &CancelToken::new())
        .unwrap()
        .into_iter()
        .filter(|h| scope.contains(&h.source_id))
        .take(20)
        .collect();
    assert_eq!(scoped, unscoped);
}
