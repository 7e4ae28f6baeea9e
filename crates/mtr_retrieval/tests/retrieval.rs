use pretty_assertions::assert_eq;
use tempfile::tempdir;

use mtr_core::config::EngineConfig;
use mtr_core::domain::{LocationHint, NewChunk, SourceInput};
use mtr_core::error::codes;
use mtr_core::repo::embeddings::EmbeddingWrite;
use mtr_retrieval::retrieve::RetrieveOptions;
use mtr_retrieval::{CancelToken, RetrievalEngine};

fn chunk_ids(citations: &[mtr_retrieval::citation::Citation]) -> Vec<&str> {
    citations.iter().map(|c| c.chunk_id.as_str()).collect()
}

fn seeded_engine() -> RetrievalEngine {
    let engine = RetrievalEngine::open_in_memory(EngineConfig::new(2)).expect("open");
    engine
        .register_source(SourceInput {
            source_id: "m1".to_string(),
            title: "Q1 Planning".to_string(),
            created_at: Some("2026-02-10T00:00:00Z".to_string()),
        })
        .expect("register");
    engine
        .put_chunks(
            "m1",
            vec![
                NewChunk::new("m1", 0, "We agreed to ship the beta in March.")
                    .with_id("c1")
                    .with_hints(vec![LocationHint::Page { number: 1 }]),
                NewChunk::new("m1", 1, "Hiring plan is postponed.").with_id("c2"),
                NewChunk::new("m1", 2, "Beta scope: onboarding and exports.").with_id("c3"),
            ],
        )
        .expect("put_chunks");

    let n = (0.9f32 * 0.9 + 0.1 * 0.1).sqrt();
    engine
        .upsert_embeddings(vec![
            EmbeddingWrite::new("c1", vec![1.0, 0.0]),
            EmbeddingWrite::new("c2", vec![0.0, 1.0]),
            EmbeddingWrite::new("c3", vec![0.9 / n, 0.1 / n]),
        ])
        .expect("embed");
    engine
}

#[test]
fn retrieve_cites_the_closest_chunks() {
    let engine = seeded_engine();
    let citations = engine
        .retrieve(&[1.0, 0.0], &RetrieveOptions::default().with_top_k(2))
        .expect("retrieve");

    assert_eq!(chunk_ids(&citations), vec!["c1", "c3"]);
    let first = &citations[0];
    assert_eq!(first.source_title, "Q1 Planning");
    assert_eq!(first.ordinal, 0);
    assert_eq!(first.excerpt, "We agreed to ship the beta in March.");
    assert!(!first.truncated);
    assert_eq!(first.location_hints, vec![LocationHint::Page { number: 1 }]);
}

#[test]
fn threshold_applies_before_the_cap() {
    let engine = seeded_engine();
    let opts = RetrieveOptions::default().with_min_similarity(0.95);
    let citations = engine.retrieve(&[1.0, 0.0], &opts).unwrap();
    assert_eq!(chunk_ids(&citations), vec!["c1", "c3"]);

    let strict = RetrieveOptions::default().with_min_similarity(0.999);
    let citations = engine.retrieve(&[1.0, 0.0], &strict).unwrap();
    assert_eq!(chunk_ids(&citations), vec!["c1"]);

    let impossible = RetrieveOptions::default().with_min_similarity(1.5);
    assert!(engine.retrieve(&[1.0, 0.0], &impossible).unwrap().is_empty());
}

#[test]
fn top_one_tie_picks_the_smaller_id() {
    let engine = RetrievalEngine::open_in_memory(EngineConfig::new(2)).unwrap();
    engine
        .put_chunk(NewChunk::new("m1", 0, "second").with_id("b"))
        .unwrap();
    engine
        .put_chunk(NewChunk::new("m1", 1, "first").with_id("a"))
        .unwrap();
    engine
        .upsert_embedding(EmbeddingWrite::new("b", vec![0.3, 0.4]))
        .unwrap();
    engine
        .upsert_embedding(EmbeddingWrite::new("a", vec![0.3, 0.4]))
        .unwrap();

    let citations = engine
        .retrieve(&[1.0, 1.0], &RetrieveOptions::default().with_top_k(1))
        .unwrap();
    assert_eq!(chunk_ids(&citations), vec!["a"]);
    // No registered source: the id doubles as the title.
    assert_eq!(citations[0].source_title, "m1");
}

#[test]
fn scope_limits_sources() {
    let engine = seeded_engine();
    engine
        .put_chunk(NewChunk::new("m2", 0, "Other meeting, same topic.").with_id("d1"))
        .unwrap();
    engine
        .upsert_embedding(EmbeddingWrite::new("d1", vec![1.0, 0.0]))
        .unwrap();

    let all = engine.retrieve(&[1.0, 0.0], &RetrieveOptions::default()).unwrap();
    assert_eq!(chunk_ids(&all), vec!["c1", "d1", "c3", "c2"]);

    let scoped = engine
        .retrieve(&[1.0, 0.0], &RetrieveOptions::default().with_scope(["m2"]))
        .unwrap();
    assert_eq!(chunk_ids(&scoped), vec!["d1"]);

    let nothing = engine
        .retrieve(
            &[1.0, 0.0],
            &RetrieveOptions::default().with_scope(Vec::<String>::new()),
        )
        .unwrap();
    assert!(nothing.is_empty());
}

#[test]
fn long_content_is_excerpted() {
    let engine = seeded_engine();
    let opts = RetrieveOptions::default().with_top_k(1).with_excerpt_length(15);
    let citations = engine.retrieve(&[1.0, 0.0], &opts).unwrap();
    assert_eq!(citations[0].excerpt, "We agreed to");
    assert!(citations[0].truncated);
}

#[test]
fn removing_a_source_removes_its_results() {
    let engine = seeded_engine();
    let removed = engine.remove_source("m1").unwrap();
    assert_eq!(removed, vec!["c1", "c2", "c3"]);
    assert!(engine
        .retrieve(&[1.0, 0.0], &RetrieveOptions::default())
        .unwrap()
        .is_empty());
    assert!(engine.remove_source("m1").unwrap().is_empty());
    assert_eq!(engine.status().unwrap().embedding_count, 0);
}

#[test]
fn invalid_requests_fail_fast() {
    let engine = seeded_engine();
    let err = engine
        .retrieve(&[1.0, 0.0, 0.0], &RetrieveOptions::default())
        .unwrap_err();
    assert!(err.is(codes::DIMENSION_MISMATCH));

    let err = engine
        .retrieve(&[1.0, 0.0], &RetrieveOptions::default().with_top_k(0))
        .unwrap_err();
    assert!(err.is(codes::INVALID_K));

    let token = CancelToken::new();
    token.cancel();
    let err = engine
        .retrieve_with_cancel(&[1.0, 0.0], &RetrieveOptions::default(), &token)
        .unwrap_err();
    assert!(err.is(codes::CANCELLED));
}

#[test]
fn vectors_survive_reopen_exactly() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("corpus").join("meetings.sqlite");
    let odd = vec![0.1f32, -3.333_333_3, 1.0e-7];

    {
        let engine = RetrievalEngine::open(&path, EngineConfig::new(3)).expect("create");
        engine
            .put_chunk(NewChunk::new("m1", 0, "persist me").with_id("c1"))
            .unwrap();
        engine
            .upsert_embedding(EmbeddingWrite::new("c1", odd.clone()))
            .unwrap();
    }

    let engine = RetrievalEngine::open(&path, EngineConfig::new(3)).expect("reopen");
    let status = engine.status().unwrap();
    assert_eq!(status.indexed_vectors, 1);
    assert_eq!(status.embedding_count, 1);

    let restored = engine.snapshot().vector("c1").expect("loaded");
    assert_eq!(
        restored.iter().map(|v| v.to_bits()).collect::<Vec<_>>(),
        odd.iter().map(|v| v.to_bits()).collect::<Vec<_>>()
    );

    let hits = engine.search(&odd, 1, None).unwrap();
    assert!((hits[0].similarity - 1.0).abs() < 1e-6);
    drop(engine);

    let err = RetrievalEngine::open(&path, EngineConfig::new(4))
        .err()
        .expect("dimension pinned");
    assert!(err.is(codes::DIMENSION_MISMATCH));
}

#[test]
fn embeddings_for_unknown_chunks_never_reach_the_index() {
    let engine = seeded_engine();
    let before = engine.index_status();

    let err = engine
        .upsert_embedding(EmbeddingWrite::new("ghost", vec![1.0, 0.0]))
        .unwrap_err();
    assert!(err.is(codes::UNKNOWN_CHUNK));
    let err = engine
        .upsert_embeddings(vec![
            EmbeddingWrite::new("c2", vec![1.0, 0.0]),
            EmbeddingWrite::new("ghost", vec![1.0, 0.0]),
        ])
        .unwrap_err();
    assert!(err.is(codes::UNKNOWN_CHUNK));

    assert_eq!(engine.index_status(), before);
    assert_eq!(engine.snapshot().vector("ghost"), None);
    assert_eq!(engine.snapshot().vector("c2"), Some(vec![0.0, 1.0]));
    let status = engine.status().unwrap();
    assert_eq!(status.indexed_vectors as u64, status.embedding_count);
    let hits = engine.search(&[1.0, 0.0], 10, None).unwrap();
    assert!(hits.iter().all(|h| h.chunk_id != "ghost"));
}
