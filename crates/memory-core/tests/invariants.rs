//! Property-style checks for core engine invariants, each reduced to a
//! concrete, deterministic check against the public engine interface.

use memory_core::embeddings::FakeEmbedder;
use memory_core::storage::{FlatVectorIndex, SqliteStore};
use memory_core::{EngineConfig, Filter, MemoryEngine, MemoryInput, SearchMode, Tier};
use std::sync::Arc;

const DIM: usize = 16;

fn engine() -> MemoryEngine {
    let config = EngineConfig { embedding_dim: DIM, ..EngineConfig::default() };
    let relational = Arc::new(SqliteStore::open_in_memory().unwrap());
    let vector = Arc::new(FlatVectorIndex::new(DIM));
    let embedder = Arc::new(FakeEmbedder::new(DIM));
    MemoryEngine::new(relational, vector, embedder, config)
}

/// 1. Index consistency: a successfully-embedded row is findable by
/// semantic search in exactly the tier recorded on its R row.
#[test]
fn index_consistency_semantic_hit_matches_recorded_tier() {
    let engine = engine();
    let result = engine
        .store(MemoryInput::new("architecture decision: adopt event sourcing for the ledger").with_context("decision"))
        .unwrap();
    assert!(result.stored);
    let id = result.id.unwrap();
    assert!(!engine.get(&id).unwrap().unwrap().pending_embedding);

    // Query with the stored content itself: the deterministic fake embedder
    // gives identical text identical vectors, guaranteeing similarity 1.0
    // regardless of the min-similarity threshold.
    let hits = engine
        .recall(
            "architecture decision: adopt event sourcing for the ledger",
            SearchMode::Semantic,
            &Filter::default(),
            5,
        )
        .unwrap();
    let hit = hits.hits.iter().find(|h| h.memory.id == id).expect("stored row should be semantically findable");
    assert_eq!(hit.memory.tier, Tier::Working);
}

/// 2. Migration monotonicity: `Tier::next()` only ever moves forward, never
/// backward, and `LongTerm` is terminal.
#[test]
fn migration_monotonicity_tier_transitions_never_reverse() {
    assert_eq!(Tier::Working.next(), Some(Tier::Session));
    assert_eq!(Tier::Session.next(), Some(Tier::LongTerm));
    assert_eq!(Tier::LongTerm.next(), None);
}

/// 3. No retrieval gap: a recall issued right after a successful store
/// always finds that id when searching on its own content.
#[test]
fn no_retrieval_gap_between_store_and_recall() {
    let engine = engine();
    let result = engine
        .store(MemoryInput::new("reference note: the staging cluster uses region us-east-2").with_context("reference"))
        .unwrap();
    assert!(result.stored);
    let id = result.id.unwrap();

    let hits = engine
        .recall(
            "reference note: the staging cluster uses region us-east-2",
            SearchMode::Exact,
            &Filter::default(),
            10,
        )
        .unwrap();
    assert!(hits.hits.iter().any(|h| h.memory.id == id));
}

/// 4. Round-trip exact: `store(c)` then `search_exact(c)` returns the new id
/// with a non-zero score.
#[test]
fn round_trip_exact_search_returns_nonzero_score() {
    let engine = engine();
    let content = "operational runbook: restart the ingestion worker pool on failure";
    let result = engine.store(MemoryInput::new(content).with_context("reference")).unwrap();
    let id = result.id.unwrap();

    let hits = engine.recall(content, SearchMode::Exact, &Filter::default(), 10).unwrap();
    let hit = hits.hits.iter().find(|h| h.memory.id == id).unwrap();
    assert!(hit.score > 0.0);
}

/// 5. Scoring bounds: every returned score sits in [0,1], and the
/// configured scoring weights sum to 1.0.
#[test]
fn scoring_bounds_are_respected() {
    let engine = engine();
    for i in 0..5 {
        engine
            .store(MemoryInput::new(format!("decision number {i} about the release process")).with_context("decision"))
            .unwrap();
    }
    let hits = engine.recall("release process decision", SearchMode::Hybrid, &Filter::default(), 10).unwrap();
    assert!(!hits.hits.is_empty());
    for hit in &hits.hits {
        assert!((0.0..=1.0).contains(&hit.score), "score {} out of bounds", hit.score);
    }

    let weights = EngineConfig::default().scoring_weights;
    let sum = weights.similarity + weights.recency + weights.importance + weights.frequency + weights.context_match;
    assert!((sum - 1.0).abs() < 1e-9);
}

/// 6. Deduplication: after consolidation, no two memories in {Session,
/// LongTerm} share a `content_hash`.
#[test]
fn deduplication_removes_content_hash_collisions_after_consolidation() {
    let config = EngineConfig { embedding_dim: DIM, working_to_session_age: chrono::Duration::milliseconds(1), ..EngineConfig::default() };
    let relational = Arc::new(SqliteStore::open_in_memory().unwrap());
    let vector = Arc::new(FlatVectorIndex::new(DIM));
    let embedder = Arc::new(FakeEmbedder::new(DIM));
    let engine = MemoryEngine::new(relational, vector, embedder, config);

    let content = "shared postmortem summary for the outage last tuesday";
    engine.store(MemoryInput::new(content).with_context("decision").with_importance_override(0.75)).unwrap();
    engine.store(MemoryInput::new(content).with_context("decision").with_importance_override(0.55)).unwrap();

    std::thread::sleep(std::time::Duration::from_millis(10));
    engine.run_sweep();

    let stats = engine.get_stats().unwrap();
    assert_eq!(stats.session.count, 1);
}

/// 7. Idempotent delete: deleting a non-existent id is reported as not
/// found rather than panicking, and deleting twice never corrupts state.
#[test]
fn idempotent_delete_of_missing_id_does_not_panic() {
    let engine = engine();
    let result = engine.store(MemoryInput::new("note to delete").with_context("reference")).unwrap();
    let id = result.id.unwrap();

    engine.delete(&id).unwrap();
    assert!(engine.get(&id).unwrap().is_none());
    assert!(engine.delete(&id).is_ok());
    assert!(engine.delete("never-existed").is_ok());
}
