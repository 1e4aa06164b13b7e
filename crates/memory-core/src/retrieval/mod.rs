//! Retrieval engine
//!
//! Three search modes over the `Repository` facade:
//! `search_exact` (R's FTS5), `search_semantic` (V's cosine index, with
//! stale hits discarded), and `search_hybrid` (fuses both via
//! `scoring::blend_hybrid`).

mod scoring;

pub use scoring::{
    blend_hybrid, context_match_score, frequency_score, match_position, match_quality,
    match_quality_rank, recency_score, score_memory,
};

use crate::config::ScoringWeights;
use crate::embeddings::{embed_with_retry, BackoffPolicy, Embedder};
use crate::error::{EngineError, Result};
use crate::memory::{Filter, MatchQuality, Memory, RecallOutcome, ScoredMemory, SearchMode, Signals, Tier};
use crate::storage::{RelationalStore, VectorStore};
use chrono::Utc;
use std::sync::Arc;

pub struct RetrievalEngine {
    relational: Arc<dyn RelationalStore>,
    vector: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    weights: ScoringWeights,
    semantic_min_similarity: f32,
    exact_weight_default: f64,
}

impl RetrievalEngine {
    pub fn new(
        relational: Arc<dyn RelationalStore>,
        vector: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        weights: ScoringWeights,
        semantic_min_similarity: f32,
        exact_weight_default: f64,
    ) -> Self {
        Self {
            relational,
            vector,
            embedder,
            weights,
            semantic_min_similarity,
            exact_weight_default,
        }
    }

    fn tiers_for(&self, filter: &Filter) -> Vec<Tier> {
        filter
            .tiers
            .clone()
            .unwrap_or_else(|| vec![Tier::Working, Tier::Session, Tier::LongTerm])
    }

    /// Exact-search ranking: strictly ordered by
    /// `(match_quality, earliest_match_position, recency)`, no embedding call
    /// and no multi-signal `score_memory` blend — exact search ranks purely
    /// on how and where the query text matched.
    pub fn search_exact(&self, query: &str, filter: &Filter, limit: usize) -> Result<Vec<ScoredMemory>> {
        let now = Utc::now();
        let rows = self.relational.exact_search(query, filter, limit)?;

        struct Ranked {
            memory: Memory,
            quality: MatchQuality,
            position: usize,
            recency: f64,
        }

        let mut ranked: Vec<Ranked> = rows
            .into_iter()
            .map(|m| {
                let quality = match_quality(&m.content, query);
                let position = match_position(&m.content, query).unwrap_or(usize::MAX);
                let recency = recency_score(m.last_accessed_at, now, self.weights.recency_tau_days);
                Ranked { memory: m, quality, position, recency }
            })
            .collect();

        ranked.sort_by(|a, b| {
            match_quality_rank(b.quality)
                .partial_cmp(&match_quality_rank(a.quality))
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.position.cmp(&b.position))
                .then_with(|| b.recency.partial_cmp(&a.recency).unwrap_or(std::cmp::Ordering::Equal))
        });
        ranked.truncate(limit);

        Ok(ranked
            .into_iter()
            .map(|r| {
                let rank = match_quality_rank(r.quality);
                let signals = Signals {
                    similarity: None,
                    recency: Some(r.recency),
                    importance: Some(r.memory.importance),
                    frequency: None,
                    context_match: None,
                    exact_rank: Some(rank),
                };
                ScoredMemory { memory: r.memory, score: rank, signals }
            })
            .collect())
    }

    pub fn search_semantic(&self, query: &str, filter: &Filter, limit: usize) -> Result<Vec<ScoredMemory>> {
        let now = Utc::now();
        let embedding = embed_with_retry(self.embedder.as_ref(), query, BackoffPolicy::default())
            .map_err(EngineError::from)?;
        let tiers = self.tiers_for(filter);
        let hits = self
            .vector
            .search(&tiers, &embedding, limit, self.semantic_min_similarity)?;

        let mut out = Vec::new();
        for (id, similarity) in hits {
            // R is the source of truth; a V hit absent from R (or already
            // quarantined) is discarded here and left for `Repair` to clean up.
            match self.relational.get(&id)? {
                Some(m) if !m.quarantined && filter_matches(&m, filter) => {
                    let (score, signals) = score_memory(
                        &m,
                        Some(similarity as f64),
                        filter.context.as_deref(),
                        None,
                        now,
                        &self.weights,
                    );
                    out.push(ScoredMemory { memory: m, score, signals });
                }
                _ => continue,
            }
        }
        out.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        out.truncate(limit);
        Ok(out)
    }

    pub fn search_hybrid(
        &self,
        query: &str,
        filter: &Filter,
        limit: usize,
        exact_weight: Option<f64>,
    ) -> Result<RecallOutcome> {
        let fetch_limit = (limit * 2).max(limit);
        let exact = self.search_exact(query, filter, fetch_limit)?;
        // A down embedder degrades hybrid to exact-only rather than failing
        // the whole search; semantic failures are non-fatal to retrieval as
        // long as exact search still works.
        let (semantic, degraded) = match self.search_semantic(query, filter, fetch_limit) {
            Ok(hits) => (hits, false),
            Err(EngineError::EmbedUnavailable(msg)) => {
                tracing::warn!(error = %msg, "hybrid search degraded to exact-only: embedder unavailable");
                (Vec::new(), true)
            }
            Err(e) => return Err(e),
        };

        let exact_pairs: Vec<(String, f64)> = exact.iter().map(|s| (s.memory.id.clone(), s.score)).collect();
        let semantic_pairs: Vec<(String, f64)> = semantic.iter().map(|s| (s.memory.id.clone(), s.score)).collect();

        let weight = exact_weight.unwrap_or(self.exact_weight_default);
        let blended = blend_hybrid(&exact_pairs, &semantic_pairs, weight);

        let mut by_id: std::collections::HashMap<String, ScoredMemory> = std::collections::HashMap::new();
        for s in exact.into_iter().chain(semantic.into_iter()) {
            by_id.entry(s.memory.id.clone()).or_insert(s);
        }

        let mut hits = Vec::new();
        for (id, blended_score) in blended {
            if let Some(mut scored) = by_id.remove(&id) {
                scored.score = blended_score;
                hits.push(scored);
            }
            if hits.len() >= limit {
                break;
            }
        }
        Ok(RecallOutcome { hits, degraded })
    }

    pub fn search(&self, query: &str, mode: SearchMode, filter: &Filter, limit: usize) -> Result<RecallOutcome> {
        match mode {
            SearchMode::Exact => self.search_exact(query, filter, limit).map(|hits| RecallOutcome { hits, degraded: false }),
            SearchMode::Semantic => self
                .search_semantic(query, filter, limit)
                .map(|hits| RecallOutcome { hits, degraded: false })
                .map_err(|e| match e {
                    // A pure semantic read has no exact-search fallback, so an
                    // embedder failure here is fatal to the request rather than
                    // a degrade signal the way it is inside `search_hybrid`.
                    EngineError::EmbedUnavailable(msg) => EngineError::SemanticUnavailable(msg),
                    other => other,
                }),
            SearchMode::Hybrid => self.search_hybrid(query, filter, limit, None),
        }
    }
}

fn filter_matches(memory: &crate::memory::Memory, filter: &Filter) -> bool {
    if let Some(tiers) = &filter.tiers {
        if !tiers.contains(&memory.tier) {
            return false;
        }
    }
    if let Some(vault) = filter.vault_scope {
        if memory.vault_scope != vault {
            return false;
        }
    }
    filter.metadata.iter().all(|(k, v)| {
        memory.metadata.get(k).map(|mv| format!("{mv}") == format!("{v}")).unwrap_or(false)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::embeddings::FakeEmbedder;
    use crate::memory::{content_hash, Memory, Metadata, VaultScope};
    use crate::storage::{FlatVectorIndex, SqliteStore};

    fn engine() -> (RetrievalEngine, Arc<dyn RelationalStore>, Arc<dyn VectorStore>, Arc<dyn Embedder>) {
        let cfg = EngineConfig::default();
        let r: Arc<dyn RelationalStore> = Arc::new(SqliteStore::open_in_memory().unwrap());
        let v: Arc<dyn VectorStore> = Arc::new(FlatVectorIndex::new(cfg.embedding_dim));
        let e: Arc<dyn Embedder> = Arc::new(FakeEmbedder::new(cfg.embedding_dim));
        let engine = RetrievalEngine::new(
            r.clone(),
            v.clone(),
            e.clone(),
            cfg.scoring_weights.clone(),
            cfg.semantic_min_similarity,
            cfg.exact_weight_default,
        );
        (engine, r, v, e)
    }

    fn insert(r: &Arc<dyn RelationalStore>, v: &Arc<dyn VectorStore>, e: &Arc<dyn Embedder>, id: &str, content: &str) {
        let now = Utc::now();
        let m = Memory {
            id: id.to_string(),
            content: content.to_string(),
            content_hash: content_hash(content),
            context: "general".to_string(),
            importance: 0.6,
            tier: Tier::Working,
            created_at: now,
            last_accessed_at: now,
            access_count: 2,
            metadata: Metadata::new(),
            vault_scope: VaultScope::Core,
            pending_embedding: false,
            quarantined: false,
            consecutive_sweep_failures: 0,
        };
        r.insert(&m).unwrap();
        let vec = e.embed(content).unwrap();
        v.upsert(Tier::Working, id, &vec).unwrap();
    }

    #[test]
    fn exact_search_finds_substring_match() {
        let (engine, r, v, e) = engine();
        insert(&r, &v, &e, "a", "the quick brown fox jumps");
        let hits = engine.search_exact("quick", &Filter::default(), 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].memory.id, "a");
    }

    #[test]
    fn semantic_search_discards_vector_hit_missing_from_relational_store() {
        let (engine, _r, v, e) = engine();
        let orphan_vec = e.embed("ghost content").unwrap();
        v.upsert(Tier::Working, "ghost", &orphan_vec).unwrap();
        let hits = engine.search_semantic("ghost content", &Filter::default(), 10).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn hybrid_search_merges_both_lists() {
        let (engine, r, v, e) = engine();
        insert(&r, &v, &e, "a", "database migration plan for next quarter");
        let outcome = engine.search_hybrid("migration", &Filter::default(), 10, None).unwrap();
        assert!(!outcome.degraded);
        assert!(!outcome.hits.is_empty());
        assert_eq!(outcome.hits[0].memory.id, "a");
    }

    #[test]
    fn semantic_only_search_fails_with_semantic_unavailable_when_embedder_down() {
        let cfg = EngineConfig::default();
        let r: Arc<dyn RelationalStore> = Arc::new(SqliteStore::open_in_memory().unwrap());
        let v: Arc<dyn VectorStore> = Arc::new(FlatVectorIndex::new(cfg.embedding_dim));
        let e: Arc<dyn Embedder> = Arc::new(crate::embeddings::FakeEmbedder::unready(cfg.embedding_dim));
        let engine = RetrievalEngine::new(
            r,
            v,
            e,
            cfg.scoring_weights.clone(),
            cfg.semantic_min_similarity,
            cfg.exact_weight_default,
        );

        let result = engine.search("anything", SearchMode::Semantic, &Filter::default(), 10);

        assert!(matches!(result, Err(EngineError::SemanticUnavailable(_))));
    }

    #[test]
    fn hybrid_search_degrades_to_exact_only_when_embedder_unavailable() {
        let cfg = EngineConfig::default();
        let r: Arc<dyn RelationalStore> = Arc::new(SqliteStore::open_in_memory().unwrap());
        let v: Arc<dyn VectorStore> = Arc::new(FlatVectorIndex::new(cfg.embedding_dim));
        let e: Arc<dyn Embedder> = Arc::new(crate::embeddings::FakeEmbedder::unready(cfg.embedding_dim));
        let engine = RetrievalEngine::new(
            r.clone(),
            v.clone(),
            e.clone(),
            cfg.scoring_weights.clone(),
            cfg.semantic_min_similarity,
            cfg.exact_weight_default,
        );
        let now = Utc::now();
        let m = Memory {
            id: "a".to_string(),
            content: "the build command is make release".to_string(),
            content_hash: content_hash("the build command is make release"),
            context: "general".to_string(),
            importance: 0.9,
            tier: Tier::Working,
            created_at: now,
            last_accessed_at: now,
            access_count: 0,
            metadata: Metadata::new(),
            vault_scope: VaultScope::Core,
            pending_embedding: true,
            quarantined: false,
            consecutive_sweep_failures: 0,
        };
        r.insert(&m).unwrap();

        let outcome = engine.search_hybrid("make release", &Filter::default(), 10, None).unwrap();
        assert!(outcome.degraded);
        assert_eq!(outcome.hits.len(), 1);
        assert_eq!(outcome.hits[0].memory.id, "a");
    }
}
