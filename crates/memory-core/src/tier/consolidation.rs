//! Consolidator
//!
//! Runs at the end of every sweep: exact dedup by `content_hash`, a
//! near-duplicate pass over recently-touched memories, then Working-tier
//! eviction, driven by importance and recency rather than a spaced-
//! repetition strength model.

use crate::concurrency::IdLocks;
use crate::config::EngineConfig;
use crate::embeddings::{cosine_similarity, Embedder};
use crate::memory::{Memory, Tier, VaultScope};
use crate::storage::{RelationalStore, VectorStore};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct ConsolidationOutcome {
    pub duplicates_merged: i64,
    pub near_duplicates_merged: i64,
    pub evicted: i64,
}

pub struct Consolidator {
    relational: Arc<dyn RelationalStore>,
    vector: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    config: EngineConfig,
    id_locks: Arc<IdLocks>,
}

impl Consolidator {
    pub fn new(
        relational: Arc<dyn RelationalStore>,
        vector: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        config: EngineConfig,
        id_locks: Arc<IdLocks>,
    ) -> Self {
        Self { relational, vector, embedder, config, id_locks }
    }

    pub fn consolidate(&self, touched: &[Memory]) -> ConsolidationOutcome {
        let mut outcome = ConsolidationOutcome::default();
        outcome.duplicates_merged += self.dedup_by_content_hash(Tier::Session);
        outcome.duplicates_merged += self.dedup_by_content_hash(Tier::LongTerm);
        outcome.near_duplicates_merged += self.near_duplicate_pass(touched);
        outcome.evicted += self.evict_working();
        outcome
    }

    /// Within each `content_hash` group in a tier, keep the highest-importance
    /// row, merge `access_count`, take max `last_accessed_at`, union metadata.
    fn dedup_by_content_hash(&self, tier: Tier) -> i64 {
        let mut groups: HashMap<(String, VaultScope), Vec<Memory>> = HashMap::new();
        let mut after = None;
        loop {
            let page = match self.relational.page_by_tier(tier, after.clone(), self.config.sweep_batch) {
                Ok(p) => p,
                Err(e) => {
                    tracing::warn!(error = %e, "consolidator: page_by_tier failed");
                    break;
                }
            };
            if page.is_empty() {
                break;
            }
            after = page.last().map(|m| (m.created_at, m.id.clone()));
            let exhausted = page.len() < self.config.sweep_batch;
            for m in page {
                groups.entry((m.content_hash.clone(), m.vault_scope)).or_default().push(m);
            }
            if exhausted {
                break;
            }
        }

        let mut merged = 0;
        for (_, mut group) in groups {
            if group.len() < 2 {
                continue;
            }
            group.sort_by(|a, b| b.importance.partial_cmp(&a.importance).unwrap_or(std::cmp::Ordering::Equal));
            let survivor = merge_group(&group);
            for m in &group[1..] {
                let deleted = self.id_locks.with_lock(&m.id, || self.relational.delete(&m.id));
                if let Err(e) = deleted {
                    tracing::warn!(id = %m.id, error = %e, "consolidator: dedup delete failed");
                    continue;
                }
                let _ = self.vector.remove(tier, &m.id);
                merged += 1;
            }
            let persisted = self.id_locks.with_lock(&survivor.id, || self.apply_merged(&survivor));
            if let Err(e) = persisted {
                tracing::warn!(id = %survivor.id, error = %e, "consolidator: failed to persist merge");
            }
        }
        merged
    }

    /// For recently-touched rows, find the closest neighbor in the same
    /// tier; merge if similarity >= dedup_sim and importance delta < 0.05.
    fn near_duplicate_pass(&self, touched: &[Memory]) -> i64 {
        let mut merged = 0;
        for m in touched {
            if m.pending_embedding || m.quarantined {
                continue;
            }
            let embedding = match self.embedder.embed(&m.content) {
                Ok(v) => v,
                Err(_) => continue,
            };
            let neighbors = match self.vector.search(&[m.tier], &embedding, 3, 0.0) {
                Ok(v) => v,
                Err(_) => continue,
            };
            for (other_id, similarity) in neighbors {
                if other_id == m.id || similarity < self.config.dedup_sim {
                    continue;
                }
                let Ok(Some(other)) = self.relational.get(&other_id) else { continue };
                if (other.importance - m.importance).abs() >= 0.05 {
                    continue;
                }
                let mut pair = vec![m.clone(), other.clone()];
                pair.sort_by(|a, b| b.importance.partial_cmp(&a.importance).unwrap_or(std::cmp::Ordering::Equal));
                let survivor = merge_group(&pair);
                let loser = if survivor.id == m.id { &other } else { m };
                let deleted = self.id_locks.with_lock(&loser.id, || self.relational.delete(&loser.id));
                if deleted.is_ok() {
                    let _ = self.vector.remove(loser.tier, &loser.id);
                    let persisted = self.id_locks.with_lock(&survivor.id, || self.apply_merged(&survivor));
                    if persisted.is_ok() {
                        merged += 1;
                    }
                }
            }
        }
        merged
    }

    fn evict_working(&self) -> i64 {
        let mut evicted = 0;
        let now = chrono::Utc::now();
        let mut after = None;
        loop {
            let page = match self.relational.page_by_tier(Tier::Working, after.clone(), self.config.sweep_batch) {
                Ok(p) => p,
                Err(e) => {
                    tracing::warn!(error = %e, "consolidator: evict page failed");
                    break;
                }
            };
            if page.is_empty() {
                break;
            }
            after = page.last().map(|m| (m.created_at, m.id.clone()));
            let exhausted = page.len() < self.config.sweep_batch;

            for m in page {
                let age = now - m.created_at;
                if m.importance < self.config.evict_min_importance && age > self.config.evict_age {
                    let deleted = self.id_locks.with_lock(&m.id, || self.relational.delete(&m.id));
                    if deleted.is_ok() {
                        let _ = self.vector.remove(Tier::Working, &m.id);
                        evicted += 1;
                    }
                }
            }
            if exhausted {
                break;
            }
        }
        evicted
    }

    /// Persist the merged survivor's access_count/last_accessed_at/metadata.
    /// `RelationalStore` exposes only narrow field setters plus `insert`, so
    /// replace the row wholesale rather than adding a bespoke update method.
    fn apply_merged(&self, survivor: &Memory) -> crate::storage::RelationalResult<()> {
        let _ = self.relational.delete(&survivor.id);
        self.relational.insert(survivor)
    }
}

fn merge_group(group: &[Memory]) -> Memory {
    let mut survivor = group[0].clone();
    let total_access: i64 = group.iter().map(|m| m.access_count).sum();
    let max_last_accessed = group.iter().map(|m| m.last_accessed_at).max().unwrap_or(survivor.last_accessed_at);
    let mut metadata = survivor.metadata.clone();
    for m in &group[1..] {
        for (k, v) in &m.metadata {
            metadata.entry(k.clone()).or_insert_with(|| v.clone());
        }
    }
    survivor.access_count = total_access;
    survivor.last_accessed_at = max_last_accessed;
    survivor.metadata = metadata;
    survivor
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::FakeEmbedder;
    use crate::memory::{content_hash, Metadata, VaultScope};
    use crate::storage::{FlatVectorIndex, SqliteStore};

    fn sample(id: &str, content: &str, importance: f64, tier: Tier, access_count: i64) -> Memory {
        sample_scoped(id, content, importance, tier, access_count, VaultScope::Core)
    }

    fn sample_scoped(
        id: &str,
        content: &str,
        importance: f64,
        tier: Tier,
        access_count: i64,
        vault_scope: VaultScope,
    ) -> Memory {
        let now = chrono::Utc::now();
        Memory {
            id: id.to_string(),
            content: content.to_string(),
            content_hash: content_hash(content),
            context: "general".to_string(),
            importance,
            tier,
            created_at: now,
            last_accessed_at: now,
            access_count,
            metadata: Metadata::new(),
            vault_scope,
            pending_embedding: false,
            quarantined: false,
            consecutive_sweep_failures: 0,
        }
    }

    fn consolidator() -> (Consolidator, Arc<dyn RelationalStore>, Arc<dyn VectorStore>) {
        let cfg = EngineConfig { embedding_dim: 8, ..EngineConfig::default() };
        let r: Arc<dyn RelationalStore> = Arc::new(SqliteStore::open_in_memory().unwrap());
        let v: Arc<dyn VectorStore> = Arc::new(FlatVectorIndex::new(8));
        let e: Arc<dyn Embedder> = Arc::new(FakeEmbedder::new(8));
        let c = Consolidator::new(r.clone(), v.clone(), e, cfg, Arc::new(IdLocks::new()));
        (c, r, v)
    }

    #[test]
    fn dedup_keeps_highest_importance_survivor() {
        let (c, r, _v) = consolidator();
        r.insert(&sample("a", "same text", 0.9, Tier::Session, 3)).unwrap();
        r.insert(&sample("b", "same text", 0.4, Tier::Session, 5)).unwrap();

        let merged = c.dedup_by_content_hash(Tier::Session);

        assert_eq!(merged, 1);
        assert!(r.get("a").unwrap().is_some());
        assert!(r.get("b").unwrap().is_none());
        assert_eq!(r.get("a").unwrap().unwrap().access_count, 8);
    }

    #[test]
    fn dedup_spares_rows_with_same_content_in_different_vault_scopes() {
        let (c, r, _v) = consolidator();
        r.insert(&sample_scoped("a", "same text", 0.9, Tier::Session, 3, VaultScope::Core)).unwrap();
        r.insert(&sample_scoped("b", "same text", 0.4, Tier::Session, 5, VaultScope::Project)).unwrap();

        let merged = c.dedup_by_content_hash(Tier::Session);

        assert_eq!(merged, 0);
        assert!(r.get("a").unwrap().is_some());
        assert!(r.get("b").unwrap().is_some());
    }

    #[test]
    fn evict_working_removes_low_importance_old_rows() {
        let (c, r, _v) = consolidator();
        let mut old = sample("a", "stale", 0.1, Tier::Working, 0);
        old.created_at = chrono::Utc::now() - chrono::Duration::hours(100);
        r.insert(&old).unwrap();

        let evicted = c.evict_working();

        assert_eq!(evicted, 1);
        assert!(r.get("a").unwrap().is_none());
    }

    #[test]
    fn evict_working_spares_important_old_rows() {
        let (c, r, _v) = consolidator();
        let mut old = sample("a", "keep me", 0.9, Tier::Working, 0);
        old.created_at = chrono::Utc::now() - chrono::Duration::hours(100);
        r.insert(&old).unwrap();

        let evicted = c.evict_working();

        assert_eq!(evicted, 0);
        assert!(r.get("a").unwrap().is_some());
    }
}
