//! Repair worker
//!
//! Reconciles R and V after crashes or partial writes — the overlap
//! update_tier protocol can be interrupted between its insert-into-new-V
//! and remove-from-old-V steps. Runs on a timer or on demand.

use crate::embeddings::{embed_with_retry, BackoffPolicy, Embedder};
use crate::memory::Tier;
use crate::storage::{RelationalStore, VectorStore};
use std::sync::Arc;

/// Outcome of one repair pass
#[derive(Debug, Clone, Default)]
pub struct RepairReport {
    pub embedded: i64,
    pub embed_failed: i64,
    pub stale_vector_entries_removed: i64,
    pub missing_vector_entries_reinserted: i64,
}

pub struct Repair {
    relational: Arc<dyn RelationalStore>,
    vector: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    backoff: BackoffPolicy,
}

impl Repair {
    pub fn new(
        relational: Arc<dyn RelationalStore>,
        vector: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        Self {
            relational,
            vector,
            embedder,
            backoff: BackoffPolicy::default(),
        }
    }

    /// (a) retry embedding for pending rows, (b) drop V entries with no
    /// matching R row, (c) re-embed+reinsert R rows missing from their
    /// tier's V collection.
    pub fn run_once(&self, batch: usize) -> RepairReport {
        let mut report = RepairReport::default();

        for tier in [Tier::Working, Tier::Session, Tier::LongTerm] {
            let mut after = None;
            loop {
                let page = match self.relational.page_by_tier(tier, after.clone(), batch) {
                    Ok(p) => p,
                    Err(e) => {
                        tracing::warn!(error = %e, "repair: page_by_tier failed");
                        break;
                    }
                };
                if page.is_empty() {
                    break;
                }
                let last = page.last().map(|m| (m.created_at, m.id.clone()));

                for memory in &page {
                    if memory.pending_embedding {
                        match embed_with_retry(self.embedder.as_ref(), &memory.content, self.backoff) {
                            Ok(vector) => {
                                if self.vector.upsert(tier, &memory.id, &vector).is_ok() {
                                    let _ = self.relational.set_pending_embedding(&memory.id, false);
                                    report.embedded += 1;
                                } else {
                                    report.embed_failed += 1;
                                }
                            }
                            Err(e) => {
                                tracing::warn!(id = %memory.id, error = %e, "repair: embedding retry exhausted");
                                report.embed_failed += 1;
                            }
                        }
                    } else if !self.vector.contains(tier, &memory.id) {
                        match embed_with_retry(self.embedder.as_ref(), &memory.content, self.backoff) {
                            Ok(vector) => {
                                if self.vector.upsert(tier, &memory.id, &vector).is_ok() {
                                    report.missing_vector_entries_reinserted += 1;
                                }
                            }
                            Err(e) => {
                                tracing::warn!(id = %memory.id, error = %e, "repair: reinsert failed");
                            }
                        }
                    }
                }

                if page.len() < batch {
                    break;
                }
                after = last;
            }
        }

        for (tier, id) in self.vector.all_ids() {
            match self.relational.get(&id) {
                Ok(Some(memory)) if memory.tier == tier => {}
                _ => {
                    if self.vector.remove(tier, &id).is_ok() {
                        report.stale_vector_entries_removed += 1;
                    }
                }
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::FakeEmbedder;
    use crate::memory::{content_hash, Memory, Metadata, VaultScope};
    use crate::storage::{FlatVectorIndex, SqliteStore};
    use chrono::Utc;

    fn sample(id: &str, content: &str, pending: bool) -> Memory {
        let now = Utc::now();
        Memory {
            id: id.to_string(),
            content: content.to_string(),
            content_hash: content_hash(content),
            context: "general".to_string(),
            importance: 0.5,
            tier: Tier::Working,
            created_at: now,
            last_accessed_at: now,
            access_count: 0,
            metadata: Metadata::new(),
            vault_scope: VaultScope::Core,
            pending_embedding: pending,
            quarantined: false,
            consecutive_sweep_failures: 0,
        }
    }

    #[test]
    fn embeds_pending_rows() {
        let r: Arc<dyn RelationalStore> = Arc::new(SqliteStore::open_in_memory().unwrap());
        let v: Arc<dyn VectorStore> = Arc::new(FlatVectorIndex::new(8));
        let e: Arc<dyn Embedder> = Arc::new(FakeEmbedder::new(8));
        r.insert(&sample("a", "hello world", true)).unwrap();

        let repair = Repair::new(r.clone(), v.clone(), e);
        let report = repair.run_once(100);

        assert_eq!(report.embedded, 1);
        assert!(v.contains(Tier::Working, "a"));
        assert!(!r.get("a").unwrap().unwrap().pending_embedding);
    }

    #[test]
    fn removes_stale_vector_entries_with_no_matching_row() {
        let r: Arc<dyn RelationalStore> = Arc::new(SqliteStore::open_in_memory().unwrap());
        let v: Arc<dyn VectorStore> = Arc::new(FlatVectorIndex::new(8));
        let e: Arc<dyn Embedder> = Arc::new(FakeEmbedder::new(8));
        v.upsert(Tier::Working, "ghost", &e.embed("x").unwrap()).unwrap();

        let repair = Repair::new(r, v.clone(), e);
        let report = repair.run_once(100);

        assert_eq!(report.stale_vector_entries_removed, 1);
        assert!(!v.contains(Tier::Working, "ghost"));
    }

    #[test]
    fn reinserts_missing_vector_entry_for_existing_row() {
        let r: Arc<dyn RelationalStore> = Arc::new(SqliteStore::open_in_memory().unwrap());
        let v: Arc<dyn VectorStore> = Arc::new(FlatVectorIndex::new(8));
        let e: Arc<dyn Embedder> = Arc::new(FakeEmbedder::new(8));
        r.insert(&sample("a", "needs reindex", false)).unwrap();

        let repair = Repair::new(r, v.clone(), e);
        let report = repair.run_once(100);

        assert_eq!(report.missing_vector_entries_reinserted, 1);
        assert!(v.contains(Tier::Working, "a"));
    }
}
