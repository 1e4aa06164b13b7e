//! Tier manager
//!
//! Runs the one-directional Working -> Session -> LongTerm state machine on
//! a timer, then hands off to the `Consolidator`: a stateless manager
//! holding config, producing a `SweepReport` accumulator per run.

mod consolidation;

pub use consolidation::{Consolidator, ConsolidationOutcome};

use crate::concurrency::IdLocks;
use crate::config::EngineConfig;
use crate::embeddings::{embed_with_retry, BackoffPolicy, Embedder};
use crate::memory::{Memory, SweepReport, Tier};
use crate::storage::{RelationalStore, VectorStore};
use chrono::Utc;
use std::sync::Arc;

pub struct TierManager {
    relational: Arc<dyn RelationalStore>,
    vector: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    config: EngineConfig,
    id_locks: Arc<IdLocks>,
}

impl TierManager {
    pub fn new(
        relational: Arc<dyn RelationalStore>,
        vector: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        config: EngineConfig,
        id_locks: Arc<IdLocks>,
    ) -> Self {
        Self { relational, vector, embedder, config, id_locks }
    }

    /// One full sweep: migrate eligible rows tier by tier (working -> session
    /// -> long_term, at most one transition per row), then consolidate.
    pub fn run_sweep(&self) -> SweepReport {
        let start = std::time::Instant::now();
        let mut report = SweepReport::default();
        let mut touched = Vec::new();

        let mut migrated_this_sweep = std::collections::HashSet::new();
        self.sweep_tier(Tier::Working, &mut report, &mut touched, &mut migrated_this_sweep);
        self.sweep_tier(Tier::Session, &mut report, &mut touched, &mut migrated_this_sweep);

        let consolidator = Consolidator::new(
            self.relational.clone(),
            self.vector.clone(),
            self.embedder.clone(),
            self.config.clone(),
            self.id_locks.clone(),
        );
        let outcome = consolidator.consolidate(&touched);
        report.duplicates_merged = outcome.duplicates_merged;
        report.near_duplicates_merged = outcome.near_duplicates_merged;
        report.evicted += outcome.evicted;

        report.duration_ms = start.elapsed().as_millis() as i64;
        report
    }

    fn sweep_tier(
        &self,
        tier: Tier,
        report: &mut SweepReport,
        touched: &mut Vec<Memory>,
        migrated_this_sweep: &mut std::collections::HashSet<String>,
    ) {
        let now = Utc::now();
        let mut after = None;
        loop {
            let page = match self.relational.page_by_tier(tier, after.clone(), self.config.sweep_batch) {
                Ok(p) => p,
                Err(e) => {
                    tracing::warn!(error = %e, tier = %tier, "tier sweep: page fetch failed");
                    break;
                }
            };
            if page.is_empty() {
                break;
            }
            after = page.last().map(|m| (m.created_at, m.id.clone()));
            let exhausted = page.len() < self.config.sweep_batch;
            report.rows_scanned += page.len() as i64;

            for memory in page {
                if migrated_this_sweep.contains(&memory.id) {
                    touched.push(memory);
                    continue;
                }
                match self.process_row(&memory, tier, now) {
                    Ok(outcome) => {
                        if memory.consecutive_sweep_failures > 0 {
                            let _ = self.relational.reset_sweep_failures(&memory.id);
                        }
                        match outcome {
                            Some(Tier::Session) => {
                                report.migrated_to_session += 1;
                                migrated_this_sweep.insert(memory.id.clone());
                            }
                            Some(Tier::LongTerm) => {
                                report.migrated_to_long_term += 1;
                                migrated_this_sweep.insert(memory.id.clone());
                            }
                            _ => {}
                        }
                    }
                    Err(e) => {
                        tracing::warn!(id = %memory.id, error = %e, "tier sweep: row failed");
                        self.record_failure(&memory, report);
                    }
                }
                touched.push(memory);
            }

            if exhausted {
                break;
            }
        }
    }

    /// Evaluate and apply at most one transition for a row, using the
    /// overlap policy: insert into the destination tier's V before removing
    /// from the source, then flip R's tier field.
    fn process_row(&self, memory: &Memory, tier: Tier, now: chrono::DateTime<Utc>) -> crate::error::Result<Option<Tier>> {
        self.id_locks.with_lock(&memory.id, || self.process_row_locked(memory, tier, now))
    }

    fn process_row_locked(&self, memory: &Memory, tier: Tier, now: chrono::DateTime<Utc>) -> crate::error::Result<Option<Tier>> {
        let age = now - memory.created_at;

        let destination = match tier {
            Tier::Working => {
                let access_rate = access_rate_per_day(memory, now);
                if age > self.config.working_to_session_age && access_rate < self.config.access_rate_low_threshold {
                    Some(Tier::Session)
                } else {
                    None
                }
            }
            Tier::Session => {
                if age > self.config.session_to_long_age && memory.importance >= self.config.long_term_min_importance {
                    Some(Tier::LongTerm)
                } else {
                    None
                }
            }
            Tier::LongTerm => None,
        };

        let Some(destination) = destination else { return Ok(None) };

        // Reuse the already-embedded vector rather than recomputing it; only
        // fall back to re-embedding if V has somehow lost it (e.g. after a
        // Repair gap).
        let embedding = match self.vector.get(tier, &memory.id) {
            Some(v) => v,
            None => embed_with_retry(self.embedder.as_ref(), &memory.content, BackoffPolicy::default())?,
        };

        // Crash-safety ordering: write the new V entry, flip R's tier field
        // (the source of truth), then drop the old V entry. A crash after
        // the flip leaves a harmless stale V shadow in the old tier, which
        // `Repair` reconciles; a crash before it leaves R pointing at the
        // old tier with both V entries present, which is also safe to retry.
        self.vector.upsert(destination, &memory.id, &embedding)?;
        self.relational.update_tier_field(&memory.id, destination)?;
        self.vector.remove(tier, &memory.id)?;
        Ok(Some(destination))
    }

    fn record_failure(&self, memory: &Memory, report: &mut SweepReport) {
        let failures = match self.relational.record_sweep_failure(&memory.id) {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(id = %memory.id, error = %e, "tier sweep: failed to record failure count");
                return;
            }
        };
        if failures >= self.config.quarantine_after_failures {
            if self.relational.mark_quarantined(&memory.id, true).is_ok() {
                report.quarantined += 1;
            }
        }
    }
}

fn access_rate_per_day(memory: &Memory, now: chrono::DateTime<Utc>) -> f64 {
    let age_days = ((now - memory.created_at).num_seconds() as f64 / 86_400.0).max(1.0 / 24.0);
    memory.access_count as f64 / age_days
}
