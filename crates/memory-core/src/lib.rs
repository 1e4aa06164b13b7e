//! Hierarchical semantic memory engine
//!
//! A hybrid relational+vector memory store with three lifecycle tiers
//! (Working, Session, LongTerm), an importance-gated write path, a
//! multi-signal retrieval engine (exact/semantic/hybrid), and a background
//! consolidator that dedups and evicts on a timer.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use memory_core::{EngineConfig, MemoryEngine, MemoryInput};
//! use memory_core::embeddings::FakeEmbedder;
//! use memory_core::storage::{FlatVectorIndex, SqliteStore};
//! use std::sync::Arc;
//!
//! let config = EngineConfig::default();
//! let relational = Arc::new(SqliteStore::open_in_memory().unwrap());
//! let vector = Arc::new(FlatVectorIndex::new(config.embedding_dim));
//! let embedder = Arc::new(FakeEmbedder::new(config.embedding_dim));
//! let engine = MemoryEngine::new(relational, vector, embedder, config);
//!
//! let result = engine.store(MemoryInput::new("the build is green")).unwrap();
//! assert!(result.stored);
//! ```

#![warn(rustdoc::missing_crate_level_docs)]

mod concurrency;
pub mod config;
pub mod deadline;
pub mod embeddings;
pub mod error;
pub mod importance;
pub mod memory;
pub mod retrieval;
pub mod storage;
pub mod tier;
pub mod touch;

pub use config::EngineConfig;
pub use deadline::Deadline;
pub use error::{EngineError, Result};
pub use memory::{
    Filter, HealthStatus, MatchQuality, Memory, MemoryInput, MemoryStats, MetaValue, Metadata,
    RecallOutcome, ScoredMemory, SearchMode, Signals, StoreResult, SweepReport, Tier, TierStats,
    VaultScope,
};

use concurrency::IdLocks;
use embeddings::{embed_with_retry, BackoffPolicy, Embedder};
use importance::ImportanceAssessor;
use retrieval::RetrievalEngine;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use storage::{RelationalStore, Repair, RepairReport, StoreStats, VectorStore};
use tier::TierManager;
use touch::{TouchQueue, TouchSender};
use uuid::Uuid;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Facade over the Repository (R+V), the importance assessor, the retrieval
/// engine, and the tier manager — the seven operations of the engine's
/// external interface (`store`, `recall`, `get`, `delete`, `run_sweep`,
/// `get_stats`, `get_health`) live here as inherent methods.
pub struct MemoryEngine {
    relational: Arc<dyn RelationalStore>,
    vector: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    config: EngineConfig,
    assessor: ImportanceAssessor,
    retrieval: RetrievalEngine,
    tier_manager: TierManager,
    touch_sender: TouchSender,
    touch_queue: Mutex<Option<TouchQueue>>,
    migrations_to_session: AtomicI64,
    migrations_to_long_term: AtomicI64,
    evictions: AtomicI64,
    id_locks: Arc<IdLocks>,
}

impl MemoryEngine {
    pub fn new(
        relational: Arc<dyn RelationalStore>,
        vector: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        config: EngineConfig,
    ) -> Self {
        let assessor = ImportanceAssessor::new(config.importance_weights.clone());
        let retrieval = RetrievalEngine::new(
            relational.clone(),
            vector.clone(),
            embedder.clone(),
            config.scoring_weights.clone(),
            config.semantic_min_similarity,
            config.exact_weight_default,
        );
        let id_locks = Arc::new(IdLocks::new());
        let tier_manager = TierManager::new(
            relational.clone(),
            vector.clone(),
            embedder.clone(),
            config.clone(),
            id_locks.clone(),
        );
        let touch_queue = TouchQueue::new(config.touch_queue_capacity);
        let touch_sender = touch_queue.sender();

        Self {
            relational,
            vector,
            embedder,
            config,
            assessor,
            retrieval,
            tier_manager,
            touch_sender,
            touch_queue: Mutex::new(Some(touch_queue)),
            migrations_to_session: AtomicI64::new(0),
            migrations_to_long_term: AtomicI64::new(0),
            evictions: AtomicI64::new(0),
            id_locks,
        }
    }

    /// Spawn the background touch-flusher onto the current tokio runtime.
    /// Call once per engine instance from async context; a second call is a
    /// no-op since the queue is taken on first spawn.
    pub fn spawn_touch_flusher(&self) -> Option<tokio::task::JoinHandle<()>> {
        let queue = self.touch_queue.lock().unwrap_or_else(|e| e.into_inner()).take()?;
        let relational = self.relational.clone();
        Some(tokio::task::spawn(async move {
            queue.run(relational, 128).await;
        }))
    }

    /// Importance-gated write path: score the input,
    /// reject below `store_threshold`, otherwise insert into R with
    /// `pending_embedding=true` and best-effort embed synchronously
    /// (falling back to `Repair` on failure). No deadline.
    pub fn store(&self, input: MemoryInput) -> Result<StoreResult> {
        self.store_with_deadline(input, Deadline::none())
    }

    /// `store`, failing with `EngineError::Timeout` if `deadline` passes
    /// before the R insert or the embedder call completes.
    pub fn store_with_deadline(&self, input: MemoryInput, deadline: Deadline) -> Result<StoreResult> {
        let importance = self.assessor.assess(&input);
        if !self.assessor.passes_threshold(importance, self.config.store_threshold) {
            return Ok(StoreResult { id: None, stored: false, importance, tier: None });
        }

        let now = chrono::Utc::now();
        let id = Uuid::new_v4().to_string();
        let mut record = Memory {
            id: id.clone(),
            content: input.content.clone(),
            content_hash: memory::content_hash(&input.content),
            context: input.context,
            importance,
            tier: Tier::Working,
            created_at: now,
            last_accessed_at: now,
            access_count: 0,
            metadata: input.metadata,
            vault_scope: input.vault_scope,
            pending_embedding: true,
            quarantined: false,
            consecutive_sweep_failures: 0,
        };
        record.clamp_importance();

        deadline.check("store: relational insert")?;
        self.relational.insert(&record)?;

        deadline.check("store: embed")?;
        match embed_with_retry(self.embedder.as_ref(), &record.content, BackoffPolicy::default()) {
            Ok(vector) => {
                self.vector.upsert(Tier::Working, &id, &vector)?;
                self.relational.set_pending_embedding(&id, false)?;
            }
            Err(e) => {
                tracing::warn!(id = %id, error = %e, "store: embedding failed, left pending for repair");
            }
        }

        Ok(StoreResult { id: Some(id), stored: true, importance, tier: Some(Tier::Working) })
    }

    /// Multi-mode retrieval. Returned ids are queued for `touch`
    /// (fire-and-forget, dropped on overflow). `RecallOutcome::degraded` is
    /// set when hybrid mode fell back to exact-only because the embedder was
    /// unavailable. No deadline.
    pub fn recall(&self, query: &str, mode: SearchMode, filter: &Filter, limit: usize) -> Result<RecallOutcome> {
        self.recall_with_deadline(query, mode, filter, limit, Deadline::none())
    }

    /// `recall`, failing with `EngineError::Timeout` if `deadline` passes
    /// before the search completes. Retrieval degrades to exact-only and
    /// signals the degradation within a deadline rather than blocking; the
    /// deadline check sits at the outermost suspension point since
    /// `search_hybrid` already degrades internally on embedder failure.
    pub fn recall_with_deadline(
        &self,
        query: &str,
        mode: SearchMode,
        filter: &Filter,
        limit: usize,
        deadline: Deadline,
    ) -> Result<RecallOutcome> {
        deadline.check("recall")?;
        let outcome = self.retrieval.search(query, mode, filter, limit)?;
        deadline.check("recall: touch enqueue")?;
        self.touch_sender.touch_many(outcome.hits.iter().map(|h| h.memory.id.clone()));
        Ok(outcome)
    }

    pub fn get(&self, id: &str) -> Result<Option<Memory>> {
        Ok(self.relational.get(id)?)
    }

    /// Delete a memory by id. Deleting an id that does not exist is a no-op
    /// success, not an error. V is cleared best-effort before
    /// R so a crash mid-delete never leaves R pointing at a vanished V entry;
    /// a crash after the V removal but before the R delete just leaves a
    /// row with no vector, which `Repair` reinserts.
    pub fn delete(&self, id: &str) -> Result<()> {
        self.id_locks.with_lock(id, || {
            let Some(memory) = self.relational.get(id)? else {
                return Ok(());
            };
            let _ = self.vector.remove(memory.tier, id);
            match self.relational.delete(id) {
                Ok(()) | Err(storage::RelationalStoreError::NotFound(_)) => Ok(()),
                Err(e) => Err(e.into()),
            }
        })
    }

    /// Run one tier-migration + consolidation sweep synchronously. In
    /// production this is called from a `tokio::time::interval` loop at
    /// `tier_sweep_interval`.
    pub fn run_sweep(&self) -> SweepReport {
        let report = self.tier_manager.run_sweep();
        self.migrations_to_session.fetch_add(report.migrated_to_session, Ordering::Relaxed);
        self.migrations_to_long_term.fetch_add(report.migrated_to_long_term, Ordering::Relaxed);
        self.evictions.fetch_add(report.evicted, Ordering::Relaxed);
        report
    }

    pub fn get_stats(&self) -> Result<MemoryStats> {
        let StoreStats {
            working_count,
            session_count,
            long_term_count,
            working_avg_importance,
            session_avg_importance,
            long_term_avg_importance,
            working_oldest,
            working_newest,
            session_oldest,
            session_newest,
            long_term_oldest,
            long_term_newest,
            ..
        } = self.relational.stats()?;

        Ok(MemoryStats {
            working: TierStats { count: working_count, avg_importance: working_avg_importance, oldest: working_oldest, newest: working_newest },
            session: TierStats { count: session_count, avg_importance: session_avg_importance, oldest: session_oldest, newest: session_newest },
            long_term: TierStats { count: long_term_count, avg_importance: long_term_avg_importance, oldest: long_term_oldest, newest: long_term_newest },
            migrations_to_session: self.migrations_to_session.load(Ordering::Relaxed),
            migrations_to_long_term: self.migrations_to_long_term.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        })
    }

    /// Run one R/V reconciliation pass synchronously. In production this is
    /// called from `spawn_repair_scheduler`
    /// at `repair_interval`.
    pub fn run_repair(&self, batch: usize) -> RepairReport {
        let repair = Repair::new(self.relational.clone(), self.vector.clone(), self.embedder.clone());
        repair.run_once(batch)
    }

    pub fn get_health(&self) -> Result<HealthStatus> {
        let stats = self.relational.stats()?;
        Ok(HealthStatus {
            r_ok: true,
            v_ok: true,
            embedder_ok: self.embedder.is_ready(),
            pending_embeddings: stats.pending_embeddings,
            quarantined: stats.quarantined,
        })
    }
}

/// Spawn the periodic tier sweep on the current tokio runtime, firing every
/// `tier_sweep_interval`. The engine must be wrapped in `Arc` to share it
/// with this background task.
pub fn spawn_sweep_scheduler(engine: Arc<MemoryEngine>) -> tokio::task::JoinHandle<()> {
    let period = engine
        .config
        .tier_sweep_interval
        .to_std()
        .unwrap_or(std::time::Duration::from_secs(3600));
    tokio::task::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            let report = engine.run_sweep();
            tracing::info!(
                rows_scanned = report.rows_scanned,
                migrated_to_session = report.migrated_to_session,
                migrated_to_long_term = report.migrated_to_long_term,
                evicted = report.evicted,
                "tier sweep completed"
            );
        }
    })
}

/// Spawn the periodic R/V repair pass on the current tokio runtime, firing
/// every `repair_interval` — sweeper, repair, and touch-flusher are the three
/// fixed background workers. The engine must be wrapped in `Arc` to share it
/// with this background task.
pub fn spawn_repair_scheduler(engine: Arc<MemoryEngine>) -> tokio::task::JoinHandle<()> {
    let period = engine
        .config
        .repair_interval
        .to_std()
        .unwrap_or(std::time::Duration::from_secs(21_600));
    let batch = engine.config.repair_batch;
    tokio::task::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            let report = engine.run_repair(batch);
            tracing::info!(
                embedded = report.embedded,
                embed_failed = report.embed_failed,
                stale_vector_entries_removed = report.stale_vector_entries_removed,
                missing_vector_entries_reinserted = report.missing_vector_entries_reinserted,
                "repair pass completed"
            );
        }
    })
}

/// Convenient imports for common usage
pub mod prelude {
    pub use crate::{
        EngineConfig, EngineError, Filter, MatchQuality, Memory, MemoryEngine, MemoryInput,
        MemoryStats, RecallOutcome, Result, ScoredMemory, SearchMode, Tier, VaultScope,
    };
}
