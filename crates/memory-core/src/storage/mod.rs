//! Storage module
//!
//! Two capability traits behind the `Repository` facade: `RelationalStore`
//! (source of truth for existence) and
//! `VectorStore` (a disposable index). Production uses `SqliteStore` for the
//! former and `FlatVectorIndex` for the latter; tests can swap in in-memory
//! doubles satisfying the same traits.

mod migrations;
mod relational;
mod repair;
mod vector;

pub use migrations::{apply_migrations, Migration, MIGRATIONS};
pub use relational::SqliteStore;
pub use repair::{Repair, RepairReport};
pub use vector::FlatVectorIndex;

use crate::memory::{Filter, Memory, Tier};
use chrono::{DateTime, Utc};

/// Aggregate counts for `get_stats`
#[derive(Debug, Clone, Default)]
pub struct StoreStats {
    pub working_count: i64,
    pub session_count: i64,
    pub long_term_count: i64,
    pub working_avg_importance: f64,
    pub session_avg_importance: f64,
    pub long_term_avg_importance: f64,
    pub working_oldest: Option<DateTime<Utc>>,
    pub working_newest: Option<DateTime<Utc>>,
    pub session_oldest: Option<DateTime<Utc>>,
    pub session_newest: Option<DateTime<Utc>>,
    pub long_term_oldest: Option<DateTime<Utc>>,
    pub long_term_newest: Option<DateTime<Utc>>,
    pub pending_embeddings: i64,
    pub quarantined: i64,
}

/// Relational store error kind
#[derive(Debug, thiserror::Error)]
pub enum RelationalStoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
}

pub type RelationalResult<T> = std::result::Result<T, RelationalStoreError>;

/// Vector store error kind
#[derive(Debug, thiserror::Error)]
pub enum VectorStoreError {
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
    #[error("lock poisoned")]
    Poisoned,
}

pub type VectorResult<T> = std::result::Result<T, VectorStoreError>;

/// R (source of truth). Existence, tier placement, and exact search live
/// here; V never overrides it.
pub trait RelationalStore: Send + Sync {
    fn insert(&self, memory: &Memory) -> RelationalResult<()>;
    fn get(&self, id: &str) -> RelationalResult<Option<Memory>>;
    fn delete(&self, id: &str) -> RelationalResult<()>;
    fn update_tier_field(&self, id: &str, tier: Tier) -> RelationalResult<()>;
    fn set_pending_embedding(&self, id: &str, pending: bool) -> RelationalResult<()>;
    fn touch_batch(&self, hits: &[(String, DateTime<Utc>)]) -> RelationalResult<()>;
    fn exact_search(&self, query: &str, filter: &Filter, limit: usize) -> RelationalResult<Vec<Memory>>;
    fn page_by_tier(
        &self,
        tier: Tier,
        after: Option<(DateTime<Utc>, String)>,
        limit: usize,
    ) -> RelationalResult<Vec<Memory>>;
    fn mark_quarantined(&self, id: &str, quarantined: bool) -> RelationalResult<()>;
    /// Increment and persist a row's consecutive-sweep-failure counter,
    /// returning the new count. A row that fails three consecutive sweeps is
    /// quarantined.
    fn record_sweep_failure(&self, id: &str) -> RelationalResult<u32>;
    /// Reset a row's consecutive-sweep-failure counter to zero after a
    /// successful sweep pass over it.
    fn reset_sweep_failures(&self, id: &str) -> RelationalResult<()>;
    fn stats(&self) -> RelationalResult<StoreStats>;
}

/// V (disposable index). A V hit absent from R is discarded by callers and
/// scheduled for cleanup by `Repair`; V is never a source of truth.
pub trait VectorStore: Send + Sync {
    fn upsert(&self, tier: Tier, id: &str, embedding: &[f32]) -> VectorResult<()>;
    fn remove(&self, tier: Tier, id: &str) -> VectorResult<()>;
    fn search(
        &self,
        tiers: &[Tier],
        query: &[f32],
        limit: usize,
        min_similarity: f32,
    ) -> VectorResult<Vec<(String, f32)>>;
    fn contains(&self, tier: Tier, id: &str) -> bool;
    /// Fetch the already-stored vector for `id` in `tier`, if any. Used by
    /// migration and consolidation so they reuse the existing embedding
    /// instead of re-embedding the content.
    fn get(&self, tier: Tier, id: &str) -> Option<Vec<f32>>;
    /// All `(tier, id)` pairs currently indexed, for `Repair`'s reconciliation pass.
    fn all_ids(&self) -> Vec<(Tier, String)>;
}
