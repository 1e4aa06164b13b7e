//! Memory entity — the fundamental unit of storage
//!
//! Combines exact text, metadata, access bookkeeping, and tier placement.
//! The embedding itself is never carried on this struct — it lives only in
//! the vector store, keyed by `id`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Lifecycle tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Working,
    Session,
    LongTerm,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Working => "working",
            Tier::Session => "session",
            Tier::LongTerm => "long_term",
        }
    }

    pub fn parse_name(s: &str) -> Option<Self> {
        match s {
            "working" => Some(Tier::Working),
            "session" => Some(Tier::Session),
            "long_term" => Some(Tier::LongTerm),
            _ => None,
        }
    }

    /// The tier a migration from this one leads to, if any.
    /// Migration only ever proceeds Working -> Session -> LongTerm, never backwards.
    pub fn next(&self) -> Option<Tier> {
        match self {
            Tier::Working => Some(Tier::Session),
            Tier::Session => Some(Tier::LongTerm),
            Tier::LongTerm => None,
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Vault scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum VaultScope {
    #[default]
    Core,
    Project,
}

impl VaultScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            VaultScope::Core => "core",
            VaultScope::Project => "project",
        }
    }

    pub fn parse_name(s: &str) -> Option<Self> {
        match s {
            "core" => Some(VaultScope::Core),
            "project" => Some(VaultScope::Project),
            _ => None,
        }
    }
}

impl std::fmt::Display for VaultScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A scalar value in the bounded metadata map
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl std::fmt::Display for MetaValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetaValue::Str(s) => write!(f, "{s}"),
            MetaValue::Int(i) => write!(f, "{i}"),
            MetaValue::Float(x) => write!(f, "{x}"),
            MetaValue::Bool(b) => write!(f, "{b}"),
        }
    }
}

pub type Metadata = HashMap<String, MetaValue>;

/// A stored memory fragment with metadata
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Memory {
    pub id: String,
    pub content: String,
    pub content_hash: String,
    pub context: String,
    pub importance: f64,
    pub tier: Tier,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub access_count: i64,
    pub metadata: Metadata,
    pub vault_scope: VaultScope,
    pub pending_embedding: bool,
    pub quarantined: bool,
    pub consecutive_sweep_failures: u32,
}

impl Memory {
    /// Clamp importance into [0,1] — invariant required at every write
    pub fn clamp_importance(&mut self) {
        self.importance = self.importance.clamp(0.0, 1.0);
    }

    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.created_at
    }
}

/// Caller input for `store`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryInput {
    pub content: String,
    #[serde(default = "default_context")]
    pub context: String,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub vault_scope: VaultScope,
    /// Explicit importance override, bypassing the assessor if present
    #[serde(default)]
    pub importance_override: Option<f64>,
}

fn default_context() -> String {
    "general".to_string()
}

impl MemoryInput {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            context: default_context(),
            metadata: Metadata::new(),
            vault_scope: VaultScope::default(),
            importance_override: None,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    pub fn with_importance_override(mut self, importance: f64) -> Self {
        self.importance_override = Some(importance);
        self
    }
}

/// Filter applied to exact/vector search
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Filter {
    pub context: Option<String>,
    pub tiers: Option<Vec<Tier>>,
    pub vault_scope: Option<VaultScope>,
    pub metadata: Metadata,
}

/// Search mode for `recall`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    Exact,
    Semantic,
    #[default]
    Hybrid,
}

/// How an exact-search hit matched the query
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MatchQuality {
    Substring,
    WholeWord,
    ExactPhrase,
}

/// Per-signal breakdown returned alongside a retrieval score
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Signals {
    pub similarity: Option<f64>,
    pub recency: Option<f64>,
    pub importance: Option<f64>,
    pub frequency: Option<f64>,
    pub context_match: Option<f64>,
    pub exact_rank: Option<f64>,
}

/// A ranked retrieval result
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredMemory {
    pub memory: Memory,
    pub score: f64,
    pub signals: Signals,
}

/// Stats returned by `get_stats`
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TierStats {
    pub count: i64,
    pub avg_importance: f64,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct MemoryStats {
    pub working: TierStats,
    pub session: TierStats,
    pub long_term: TierStats,
    pub migrations_to_session: i64,
    pub migrations_to_long_term: i64,
    pub evictions: i64,
}

/// Health snapshot returned by `get_health`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    pub r_ok: bool,
    pub v_ok: bool,
    pub embedder_ok: bool,
    pub pending_embeddings: i64,
    pub quarantined: i64,
}

/// Outcome of `recall`: `degraded=true` means semantic
/// search was unavailable and `hits` reflects exact-search-only results.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct RecallOutcome {
    pub hits: Vec<ScoredMemory>,
    pub degraded: bool,
}

/// Result of `store`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreResult {
    pub id: Option<String>,
    pub stored: bool,
    pub importance: f64,
    pub tier: Option<Tier>,
}

/// Report produced by a tier sweep, accumulated across every row a sweep
/// touches.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub rows_scanned: i64,
    pub migrated_to_session: i64,
    pub migrated_to_long_term: i64,
    pub evicted: i64,
    pub quarantined: i64,
    pub duplicates_merged: i64,
    pub near_duplicates_merged: i64,
    pub duration_ms: i64,
}
