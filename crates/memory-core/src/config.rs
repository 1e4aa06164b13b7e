//! Engine configuration
//!
//! One config struct per subsystem, composed into `EngineConfig`: a
//! `Default` impl per struct carrying each subsystem's literal defaults.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Importance assessor weights, exposed for parity experiments rather than
/// hard-coded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportanceWeights {
    pub base_by_context: HashMap<String, f64>,
    pub base_unknown: f64,
    pub keyword_bonus: f64,
    pub keyword_bonus_cap: f64,
    pub short_length_threshold: usize,
    pub short_length_penalty: f64,
    pub long_length_threshold: usize,
    pub long_length_bonus: f64,
    pub file_line_bonus: f64,
}

impl Default for ImportanceWeights {
    fn default() -> Self {
        let mut base_by_context = HashMap::new();
        base_by_context.insert("task_critical".to_string(), 0.85);
        base_by_context.insert("decision".to_string(), 0.80);
        base_by_context.insert("code_symbol".to_string(), 0.70);
        base_by_context.insert("reference".to_string(), 0.65);
        base_by_context.insert("conversation".to_string(), 0.50);
        base_by_context.insert("general".to_string(), 0.45);

        Self {
            base_by_context,
            base_unknown: 0.50,
            keyword_bonus: 0.05,
            keyword_bonus_cap: 0.15,
            short_length_threshold: 20,
            short_length_penalty: 0.10,
            long_length_threshold: 400,
            long_length_bonus: 0.05,
            file_line_bonus: 0.05,
        }
    }
}

/// Multi-signal retrieval scoring weights
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoringWeights {
    pub similarity: f64,
    pub recency: f64,
    pub importance: f64,
    pub frequency: f64,
    pub context_match: f64,
    /// tau in recency(t) = exp(-delta/tau), in days
    pub recency_tau_days: f64,
    /// saturation point for frequency(n) = min(1, log1p(n)/log1p(cap))
    pub frequency_cap: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            similarity: 0.35,
            recency: 0.25,
            importance: 0.15,
            frequency: 0.10,
            context_match: 0.15,
            recency_tau_days: 7.0,
            frequency_cap: 50.0,
        }
    }
}

/// Top-level engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    pub embedding_dim: usize,
    pub store_threshold: f64,

    pub working_to_session_age: chrono::Duration,
    pub session_to_long_age: chrono::Duration,
    pub long_term_min_importance: f64,
    pub access_rate_low_threshold: f64,
    pub evict_min_importance: f64,
    pub evict_age: chrono::Duration,

    pub tier_sweep_interval: chrono::Duration,
    pub sweep_batch: usize,
    pub dedup_sim: f32,
    pub semantic_min_similarity: f32,
    pub exact_weight_default: f64,

    pub repair_interval: chrono::Duration,
    pub repair_batch: usize,

    pub touch_queue_capacity: usize,
    pub quarantine_after_failures: u32,

    pub importance_weights: ImportanceWeights,
    pub scoring_weights: ScoringWeights,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            embedding_dim: 1536,
            store_threshold: 0.40,

            working_to_session_age: chrono::Duration::hours(48),
            session_to_long_age: chrono::Duration::days(14),
            long_term_min_importance: 0.60,
            access_rate_low_threshold: 1.0 / 7.0,
            evict_min_importance: 0.30,
            evict_age: chrono::Duration::hours(72),

            tier_sweep_interval: chrono::Duration::hours(1),
            sweep_batch: 500,
            dedup_sim: 0.95,
            semantic_min_similarity: 0.50,
            exact_weight_default: 0.40,

            repair_interval: chrono::Duration::hours(6),
            repair_batch: 500,

            touch_queue_capacity: 10_000,
            quarantine_after_failures: 3,

            importance_weights: ImportanceWeights::default(),
            scoring_weights: ScoringWeights::default(),
        }
    }
}
