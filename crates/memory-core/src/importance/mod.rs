//! Importance assessor
//!
//! Gates what gets written at all: content below `store_threshold` after
//! scoring is rejected by `MemoryEngine::store` before ever touching R or V
//! Weights are pulled from `ImportanceWeights` rather than
//! hard-coded, so weighting experiments don't require a code change.

use crate::config::ImportanceWeights;
use crate::memory::{MemoryInput, MetaValue};

/// Literal, case-sensitive importance markers.
const IMPORTANCE_KEYWORDS: &[&str] = &["IMPORTANT", "CRITICAL", "TODO", "FIXME", "DECISION"];

pub struct ImportanceAssessor {
    weights: ImportanceWeights,
}

impl ImportanceAssessor {
    pub fn new(weights: ImportanceWeights) -> Self {
        Self { weights }
    }

    /// Score a candidate memory in [0, 1]. An explicit `importance_override`
    /// on the input short-circuits everything else.
    pub fn assess(&self, input: &MemoryInput) -> f64 {
        if let Some(v) = input.importance_override {
            return v.clamp(0.0, 1.0);
        }

        let mut score = self
            .weights
            .base_by_context
            .get(input.context.as_str())
            .copied()
            .unwrap_or(self.weights.base_unknown);

        let keyword_hits = IMPORTANCE_KEYWORDS
            .iter()
            .filter(|kw| input.content.contains(*kw))
            .count();
        let keyword_bonus = (keyword_hits as f64 * self.weights.keyword_bonus)
            .min(self.weights.keyword_bonus_cap);
        score += keyword_bonus;

        let len = input.content.chars().count();
        if len < self.weights.short_length_threshold {
            score -= self.weights.short_length_penalty;
        } else if len > self.weights.long_length_threshold {
            score += self.weights.long_length_bonus;
        }

        if input.metadata.contains_key("file") && input.metadata.contains_key("line") {
            score += self.weights.file_line_bonus;
        }
        if let Some(MetaValue::Float(v)) = input.metadata.get("importance") {
            score = *v;
        }

        score.clamp(0.0, 1.0)
    }

    /// Whether a scored memory clears the store-gating threshold.
    pub fn passes_threshold(&self, score: f64, store_threshold: f64) -> bool {
        score >= store_threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Metadata;

    fn weights() -> ImportanceWeights {
        ImportanceWeights::default()
    }

    #[test]
    fn task_critical_context_scores_highest_base() {
        let a = ImportanceAssessor::new(weights());
        let input = MemoryInput::new("some plain text here okay").with_context("task_critical");
        let general = MemoryInput::new("some plain text here okay").with_context("general");
        assert!(a.assess(&input) > a.assess(&general));
    }

    #[test]
    fn keyword_bonus_is_capped() {
        let a = ImportanceAssessor::new(weights());
        let input = MemoryInput::new("IMPORTANT CRITICAL TODO FIXME DECISION all in one note");
        let plain = MemoryInput::new("a plain note with no markers in it at all");
        let diff = a.assess(&input) - a.assess(&plain);
        assert!(diff <= weights().keyword_bonus_cap + 1e-9);
    }

    #[test]
    fn keyword_match_is_case_sensitive() {
        let a = ImportanceAssessor::new(weights());
        let upper = MemoryInput::new("IMPORTANT: rotate the credentials before friday");
        let lower = MemoryInput::new("important: rotate the credentials before friday");
        assert!(a.assess(&upper) > a.assess(&lower));
    }

    #[test]
    fn short_content_is_penalized() {
        let a = ImportanceAssessor::new(weights());
        let short = MemoryInput::new("hi");
        let longer = MemoryInput::new("this is a longer piece of content that exceeds twenty chars");
        assert!(a.assess(&short) < a.assess(&longer));
    }

    #[test]
    fn explicit_override_bypasses_formula() {
        let a = ImportanceAssessor::new(weights());
        let mut input = MemoryInput::new("x");
        input.importance_override = Some(0.9);
        assert_eq!(a.assess(&input), 0.9);
    }

    #[test]
    fn file_and_line_metadata_gives_bonus() {
        let a = ImportanceAssessor::new(weights());
        let mut with_loc = MemoryInput::new("a reasonably sized piece of reference content here");
        with_loc.metadata.insert("file".into(), MetaValue::Str("a.rs".into()));
        with_loc.metadata.insert("line".into(), MetaValue::Int(10));
        let without = MemoryInput::new("a reasonably sized piece of reference content here");
        assert!(a.assess(&with_loc) > a.assess(&without));
    }

    #[test]
    fn score_is_always_clamped() {
        let a = ImportanceAssessor::new(weights());
        let mut input = MemoryInput::new("x").with_context("task_critical");
        input.metadata = Metadata::new();
        let score = a.assess(&input);
        assert!((0.0..=1.0).contains(&score));
    }

    #[test]
    fn threshold_gate() {
        let a = ImportanceAssessor::new(weights());
        assert!(a.passes_threshold(0.5, 0.40));
        assert!(!a.passes_threshold(0.3, 0.40));
    }
}
