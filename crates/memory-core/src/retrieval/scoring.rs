//! Multi-signal scoring
//!
//! `score = 0.35*similarity + 0.25*recency + 0.15*importance + 0.10*frequency
//! + 0.15*context_match`, plus the fusion algorithms for
//! combining exact and semantic result lists: reciprocal-rank fusion and a
//! min-max-normalized linear combination, the two standard ways to merge
//! ranked lists with different native scales.

use crate::config::ScoringWeights;
use crate::memory::{MatchQuality, Memory, Signals};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// `recency(t) = exp(-delta/tau)`, delta and tau in days
pub fn recency_score(last_accessed_at: DateTime<Utc>, now: DateTime<Utc>, tau_days: f64) -> f64 {
    let delta_days = (now - last_accessed_at).num_seconds() as f64 / 86_400.0;
    (-delta_days.max(0.0) / tau_days).exp()
}

/// `frequency(n) = min(1, log1p(n)/log1p(cap))`
pub fn frequency_score(access_count: i64, cap: f64) -> f64 {
    let n = access_count.max(0) as f64;
    (n.ln_1p() / cap.ln_1p()).min(1.0)
}

/// 1.0 if the memory's context matches the requested one exactly, 0.7 if
/// they share a family (the segment before the first `_`, e.g. both
/// `code_symbol` and `code_comment` are family `code`), 0.0 if requested and
/// neither matches, 0.5 (neutral) if no context was requested.
pub fn context_match_score(memory_context: &str, requested_context: Option<&str>) -> f64 {
    match requested_context {
        Some(ctx) if ctx == memory_context => 1.0,
        Some(ctx) if family_of(ctx) == family_of(memory_context) => 0.7,
        Some(_) => 0.0,
        None => 0.5,
    }
}

fn family_of(context: &str) -> &str {
    context.split('_').next().unwrap_or(context)
}

/// How an exact-search hit matched the query text, used as the `exact_rank`
/// tiebreaker signal.
pub fn match_quality(content: &str, query: &str) -> MatchQuality {
    let lower_content = content.to_lowercase();
    let lower_query = query.trim().to_lowercase();
    if lower_query.is_empty() {
        return MatchQuality::Substring;
    }
    if lower_content == lower_query {
        return MatchQuality::ExactPhrase;
    }
    let is_whole_word = lower_content
        .split(|c: char| !c.is_alphanumeric())
        .any(|tok| tok == lower_query);
    if is_whole_word {
        MatchQuality::WholeWord
    } else {
        MatchQuality::Substring
    }
}

pub fn match_quality_rank(q: MatchQuality) -> f64 {
    match q {
        MatchQuality::Substring => 1.0 / 3.0,
        MatchQuality::WholeWord => 2.0 / 3.0,
        MatchQuality::ExactPhrase => 1.0,
    }
}

/// Byte offset of the query's earliest case-insensitive occurrence in
/// `content`, used as the exact-search tiebreaker — earlier occurrences rank
/// higher. `None` if the query is empty or absent.
pub fn match_position(content: &str, query: &str) -> Option<usize> {
    let trimmed = query.trim();
    if trimmed.is_empty() {
        return None;
    }
    content.to_lowercase().find(&trimmed.to_lowercase())
}

/// Compute the full signal breakdown plus combined score for one memory.
pub fn score_memory(
    memory: &Memory,
    similarity: Option<f64>,
    requested_context: Option<&str>,
    exact_quality: Option<MatchQuality>,
    now: DateTime<Utc>,
    weights: &ScoringWeights,
) -> (f64, Signals) {
    let recency = recency_score(memory.last_accessed_at, now, weights.recency_tau_days);
    let frequency = frequency_score(memory.access_count, weights.frequency_cap);
    let context_match = context_match_score(&memory.context, requested_context);
    let exact_rank = exact_quality.map(match_quality_rank);

    let sim_component = similarity.unwrap_or(0.0);

    let mut score = weights.recency * recency
        + weights.importance * memory.importance
        + weights.frequency * frequency
        + weights.context_match * context_match;

    if similarity.is_some() {
        score += weights.similarity * sim_component;
    } else if let Some(rank) = exact_rank {
        // exact-only search has no embedding similarity; use match quality
        // in its place so a perfect phrase match still outranks a loose one.
        score += weights.similarity * rank;
    }

    let signals = Signals {
        similarity,
        recency: Some(recency),
        importance: Some(memory.importance),
        frequency: Some(frequency),
        context_match: Some(context_match),
        exact_rank,
    };

    (score, signals)
}

/// Linear combination of two `(id, normalized_score)` lists weighted by
/// `exact_weight` (the remainder going to the semantic list). Scores are
/// first min-max
/// normalized within each list so the two scales are comparable.
pub fn blend_hybrid(
    exact: &[(String, f64)],
    semantic: &[(String, f64)],
    exact_weight: f64,
) -> Vec<(String, f64)> {
    let normalize = |list: &[(String, f64)]| -> HashMap<String, f64> {
        let max = list.iter().map(|(_, s)| *s).fold(0.0_f64, f64::max).max(1e-9);
        list.iter().map(|(id, s)| (id.clone(), s / max)).collect()
    };

    let exact_norm = normalize(exact);
    let semantic_norm = normalize(semantic);
    let semantic_weight = 1.0 - exact_weight;

    let mut combined: HashMap<String, f64> = HashMap::new();
    for (id, s) in &exact_norm {
        *combined.entry(id.clone()).or_default() += s * exact_weight;
    }
    for (id, s) in &semantic_norm {
        *combined.entry(id.clone()).or_default() += s * semantic_weight;
    }

    let mut out: Vec<(String, f64)> = combined.into_iter().collect();
    out.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recency_decays_to_zero_as_delta_grows() {
        let now = Utc::now();
        let recent = recency_score(now, now, 7.0);
        let old = recency_score(now - chrono::Duration::days(30), now, 7.0);
        assert!((recent - 1.0).abs() < 1e-9);
        assert!(old < 0.05);
    }

    #[test]
    fn frequency_saturates_at_cap() {
        let low = frequency_score(1, 50.0);
        let high = frequency_score(1000, 50.0);
        assert!(low < high);
        assert!(high <= 1.0);
    }

    #[test]
    fn context_match_rewards_same_family() {
        assert_eq!(context_match_score("code_symbol", Some("code_symbol")), 1.0);
        assert_eq!(context_match_score("code_symbol", Some("code_comment")), 0.7);
        assert_eq!(context_match_score("code_symbol", Some("general")), 0.0);
        assert_eq!(context_match_score("code_symbol", None), 0.5);
    }

    #[test]
    fn match_quality_prefers_exact_phrase() {
        assert_eq!(match_quality("hello world", "hello world"), MatchQuality::ExactPhrase);
        assert_eq!(match_quality("hello world wide", "world"), MatchQuality::WholeWord);
        assert_eq!(match_quality("helloworld", "world"), MatchQuality::Substring);
    }

    #[test]
    fn match_position_finds_earliest_occurrence() {
        assert_eq!(match_position("the fox and the hound", "the"), Some(0));
        assert_eq!(match_position("a fox and a hound", "hound"), Some(12));
        assert_eq!(match_position("no match here", "xyz"), None);
        assert_eq!(match_position("anything", ""), None);
    }

    #[test]
    fn blend_hybrid_weights_exact_by_default() {
        let exact = vec![("a".to_string(), 1.0)];
        let semantic = vec![("b".to_string(), 1.0)];
        let blended = blend_hybrid(&exact, &semantic, 0.4);
        let a_score = blended.iter().find(|(id, _)| id == "a").unwrap().1;
        let b_score = blended.iter().find(|(id, _)| id == "b").unwrap().1;
        assert!((a_score - 0.4).abs() < 1e-9);
        assert!((b_score - 0.6).abs() < 1e-9);
    }
}
