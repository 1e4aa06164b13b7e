//! Memory module — core data structures
//!
//! The entity model: a `Memory` row lives in the relational
//! store with its embedding referenced (not inlined) from the vector store.

mod node;

pub use node::{
    Filter, HealthStatus, MatchQuality, Memory, MemoryInput, MemoryStats, MetaValue, Metadata,
    RecallOutcome, ScoredMemory, SearchMode, Signals, StoreResult, SweepReport, Tier, TierStats,
    VaultScope,
};

use sha2::{Digest, Sha256};

/// Stable hash of normalized content, used as the dedup key
pub fn content_hash(content: &str) -> String {
    let normalized = content.trim().split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod hash_tests {
    use super::content_hash;

    #[test]
    fn normalizes_whitespace_and_case() {
        assert_eq!(content_hash("Hello   World"), content_hash("hello world"));
        assert_eq!(content_hash("  hi  "), content_hash("hi"));
    }

    #[test]
    fn distinguishes_different_content() {
        assert_ne!(content_hash("a"), content_hash("b"));
    }
}
