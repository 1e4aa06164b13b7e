//! In-process flat per-tier `VectorStore`
//!
//! Three independent cosine indexes, one per `Tier`, each behind its own
//! mutex, each keeping its own id<->key bookkeeping rather than sharing one
//! collection across tiers. Brute-force cosine is exact and at
//! spec's scale (tens of thousands of memories per tier) stays sub-
//! millisecond, so this deliberately skips `usearch`'s HNSW bindings.

use super::{VectorResult, VectorStore, VectorStoreError};
use crate::embeddings::cosine_similarity;
use crate::memory::Tier;
use std::collections::HashMap;
use std::sync::Mutex;

struct TierIndex {
    /// id -> position in `vectors`, so `remove` is O(1) via swap_remove
    positions: HashMap<String, usize>,
    ids: Vec<String>,
    vectors: Vec<Vec<f32>>,
}

impl TierIndex {
    fn new() -> Self {
        Self {
            positions: HashMap::new(),
            ids: Vec::new(),
            vectors: Vec::new(),
        }
    }

    fn upsert(&mut self, id: &str, embedding: &[f32]) {
        if let Some(&pos) = self.positions.get(id) {
            self.vectors[pos] = embedding.to_vec();
            return;
        }
        self.positions.insert(id.to_string(), self.ids.len());
        self.ids.push(id.to_string());
        self.vectors.push(embedding.to_vec());
    }

    fn remove(&mut self, id: &str) {
        if let Some(pos) = self.positions.remove(id) {
            let last = self.ids.len() - 1;
            self.ids.swap(pos, last);
            self.vectors.swap(pos, last);
            self.ids.pop();
            self.vectors.pop();
            if pos < self.ids.len() {
                self.positions.insert(self.ids[pos].clone(), pos);
            }
        }
    }

    fn contains(&self, id: &str) -> bool {
        self.positions.contains_key(id)
    }

    fn get(&self, id: &str) -> Option<Vec<f32>> {
        let &pos = self.positions.get(id)?;
        Some(self.vectors[pos].clone())
    }

    fn search(&self, query: &[f32], limit: usize, min_similarity: f32, out: &mut Vec<(String, f32)>) {
        for (id, vec) in self.ids.iter().zip(self.vectors.iter()) {
            let sim = cosine_similarity(query, vec);
            if sim >= min_similarity {
                out.push((id.clone(), sim));
            }
        }
        let _ = limit;
    }
}

pub struct FlatVectorIndex {
    dimensions: usize,
    working: Mutex<TierIndex>,
    session: Mutex<TierIndex>,
    long_term: Mutex<TierIndex>,
}

impl FlatVectorIndex {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            working: Mutex::new(TierIndex::new()),
            session: Mutex::new(TierIndex::new()),
            long_term: Mutex::new(TierIndex::new()),
        }
    }

    fn tier_mutex(&self, tier: Tier) -> &Mutex<TierIndex> {
        match tier {
            Tier::Working => &self.working,
            Tier::Session => &self.session,
            Tier::LongTerm => &self.long_term,
        }
    }
}

impl VectorStore for FlatVectorIndex {
    fn upsert(&self, tier: Tier, id: &str, embedding: &[f32]) -> VectorResult<()> {
        if embedding.len() != self.dimensions {
            return Err(VectorStoreError::DimensionMismatch {
                expected: self.dimensions,
                got: embedding.len(),
            });
        }
        let mut idx = self
            .tier_mutex(tier)
            .lock()
            .map_err(|_| VectorStoreError::Poisoned)?;
        idx.upsert(id, embedding);
        Ok(())
    }

    fn remove(&self, tier: Tier, id: &str) -> VectorResult<()> {
        let mut idx = self
            .tier_mutex(tier)
            .lock()
            .map_err(|_| VectorStoreError::Poisoned)?;
        idx.remove(id);
        Ok(())
    }

    fn search(
        &self,
        tiers: &[Tier],
        query: &[f32],
        limit: usize,
        min_similarity: f32,
    ) -> VectorResult<Vec<(String, f32)>> {
        let mut hits = Vec::new();
        for &tier in tiers {
            let idx = self
                .tier_mutex(tier)
                .lock()
                .map_err(|_| VectorStoreError::Poisoned)?;
            idx.search(query, limit, min_similarity, &mut hits);
        }
        hits.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(limit);
        Ok(hits)
    }

    fn contains(&self, tier: Tier, id: &str) -> bool {
        self.tier_mutex(tier)
            .lock()
            .map(|idx| idx.contains(id))
            .unwrap_or(false)
    }

    fn get(&self, tier: Tier, id: &str) -> Option<Vec<f32>> {
        self.tier_mutex(tier).lock().ok()?.get(id)
    }

    fn all_ids(&self) -> Vec<(Tier, String)> {
        let mut out = Vec::new();
        for tier in [Tier::Working, Tier::Session, Tier::LongTerm] {
            if let Ok(idx) = self.tier_mutex(tier).lock() {
                out.extend(idx.ids.iter().map(|id| (tier, id.clone())));
            }
        }
        out
    }
}
