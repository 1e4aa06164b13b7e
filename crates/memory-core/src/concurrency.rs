//! Per-id serialization
//!
//! For a single id, operations are serialized via a per-id lock acquired by
//! the repository, so observers never see an id both present in two tiers
//! and absent from R. `delete`, the tier manager's migrations, and the
//! consolidator's merge/evict passes all do delete-then-reinsert or
//! remove-then-flip sequences against R+V for a given id; striping a lock per
//! id (rather than one global lock) keeps unrelated ids from blocking each
//! other while still serializing same-id access. Built from the
//! `std::sync::Mutex` the rest of the crate already uses rather than pulling
//! in a concurrent-map crate.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Default)]
pub struct IdLocks {
    stripes: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl IdLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` while holding the lock for `id`. Entries are dropped from the
    /// table once this call is the only remaining holder, so the table never
    /// grows past the number of ids with in-flight operations.
    pub fn with_lock<T>(&self, id: &str, f: impl FnOnce() -> T) -> T {
        let stripe = {
            let mut stripes = self.stripes.lock().unwrap_or_else(|e| e.into_inner());
            stripes.entry(id.to_string()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
        };

        let result = {
            let _guard = stripe.lock().unwrap_or_else(|e| e.into_inner());
            f()
        };

        let mut stripes = self.stripes.lock().unwrap_or_else(|e| e.into_inner());
        if Arc::strong_count(&stripe) <= 2 {
            stripes.remove(id);
        }
        result
    }
}
