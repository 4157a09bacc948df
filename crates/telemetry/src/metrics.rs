//! Named monotonic counters.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

/// A thread-safe registry of named counters.
///
/// Counters only ever go up. Names are dotted paths such as
/// `calls.summarizer` or `deny.summarizer.budget_exhausted`.
#[derive(Debug, Default)]
pub struct Metrics {
    counters: Mutex<BTreeMap<String, u64>>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment `name` by one and return the new value.
    pub fn increment(&self, name: &str) -> u64 {
        self.add(name, 1)
    }

    /// Increment `name` by `delta` and return the new value.
    pub fn add(&self, name: &str, delta: u64) -> u64 {
        let mut counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        let slot = counters.entry(name.to_string()).or_insert(0);
        *slot = slot.saturating_add(delta);
        *slot
    }

    /// Current value of `name`, zero if never incremented.
    pub fn get(&self, name: &str) -> u64 {
        self.counters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .copied()
            .unwrap_or(0)
    }

    /// Copy of all counters.
    pub fn snapshot(&self) -> BTreeMap<String, u64> {
        self.counters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
