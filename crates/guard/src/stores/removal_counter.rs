#![forbid(unsafe_code)]

use crate::domain::REMOVAL_COUNT_INIT;
use std::sync::atomic::{AtomicU64, Ordering};

/// Global count of successful pattern removals.
///
/// Removers bump it *after* the pattern left the store; taint checks read it
/// *before* scanning. A check that saw the old value either scanned with
/// the pattern still present (its verdict is stamped with the old value and
/// goes stale) or scanned without it, so no stale "bad" verdict is ever
/// stamped with the new value.
#[derive(Debug)]
pub struct RemovalCounter(AtomicU64);

impl RemovalCounter {
    pub fn new(value: u64) -> Self {
        Self(AtomicU64::new(value))
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }

    /// Increment by one and return the new value.
    pub fn bump(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst).wrapping_add(1)
    }

    pub fn set(&self, value: u64) {
        self.0.store(value, Ordering::SeqCst);
    }
}

impl Default for RemovalCounter {
    fn default() -> Self {
        Self::new(REMOVAL_COUNT_INIT)
    }
}
