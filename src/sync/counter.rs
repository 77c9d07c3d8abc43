//! Process-safe integer counter, one per terminal Loader.
//!
//! An `AtomicU64` gives a process-safe, single-writer, multi-reader
//! accumulator without holding a lock across the increment.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct Counter {
    value: Arc<AtomicU64>,
}

impl Counter {
    pub fn new() -> Self {
        Self {
            value: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn increase(&self, amount: u64) {
        self.value.fetch_add(amount, Ordering::SeqCst);
    }

    pub fn value(&self) -> u64 {
        self.value.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_at_zero() {
        assert_eq!(Counter::new().value(), 0);
    }

    #[test]
    fn increases_accumulate() {
        let counter = Counter::new();
        counter.increase(3);
        counter.increase(4);
        assert_eq!(counter.value(), 7);
    }

    #[test]
    fn shared_across_clones() {
        let counter = Counter::new();
        let clone = counter.clone();
        clone.increase(5);
        assert_eq!(counter.value(), 5);
    }
}
