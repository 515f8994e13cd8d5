//! Named counters for mixing activity.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

pub const TXS_BROADCAST: &str = "txs_broadcast";
pub const BROADCAST_FAILURES: &str = "broadcast_failures";
pub const DIFFS_APPLIED: &str = "diffs_applied";
pub const DIFFS_REJECTED: &str = "diffs_rejected";
pub const DIFFS_IGNORED: &str = "diffs_ignored";
pub const WORKFLOWS_CREATED: &str = "workflows_created";
pub const WORKFLOWS_CLEANED: &str = "workflows_cleaned";

/// Counter names every mixing session tracks.
pub const MIXING_COUNTERS: &[&str] = &[
    TXS_BROADCAST,
    BROADCAST_FAILURES,
    DIFFS_APPLIED,
    DIFFS_REJECTED,
    DIFFS_IGNORED,
    WORKFLOWS_CREATED,
    WORKFLOWS_CLEANED,
];

/// A thread-safe, fixed set of counters.
///
/// Names not registered at construction are silently ignored.
pub struct StatsCounter {
    counters: HashMap<&'static str, AtomicU64>,
}

impl StatsCounter {
    pub fn new(names: &[&'static str]) -> Self {
        let counters = names.iter().map(|&n| (n, AtomicU64::new(0))).collect();
        Self { counters }
    }

    pub fn mixing() -> Self {
        Self::new(MIXING_COUNTERS)
    }

    pub fn increment(&self, name: &str) {
        self.add(name, 1);
    }

    pub fn add(&self, name: &str, value: u64) {
        if let Some(counter) = self.counters.get(name) {
            counter.fetch_add(value, Ordering::Relaxed);
        }
    }

    pub fn get(&self, name: &str) -> u64 {
        self.counters
            .get(name)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn snapshot(&self) -> HashMap<&'static str, u64> {
        self.counters
            .iter()
            .map(|(&k, v)| (k, v.load(Ordering::Relaxed)))
            .collect()
    }
}

impl Default for StatsCounter {
    fn default() -> Self {
        Self::mixing()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registered_counters_accumulate() {
        let stats = StatsCounter::mixing();
        stats.increment(TXS_BROADCAST);
        stats.add(TXS_BROADCAST, 2);
        assert_eq!(stats.get(TXS_BROADCAST), 3);
        assert_eq!(stats.get(DIFFS_APPLIED), 0);
    }

    #[test]
    fn unknown_counter_ignored() {
        let stats = StatsCounter::new(&["a"]);
        stats.increment("b");
        assert_eq!(stats.get("b"), 0);
        assert_eq!(stats.snapshot().len(), 1);
    }
}
