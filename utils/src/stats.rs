//! Named counters for per-poll statistics.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// A thread-safe set of named counters. Names not registered up front are
/// ignored.
pub struct StatsCounter {
    counters: BTreeMap<&'static str, AtomicU64>,
}

impl StatsCounter {
    pub fn new(names: &[&'static str]) -> Self {
        let counters = names.iter().map(|&n| (n, AtomicU64::new(0))).collect();
        Self { counters }
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

    pub fn snapshot(&self) -> BTreeMap<&'static str, u64> {
        self.counters
            .iter()
            .map(|(&k, v)| (k, v.load(Ordering::Relaxed)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_registered_names_only() {
        let stats = StatsCounter::new(&["agreed", "disagreed"]);
        stats.increment("agreed");
        stats.add("agreed", 2);
        stats.increment("unknown");
        assert_eq!(stats.get("agreed"), 3);
        assert_eq!(stats.get("disagreed"), 0);
        assert_eq!(stats.get("unknown"), 0);
        assert_eq!(stats.snapshot().len(), 2);
    }
}
