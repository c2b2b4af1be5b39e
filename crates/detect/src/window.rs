//! Sliding-window primitives shared by the detectors.
//!
//! Each structure keeps a per-key FIFO of recent observations and evicts
//! entries strictly older than the window on every insert, so eviction is
//! amortised O(1) and an event older than W never contributes to a count.

use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::Hash;

use chrono::{DateTime, Duration, Utc};

/// Per-key FIFO of timestamps.
#[derive(Debug)]
pub struct SlidingCounter<K> {
    window: Duration,
    entries: HashMap<K, VecDeque<DateTime<Utc>>>,
}

impl<K: Eq + Hash> SlidingCounter<K> {
    pub fn new(window_secs: u64) -> Self {
        SlidingCounter {
            window: Duration::seconds(window_secs as i64),
            entries: HashMap::new(),
        }
    }

    /// Record one observation, evict stale ones, return the live count.
    pub fn observe(&mut self, key: K, ts: DateTime<Utc>) -> usize {
        let dq = self.entries.entry(key).or_default();
        dq.push_back(ts);
        while let Some(front) = dq.front() {
            if ts - *front > self.window {
                dq.pop_front();
            } else {
                break;
            }
        }
        dq.len()
    }

    pub fn count(&self, key: &K) -> usize {
        self.entries.get(key).map_or(0, VecDeque::len)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Per-key FIFO of (timestamp, value) pairs, for windows that need the
/// cardinality of distinct values as well as the raw count.
#[derive(Debug)]
pub struct SlidingPairs<K, V> {
    window: Duration,
    entries: HashMap<K, VecDeque<(DateTime<Utc>, V)>>,
}

impl<K: Eq + Hash, V: Eq + Hash> SlidingPairs<K, V> {
    pub fn new(window_secs: u64) -> Self {
        SlidingPairs {
            window: Duration::seconds(window_secs as i64),
            entries: HashMap::new(),
        }
    }

    pub fn observe(&mut self, key: K, ts: DateTime<Utc>, value: V) {
        let dq = self.entries.entry(key).or_default();
        dq.push_back((ts, value));
        while let Some((front, _)) = dq.front() {
            if ts - *front > self.window {
                dq.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn count(&self, key: &K) -> usize {
        self.entries.get(key).map_or(0, VecDeque::len)
    }

    /// Number of distinct values currently inside the window.
    pub fn distinct(&self, key: &K) -> usize {
        self.entries
            .get(key)
            .map_or(0, |dq| dq.iter().map(|(_, v)| v).collect::<HashSet<_>>().len())
    }

    /// The distinct values themselves, for alert evidence.
    pub fn distinct_values(&self, key: &K) -> Vec<&V> {
        let mut seen = HashSet::new();
        self.entries
            .get(key)
            .map(|dq| {
                dq.iter()
                    .map(|(_, v)| v)
                    .filter(|v| seen.insert(*v))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// In-process alert dedupe: identity -> last emission time. An emission
/// for the same identity within `min_gap` is suppressed.
#[derive(Debug)]
pub struct DedupeGate {
    min_gap: Duration,
    last: HashMap<String, DateTime<Utc>>,
}

impl DedupeGate {
    pub fn new(gap_secs: u64) -> Self {
        DedupeGate {
            min_gap: Duration::seconds(gap_secs as i64),
            last: HashMap::new(),
        }
    }

    /// True when an emission for `id` is allowed at `now`; the emission is
    /// recorded when allowed.
    pub fn try_emit(&mut self, id: &str, now: DateTime<Utc>) -> bool {
        if let Some(last) = self.last.get(id) {
            if now - *last < self.min_gap {
                return false;
            }
        }
        self.last.insert(id.to_string(), now);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_counter_evicts_older_than_window() {
        let mut counter = SlidingCounter::new(60);
        assert_eq!(counter.observe("k", t(0)), 1);
        assert_eq!(counter.observe("k", t(30)), 2);
        // exactly at the window edge is still inside
        assert_eq!(counter.observe("k", t(60)), 3);
        // one second past evicts the first entry
        assert_eq!(counter.observe("k", t(61)), 3);
        assert_eq!(counter.observe("k", t(200)), 1);
    }

    #[test]
    fn test_counter_keys_are_independent() {
        let mut counter = SlidingCounter::new(60);
        counter.observe("a", t(0));
        counter.observe("b", t(1));
        assert_eq!(counter.count(&"a"), 1);
        assert_eq!(counter.count(&"b"), 1);
    }

    #[test]
    fn test_pairs_distinct_cardinality() {
        let mut pairs = SlidingPairs::new(60);
        pairs.observe("ip", t(0), "alice");
        pairs.observe("ip", t(1), "bob");
        pairs.observe("ip", t(2), "alice");
        assert_eq!(pairs.count(&"ip"), 3);
        assert_eq!(pairs.distinct(&"ip"), 2);
        // eviction drops distinct values with their pairs
        pairs.observe("ip", t(120), "carol");
        assert_eq!(pairs.distinct(&"ip"), 1);
    }

    #[test]
    fn test_dedupe_gate_suppresses_within_gap() {
        let mut gate = DedupeGate::new(300);
        assert!(gate.try_emit("rule|key", t(0)));
        assert!(!gate.try_emit("rule|key", t(299)));
        assert!(gate.try_emit("rule|key", t(300)));
        // different identity is unaffected
        assert!(gate.try_emit("rule|other", t(1)));
    }
}
