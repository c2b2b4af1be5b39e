// Streaming detectors over the shared event store
// Sliding-window machinery, the rule implementations, the scan runtime,
// and the batched alert sink

pub mod runtime;
pub mod rules;
pub mod sink;
pub mod window;

use siem_common::{Alert, Event};

pub use runtime::DetectorRuntime;
pub use sink::AlertSink;

/// A stateful streaming rule set over normalized events.
///
/// Detectors own their windows and dedupe map; the runtime owns
/// scheduling, store reads, and the alert sink. `scan` must see events in
/// timestamp-ascending order.
pub trait Detector: Send {
    /// Slug used for cursor files and log lines.
    fn name(&self) -> &'static str;

    /// Scan cadence in scheduled mode.
    fn cadence(&self) -> std::time::Duration {
        std::time::Duration::from_secs(40)
    }

    /// Longest sliding window of the rule set; each incremental tick
    /// re-reads this much history so window state rebuilds correctly.
    fn lookback(&self) -> chrono::Duration;

    /// Store-side category filter (membership test, any tag matches).
    fn categories(&self) -> &'static [&'static str];

    /// Clear transient counters before a scan. The cross-tick dedupe map
    /// is preserved.
    fn begin_scan(&mut self);

    /// Feed a batch of events through the rule set and collect the alerts
    /// that survive thresholding and dedupe.
    fn scan(&mut self, events: &[Event]) -> Vec<Alert>;
}

/// Normalise an observed count against its threshold to a 0..10 score:
/// `min(10, observed / threshold * k)`.
pub fn normalized_score(observed: usize, threshold: u64, k: f64) -> f64 {
    if threshold == 0 {
        return 10.0;
    }
    (observed as f64 / threshold as f64 * k).min(10.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_score_at_threshold() {
        assert_eq!(normalized_score(5, 5, 5.0), 5.0);
        assert_eq!(normalized_score(3, 3, 7.0), 7.0);
    }

    #[test]
    fn test_score_caps_at_ten() {
        assert_eq!(normalized_score(1000, 5, 5.0), 10.0);
    }

    #[test]
    fn test_score_below_threshold() {
        assert!(normalized_score(2, 5, 5.0) < 5.0);
    }
}
