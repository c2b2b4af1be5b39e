//! Allowed-then-blocked detector: a source that was previously allowed
//! through the firewall starts accumulating denials.
//!
//! The prior-allowed marker is indefinite for the scan; only the sliding
//! window on denied events bounds re-firing. A new "allowed" does not
//! reset the denied counter, and the counter is not cleared on emission.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use siem_common::config::{env_u64, Settings};
use siem_common::net::CidrSet;
use siem_common::{Alert, Event, Severity};

use crate::window::{DedupeGate, SlidingCounter};
use crate::{normalized_score, Detector};

pub const RULE: &str = "Firewall Allowed → Suddenly Blocked";

pub struct AllowedBlockedDetector {
    deny_threshold: usize,
    window_secs: u64,
    allowed_sources: HashMap<String, DateTime<Utc>>,
    denied_attempts: SlidingCounter<String>,
    dedupe: DedupeGate,
    whitelist: CidrSet,
}

impl AllowedBlockedDetector {
    pub fn from_settings(settings: &Settings) -> Self {
        let window_secs = env_u64("WINDOW_ALLOWED_BLOCKED_SECS", 300);
        AllowedBlockedDetector {
            deny_threshold: env_u64("THRESHOLD_ALLOWED_BLOCKED", 3) as usize,
            window_secs,
            allowed_sources: HashMap::new(),
            denied_attempts: SlidingCounter::new(window_secs),
            dedupe: DedupeGate::new(env_u64("DEDUPE_ALLOWED_BLOCKED_SECS", 300)),
            whitelist: settings.whitelist(),
        }
    }
}

impl Detector for AllowedBlockedDetector {
    fn name(&self) -> &'static str {
        "allowed_blocked"
    }

    fn lookback(&self) -> Duration {
        Duration::seconds(self.window_secs as i64)
    }

    fn categories(&self) -> &'static [&'static str] {
        &["firewall"]
    }

    fn begin_scan(&mut self) {
        self.allowed_sources.clear();
        self.denied_attempts.clear();
    }

    fn scan(&mut self, events: &[Event]) -> Vec<Alert> {
        let mut alerts = Vec::new();
        let window_min = self.window_secs / 60;

        for ev in events {
            if !ev.has_category("firewall") {
                continue;
            }
            let Some(ip) = ev.source_ip.clone() else {
                continue;
            };
            if self.whitelist.contains(&ip) {
                continue;
            }
            let ts = ev.timestamp;
            let outcome = ev.outcome.as_deref().unwrap_or("").to_lowercase();

            if outcome == "allowed" {
                self.allowed_sources.insert(ip, ts);
                continue;
            }
            if outcome != "denied" && outcome != "blocked" {
                continue;
            }
            // only interesting when the source was let through earlier
            if !self.allowed_sources.contains_key(&ip) {
                continue;
            }

            let count = self.denied_attempts.observe(ip.clone(), ts);
            if count < self.deny_threshold {
                continue;
            }
            let id = format!("allowed_blocked|{ip}");
            if !self.dedupe.try_emit(&id, ts) {
                continue;
            }
            let score = normalized_score(count, self.deny_threshold as u64, 7.0);
            alerts.push(Alert {
                timestamp: ts,
                rule: RULE.to_string(),
                user_name: None,
                source_ip: Some(ip.clone()),
                destination_ip: ev.destination_ip.clone(),
                attempt_count: count as i32,
                severity: Severity::High,
                technique: "suspicious_behavior".to_string(),
                score,
                evidence: format!(
                    "Source {ip} was previously allowed but had {count} denied attempts in {window_min} minutes"
                ),
                raw: json!({
                    "rule": RULE,
                    "source.ip": ip,
                    "destination.ip": ev.destination_ip,
                    "@timestamp": ts.to_rfc3339(),
                    "count": count,
                    "severity": "HIGH",
                    "score": score,
                    "attack.technique": "suspicious_behavior",
                }),
            });
        }

        alerts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn fw(ts: DateTime<Utc>, ip: &str, outcome: &str) -> Event {
        let mut ev = Event::at(ts);
        ev.category = vec!["firewall".to_string()];
        ev.outcome = Some(outcome.to_string());
        ev.source_ip = Some(ip.to_string());
        ev
    }

    fn detector() -> AllowedBlockedDetector {
        AllowedBlockedDetector::from_settings(&Settings::with_defaults("postgres://unused"))
    }

    #[test]
    fn test_denies_after_allow_trigger() {
        let mut det = detector();
        let events = vec![
            fw(t(0), "42.1.1.1", "allowed"),
            fw(t(10), "42.1.1.1", "denied"),
            fw(t(20), "42.1.1.1", "denied"),
            fw(t(30), "42.1.1.1", "blocked"),
        ];
        let alerts = det.scan(&events);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].rule, RULE);
        assert_eq!(alerts[0].attempt_count, 3);
        assert_eq!(alerts[0].severity, Severity::High);
        // 3/3 * 7 = 7.0
        assert!((alerts[0].score - 7.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_denies_without_prior_allow_do_not_trigger() {
        let mut det = detector();
        let events: Vec<Event> = (0..6).map(|i| fw(t(i * 10), "42.1.1.1", "denied")).collect();
        assert!(det.scan(&events).is_empty());
    }

    #[test]
    fn test_new_allow_does_not_reset_denied_counter() {
        let mut det = detector();
        let events = vec![
            fw(t(0), "42.1.1.1", "allowed"),
            fw(t(10), "42.1.1.1", "denied"),
            fw(t(20), "42.1.1.1", "denied"),
            // an interleaved allow must not clear the denied window
            fw(t(25), "42.1.1.1", "allowed"),
            fw(t(30), "42.1.1.1", "denied"),
        ];
        assert_eq!(det.scan(&events).len(), 1);
    }

    #[test]
    fn test_window_not_cleared_on_emission() {
        let mut det = detector();
        let mut events = vec![fw(t(0), "42.1.1.1", "allowed")];
        events.extend((1..=3).map(|i| fw(t(i * 10), "42.1.1.1", "denied")));
        assert_eq!(det.scan(&events).len(), 1);

        // denials continue past the dedupe gap; the preserved window means
        // the rule re-fires without needing three fresh denials
        let more: Vec<Event> = (0..2)
            .map(|i| fw(t(320 + i * 10), "42.1.1.1", "denied"))
            .collect();
        assert_eq!(det.scan(&more).len(), 1);
    }

    #[test]
    fn test_whitelisted_source_ignored() {
        let mut det = detector();
        let mut events = vec![fw(t(0), "10.2.2.2", "allowed")];
        events.extend((1..=5).map(|i| fw(t(i * 10), "10.2.2.2", "denied")));
        assert!(det.scan(&events).is_empty());
    }
}
