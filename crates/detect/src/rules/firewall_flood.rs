//! Firewall flood detector: a denied-request rate consistent with a
//! DoS/DDoS attempt.

use chrono::Duration;
use serde_json::json;
use siem_common::config::{env_u64, Settings};
use siem_common::net::CidrSet;
use siem_common::{Alert, Event, Severity};

use crate::window::{DedupeGate, SlidingCounter};
use crate::Detector;

pub const RULE: &str = "Firewall Flood Detection (Possible DoS/DDoS)";

pub struct FirewallFloodDetector {
    threshold: usize,
    window_secs: u64,
    blocked_attempts: SlidingCounter<String>,
    dedupe: DedupeGate,
    whitelist: CidrSet,
}

impl FirewallFloodDetector {
    pub fn from_settings(settings: &Settings) -> Self {
        let window_secs = env_u64("WINDOW_FIREWALL_FLOOD_SECS", 60);
        FirewallFloodDetector {
            threshold: env_u64("THRESHOLD_FIREWALL_FLOOD", 1000) as usize,
            window_secs,
            blocked_attempts: SlidingCounter::new(window_secs),
            dedupe: DedupeGate::new(env_u64("DEDUPE_FIREWALL_FLOOD_SECS", 300)),
            whitelist: settings.whitelist(),
        }
    }
}

impl Detector for FirewallFloodDetector {
    fn name(&self) -> &'static str {
        "firewall_flood"
    }

    fn lookback(&self) -> Duration {
        Duration::seconds(self.window_secs as i64)
    }

    fn categories(&self) -> &'static [&'static str] {
        &["firewall"]
    }

    fn begin_scan(&mut self) {
        self.blocked_attempts.clear();
    }

    fn scan(&mut self, events: &[Event]) -> Vec<Alert> {
        let mut alerts = Vec::new();

        for ev in events {
            if !ev.has_category("firewall") {
                continue;
            }
            let outcome = ev.outcome.as_deref().unwrap_or("").to_lowercase();
            if outcome != "denied" && outcome != "blocked" {
                continue;
            }
            let Some(ip) = ev.source_ip.clone() else {
                continue;
            };
            if self.whitelist.contains(&ip) {
                continue;
            }
            let ts = ev.timestamp;
            let count = self.blocked_attempts.observe(ip.clone(), ts);
            if count < self.threshold {
                continue;
            }

            let id = format!("firewall_flood|{ip}");
            if !self.dedupe.try_emit(&id, ts) {
                continue;
            }
            alerts.push(Alert {
                timestamp: ts,
                rule: RULE.to_string(),
                user_name: None,
                source_ip: Some(ip.clone()),
                destination_ip: ev.destination_ip.clone(),
                attempt_count: count as i32,
                severity: Severity::Critical,
                technique: "denial_of_service".to_string(),
                score: 10.0,
                evidence: format!(
                    "{count} denied requests in {} seconds",
                    self.window_secs
                ),
                raw: json!({
                    "rule": RULE,
                    "source.ip": ip,
                    "destination.ip": ev.destination_ip,
                    "@timestamp": ts.to_rfc3339(),
                    "count": count,
                    "severity": "CRITICAL",
                    "score": 10.0,
                    "attack.technique": "denial_of_service",
                }),
            });
        }

        alerts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};

    fn t_ms(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1_700_000_000_000 + ms).unwrap()
    }

    fn denied(ts: DateTime<Utc>, ip: &str) -> Event {
        let mut ev = Event::at(ts);
        ev.category = vec!["firewall".to_string()];
        ev.outcome = Some("denied".to_string());
        ev.source_ip = Some(ip.to_string());
        ev
    }

    fn detector() -> FirewallFloodDetector {
        FirewallFloodDetector::from_settings(&Settings::with_defaults("postgres://unused"))
    }

    #[test]
    fn test_kilo_burst_emits_one_critical_alert() {
        let mut det = detector();
        // 1000 denied events inside 50 seconds
        let events: Vec<Event> = (0..1000).map(|i| denied(t_ms(i * 50), "5.5.5.5")).collect();
        let alerts = det.scan(&events);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].rule, RULE);
        assert_eq!(alerts[0].attempt_count, 1000);
        assert_eq!(alerts[0].severity, Severity::Critical);
        assert_eq!(alerts[0].score, 10.0);

        // another thousand inside the next five minutes stays deduped
        let more: Vec<Event> = (0..1000)
            .map(|i| denied(t_ms(60_000 + i * 50), "5.5.5.5"))
            .collect();
        assert!(det.scan(&more).is_empty());
    }

    #[test]
    fn test_slow_denies_never_reach_threshold() {
        let mut det = detector();
        // one deny per two seconds: at most ~31 in any 60s window
        let events: Vec<Event> = (0..2000)
            .map(|i| denied(t_ms(i * 2000), "5.5.5.5"))
            .collect();
        assert!(det.scan(&events).is_empty());
    }

    #[test]
    fn test_flood_from_whitelisted_source_ignored() {
        let mut det = detector();
        let events: Vec<Event> = (0..1500)
            .map(|i| denied(t_ms(i * 10), "192.168.0.99"))
            .collect();
        assert!(det.scan(&events).is_empty());
    }
}
