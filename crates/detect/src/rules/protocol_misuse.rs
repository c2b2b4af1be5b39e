//! Protocol misuse detector: repeated firewall traffic over protocols
//! that should be rare on the monitored segment (icmp, udp, ftp, telnet).

use chrono::Duration;
use serde_json::json;
use siem_common::config::{env_u64, Settings};
use siem_common::net::CidrSet;
use siem_common::{Alert, Event, Severity};

use crate::window::{DedupeGate, SlidingCounter};
use crate::{normalized_score, Detector};

pub const RULE: &str = "Suspicious Protocol Misuse";

const UNUSUAL_PROTOCOLS: [&str; 4] = ["icmp", "udp", "ftp", "telnet"];

pub struct ProtocolMisuseDetector {
    threshold: usize,
    window_secs: u64,
    usage: SlidingCounter<(String, String)>,
    dedupe: DedupeGate,
    whitelist: CidrSet,
}

impl ProtocolMisuseDetector {
    pub fn from_settings(settings: &Settings) -> Self {
        let window_secs = env_u64("WINDOW_PROTOCOL_MISUSE_SECS", 300);
        ProtocolMisuseDetector {
            threshold: env_u64("THRESHOLD_PROTOCOL_MISUSE", 3) as usize,
            window_secs,
            usage: SlidingCounter::new(window_secs),
            dedupe: DedupeGate::new(env_u64("DEDUPE_PROTOCOL_MISUSE_SECS", 300)),
            whitelist: settings.whitelist(),
        }
    }
}

impl Detector for ProtocolMisuseDetector {
    fn name(&self) -> &'static str {
        "protocol_misuse"
    }

    fn lookback(&self) -> Duration {
        Duration::seconds(self.window_secs as i64)
    }

    fn categories(&self) -> &'static [&'static str] {
        &["firewall"]
    }

    fn begin_scan(&mut self) {
        self.usage.clear();
    }

    fn scan(&mut self, events: &[Event]) -> Vec<Alert> {
        let mut alerts = Vec::new();
        let window_min = self.window_secs / 60;

        for ev in events {
            if !ev.has_category("firewall") {
                continue;
            }
            let protocol = ev.protocol.as_deref().unwrap_or("unknown").to_lowercase();
            if !UNUSUAL_PROTOCOLS.contains(&protocol.as_str()) {
                continue;
            }
            let Some(ip) = ev.source_ip.clone() else {
                continue;
            };
            if self.whitelist.contains(&ip) {
                continue;
            }
            let ts = ev.timestamp;
            let count = self.usage.observe((ip.clone(), protocol.clone()), ts);
            if count < self.threshold {
                continue;
            }

            let id = format!("protocol_misuse|{ip}|{protocol}");
            if !self.dedupe.try_emit(&id, ts) {
                continue;
            }
            let score = normalized_score(count, self.threshold as u64, 5.0);
            let severity = if score >= 5.0 {
                Severity::High
            } else {
                Severity::Medium
            };
            alerts.push(Alert {
                timestamp: ts,
                rule: RULE.to_string(),
                user_name: None,
                source_ip: Some(ip.clone()),
                destination_ip: ev.destination_ip.clone(),
                attempt_count: count as i32,
                severity,
                technique: "protocol_misuse".to_string(),
                score,
                evidence: format!(
                    "{count} attempts using unusual protocol '{protocol}' in last {window_min} minutes"
                ),
                raw: json!({
                    "rule": RULE,
                    "source.ip": ip,
                    "destination.ip": ev.destination_ip,
                    "@timestamp": ts.to_rfc3339(),
                    "protocol": protocol,
                    "count": count,
                    "severity": severity.as_str(),
                    "score": score,
                    "attack.technique": "protocol_misuse",
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

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn fw(ts: DateTime<Utc>, ip: &str, protocol: &str) -> Event {
        let mut ev = Event::at(ts);
        ev.category = vec!["firewall".to_string()];
        ev.source_ip = Some(ip.to_string());
        ev.protocol = Some(protocol.to_string());
        ev
    }

    fn detector() -> ProtocolMisuseDetector {
        ProtocolMisuseDetector::from_settings(&Settings::with_defaults("postgres://unused"))
    }

    #[test]
    fn test_three_telnet_attempts_trigger() {
        let mut det = detector();
        let events: Vec<Event> = (0..3).map(|i| fw(t(i * 30), "42.1.1.1", "telnet")).collect();
        let alerts = det.scan(&events);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].rule, RULE);
        assert_eq!(alerts[0].technique, "protocol_misuse");
        // 3/3 * 5 = 5.0 -> HIGH
        assert_eq!(alerts[0].severity, Severity::High);
    }

    #[test]
    fn test_tcp_traffic_is_normal() {
        let mut det = detector();
        let events: Vec<Event> = (0..10).map(|i| fw(t(i * 10), "42.1.1.1", "tcp")).collect();
        assert!(det.scan(&events).is_empty());
    }

    #[test]
    fn test_protocols_tracked_independently() {
        let mut det = detector();
        // two udp and two ftp attempts: neither protocol reaches three
        let events = vec![
            fw(t(0), "42.1.1.1", "udp"),
            fw(t(10), "42.1.1.1", "ftp"),
            fw(t(20), "42.1.1.1", "udp"),
            fw(t(30), "42.1.1.1", "ftp"),
        ];
        assert!(det.scan(&events).is_empty());
    }

    #[test]
    fn test_window_preserved_after_emission() {
        let mut det = detector();
        let events: Vec<Event> = (0..3).map(|i| fw(t(i * 10), "42.1.1.1", "icmp")).collect();
        assert_eq!(det.scan(&events).len(), 1);

        // the window is not cleared on emit: once the dedupe gap passes,
        // continued traffic re-fires from the preserved state
        let more: Vec<Event> = (0..2)
            .map(|i| fw(t(310 + i * 10), "42.1.1.1", "icmp"))
            .collect();
        assert_eq!(det.scan(&more).len(), 1);
    }

    #[test]
    fn test_whitelisted_source_ignored() {
        let mut det = detector();
        let events: Vec<Event> = (0..5).map(|i| fw(t(i * 10), "10.8.8.8", "telnet")).collect();
        assert!(det.scan(&events).is_empty());
    }
}
