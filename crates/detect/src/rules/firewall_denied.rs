//! Firewall denied-access detector: repeated denied/blocked traffic from
//! one source address.

use chrono::Duration;
use serde_json::json;
use siem_common::config::{env_u64, Settings};
use siem_common::net::CidrSet;
use siem_common::{Alert, Event, Severity};

use crate::window::{DedupeGate, SlidingCounter};
use crate::{normalized_score, Detector};

pub const RULE: &str = "Firewall Denied Access";

pub struct FirewallDeniedDetector {
    threshold: usize,
    window_secs: u64,
    blocked_attempts: SlidingCounter<String>,
    dedupe: DedupeGate,
    whitelist: CidrSet,
}

impl FirewallDeniedDetector {
    pub fn from_settings(settings: &Settings) -> Self {
        let window_secs = env_u64("WINDOW_FIREWALL_DENIED_SECS", 300);
        FirewallDeniedDetector {
            threshold: env_u64("THRESHOLD_FIREWALL_DENIED", 5) as usize,
            window_secs,
            blocked_attempts: SlidingCounter::new(window_secs),
            dedupe: DedupeGate::new(env_u64("DEDUPE_FIREWALL_DENIED_SECS", 300)),
            whitelist: settings.whitelist(),
        }
    }
}

impl Detector for FirewallDeniedDetector {
    fn name(&self) -> &'static str {
        "firewall_denied"
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
        let window_min = self.window_secs / 60;

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

            let id = format!("firewall_denied|{ip}");
            if !self.dedupe.try_emit(&id, ts) {
                continue;
            }
            let score = normalized_score(count, self.threshold as u64, 5.0);
            let severity = if score >= 5.0 {
                Severity::High
            } else {
                Severity::Medium
            };
            let user = ev.username.clone().unwrap_or_else(|| "unknown".to_string());
            alerts.push(Alert {
                timestamp: ts,
                rule: RULE.to_string(),
                user_name: Some(user.clone()),
                source_ip: Some(ip.clone()),
                destination_ip: ev.destination_ip.clone(),
                attempt_count: count as i32,
                severity,
                technique: "network_denial".to_string(),
                score,
                evidence: format!("{count} denied attempts in last {window_min} minutes"),
                raw: json!({
                    "rule": RULE,
                    "user.name": user,
                    "source.ip": ip,
                    "destination.ip": ev.destination_ip,
                    "destination.port": ev.destination_port,
                    "protocol": ev.protocol,
                    "@timestamp": ts.to_rfc3339(),
                    "count": count,
                    "severity": severity.as_str(),
                    "score": score,
                    "attack.technique": "network_denial",
                }),
            });
        }

        alerts
    }
}
