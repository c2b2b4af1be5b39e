//! Cross-site scripting detector over web events.
//!
//! Matches script tags, javascript: URLs, inline event handlers, iframe
//! and image injections, alert() calls and cookie access across the URL,
//! request body, and the raw document.

use std::sync::OnceLock;

use chrono::Duration;
use regex::Regex;
use serde_json::json;
use siem_common::config::{env_u64, Settings};
use siem_common::net::CidrSet;
use siem_common::{Alert, Event, Severity};

use crate::window::{DedupeGate, SlidingCounter};
use crate::{normalized_score, Detector};

pub const RULE: &str = "Advanced XSS Detected";

const XSS_PATTERNS: [&str; 7] = [
    r"<script.*?>.*?</script>",
    r"javascript:",
    r"on\w+\s*=",
    r"<iframe.*?>",
    r"<img.*?on\w+\s*=.*?>",
    r"alert\s*\(.*?\)",
    r"document\.cookie",
];

static XSS_PATTERN: OnceLock<Regex> = OnceLock::new();

fn xss_pattern() -> &'static Regex {
    XSS_PATTERN.get_or_init(|| {
        Regex::new(&format!("(?i){}", XSS_PATTERNS.join("|"))).expect("xss pattern")
    })
}

pub struct XssDetector {
    rate_threshold: usize,
    window_secs: u64,
    attempts: SlidingCounter<String>,
    dedupe: DedupeGate,
    whitelist: CidrSet,
}

impl XssDetector {
    pub fn from_settings(settings: &Settings) -> Self {
        let window_secs = env_u64("WINDOW_XSS_SECS", 300);
        XssDetector {
            rate_threshold: env_u64("THRESHOLD_XSS", 3) as usize,
            window_secs,
            attempts: SlidingCounter::new(window_secs),
            dedupe: DedupeGate::new(env_u64("DEDUPE_XSS_SECS", 300)),
            whitelist: settings.whitelist(),
        }
    }
}

impl Detector for XssDetector {
    fn name(&self) -> &'static str {
        "xss"
    }

    fn cadence(&self) -> std::time::Duration {
        std::time::Duration::from_secs(400)
    }

    fn lookback(&self) -> Duration {
        Duration::seconds(self.window_secs as i64)
    }

    fn categories(&self) -> &'static [&'static str] {
        &["web"]
    }

    fn begin_scan(&mut self) {
        self.attempts.clear();
    }

    fn scan(&mut self, events: &[Event]) -> Vec<Alert> {
        let mut alerts = Vec::new();

        for ev in events {
            if !ev.has_category("web") {
                continue;
            }
            let url = ev
                .url_full
                .as_deref()
                .or(ev.url_path.as_deref())
                .unwrap_or("");
            let body = ev
                .raw
                .pointer("/http/request/body")
                .and_then(|b| b.as_str())
                .unwrap_or("");
            let combined = format!("{url} {body} {}", ev.raw);
            if !xss_pattern().is_match(&combined) {
                continue;
            }

            let Some(ip) = ev.source_ip.clone() else {
                continue;
            };
            if self.whitelist.contains(&ip) {
                continue;
            }
            let ts = ev.timestamp;
            let count = self.attempts.observe(ip.clone(), ts);
            if count < self.rate_threshold {
                continue;
            }

            let id = format!("{RULE}|{ip}");
            if !self.dedupe.try_emit(&id, ts) {
                continue;
            }
            // HIGH below the rate threshold, CRITICAL once it is reached
            let severity = if count >= self.rate_threshold {
                Severity::Critical
            } else {
                Severity::High
            };
            let score = normalized_score(count, self.rate_threshold as u64, 5.0);
            let user = ev
                .username
                .clone()
                .unwrap_or_else(|| "unknown".to_string());
            alerts.push(Alert {
                timestamp: ts,
                rule: RULE.to_string(),
                user_name: Some(user.clone()),
                source_ip: Some(ip.clone()),
                destination_ip: None,
                attempt_count: count as i32,
                severity,
                technique: "XSS".to_string(),
                score,
                evidence: format!("{count} XSS payloads from {ip} in window"),
                raw: json!({
                    "rule": RULE,
                    "user.name": user,
                    "source.ip": ip,
                    "@timestamp": ts.to_rfc3339(),
                    "severity": severity.as_str(),
                    "attack.technique": "XSS",
                    "http_method": ev.http_method,
                    "url": url,
                    "count": count,
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

    fn web(ts: DateTime<Utc>, ip: &str, path: &str) -> Event {
        let mut ev = Event::at(ts);
        ev.category = vec!["web".to_string()];
        ev.source_ip = Some(ip.to_string());
        ev.url_path = Some(path.to_string());
        ev
    }

    fn detector() -> XssDetector {
        XssDetector::from_settings(&Settings::with_defaults("postgres://unused"))
    }

    #[test]
    fn test_three_script_payloads_trigger_critical() {
        let mut det = detector();
        let events: Vec<Event> = (0..3)
            .map(|i| web(t(i * 10), "42.1.1.1", "/search?q=<script>alert(1)</script>"))
            .collect();
        let alerts = det.scan(&events);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].rule, RULE);
        assert_eq!(alerts[0].severity, Severity::Critical);
        assert_eq!(alerts[0].technique, "XSS");
        assert_eq!(alerts[0].attempt_count, 3);
    }

    #[test]
    fn test_single_payload_stays_below_threshold() {
        let mut det = detector();
        let ev = web(t(0), "42.1.1.1", "/search?q=<script>alert(1)</script>");
        assert!(det.scan(&[ev]).is_empty());
    }

    #[test]
    fn test_event_handler_and_cookie_patterns() {
        let mut det = detector();
        let events = vec![
            web(t(0), "42.1.1.1", "/p?x=<img src=x onerror=alert(1)>"),
            web(t(10), "42.1.1.1", "/p?x=javascript:document.cookie"),
            web(t(20), "42.1.1.1", "/p?x=<iframe src=//evil>"),
        ];
        let alerts = det.scan(&events);
        assert_eq!(alerts.len(), 1);
    }

    #[test]
    fn test_clean_traffic_passes() {
        let mut det = detector();
        let events: Vec<Event> = (0..5)
            .map(|i| web(t(i), "42.1.1.1", "/search?q=rust+tutorial"))
            .collect();
        assert!(det.scan(&events).is_empty());
    }

    #[test]
    fn test_dedupe_across_bursts() {
        let mut det = detector();
        let events: Vec<Event> = (0..6)
            .map(|i| web(t(i * 10), "42.1.1.1", "/q?x=<script>alert(1)</script>"))
            .collect();
        // threshold at the third event, the next three stay deduped
        assert_eq!(det.scan(&events).len(), 1);
    }
}
