//! Endpoint scanning detector: one source probing many sensitive web
//! paths in a short window.

use chrono::Duration;
use serde_json::json;
use siem_common::config::{env_u64, Settings};
use siem_common::net::CidrSet;
use siem_common::{Alert, Event, Severity};

use crate::window::{DedupeGate, SlidingPairs};
use crate::{normalized_score, Detector};

pub const RULE: &str = "Hard Endpoint Scanning";

const SENSITIVE_ENDPOINTS: [&str; 7] = [
    "/admin",
    "/login",
    "/config",
    "/backup",
    "/setup",
    "/db",
    "/phpmyadmin",
];

pub struct EndpointScanDetector {
    threshold: usize,
    window_secs: u64,
    hits: SlidingPairs<String, String>,
    dedupe: DedupeGate,
    whitelist: CidrSet,
}

impl EndpointScanDetector {
    pub fn from_settings(settings: &Settings) -> Self {
        let window_secs = env_u64("WINDOW_ENDPOINT_SCAN_SECS", 300);
        EndpointScanDetector {
            threshold: env_u64("THRESHOLD_ENDPOINT_SCAN", 5) as usize,
            window_secs,
            hits: SlidingPairs::new(window_secs),
            dedupe: DedupeGate::new(env_u64("DEDUPE_ENDPOINT_SCAN_SECS", 300)),
            whitelist: settings.whitelist(),
        }
    }
}

impl Detector for EndpointScanDetector {
    fn name(&self) -> &'static str {
        "endpoint_scan"
    }

    fn lookback(&self) -> Duration {
        Duration::seconds(self.window_secs as i64)
    }

    fn categories(&self) -> &'static [&'static str] {
        &["web"]
    }

    fn begin_scan(&mut self) {
        self.hits.clear();
    }

    fn scan(&mut self, events: &[Event]) -> Vec<Alert> {
        let mut alerts = Vec::new();
        let window_min = self.window_secs / 60;

        for ev in events {
            if !ev.has_category("web") {
                continue;
            }
            let Some(ip) = ev.source_ip.clone() else {
                continue;
            };
            if self.whitelist.contains(&ip) {
                continue;
            }
            let path = ev.url_path.as_deref().unwrap_or("").to_lowercase();
            if !SENSITIVE_ENDPOINTS.iter().any(|se| path.contains(se)) {
                continue;
            }
            let ts = ev.timestamp;
            self.hits.observe(ip.clone(), ts, path);

            let distinct_paths = self.hits.distinct(&ip);
            if distinct_paths < self.threshold {
                continue;
            }
            let id = format!("{RULE}|{ip}");
            if !self.dedupe.try_emit(&id, ts) {
                continue;
            }
            let hit_count = self.hits.count(&ip);
            let score = normalized_score(distinct_paths, self.threshold as u64, 5.0);
            let paths: Vec<String> = self
                .hits
                .distinct_values(&ip)
                .into_iter()
                .cloned()
                .collect();
            let user = ev.username.clone();
            alerts.push(Alert {
                timestamp: ts,
                rule: RULE.to_string(),
                user_name: user.clone(),
                source_ip: Some(ip.clone()),
                destination_ip: None,
                attempt_count: hit_count as i32,
                severity: Severity::High,
                technique: "endpoint_scanning".to_string(),
                score,
                evidence: format!(
                    "{distinct_paths} distinct sensitive endpoints probed in last {window_min} minutes"
                ),
                raw: json!({
                    "rule": RULE,
                    "user.name": user,
                    "source.ip": ip,
                    "@timestamp": ts.to_rfc3339(),
                    "count": hit_count,
                    "severity": "HIGH",
                    "attack.technique": "endpoint_scanning",
                    "paths": paths,
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

    fn detector() -> EndpointScanDetector {
        EndpointScanDetector::from_settings(&Settings::with_defaults("postgres://unused"))
    }

    #[test]
    fn test_five_distinct_sensitive_paths_trigger() {
        let mut det = detector();
        let paths = ["/admin", "/login", "/config", "/backup", "/phpmyadmin"];
        let events: Vec<Event> = paths
            .iter()
            .enumerate()
            .map(|(i, p)| web(t(i as i64 * 10), "42.1.1.1", p))
            .collect();
        let alerts = det.scan(&events);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].rule, RULE);
        assert_eq!(alerts[0].severity, Severity::High);
        assert_eq!(alerts[0].technique, "endpoint_scanning");
    }

    #[test]
    fn test_substring_match_on_paths() {
        let mut det = detector();
        let paths = [
            "/admin/users",
            "/login?next=/",
            "/config.php",
            "/backup.tar.gz",
            "/db/dump",
        ];
        let events: Vec<Event> = paths
            .iter()
            .enumerate()
            .map(|(i, p)| web(t(i as i64), "42.1.1.1", p))
            .collect();
        assert_eq!(det.scan(&events).len(), 1);
    }

    #[test]
    fn test_repeats_of_one_path_do_not_trigger() {
        let mut det = detector();
        let events: Vec<Event> = (0..10)
            .map(|i| web(t(i * 10), "42.1.1.1", "/admin"))
            .collect();
        assert!(det.scan(&events).is_empty());
    }

    #[test]
    fn test_harmless_paths_ignored() {
        let mut det = detector();
        let events: Vec<Event> = (0..10)
            .map(|i| web(t(i * 10), "42.1.1.1", "/index.html"))
            .collect();
        assert!(det.scan(&events).is_empty());
    }

    #[test]
    fn test_spread_over_window_does_not_trigger() {
        let mut det = detector();
        let paths = ["/admin", "/login", "/config", "/backup", "/phpmyadmin"];
        // one probe every six minutes: never five inside the window
        let events: Vec<Event> = paths
            .iter()
            .enumerate()
            .map(|(i, p)| web(t(i as i64 * 360), "42.1.1.1", p))
            .collect();
        assert!(det.scan(&events).is_empty());
    }
}
