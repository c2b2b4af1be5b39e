//! Suspicious file activity: mass-encryption renames (ransomware) and
//! sensitive file uploads to external destinations (exfiltration).

use std::collections::HashMap;

use chrono::Duration;
use serde_json::json;
use siem_common::config::{env_f64, env_u64, Settings};
use siem_common::net::CidrSet;
use siem_common::{Alert, Event, Severity};

use crate::window::{DedupeGate, SlidingCounter};
use crate::{normalized_score, Detector};

pub const ENCRYPTION_RULE: &str = "Mass File Encryption Detected";
pub const EXFIL_RULE: &str = "Sensitive File Upload (Exfiltration)";

const RANSOMWARE_EXTENSIONS: [&str; 3] = [".locked", ".encrypted", ".crypt"];
const SENSITIVE_EXTENSIONS: [&str; 4] = [".db", ".csv", ".bak", ".sql"];
const PRIVATE_NETS: &str = "10.0.0.0/8,172.16.0.0/12,192.168.0.0/16";

/// Shannon entropy of a string in bits per character; encrypted or
/// randomly generated filenames score noticeably higher than real names.
fn shannon_entropy(s: &str) -> f64 {
    if s.is_empty() {
        return 0.0;
    }
    let mut counts: HashMap<char, usize> = HashMap::new();
    for c in s.chars() {
        *counts.entry(c).or_insert(0) += 1;
    }
    let len = s.chars().count() as f64;
    -counts
        .values()
        .map(|&n| {
            let p = n as f64 / len;
            p * p.log2()
        })
        .sum::<f64>()
}

/// Lowercased filename, falling back to the basename of the path.
fn extract_filename(ev: &Event) -> String {
    if let Some(name) = &ev.file_name {
        return name.trim().to_lowercase();
    }
    ev.file_path
        .as_deref()
        .and_then(|p| p.rsplit(['/', '\\']).next())
        .map(|n| n.trim().to_lowercase())
        .unwrap_or_default()
}

pub struct FileActivityDetector {
    file_threshold: usize,
    window_secs: u64,
    entropy_limit: f64,
    modifications: SlidingCounter<(String, String)>,
    ransomware_dedupe: DedupeGate,
    exfil_dedupe: DedupeGate,
    private_nets: CidrSet,
    whitelist: CidrSet,
}

impl FileActivityDetector {
    pub fn from_settings(settings: &Settings) -> Self {
        let window_secs = env_u64("WINDOW_FILE_ACTIVITY_SECS", 300);
        FileActivityDetector {
            file_threshold: env_u64("THRESHOLD_FILE_ACTIVITY", 20) as usize,
            window_secs,
            entropy_limit: env_f64("THRESHOLD_FILE_ENTROPY", 4.0),
            modifications: SlidingCounter::new(window_secs),
            ransomware_dedupe: DedupeGate::new(env_u64("DEDUPE_RANSOMWARE_SECS", 3600)),
            exfil_dedupe: DedupeGate::new(env_u64("DEDUPE_EXFIL_SECS", 300)),
            private_nets: CidrSet::parse(PRIVATE_NETS),
            whitelist: settings.whitelist(),
        }
    }
}

impl Detector for FileActivityDetector {
    fn name(&self) -> &'static str {
        "file_activity"
    }

    fn lookback(&self) -> Duration {
        Duration::seconds(self.window_secs as i64)
    }

    fn categories(&self) -> &'static [&'static str] {
        &["file", "network"]
    }

    fn begin_scan(&mut self) {
        self.modifications.clear();
    }

    fn scan(&mut self, events: &[Event]) -> Vec<Alert> {
        let mut alerts = Vec::new();
        let window_min = self.window_secs / 60;

        for ev in events {
            if let Some(ip) = ev.source_ip.as_deref() {
                if self.whitelist.contains(ip) {
                    continue;
                }
            }
            let ts = ev.timestamp;
            let user = ev
                .username
                .clone()
                .unwrap_or_else(|| "unknown".to_string());
            let ip = ev
                .source_ip
                .clone()
                .unwrap_or_else(|| "unknown".to_string());
            let file_name = extract_filename(ev);

            // Rule 1: mass encryption / suspicious renames
            if ev.has_category("file") && !file_name.is_empty() {
                let looks_encrypted = RANSOMWARE_EXTENSIONS
                    .iter()
                    .any(|ext| file_name.ends_with(ext))
                    || shannon_entropy(&file_name) > self.entropy_limit;
                if looks_encrypted {
                    let key = (user.clone(), ip.clone());
                    let count = self.modifications.observe(key, ts);
                    if count >= self.file_threshold {
                        let id = format!("{ENCRYPTION_RULE}|{user}|{ip}");
                        if self.ransomware_dedupe.try_emit(&id, ts) {
                            let score =
                                normalized_score(count, self.file_threshold as u64, 5.0);
                            alerts.push(Alert {
                                timestamp: ts,
                                rule: ENCRYPTION_RULE.to_string(),
                                user_name: Some(user.clone()),
                                source_ip: Some(ip.clone()),
                                destination_ip: None,
                                attempt_count: count as i32,
                                severity: Severity::Critical,
                                technique: "ransomware".to_string(),
                                score,
                                evidence: format!(
                                    "{count} encrypted-looking file modifications in last {window_min} minutes"
                                ),
                                raw: json!({
                                    "rule": ENCRYPTION_RULE,
                                    "user.name": user,
                                    "source.ip": ip,
                                    "@timestamp": ts.to_rfc3339(),
                                    "count": count,
                                    "severity": "CRITICAL",
                                    "attack.technique": "ransomware",
                                    "example_file": file_name,
                                }),
                            });
                        }
                    }
                }
            }

            // Rule 2: sensitive file upload to an external destination
            if ev.has_category("network") && !file_name.is_empty() {
                let Some(dst) = ev.destination_ip.clone() else {
                    continue;
                };
                let sensitive = SENSITIVE_EXTENSIONS
                    .iter()
                    .any(|ext| file_name.ends_with(ext));
                if sensitive && !self.private_nets.contains(&dst) {
                    let id = format!("{EXFIL_RULE}|{user}|{ip}|{dst}");
                    if self.exfil_dedupe.try_emit(&id, ts) {
                        alerts.push(Alert {
                            timestamp: ts,
                            rule: EXFIL_RULE.to_string(),
                            user_name: Some(user.clone()),
                            source_ip: Some(ip.clone()),
                            destination_ip: Some(dst.clone()),
                            attempt_count: 1,
                            severity: Severity::High,
                            technique: "data_exfiltration".to_string(),
                            score: 5.0,
                            evidence: format!(
                                "sensitive file {file_name} sent to external host {dst}"
                            ),
                            raw: json!({
                                "rule": EXFIL_RULE,
                                "user.name": user,
                                "source.ip": ip,
                                "destination.ip": dst,
                                "@timestamp": ts.to_rfc3339(),
                                "severity": "HIGH",
                                "attack.technique": "data_exfiltration",
                                "file": file_name,
                                "count": 1,
                            }),
                        });
                    }
                }
            }
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

    fn file_event(ts: DateTime<Utc>, user: &str, ip: &str, name: &str) -> Event {
        let mut ev = Event::at(ts);
        ev.category = vec!["file".to_string()];
        ev.username = Some(user.to_string());
        ev.source_ip = Some(ip.to_string());
        ev.file_name = Some(name.to_string());
        ev
    }

    fn upload(ts: DateTime<Utc>, user: &str, name: &str, dst: &str) -> Event {
        let mut ev = Event::at(ts);
        ev.category = vec!["network".to_string()];
        ev.username = Some(user.to_string());
        ev.source_ip = Some("42.1.1.1".to_string());
        ev.destination_ip = Some(dst.to_string());
        ev.file_name = Some(name.to_string());
        ev
    }

    fn detector() -> FileActivityDetector {
        FileActivityDetector::from_settings(&Settings::with_defaults("postgres://unused"))
    }

    #[test]
    fn test_entropy_separates_random_names() {
        assert!(shannon_entropy("x9k2mq7vz1hw8f3b.dat") > 4.0);
        assert!(shannon_entropy("report.txt") < 4.0);
        assert_eq!(shannon_entropy(""), 0.0);
    }

    #[test]
    fn test_mass_encryption_twenty_renames() {
        let mut det = detector();
        let events: Vec<Event> = (0..20)
            .map(|i| file_event(t(i * 10), "bob", "1.1.1.1", &format!("doc{i}.locked")))
            .collect();
        let alerts = det.scan(&events);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].rule, ENCRYPTION_RULE);
        assert_eq!(alerts[0].severity, Severity::Critical);
        assert_eq!(alerts[0].technique, "ransomware");
        assert_eq!(alerts[0].attempt_count, 20);

        // further matching events inside the hour stay suppressed
        let more: Vec<Event> = (0..20)
            .map(|i| file_event(t(300 + i * 10), "bob", "1.1.1.1", &format!("more{i}.locked")))
            .collect();
        assert!(det.scan(&more).is_empty());
    }

    #[test]
    fn test_nineteen_renames_stay_quiet() {
        let mut det = detector();
        let events: Vec<Event> = (0..19)
            .map(|i| file_event(t(i * 10), "bob", "1.1.1.1", &format!("doc{i}.encrypted")))
            .collect();
        assert!(det.scan(&events).is_empty());
    }

    #[test]
    fn test_high_entropy_names_count_without_extension() {
        let mut det = detector();
        let events: Vec<Event> = (0..20)
            .map(|i| {
                file_event(
                    t(i * 10),
                    "bob",
                    "1.1.1.1",
                    &format!("zq{i}x9k2mw7vt1hw8f3bpl6.bin"),
                )
            })
            .collect();
        assert_eq!(det.scan(&events).len(), 1);
    }

    #[test]
    fn test_exfil_single_event_to_external_host() {
        let mut det = detector();
        let ev = upload(t(0), "carol", "customers.csv", "203.0.113.50");
        let alerts = det.scan(&[ev]);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].rule, EXFIL_RULE);
        assert_eq!(alerts[0].technique, "data_exfiltration");
        assert_eq!(alerts[0].destination_ip.as_deref(), Some("203.0.113.50"));
    }

    #[test]
    fn test_upload_to_private_destination_ignored() {
        let mut det = detector();
        for dst in ["10.2.3.4", "172.20.1.1", "192.168.9.9"] {
            let ev = upload(t(0), "carol", "backup.sql", dst);
            assert!(det.scan(&[ev]).is_empty(), "dst {dst} should be private");
        }
    }

    #[test]
    fn test_harmless_extension_ignored() {
        let mut det = detector();
        let ev = upload(t(0), "carol", "photo.jpg", "203.0.113.50");
        assert!(det.scan(&[ev]).is_empty());
    }

    #[test]
    fn test_exfil_dedupe_per_destination() {
        let mut det = detector();
        let first = upload(t(0), "carol", "dump.sql", "203.0.113.50");
        let repeat = upload(t(60), "carol", "dump.sql", "203.0.113.50");
        let other_dst = upload(t(90), "carol", "dump.sql", "198.51.100.7");
        assert_eq!(det.scan(&[first]).len(), 1);
        assert!(det.scan(&[repeat]).is_empty());
        // a different destination is a different identity
        assert_eq!(det.scan(&[other_dst]).len(), 1);
    }

    #[test]
    fn test_filename_from_path_basename() {
        let mut ev = Event::at(t(0));
        ev.file_path = Some("C:\\Users\\bob\\Desktop\\Secret.DB".to_string());
        assert_eq!(extract_filename(&ev), "secret.db");
        ev.file_path = Some("/var/data/export.csv".to_string());
        assert_eq!(extract_filename(&ev), "export.csv");
    }
}
