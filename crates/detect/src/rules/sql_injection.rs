//! SQL injection detector over web events.
//!
//! The URL (full URL when available) and request body are percent-decoded,
//! concatenated, and matched against a fixed pattern set that also covers
//! percent-encoded tokens for double-encoded payloads.

use std::sync::OnceLock;

use chrono::Duration;
use percent_encoding::percent_decode_str;
use regex::Regex;
use serde_json::json;
use siem_common::config::{env_u64, Settings};
use siem_common::net::CidrSet;
use siem_common::{Alert, Event, Severity};

use crate::window::{DedupeGate, SlidingCounter};
use crate::{normalized_score, Detector};

pub const RULE: &str = "Suspicious Web Activity - SQLi";

static SQLI_PATTERN: OnceLock<Regex> = OnceLock::new();

fn sqli_pattern() -> &'static Regex {
    SQLI_PATTERN.get_or_init(|| {
        Regex::new(
            r"(?ix)
            (
                ('\s*or\s*'1'='1'|or\s+1\s*=\s*1|union\s+select|--|;\s*drop\b|/\*|\*/|\bselect\b.*\bfrom\b|\bexec\b|\bbenchmark\b|\bwaitfor\b)
                |(%27|%22|%3d|%2d%2d|%3b|%2f%2a|%2a)
            )",
        )
        .expect("sqli pattern")
    })
}

/// Decode `+` and percent escapes the way a query string is decoded.
fn url_decode(input: &str) -> String {
    let spaced = input.replace('+', " ");
    percent_decode_str(&spaced).decode_utf8_lossy().into_owned()
}

/// Stringified request body out of the raw document, if any.
fn request_body(ev: &Event) -> String {
    match ev
        .raw
        .pointer("/http/request/body")
        .unwrap_or(&serde_json::Value::Null)
    {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub struct SqlInjectionDetector {
    rate_threshold: usize,
    window_secs: u64,
    attempts: SlidingCounter<String>,
    dedupe: DedupeGate,
    whitelist: CidrSet,
}

impl SqlInjectionDetector {
    pub fn from_settings(settings: &Settings) -> Self {
        let window_secs = env_u64("WINDOW_SQLI_SECS", 300);
        SqlInjectionDetector {
            rate_threshold: env_u64("THRESHOLD_SQLI", 1) as usize,
            window_secs,
            attempts: SlidingCounter::new(window_secs),
            dedupe: DedupeGate::new(env_u64("DEDUPE_SQLI_SECS", 300)),
            whitelist: settings.whitelist(),
        }
    }
}

impl Detector for SqlInjectionDetector {
    fn name(&self) -> &'static str {
        "sql_injection"
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
            let full_url = ev.url_full.as_deref().unwrap_or("");
            let url_path = ev.url_path.as_deref().unwrap_or("");
            let url = if full_url.is_empty() { url_path } else { full_url }.to_lowercase();
            let body = request_body(ev).to_lowercase();

            let combined = format!("{} {}", url_decode(&url), url_decode(&body));
            let combined = combined.trim();
            if !sqli_pattern().is_match(combined) {
                continue;
            }

            let ip = ev
                .source_ip
                .clone()
                .unwrap_or_else(|| "unknown".to_string());
            if self.whitelist.contains(&ip) {
                continue;
            }
            let ts = ev.timestamp;
            let count = self.attempts.observe(ip.clone(), ts);
            if count < self.rate_threshold {
                continue;
            }

            let id = format!("SQLi|{ip}");
            if !self.dedupe.try_emit(&id, ts) {
                continue;
            }
            // anything at or past the rate threshold is treated as CRITICAL
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
            let snippet: String = combined.chars().take(1024).collect();
            alerts.push(Alert {
                timestamp: ts,
                rule: RULE.to_string(),
                user_name: Some(user.clone()),
                source_ip: Some(ip.clone()),
                destination_ip: None,
                attempt_count: count as i32,
                severity,
                technique: "SQLi".to_string(),
                score,
                evidence: format!("SQL injection pattern in {}", if full_url.is_empty() { "url path" } else { "full url" }),
                raw: json!({
                    "rule": RULE,
                    "user.name": user,
                    "source.ip": ip,
                    "@timestamp": ts.to_rfc3339(),
                    "severity": severity.as_str(),
                    "attack.technique": "SQLi",
                    "message": ev.message,
                    "http_method": ev.http_method,
                    "url": url_path,
                    "full_url": ev.url_full,
                    "count": count,
                    "detected_input_snippet": snippet,
                }),
            });
        }

        alerts
    }
}
