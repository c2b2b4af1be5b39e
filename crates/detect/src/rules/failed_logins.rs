//! Failed-login family: three concurrent sub-rules over the same
//! authentication-failure stream.
//!
//! - Brute Force (user+IP): one account hammered from one address.
//! - Credential Stuffing: one address trying many accounts.
//! - Account Targeted Brute Force: one account hit from many addresses.

use chrono::Duration;
use serde_json::json;
use siem_common::config::{env_u64, Settings};
use siem_common::net::CidrSet;
use siem_common::{Alert, Event, Severity};

use crate::window::{DedupeGate, SlidingCounter, SlidingPairs};
use crate::{normalized_score, Detector};

pub const BRUTE_FORCE_RULE: &str = "Brute Force (user+IP)";
pub const CREDENTIAL_STUFFING_RULE: &str = "Credential Stuffing";
pub const ACCOUNT_TARGETED_RULE: &str = "Account Targeted Brute Force";

/// Minimum distinct counterpart entities (users for stuffing, addresses
/// for account targeting).
const DISTINCT_ENTITY_MIN: usize = 3;

pub struct FailedLoginDetector {
    threshold: usize,
    window_secs: u64,
    user_ip_attempts: SlidingCounter<(String, String)>,
    ip_attempts: SlidingPairs<String, String>,
    user_attempts: SlidingPairs<String, String>,
    dedupe: DedupeGate,
    whitelist: CidrSet,
}

impl FailedLoginDetector {
    pub fn from_settings(settings: &Settings) -> Self {
        let window_secs = env_u64("WINDOW_BRUTE_FORCE_SECS", 300);
        FailedLoginDetector {
            threshold: env_u64("THRESHOLD_BRUTE_FORCE", 5) as usize,
            window_secs,
            user_ip_attempts: SlidingCounter::new(window_secs),
            ip_attempts: SlidingPairs::new(window_secs),
            user_attempts: SlidingPairs::new(window_secs),
            dedupe: DedupeGate::new(env_u64("DEDUPE_BRUTE_FORCE_SECS", 300)),
            whitelist: settings.whitelist(),
        }
    }
}

impl Detector for FailedLoginDetector {
    fn name(&self) -> &'static str {
        "failed_logins"
    }

    fn cadence(&self) -> std::time::Duration {
        std::time::Duration::from_secs(400)
    }

    fn lookback(&self) -> Duration {
        Duration::seconds(self.window_secs as i64)
    }

    fn categories(&self) -> &'static [&'static str] {
        &["authentication"]
    }

    fn begin_scan(&mut self) {
        self.user_ip_attempts.clear();
        self.ip_attempts.clear();
        self.user_attempts.clear();
    }

    fn scan(&mut self, events: &[Event]) -> Vec<Alert> {
        let mut alerts = Vec::new();
        let window_min = self.window_secs / 60;

        for ev in events {
            if !ev.has_category("authentication") || ev.outcome.as_deref() != Some("failure") {
                continue;
            }
            let Some(ip) = ev.source_ip.clone() else {
                continue;
            };
            if self.whitelist.contains(&ip) {
                continue;
            }
            let user = ev
                .username
                .clone()
                .unwrap_or_else(|| "unknown".to_string());
            let ts = ev.timestamp;

            let pair_count = self.user_ip_attempts.observe((user.clone(), ip.clone()), ts);
            self.ip_attempts.observe(ip.clone(), ts, user.clone());
            self.user_attempts.observe(user.clone(), ts, ip.clone());

            // Rule 1: one account hammered from one address
            if pair_count >= self.threshold {
                let id = format!("{BRUTE_FORCE_RULE}|{user}|{ip}");
                if self.dedupe.try_emit(&id, ts) {
                    let score = normalized_score(pair_count, self.threshold as u64, 5.0);
                    alerts.push(Alert {
                        timestamp: ts,
                        rule: BRUTE_FORCE_RULE.to_string(),
                        user_name: Some(user.clone()),
                        source_ip: Some(ip.clone()),
                        destination_ip: None,
                        attempt_count: pair_count as i32,
                        severity: Severity::High,
                        technique: "brute_force".to_string(),
                        score,
                        evidence: format!(
                            "{pair_count} failed logins for {user} from {ip} in last {window_min} minutes"
                        ),
                        raw: json!({
                            "rule": BRUTE_FORCE_RULE,
                            "user.name": user,
                            "source.ip": ip,
                            "@timestamp": ts.to_rfc3339(),
                            "count": pair_count,
                            "severity": "HIGH",
                            "attack.technique": "brute_force",
                        }),
                    });
                }
            }

            // Rule 2: one address, many accounts
            let ip_count = self.ip_attempts.count(&ip);
            let distinct_users = self.ip_attempts.distinct(&ip);
            if ip_count >= self.threshold && distinct_users >= DISTINCT_ENTITY_MIN {
                let id = format!("{CREDENTIAL_STUFFING_RULE}|{ip}");
                if self.dedupe.try_emit(&id, ts) {
                    let score = normalized_score(ip_count, self.threshold as u64, 5.0);
                    alerts.push(Alert {
                        timestamp: ts,
                        rule: CREDENTIAL_STUFFING_RULE.to_string(),
                        user_name: Some("Multiple".to_string()),
                        source_ip: Some(ip.clone()),
                        destination_ip: None,
                        attempt_count: ip_count as i32,
                        severity: Severity::Critical,
                        technique: "credential_stuffing".to_string(),
                        score,
                        evidence: format!(
                            "{ip_count} failed logins across {distinct_users} accounts from {ip} in last {window_min} minutes"
                        ),
                        raw: json!({
                            "rule": CREDENTIAL_STUFFING_RULE,
                            "user.name": "Multiple",
                            "source.ip": ip,
                            "@timestamp": ts.to_rfc3339(),
                            "count": ip_count,
                            "severity": "CRITICAL",
                            "attack.technique": "credential_stuffing",
                        }),
                    });
                }
            }

            // Rule 3: one account, many addresses
            let user_count = self.user_attempts.count(&user);
            let distinct_ips = self.user_attempts.distinct(&user);
            if user_count >= self.threshold && distinct_ips >= DISTINCT_ENTITY_MIN {
                let id = format!("{ACCOUNT_TARGETED_RULE}|{user}");
                if self.dedupe.try_emit(&id, ts) {
                    let score = normalized_score(user_count, self.threshold as u64, 5.0);
                    alerts.push(Alert {
                        timestamp: ts,
                        rule: ACCOUNT_TARGETED_RULE.to_string(),
                        user_name: Some(user.clone()),
                        source_ip: Some("Multiple".to_string()),
                        destination_ip: None,
                        attempt_count: user_count as i32,
                        severity: Severity::High,
                        technique: "distributed_bruteforce".to_string(),
                        score,
                        evidence: format!(
                            "{user_count} failed logins for {user} from {distinct_ips} addresses in last {window_min} minutes"
                        ),
                        raw: json!({
                            "rule": ACCOUNT_TARGETED_RULE,
                            "user.name": user,
                            "source.ip": "Multiple",
                            "@timestamp": ts.to_rfc3339(),
                            "count": user_count,
                            "severity": "HIGH",
                            "attack.technique": "distributed_bruteforce",
                        }),
                    });
                }
            }
        }

        alerts
    }
}
