//! Port scanning detector: four sub-rules over shared per-source state.
//!
//! State per source address: (a) per-destination deque of (port, ts),
//! (b) deque of (destination, ts), (c) deque of (port, ts) across all
//! destinations, (d) the dedupe map. All three deques are trimmed to the
//! longest window before each evaluation.

use std::collections::{BTreeSet, HashMap, VecDeque};

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use siem_common::config::{env_u64, Settings};
use siem_common::net::CidrSet;
use siem_common::{Alert, Event, Severity};

use crate::window::DedupeGate;
use crate::{normalized_score, Detector};

pub const PER_DST_RULE: &str = "Per-Destination Port Scan";
pub const DISTRIBUTED_RULE: &str = "Distributed Scan (many destinations)";
pub const CROSS_DST_RULE: &str = "Cross-Destination High Port Diversity";
pub const SLOW_SCAN_RULE: &str = "Stealthy Slow Scan";

struct RuleWindow {
    threshold: usize,
    window_secs: u64,
}

pub struct PortScanDetector {
    per_dst: RuleWindow,
    distributed: RuleWindow,
    cross_dst: RuleWindow,
    slow: RuleWindow,
    slow_min_unique_ports: usize,
    per_src_dst: HashMap<String, HashMap<String, VecDeque<(i32, DateTime<Utc>)>>>,
    src_dsts: HashMap<String, VecDeque<(String, DateTime<Utc>)>>,
    src_ports: HashMap<String, VecDeque<(i32, DateTime<Utc>)>>,
    dedupe: DedupeGate,
    whitelist: CidrSet,
}

impl PortScanDetector {
    pub fn from_settings(settings: &Settings) -> Self {
        PortScanDetector {
            per_dst: RuleWindow {
                threshold: env_u64("THRESHOLD_PORTSCAN_PER_DST", 20) as usize,
                window_secs: env_u64("WINDOW_PORTSCAN_PER_DST_SECS", 60),
            },
            distributed: RuleWindow {
                threshold: env_u64("THRESHOLD_PORTSCAN_DISTRIBUTED", 50) as usize,
                window_secs: env_u64("WINDOW_PORTSCAN_DISTRIBUTED_SECS", 300),
            },
            cross_dst: RuleWindow {
                threshold: env_u64("THRESHOLD_PORTSCAN_CROSS_DST", 100) as usize,
                window_secs: env_u64("WINDOW_PORTSCAN_CROSS_DST_SECS", 600),
            },
            slow: RuleWindow {
                threshold: env_u64("THRESHOLD_PORTSCAN_SLOW", 10) as usize,
                window_secs: env_u64("WINDOW_PORTSCAN_SLOW_SECS", 3600),
            },
            slow_min_unique_ports: env_u64("THRESHOLD_PORTSCAN_SLOW_MIN_PORTS", 5) as usize,
            per_src_dst: HashMap::new(),
            src_dsts: HashMap::new(),
            src_ports: HashMap::new(),
            dedupe: DedupeGate::new(env_u64("DEDUPE_PORTSCAN_SECS", 300)),
            whitelist: settings.whitelist(),
        }
    }

    fn max_window(&self) -> i64 {
        [
            self.per_dst.window_secs,
            self.distributed.window_secs,
            self.cross_dst.window_secs,
            self.slow.window_secs,
        ]
        .into_iter()
        .max()
        .unwrap_or(0) as i64
    }

    /// Trim every deque owned by `src` to the longest window.
    fn expire_old(&mut self, src: &str, now: DateTime<Utc>) {
        let horizon = Duration::seconds(self.max_window());
        if let Some(dsts) = self.per_src_dst.get_mut(src) {
            dsts.retain(|_, dq| {
                while dq.front().is_some_and(|(_, t)| now - *t > horizon) {
                    dq.pop_front();
                }
                !dq.is_empty()
            });
            if dsts.is_empty() {
                self.per_src_dst.remove(src);
            }
        }
        if let Some(dq) = self.src_dsts.get_mut(src) {
            while dq.front().is_some_and(|(_, t)| now - *t > horizon) {
                dq.pop_front();
            }
            if dq.is_empty() {
                self.src_dsts.remove(src);
            }
        }
        if let Some(dq) = self.src_ports.get_mut(src) {
            while dq.front().is_some_and(|(_, t)| now - *t > horizon) {
                dq.pop_front();
            }
            if dq.is_empty() {
                self.src_ports.remove(src);
            }
        }
    }

    fn unique_ports_to_dst(
        &self,
        src: &str,
        dst: &str,
        window_secs: u64,
        now: DateTime<Utc>,
    ) -> BTreeSet<i32> {
        let horizon = Duration::seconds(window_secs as i64);
        self.per_src_dst
            .get(src)
            .and_then(|dsts| dsts.get(dst))
            .map(|dq| {
                dq.iter()
                    .filter(|(_, t)| now - *t <= horizon)
                    .map(|(p, _)| *p)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn unique_dsts(&self, src: &str, window_secs: u64, now: DateTime<Utc>) -> BTreeSet<String> {
        let horizon = Duration::seconds(window_secs as i64);
        self.src_dsts
            .get(src)
            .map(|dq| {
                dq.iter()
                    .filter(|(_, t)| now - *t <= horizon)
                    .map(|(d, _)| d.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn unique_ports_cross_dst(
        &self,
        src: &str,
        window_secs: u64,
        now: DateTime<Utc>,
    ) -> BTreeSet<i32> {
        let horizon = Duration::seconds(window_secs as i64);
        self.src_ports
            .get(src)
            .map(|dq| {
                dq.iter()
                    .filter(|(_, t)| now - *t <= horizon)
                    .map(|(p, _)| *p)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn attempts_to_dst(&self, src: &str, dst: &str, window_secs: u64, now: DateTime<Utc>) -> usize {
        let horizon = Duration::seconds(window_secs as i64);
        self.per_src_dst
            .get(src)
            .and_then(|dsts| dsts.get(dst))
            .map(|dq| dq.iter().filter(|(_, t)| now - *t <= horizon).count())
            .unwrap_or(0)
    }

    #[allow(clippy::too_many_arguments)]
    fn make_alert(
        &self,
        rule: &str,
        src: &str,
        dst: Option<&str>,
        score: f64,
        ports: &BTreeSet<i32>,
        ts: DateTime<Utc>,
        evidence: String,
        extra: serde_json::Value,
    ) -> Alert {
        let severity = Severity::from_score(score);
        let port_list: Vec<i32> = ports.iter().copied().collect();
        Alert {
            timestamp: ts,
            rule: rule.to_string(),
            user_name: None,
            source_ip: Some(src.to_string()),
            destination_ip: dst.map(str::to_string),
            attempt_count: port_list.len().max(1) as i32,
            severity,
            technique: "port_scanning".to_string(),
            score,
            evidence,
            raw: json!({
                "rule": rule,
                "source.ip": src,
                "destination.ip": dst,
                "@timestamp": ts.to_rfc3339(),
                "ports": port_list,
                "count": port_list.len(),
                "severity": severity.as_str(),
                "score": score,
                "attack.technique": "port_scanning",
                "extra": extra,
            }),
        }
    }
}

impl Detector for PortScanDetector {
    fn name(&self) -> &'static str {
        "port_scan"
    }

    fn lookback(&self) -> Duration {
        Duration::seconds(self.max_window())
    }

    fn categories(&self) -> &'static [&'static str] {
        &["firewall", "network"]
    }

    fn begin_scan(&mut self) {
        self.per_src_dst.clear();
        self.src_dsts.clear();
        self.src_ports.clear();
    }

    fn scan(&mut self, events: &[Event]) -> Vec<Alert> {
        let mut alerts = Vec::new();

        for ev in events {
            let now = ev.timestamp;
            let (Some(src), Some(dst), Some(port)) = (
                ev.source_ip.clone(),
                ev.destination_ip.clone(),
                ev.destination_port,
            ) else {
                continue;
            };
            if self.whitelist.contains(&src) {
                continue;
            }

            self.expire_old(&src, now);
            self.per_src_dst
                .entry(src.clone())
                .or_default()
                .entry(dst.clone())
                .or_default()
                .push_back((port, now));
            self.src_dsts
                .entry(src.clone())
                .or_default()
                .push_back((dst.clone(), now));
            self.src_ports
                .entry(src.clone())
                .or_default()
                .push_back((port, now));

            // Rule 1: many unique ports against one destination
            let recent_ports =
                self.unique_ports_to_dst(&src, &dst, self.per_dst.window_secs, now);
            if recent_ports.len() >= self.per_dst.threshold {
                let id = format!("{PER_DST_RULE}|{src}|{dst}");
                if self.dedupe.try_emit(&id, now) {
                    let score = normalized_score(
                        recent_ports.len(),
                        self.per_dst.threshold as u64,
                        5.0,
                    );
                    let evidence = format!(
                        "{} unique ports in last {}s",
                        recent_ports.len(),
                        self.per_dst.window_secs
                    );
                    alerts.push(self.make_alert(
                        PER_DST_RULE,
                        &src,
                        Some(&dst),
                        score,
                        &recent_ports,
                        now,
                        evidence,
                        json!({}),
                    ));
                }
            }

            // Rule 2: many distinct destinations
            let dsts = self.unique_dsts(&src, self.distributed.window_secs, now);
            if dsts.len() >= self.distributed.threshold {
                let id = format!("{DISTRIBUTED_RULE}|{src}|any");
                if self.dedupe.try_emit(&id, now) {
                    let score =
                        normalized_score(dsts.len(), self.distributed.threshold as u64, 5.0);
                    let evidence = format!(
                        "{} distinct destinations in last {}s",
                        dsts.len(),
                        self.distributed.window_secs
                    );
                    let dst_list: Vec<&String> = dsts.iter().collect();
                    alerts.push(self.make_alert(
                        DISTRIBUTED_RULE,
                        &src,
                        None,
                        score,
                        &BTreeSet::new(),
                        now,
                        evidence,
                        json!({ "unique_dsts": dst_list }),
                    ));
                }
            }

            // Rule 3: high port diversity across all destinations
            let cross_ports =
                self.unique_ports_cross_dst(&src, self.cross_dst.window_secs, now);
            if cross_ports.len() >= self.cross_dst.threshold {
                let id = format!("{CROSS_DST_RULE}|{src}|any");
                if self.dedupe.try_emit(&id, now) {
                    let score = normalized_score(
                        cross_ports.len(),
                        self.cross_dst.threshold as u64,
                        5.0,
                    );
                    let evidence = format!(
                        "{} unique ports across destinations in last {}s",
                        cross_ports.len(),
                        self.cross_dst.window_secs
                    );
                    alerts.push(self.make_alert(
                        CROSS_DST_RULE,
                        &src,
                        None,
                        score,
                        &cross_ports,
                        now,
                        evidence,
                        json!({}),
                    ));
                }
            }

            // Rule 4: slow scans that stay under the fast thresholds but
            // persist across the hour
            let slow_ports = self.unique_ports_to_dst(&src, &dst, self.slow.window_secs, now);
            if slow_ports.len() >= self.slow_min_unique_ports {
                let attempts = self.attempts_to_dst(&src, &dst, self.slow.window_secs, now);
                let persistence =
                    (slow_ports.len() as f64).sqrt() * (1.0 + attempts as f64).ln();
                if slow_ports.len() >= self.slow.threshold
                    || persistence > self.slow.threshold as f64 / 2.0
                {
                    let id = format!("{SLOW_SCAN_RULE}|{src}|{dst}");
                    if self.dedupe.try_emit(&id, now) {
                        let score = persistence.min(10.0);
                        let evidence = format!(
                            "{} unique ports over {}s (attempts={attempts})",
                            slow_ports.len(),
                            self.slow.window_secs
                        );
                        alerts.push(self.make_alert(
                            SLOW_SCAN_RULE,
                            &src,
                            Some(&dst),
                            score,
                            &slow_ports,
                            now,
                            evidence,
                            json!({ "persistence_score": persistence }),
                        ));
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
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn fw(ts: DateTime<Utc>, src: &str, dst: &str, dport: i32) -> Event {
        let mut ev = Event::at(ts);
        ev.category = vec!["firewall".to_string()];
        ev.outcome = Some("denied".to_string());
        ev.source_ip = Some(src.to_string());
        ev.destination_ip = Some(dst.to_string());
        ev.destination_port = Some(dport);
        ev
    }

    fn detector() -> PortScanDetector {
        PortScanDetector::from_settings(&Settings::with_defaults("postgres://unused"))
    }

    #[test]
    fn test_per_destination_scan_twenty_ports() {
        let mut det = detector();
        let events: Vec<Event> = (0..20)
            .map(|i| fw(t(i * 2), "9.9.9.9", "172.20.0.1", 1000 + i as i32))
            .collect();
        let alerts = det.scan(&events);
        let per_dst: Vec<_> = alerts.iter().filter(|a| a.rule == PER_DST_RULE).collect();
        assert_eq!(per_dst.len(), 1);
        let alert = per_dst[0];
        assert_eq!(alert.technique, "port_scanning");
        assert!(alert.severity == Severity::High || alert.severity == Severity::Critical);
        let ports = alert.raw["ports"].as_array().unwrap();
        assert_eq!(ports.len(), 20);
    }

    #[test]
    fn test_repeated_ports_do_not_count_as_unique() {
        let mut det = detector();
        // forty hits but only five distinct ports
        let events: Vec<Event> = (0..40)
            .map(|i| fw(t(i), "9.9.9.9", "172.20.0.1", 1000 + (i % 5) as i32))
            .collect();
        let alerts = det.scan(&events);
        assert!(alerts.iter().all(|a| a.rule != PER_DST_RULE));
    }

    #[test]
    fn test_distributed_scan_many_destinations() {
        let mut det = detector();
        let events: Vec<Event> = (0..50)
            .map(|i| fw(t(i * 2), "9.9.9.9", &format!("172.20.0.{i}"), 80))
            .collect();
        let alerts = det.scan(&events);
        let distributed: Vec<_> = alerts
            .iter()
            .filter(|a| a.rule == DISTRIBUTED_RULE)
            .collect();
        assert_eq!(distributed.len(), 1);
        assert!(distributed[0].destination_ip.is_none());
    }

    #[test]
    fn test_cross_destination_port_diversity() {
        let mut det = detector();
        // 100 distinct ports spread across 4 destinations, 10 per minute:
        // too slow for per-dst (20 in 60s), wide enough for cross-dst
        let events: Vec<Event> = (0..100)
            .map(|i| {
                fw(
                    t(i * 6),
                    "9.9.9.9",
                    &format!("172.20.0.{}", i % 4),
                    2000 + i as i32,
                )
            })
            .collect();
        let alerts = det.scan(&events);
        assert!(alerts.iter().any(|a| a.rule == CROSS_DST_RULE));
    }

    #[test]
    fn test_stealthy_slow_scan() {
        let mut det = detector();
        // ten unique ports over ~50 minutes: far below the fast windows
        let events: Vec<Event> = (0..10)
            .map(|i| fw(t(i * 300), "9.9.9.9", "172.20.0.1", 3000 + i as i32))
            .collect();
        let alerts = det.scan(&events);
        let slow: Vec<_> = alerts.iter().filter(|a| a.rule == SLOW_SCAN_RULE).collect();
        assert!(!slow.is_empty());
        assert_eq!(slow[0].technique, "port_scanning");
    }

    #[test]
    fn test_whitelisted_scanner_ignored() {
        let mut det = detector();
        let events: Vec<Event> = (0..30)
            .map(|i| fw(t(i), "10.1.1.1", "172.20.0.1", 1000 + i as i32))
            .collect();
        assert!(det.scan(&events).is_empty());
    }

    #[test]
    fn test_events_missing_port_are_skipped() {
        let mut det = detector();
        let mut ev = fw(t(0), "9.9.9.9", "172.20.0.1", 80);
        ev.destination_port = None;
        assert!(det.scan(&[ev]).is_empty());
    }
}
