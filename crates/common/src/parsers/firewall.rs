//! Firewall key=value line parser.
//!
//! Accepts lines like
//! `action=DENY src=42.1.1.1 dst=10.0.0.5 dport=22 proto=tcp`
//! with the pairs in any order. `action` and `src` are required; other
//! tokens on the line are ignored so syslog prefixes do not break parsing.

use chrono::Utc;
use serde_json::json;

use crate::net::normalize_ip;
use crate::Event;

/// Map the device's action verb onto the normalized outcome vocabulary
/// (denied / blocked / allowed). Firewalls abbreviate inconsistently;
/// unknown verbs pass through lowercased.
fn outcome_for_action(action: &str) -> String {
    match action.to_ascii_lowercase().as_str() {
        "deny" | "denied" | "drop" | "dropped" | "reject" | "rejected" => "denied".to_string(),
        "block" | "blocked" => "blocked".to_string(),
        "allow" | "allowed" | "accept" | "accepted" | "permit" | "permitted" => {
            "allowed".to_string()
        }
        other => other.to_string(),
    }
}

pub fn parse(line: &str) -> Option<Event> {
    let mut action = None;
    let mut src = None;
    let mut dst = None;
    let mut dport = None;
    let mut spt = None;
    let mut proto = None;

    for token in line.split_whitespace() {
        let Some((key, value)) = token.split_once('=') else {
            continue;
        };
        if key.is_empty() || value.is_empty() {
            continue;
        }
        match key.to_ascii_lowercase().as_str() {
            "action" => action = Some(value.to_string()),
            "src" => src = Some(value.to_string()),
            "dst" => dst = Some(value.to_string()),
            "dport" => dport = value.parse::<i32>().ok(),
            "spt" | "sport" => spt = value.parse::<i32>().ok(),
            "proto" => proto = Some(value.to_ascii_lowercase()),
            _ => {}
        }
    }

    let action = action?;
    let src = src?;

    let action = action.to_ascii_lowercase();
    let outcome = outcome_for_action(&action);
    let mut ev = Event::at(Utc::now());
    ev.category = vec!["firewall".to_string()];
    ev.outcome = Some(outcome.clone());
    ev.action = Some(action.clone());
    ev.source_ip = normalize_ip(&src);
    ev.source_port = spt;
    ev.destination_ip = dst.as_deref().and_then(normalize_ip);
    ev.destination_port = dport;
    ev.protocol = proto.clone();
    ev.message = Some(line.to_string());
    ev.raw = json!({
        "timestamp": ev.timestamp.to_rfc3339(),
        "event": { "category": ["firewall"], "outcome": outcome, "action": ev.action },
        "source": { "ip": ev.source_ip },
        "destination": { "ip": ev.destination_ip, "port": dport },
        "network": { "transport": proto },
        "message": line,
    });
    Some(ev)
}
