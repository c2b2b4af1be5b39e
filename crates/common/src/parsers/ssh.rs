//! SSH authentication failure parser.
//!
//! Matches the sshd "Failed password" line, e.g.
//! `Sep  2 15:21:30 server01 sshd[1234]: Failed password for admin from 42.236.12.235 port 22 ssh2`

use std::sync::OnceLock;

use chrono::Utc;
use regex::Regex;
use serde_json::json;

use crate::net::normalize_ip;
use crate::Event;

static FAILED_PASSWORD: OnceLock<Regex> = OnceLock::new();

fn failed_password() -> &'static Regex {
    FAILED_PASSWORD.get_or_init(|| {
        Regex::new(r"Failed password for (\w+) from ([\d.]+) port (\d+)")
            .expect("ssh auth-failure pattern")
    })
}

pub fn parse(line: &str) -> Option<Event> {
    let caps = failed_password().captures(line)?;
    let user = caps[1].to_string();
    let ip = &caps[2];
    let port = caps[3].parse::<i32>().ok();

    let mut ev = Event::at(Utc::now());
    ev.category = vec!["authentication".to_string()];
    ev.outcome = Some("failure".to_string());
    ev.action = Some("login".to_string());
    ev.username = Some(user.clone());
    ev.source_ip = normalize_ip(ip);
    ev.source_port = port;
    ev.message = Some(line.trim().to_string());
    ev.raw = json!({
        "timestamp": ev.timestamp.to_rfc3339(),
        "event": { "category": ["authentication"], "outcome": "failure", "action": "login" },
        "source": { "ip": ev.source_ip, "port": port },
        "user": { "name": user },
        "message": line.trim(),
    });
    Some(ev)
}
