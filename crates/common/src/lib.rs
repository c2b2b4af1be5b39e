// Common library for the SIEM core pipeline
// Shared event/alert model, log parsers, enrichment, and store integration

pub mod config;
pub mod database;
pub mod enrich;
pub mod error;
pub mod net;
pub mod parsers;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use error::SiemError;

/// Normalized security event, one row in the `events` table.
///
/// Field presence depends on the source format: an SSH auth failure has a
/// username but no HTTP fields, a web access line is the other way around.
/// `raw` always preserves the structured document the line normalized into.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Event {
    pub timestamp: DateTime<Utc>,
    pub source_ip: Option<String>,
    pub source_port: Option<i32>,
    pub destination_ip: Option<String>,
    pub destination_port: Option<i32>,
    pub username: Option<String>,
    pub host: Option<String>,
    /// Lowercased tags, never empty for a normalized event.
    #[serde(default)]
    pub category: Vec<String>,
    pub outcome: Option<String>,
    pub severity: Option<i16>,
    pub action: Option<String>,
    pub reason: Option<String>,
    pub http_method: Option<String>,
    pub http_status: Option<i32>,
    pub url_path: Option<String>,
    pub url_full: Option<String>,
    pub user_agent: Option<String>,
    pub attack_type: Option<String>,
    pub attack_confidence: Option<String>,
    #[serde(default)]
    pub labels: Vec<String>,
    pub message: Option<String>,
    pub protocol: Option<String>,
    pub file_name: Option<String>,
    pub file_path: Option<String>,
    #[serde(default = "empty_object")]
    pub raw: Value,
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

impl Event {
    /// Empty event at the given instant; parsers fill in what they extract.
    pub fn at(timestamp: DateTime<Utc>) -> Self {
        Event {
            timestamp,
            source_ip: None,
            source_port: None,
            destination_ip: None,
            destination_port: None,
            username: None,
            host: None,
            category: Vec::new(),
            outcome: None,
            severity: None,
            action: None,
            reason: None,
            http_method: None,
            http_status: None,
            url_path: None,
            url_full: None,
            user_agent: None,
            attack_type: None,
            attack_confidence: None,
            labels: Vec::new(),
            message: None,
            protocol: None,
            file_name: None,
            file_path: None,
            raw: empty_object(),
        }
    }

    /// Membership test against the category tag set.
    pub fn has_category(&self, tag: &str) -> bool {
        self.category.iter().any(|c| c == tag)
    }
}

/// Alert severity band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "CRITICAL",
            Severity::High => "HIGH",
            Severity::Medium => "MEDIUM",
            Severity::Low => "LOW",
        }
    }

    /// Band a 0..10 score: CRITICAL >= 8, HIGH >= 5, MEDIUM >= 2.5, else LOW.
    pub fn from_score(score: f64) -> Self {
        if score >= 8.0 {
            Severity::Critical
        } else if score >= 5.0 {
            Severity::High
        } else if score >= 2.5 {
            Severity::Medium
        } else {
            Severity::Low
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Detection output, one row in the `alerts` table.
///
/// `(timestamp, rule, source_ip)` is the identity tuple; the store drops
/// duplicate inserts on it.
#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub timestamp: DateTime<Utc>,
    pub rule: String,
    pub user_name: Option<String>,
    pub source_ip: Option<String>,
    pub destination_ip: Option<String>,
    pub attempt_count: i32,
    pub severity: Severity,
    pub technique: String,
    pub score: f64,
    pub evidence: String,
    pub raw: Value,
}

/// Reporter row: the per-alert summary handed to downstream consumers.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct AlertSummary {
    pub rule: String,
    pub severity: String,
    pub timestamp: DateTime<Utc>,
    pub user_name: Option<String>,
    pub source_ip: Option<String>,
    pub technique: Option<String>,
    pub evidence: Option<String>,
}
