//! Structured JSON record parser.
//!
//! Validates the nested wire shape (the same one the push endpoint
//! accepts) and flattens it into an [`Event`]. The original document is
//! preserved verbatim in `Event::raw`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::net::normalize_ip;
use crate::{Event, SiemError};

/// Nested wire record: `{timestamp, event: {...}, source: {...}, ...}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawRecord {
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub event: EventFields,
    pub host: Option<HostFields>,
    pub source: Option<EndpointFields>,
    pub destination: Option<EndpointFields>,
    pub user: Option<UserFields>,
    pub http: Option<HttpFields>,
    pub url: Option<UrlFields>,
    pub user_agent: Option<UserAgentFields>,
    pub network: Option<NetworkFields>,
    pub attack: Option<AttackFields>,
    pub file: Option<FileFields>,
    #[serde(default)]
    pub labels: Vec<String>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventFields {
    #[serde(default)]
    pub category: Vec<String>,
    pub outcome: Option<String>,
    pub action: Option<String>,
    pub severity: Option<i16>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostFields {
    pub hostname: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EndpointFields {
    pub ip: Option<String>,
    pub port: Option<i32>,
    pub geo: Option<Value>,
    pub hostname: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserFields {
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HttpFields {
    pub request: Option<HttpRequestFields>,
    pub response: Option<HttpResponseFields>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HttpRequestFields {
    pub method: Option<String>,
    #[serde(rename = "body.bytes")]
    pub body_bytes: Option<i64>,
    pub body: Option<Value>,
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HttpResponseFields {
    pub status_code: Option<i32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UrlFields {
    pub path: Option<String>,
    pub original: Option<String>,
    pub full: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserAgentFields {
    pub original: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkFields {
    pub transport: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AttackFields {
    pub technique: Option<String>,
    pub confidence: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileFields {
    pub name: Option<String>,
    pub path: Option<String>,
}

impl RawRecord {
    /// Flatten into an Event. `raw` is the original document and is kept
    /// untouched. Fails when the record carries no category tag: every
    /// normalized event must be classifiable.
    pub fn into_event(self, raw: Value) -> Result<Event, SiemError> {
        let category: Vec<String> = self
            .event
            .category
            .iter()
            .map(|c| c.trim().to_lowercase())
            .filter(|c| !c.is_empty())
            .collect();
        if category.is_empty() {
            return Err(SiemError::invalid(
                "event.category must contain at least one tag",
            ));
        }

        let mut ev = Event::at(self.timestamp.unwrap_or_else(Utc::now));
        ev.category = category;
        ev.outcome = self.event.outcome;
        ev.severity = self.event.severity;
        ev.action = self.event.action;
        ev.reason = self.event.reason;
        if let Some(source) = &self.source {
            ev.source_ip = source.ip.as_deref().and_then(normalize_ip);
            ev.source_port = source.port;
        }
        if let Some(destination) = &self.destination {
            ev.destination_ip = destination.ip.as_deref().and_then(normalize_ip);
            ev.destination_port = destination.port;
        }
        ev.username = self.user.and_then(|u| u.name);
        ev.host = self.host.and_then(|h| h.hostname);
        if let Some(http) = &self.http {
            if let Some(request) = &http.request {
                ev.http_method = request.method.clone();
            }
            if let Some(response) = &http.response {
                ev.http_status = response.status_code;
            }
        }
        if let Some(url) = self.url {
            ev.url_path = url.path.or(url.original);
            ev.url_full = url.full;
        }
        ev.user_agent = self.user_agent.and_then(|ua| ua.original);
        if let Some(attack) = self.attack {
            ev.attack_type = attack.technique;
            ev.attack_confidence = attack.confidence;
        }
        ev.labels = self.labels;
        ev.message = self.message;
        ev.protocol = self
            .network
            .and_then(|n| n.transport)
            .map(|t| t.to_lowercase());
        if let Some(file) = self.file {
            ev.file_name = file.name;
            ev.file_path = file.path;
        }
        ev.raw = raw;
        Ok(ev)
    }
}

/// Validate an already-decoded JSON document and flatten it.
pub fn from_value(value: Value) -> Result<Event, SiemError> {
    let record: RawRecord = serde_json::from_value(value.clone())
        .map_err(|e| SiemError::invalid(format!("record does not match event schema: {e}")))?;
    record.into_event(value)
}

/// Line-oriented entry point for the normalizer chain.
pub fn parse(line: &str) -> Option<Event> {
    let value: Value = serde_json::from_str(line).ok()?;
    if !value.is_object() {
        return None;
    }
    match from_value(value) {
        Ok(ev) => Some(ev),
        Err(e) => {
            debug!("structured record rejected: {e}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_full_record_round_trip() {
        let doc = json!({
            "timestamp": "2025-09-02T15:21:30Z",
            "event": {"category": ["Firewall"], "outcome": "denied", "action": "drop"},
            "source": {"ip": "42.1.1.1:443", "port": 443},
            "destination": {"ip": "10.0.0.9", "port": 22},
            "network": {"transport": "TCP"},
            "message": "denied tcp 42.1.1.1 -> 10.0.0.9"
        });
        let ev = from_value(doc.clone()).unwrap();
        assert_eq!(ev.category, vec!["firewall"]);
        assert_eq!(ev.source_ip.as_deref(), Some("42.1.1.1"));
        assert_eq!(ev.destination_port, Some(22));
        assert_eq!(ev.protocol.as_deref(), Some("tcp"));
        assert_eq!(ev.raw, doc);
    }

    #[test]
    fn test_missing_category_rejected() {
        let doc = json!({
            "timestamp": "2025-09-02T15:21:30Z",
            "event": {"outcome": "success"},
            "message": "no category"
        });
        assert!(from_value(doc).is_err());
    }

    #[test]
    fn test_missing_timestamp_stamped_now() {
        let doc = json!({
            "event": {"category": ["file"]},
            "file": {"name": "payload.locked"}
        });
        let before = Utc::now();
        let ev = from_value(doc).unwrap();
        assert!(ev.timestamp >= before);
        assert_eq!(ev.file_name.as_deref(), Some("payload.locked"));
    }

    #[test]
    fn test_non_object_line_rejected() {
        assert!(parse("[1, 2, 3]").is_none());
        assert!(parse("\"just a string\"").is_none());
    }
}
