//! Push ingest endpoint and the alert read surface.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use serde::Deserialize;
use serde_json::{json, Value};
use siem_common::database::{queries, DbPool};
use siem_common::parsers::Normalizer;
use siem_common::Event;
use tracing::{debug, warn};

pub struct AppState {
    pub pool: DbPool,
    pub normalizer: Arc<Normalizer>,
}

/// `POST /collect`: accepts either the structured event shape or a raw
/// line wrapped as `{"message": "..."}`. Failures come back as a 500 with
/// a human-readable reason, matching the ingest contract.
pub async fn collect_log(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<Value>,
) -> impl IntoResponse {
    let event = match normalize_payload(&state.normalizer, payload) {
        Ok(event) => event,
        Err(reason) => {
            debug!("rejected push payload: {reason}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "status": "error", "detail": reason })),
            );
        }
    };

    match queries::append_event(&state.pool, &event).await {
        Ok(_) => (
            StatusCode::OK,
            Json(json!({ "status": "ok", "message": "Log received" })),
        ),
        Err(e) => {
            warn!("failed to store pushed event: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "status": "error", "detail": e.to_string() })),
            )
        }
    }
}

/// Structured shape first, then the `{"message": ...}` wrapper.
fn normalize_payload(normalizer: &Normalizer, payload: Value) -> Result<Event, String> {
    match normalizer.normalize_record(payload.clone()) {
        Ok(event) => Ok(event),
        Err(schema_err) => {
            let Some(message) = payload.get("message").and_then(Value::as_str) else {
                return Err(schema_err.to_string());
            };
            normalizer
                .normalize(message)
                .ok_or_else(|| format!("could not parse log line: {message}"))
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AlertsQuery {
    pub limit: Option<i64>,
}

/// `GET /alerts`: the reporter surface — most recent alerts, newest
/// first, summarised for downstream formatting.
pub async fn get_alerts(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AlertsQuery>,
) -> impl IntoResponse {
    let limit = query.limit.unwrap_or(queries::DEFAULT_REPORT_LIMIT).max(1);
    match queries::recent_alerts(&state.pool, limit).await {
        Ok(alerts) => (StatusCode::OK, Json(json!({ "alerts": alerts }))),
        Err(e) => {
            warn!("failed to read alerts: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "status": "error", "detail": e.to_string() })),
            )
        }
    }
}

/// `GET /health`: liveness probe.
pub async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structured_payload_normalizes() {
        let normalizer = Normalizer::bare();
        let payload = json!({
            "timestamp": "2025-09-02T15:21:30Z",
            "event": {"category": ["authentication"], "outcome": "failure"},
            "source": {"ip": "42.236.12.235"},
            "user": {"name": "admin"},
            "message": "failed login"
        });
        let event = normalize_payload(&normalizer, payload).unwrap();
        assert_eq!(event.category, vec!["authentication"]);
        assert_eq!(event.username.as_deref(), Some("admin"));
    }

    #[test]
    fn test_message_wrapper_falls_back_to_line_parsers() {
        let normalizer = Normalizer::bare();
        let payload = json!({
            "message": "Sep  2 15:21:30 server01 sshd[1234]: Failed password for admin from 42.236.12.235 port 22 ssh2"
        });
        let event = normalize_payload(&normalizer, payload).unwrap();
        assert_eq!(event.category, vec!["authentication"]);
        assert_eq!(event.outcome.as_deref(), Some("failure"));
    }

    #[test]
    fn test_unparseable_payload_reports_reason() {
        let normalizer = Normalizer::bare();
        let payload = json!({ "message": "gibberish that matches nothing" });
        let err = normalize_payload(&normalizer, payload).unwrap_err();
        assert!(err.contains("could not parse log line"));
    }

    #[test]
    fn test_payload_without_message_reports_schema_error() {
        let normalizer = Normalizer::bare();
        let payload = json!({ "event": {"outcome": "success"} });
        let err = normalize_payload(&normalizer, payload).unwrap_err();
        assert!(err.contains("category"));
    }
}
