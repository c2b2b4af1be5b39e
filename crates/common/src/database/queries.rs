use chrono::{DateTime, Utc};
use sqlx::{Postgres, QueryBuilder};

use super::DbPool;
use crate::{Alert, AlertSummary, Event, SiemError};

pub const DEFAULT_FETCH_LIMIT: i64 = 5000;
pub const DEFAULT_REPORT_LIMIT: i64 = 50;

const EVENT_COLUMNS: &str = "timestamp, source_ip, source_port, destination_ip, \
     destination_port, username, host, category, outcome, severity, action, reason, \
     http_method, http_status, url_path, url_full, user_agent, attack_type, \
     attack_confidence, labels, message, protocol, file_name, file_path, raw";

/// Read ordering: detectors consume ascending, the reporter descending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// Filter for `fetch_events`: optional exclusive `since` lower bound,
/// optional category membership test, bounded row count.
#[derive(Debug, Clone)]
pub struct EventFilter {
    pub since: Option<DateTime<Utc>>,
    pub categories: Option<Vec<String>>,
    pub limit: i64,
    pub order: SortOrder,
}

impl Default for EventFilter {
    fn default() -> Self {
        EventFilter {
            since: None,
            categories: None,
            limit: DEFAULT_FETCH_LIMIT,
            order: SortOrder::Ascending,
        }
    }
}

impl EventFilter {
    /// Ascending full read restricted to events carrying any of the tags.
    pub fn for_categories(tags: &[&str]) -> Self {
        EventFilter {
            categories: Some(tags.iter().map(|t| t.to_string()).collect()),
            ..EventFilter::default()
        }
    }

    pub fn since(mut self, since: Option<DateTime<Utc>>) -> Self {
        self.since = since;
        self
    }
}

/// Append one normalized event. Events are never deduplicated; equal
/// timestamps are allowed.
pub async fn append_event(pool: &DbPool, event: &Event) -> Result<i32, SiemError> {
    let (id,): (i32,) = sqlx::query_as(
        r#"
        INSERT INTO events (
            timestamp, source_ip, source_port, destination_ip, destination_port,
            username, host, category, outcome, severity, action, reason,
            http_method, http_status, url_path, url_full, user_agent,
            attack_type, attack_confidence, labels, message, protocol,
            file_name, file_path, raw
        ) VALUES (
            $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13,
            $14, $15, $16, $17, $18, $19, $20, $21, $22, $23, $24, $25
        ) RETURNING id
        "#,
    )
    .bind(event.timestamp)
    .bind(&event.source_ip)
    .bind(event.source_port)
    .bind(&event.destination_ip)
    .bind(event.destination_port)
    .bind(&event.username)
    .bind(&event.host)
    .bind(&event.category)
    .bind(&event.outcome)
    .bind(event.severity)
    .bind(&event.action)
    .bind(&event.reason)
    .bind(&event.http_method)
    .bind(event.http_status)
    .bind(&event.url_path)
    .bind(&event.url_full)
    .bind(&event.user_agent)
    .bind(&event.attack_type)
    .bind(&event.attack_confidence)
    .bind(&event.labels)
    .bind(&event.message)
    .bind(&event.protocol)
    .bind(&event.file_name)
    .bind(&event.file_path)
    .bind(&event.raw)
    .fetch_one(pool)
    .await?;
    Ok(id)
}

/// Time-ordered read with the filter's `since` cursor and category
/// membership test (`category && $n`, i.e. any tag overlaps).
pub async fn fetch_events(pool: &DbPool, filter: &EventFilter) -> Result<Vec<Event>, SiemError> {
    let mut qb: QueryBuilder<Postgres> =
        QueryBuilder::new(format!("SELECT {EVENT_COLUMNS} FROM events"));

    let mut has_where = false;
    if let Some(since) = filter.since {
        qb.push(" WHERE timestamp > ");
        qb.push_bind(since);
        has_where = true;
    }
    if let Some(categories) = &filter.categories {
        qb.push(if has_where { " AND " } else { " WHERE " });
        qb.push("category && ");
        qb.push_bind(categories.clone());
        qb.push("::text[]");
    }
    qb.push(match filter.order {
        SortOrder::Ascending => " ORDER BY timestamp ASC",
        SortOrder::Descending => " ORDER BY timestamp DESC",
    });
    qb.push(" LIMIT ");
    qb.push_bind(filter.limit);

    let events = qb.build_query_as::<Event>().fetch_all(pool).await?;
    Ok(events)
}

/// Insert-if-absent on the `(timestamp, rule, source_ip)` identity tuple.
/// Returns whether a row was actually written.
pub async fn insert_alert<'e, E>(executor: E, alert: &Alert) -> Result<bool, sqlx::Error>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    let result = sqlx::query(
        r#"
        INSERT INTO alerts (
            timestamp, rule, user_name, source_ip, destination_ip,
            attempt_count, severity, technique, score, evidence, raw
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        ON CONFLICT (timestamp, rule, source_ip) DO NOTHING
        "#,
    )
    .bind(alert.timestamp)
    .bind(&alert.rule)
    .bind(&alert.user_name)
    .bind(&alert.source_ip)
    .bind(&alert.destination_ip)
    .bind(alert.attempt_count)
    .bind(alert.severity.as_str())
    .bind(&alert.technique)
    .bind(alert.score)
    .bind(&alert.evidence)
    .bind(&alert.raw)
    .execute(executor)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Reporter read: the most recent alerts, newest first.
pub async fn recent_alerts(pool: &DbPool, limit: i64) -> Result<Vec<AlertSummary>, SiemError> {
    let alerts = sqlx::query_as::<_, AlertSummary>(
        r#"
        SELECT rule, severity, timestamp, user_name, source_ip, technique, evidence
        FROM alerts
        ORDER BY timestamp DESC
        LIMIT $1
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(alerts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_defaults() {
        let filter = EventFilter::default();
        assert!(filter.since.is_none());
        assert!(filter.categories.is_none());
        assert_eq!(filter.limit, DEFAULT_FETCH_LIMIT);
        assert_eq!(filter.order, SortOrder::Ascending);
    }

    #[test]
    fn test_filter_for_categories() {
        let filter = EventFilter::for_categories(&["firewall", "network"])
            .since(Some(Utc::now()));
        assert_eq!(
            filter.categories.as_deref(),
            Some(&["firewall".to_string(), "network".to_string()][..])
        );
        assert!(filter.since.is_some());
    }
}
