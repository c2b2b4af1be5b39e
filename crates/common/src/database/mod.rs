use std::str::FromStr;
use std::time::Duration;

use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{PgPool, Pool, Postgres};
use tracing::info;

use crate::SiemError;

pub mod queries;

pub use queries::{EventFilter, SortOrder};

// Database connection pool type
pub type DbPool = Pool<Postgres>;

const CREATE_EVENTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS events (
    id SERIAL PRIMARY KEY,
    timestamp TIMESTAMPTZ NOT NULL,
    source_ip TEXT,
    source_port INT,
    destination_ip TEXT,
    destination_port INT,
    username TEXT,
    host TEXT,
    category TEXT[] NOT NULL DEFAULT '{}',
    outcome TEXT,
    severity SMALLINT,
    action TEXT,
    reason TEXT,
    http_method TEXT,
    http_status INT,
    url_path TEXT,
    url_full TEXT,
    user_agent TEXT,
    attack_type TEXT,
    attack_confidence TEXT,
    labels TEXT[] NOT NULL DEFAULT '{}',
    message TEXT,
    protocol TEXT,
    file_name TEXT,
    file_path TEXT,
    raw JSONB NOT NULL DEFAULT '{}'::jsonb
)
"#;

const CREATE_ALERTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS alerts (
    id SERIAL PRIMARY KEY,
    timestamp TIMESTAMPTZ NOT NULL,
    rule TEXT NOT NULL,
    user_name TEXT,
    source_ip TEXT,
    destination_ip TEXT,
    attempt_count INT,
    severity TEXT,
    technique TEXT,
    score DOUBLE PRECISION,
    evidence TEXT,
    raw JSONB,
    UNIQUE (timestamp, rule, source_ip)
)
"#;

/// Initialize the connection pool and make sure both tables exist.
/// Every statement carries a bounded server-side timeout so a wedged
/// store cannot hang a scan tick indefinitely.
pub async fn init_db(database_url: &str) -> Result<DbPool, SiemError> {
    let options = PgConnectOptions::from_str(database_url)?
        .options([("statement_timeout", "10000")]);
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(10))
        .connect_with(options)
        .await?;

    sqlx::query(CREATE_EVENTS_TABLE).execute(&pool).await?;
    sqlx::query(CREATE_ALERTS_TABLE).execute(&pool).await?;

    info!("event/alert store ready");
    Ok(pool)
}

/// Cheap connectivity probe, used at service startup.
pub async fn test_connection(pool: &PgPool) -> Result<(), SiemError> {
    sqlx::query("SELECT 1").fetch_one(pool).await?;
    Ok(())
}
