//! Error types shared across the pipeline.
//!
//! Only configuration errors are fatal at startup; everything else is
//! logged and isolated to the current record, batch, or scan tick.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SiemError {
    /// Startup configuration problem (missing DATABASE_URL, bad CIDR, ...)
    #[error("configuration error: {0}")]
    Config(String),

    /// Store failure; retried at the next scan tick by detector callers
    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),

    /// A pushed record did not match the event schema
    #[error("invalid record: {0}")]
    InvalidRecord(String),
}

impl SiemError {
    pub fn invalid(reason: impl Into<String>) -> Self {
        SiemError::InvalidRecord(reason.into())
    }
}
