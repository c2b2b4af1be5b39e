//! Environment-driven configuration.
//!
//! Everything is optional with a sensible default except `DATABASE_URL`;
//! a missing store URL is the only fatal startup error.
//!
//! # Environment Variables
//!
//! - `DATABASE_URL`: Postgres connection string for the event/alert store
//! - `GEOIP_DB_PATH`: GeoLite2 City database used by the normalizer
//! - `LOG_FILES`: comma-separated list of files the collector tails
//! - `COLLECTOR_ADDR`: bind address for the push endpoint (default 0.0.0.0:8000)
//! - `CURSOR_DIR`: directory for per-detector last-scan cursor files
//! - `WHITELIST_SRC_CIDRS`: source CIDRs detectors ignore
//! - `KNOWN_ADMINS`: accounts allowed to perform admin-grant operations
//! - `WINDOW_*` / `THRESHOLD_*` / `DEDUPE_*`: per-detector tuning overrides

use std::collections::HashSet;
use std::env;
use std::path::PathBuf;

use crate::error::SiemError;
use crate::net::CidrSet;

pub const DEFAULT_WHITELIST_CIDRS: &str = "10.0.0.0/8,192.168.0.0/16";
pub const DEFAULT_KNOWN_ADMINS: &str = "bob,superuser";

/// Process-wide settings loaded once at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    pub database_url: String,
    pub geoip_db_path: Option<PathBuf>,
    pub log_files: Vec<PathBuf>,
    pub collector_addr: String,
    pub cursor_dir: PathBuf,
    pub whitelist_src_cidrs: String,
    pub known_admins: HashSet<String>,
}

impl Settings {
    pub fn from_env() -> Result<Self, SiemError> {
        // Load .env if present; real env vars win
        dotenv::dotenv().ok();

        let database_url = env::var("DATABASE_URL").map_err(|_| {
            SiemError::Config("DATABASE_URL must be set (Postgres connection string)".into())
        })?;

        let geoip_db_path = env::var("GEOIP_DB_PATH").ok().map(PathBuf::from);

        let log_files = env::var("LOG_FILES")
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(PathBuf::from)
                    .collect()
            })
            .unwrap_or_default();

        let collector_addr =
            env::var("COLLECTOR_ADDR").unwrap_or_else(|_| "0.0.0.0:8000".to_string());

        let cursor_dir = env::var("CURSOR_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."));

        let whitelist_src_cidrs = env::var("WHITELIST_SRC_CIDRS")
            .unwrap_or_else(|_| DEFAULT_WHITELIST_CIDRS.to_string());

        let known_admins = env::var("KNOWN_ADMINS")
            .unwrap_or_else(|_| DEFAULT_KNOWN_ADMINS.to_string())
            .split(',')
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Settings {
            database_url,
            geoip_db_path,
            log_files,
            collector_addr,
            cursor_dir,
            whitelist_src_cidrs,
            known_admins,
        })
    }

    /// The whitelist parsed into a membership set.
    pub fn whitelist(&self) -> CidrSet {
        CidrSet::parse(&self.whitelist_src_cidrs)
    }

    /// Settings with every default and the given store URL (useful for
    /// tests and tools that skip the environment).
    pub fn with_defaults(database_url: impl Into<String>) -> Self {
        Settings {
            database_url: database_url.into(),
            geoip_db_path: None,
            log_files: Vec::new(),
            collector_addr: "0.0.0.0:8000".to_string(),
            cursor_dir: PathBuf::from("."),
            whitelist_src_cidrs: DEFAULT_WHITELIST_CIDRS.to_string(),
            known_admins: DEFAULT_KNOWN_ADMINS
                .split(',')
                .map(str::to_string)
                .collect(),
        }
    }
}

/// Integer tuning knob with an env override (`THRESHOLD_BRUTE_FORCE=8`).
pub fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default)
}

/// Float tuning knob with an env override.
pub fn env_f64(key: &str, default: f64) -> f64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<f64>().ok())
        .unwrap_or(default)
}
