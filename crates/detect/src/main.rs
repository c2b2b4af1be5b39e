use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use siem_common::config::Settings;
use siem_common::database::init_db;
use siem_detect::rules::all_detectors;
use siem_detect::DetectorRuntime;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Streaming detector runtime: schedules every registered rule set over
/// the shared event store and writes deduplicated alerts.
#[derive(Debug, Parser)]
#[command(name = "siem-detect")]
struct Args {
    /// One-shot scan over all stored history instead of the scheduled
    /// incremental loop
    #[arg(long)]
    full_scan: bool,

    /// Run only the named detector (slug, e.g. "port_scan")
    #[arg(long)]
    rule: Option<String>,

    /// Directory for last-scan cursor files (overrides CURSOR_DIR)
    #[arg(long)]
    cursor_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "siem_detect=info,siem_common=info".into()),
        )
        .init();

    let args = Args::parse();
    let settings = Settings::from_env().context("configuration")?;

    let pool = init_db(&settings.database_url)
        .await
        .context("connecting to the event store")?;

    let mut detectors = all_detectors(&settings);
    if let Some(rule) = &args.rule {
        let known: Vec<&str> = detectors.iter().map(|d| d.name()).collect();
        detectors.retain(|d| d.name() == rule);
        if detectors.is_empty() {
            anyhow::bail!("unknown detector {rule:?}; known: {}", known.join(", "));
        }
    }

    let cursor_dir = args.cursor_dir.unwrap_or_else(|| settings.cursor_dir.clone());
    let cancel = CancellationToken::new();
    let runtime = DetectorRuntime::new(pool, cursor_dir, cancel.clone());

    if args.full_scan {
        info!("starting full scan over all stored events");
        for mut detector in detectors {
            let name = detector.name();
            match runtime.full_scan(detector.as_mut()).await {
                Ok(outcome) => info!(
                    "{name}: {} events scanned, {} alerts, {} written",
                    outcome.events, outcome.alerts, outcome.written
                ),
                Err(e) => error!("{name}: full scan failed: {e}"),
            }
        }
        return Ok(());
    }

    let mut handles = Vec::new();
    for detector in detectors {
        let runtime = runtime.clone();
        handles.push(tokio::spawn(async move {
            runtime.run_scheduled(detector).await;
        }));
    }

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("shutdown signal received, stopping detectors");
    cancel.cancel();
    for handle in handles {
        let _ = handle.await;
    }
    info!("all detectors stopped");
    Ok(())
}
