//! Detector scheduling: full-scan and incremental modes, last-scan cursor
//! files, and cooperative shutdown.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use siem_common::database::{queries, DbPool, EventFilter};
use siem_common::SiemError;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::sink::AlertSink;
use crate::Detector;

#[derive(Debug, Clone, Copy)]
pub struct ScanOutcome {
    pub events: usize,
    pub alerts: usize,
    pub written: usize,
}

pub struct DetectorRuntime {
    pool: DbPool,
    sink: AlertSink,
    cursor_dir: PathBuf,
    cancel: CancellationToken,
}

impl DetectorRuntime {
    pub fn new(pool: DbPool, cursor_dir: PathBuf, cancel: CancellationToken) -> Arc<Self> {
        Arc::new(DetectorRuntime {
            sink: AlertSink::new(pool.clone()),
            pool,
            cursor_dir,
            cancel,
        })
    }

    /// One-shot pass over all stored history (`since = None`).
    pub async fn full_scan(&self, detector: &mut dyn Detector) -> Result<ScanOutcome, SiemError> {
        let scan_time = Utc::now();
        self.record_scan_start(detector.name(), scan_time);

        let filter = EventFilter::for_categories(detector.categories());
        let events = queries::fetch_events(&self.pool, &filter).await?;
        detector.begin_scan();
        let alerts = detector.scan(&events);
        for alert in &alerts {
            info!(
                "[ALERT] {} - user:{} ip:{} count:{} severity:{}",
                alert.rule,
                alert.user_name.as_deref().unwrap_or("-"),
                alert.source_ip.as_deref().unwrap_or("-"),
                alert.attempt_count,
                alert.severity,
            );
        }
        let written = self.sink.write(&alerts).await;
        Ok(ScanOutcome {
            events: events.len(),
            alerts: alerts.len(),
            written,
        })
    }

    /// Scheduled incremental loop. Each tick re-reads the detector's full
    /// lookback window so sliding state rebuilds from the store, clears
    /// the transient counters, and keeps the cross-tick dedupe map.
    /// Returns when the cancellation token fires.
    pub async fn run_scheduled(&self, mut detector: Box<dyn Detector>) {
        let name = detector.name();
        let mut interval = tokio::time::interval(detector.cadence());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(
            "detector {name} scheduled every {:?} (lookback {}s)",
            detector.cadence(),
            detector.lookback().num_seconds()
        );

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("detector {name} stopping");
                    return;
                }
                _ = interval.tick() => {}
            }

            let scan_time = Utc::now();
            self.record_scan_start(name, scan_time);

            let filter = EventFilter::for_categories(detector.categories())
                .since(Some(scan_time - detector.lookback()));
            let events = match queries::fetch_events(&self.pool, &filter).await {
                Ok(events) => events,
                Err(e) => {
                    // transient store failure: skip the tick, alerts re-derive next run
                    warn!("detector {name}: store read failed, skipping tick: {e}");
                    continue;
                }
            };

            detector.begin_scan();
            let alerts = detector.scan(&events);
            if alerts.is_empty() {
                info!("detector {name}: {} events, no findings", events.len());
                continue;
            }
            for alert in &alerts {
                warn!(
                    "[ALERT] {} - user:{} ip:{} count:{} severity:{}",
                    alert.rule,
                    alert.user_name.as_deref().unwrap_or("-"),
                    alert.source_ip.as_deref().unwrap_or("-"),
                    alert.attempt_count,
                    alert.severity,
                );
            }
            self.sink.write(&alerts).await;
        }
    }

    /// Best-effort cursor file, observability only: the timestamp of the
    /// last scan start in ISO 8601.
    fn record_scan_start(&self, name: &str, ts: DateTime<Utc>) {
        if let Err(e) = write_cursor(&self.cursor_dir, name, ts) {
            warn!("detector {name}: could not write cursor file: {e}");
        }
    }

    /// Last recorded scan start, if a cursor file exists and parses.
    pub fn last_scan_start(&self, name: &str) -> Option<DateTime<Utc>> {
        read_cursor(&self.cursor_dir, name)
    }
}

fn cursor_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("last_scan_{name}.txt"))
}

fn write_cursor(dir: &Path, name: &str, ts: DateTime<Utc>) -> io::Result<()> {
    fs::write(cursor_path(dir, name), ts.to_rfc3339())
}

fn read_cursor(dir: &Path, name: &str) -> Option<DateTime<Utc>> {
    let text = fs::read_to_string(cursor_path(dir, name)).ok()?;
    match DateTime::parse_from_rfc3339(text.trim()) {
        Ok(dt) => Some(dt.with_timezone(&Utc)),
        Err(e) => {
            error!("detector {name}: unreadable cursor file: {e}");
            None
        }
    }
}
