//! Batched, conflict-suppressed alert writer.
//!
//! Alerts go to the store in fixed-size batches (20 by default) with
//! insert-if-absent semantics on `(timestamp, rule, source_ip)`. A failed
//! batch is logged and the remaining batches continue, so a transient
//! store error costs at most one batch — those alerts re-derive on the
//! next scan.

use siem_common::config::env_u64;
use siem_common::database::{queries, DbPool};
use siem_common::Alert;
use tracing::{info, warn};

pub struct AlertSink {
    pool: DbPool,
    batch_size: usize,
}

impl AlertSink {
    pub fn new(pool: DbPool) -> Self {
        AlertSink {
            pool,
            batch_size: env_u64("ALERT_BATCH_SIZE", 20) as usize,
        }
    }

    /// Persist a scan's alerts. Returns the number of rows actually
    /// inserted (conflicts and failed batches excluded).
    pub async fn write(&self, alerts: &[Alert]) -> usize {
        if alerts.is_empty() {
            return 0;
        }
        let mut written = 0;
        for batch in alerts.chunks(self.batch_size.max(1)) {
            match self.write_batch(batch).await {
                Ok(n) => written += n,
                Err(e) => warn!("alert batch of {} failed: {e}", batch.len()),
            }
        }
        if written < alerts.len() {
            info!(
                "saved {written}/{} alerts (duplicates or failed batches skipped)",
                alerts.len()
            );
        } else {
            info!("saved {written} alerts");
        }
        written
    }

    async fn write_batch(&self, batch: &[Alert]) -> Result<usize, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let mut written = 0;
        for alert in batch {
            if queries::insert_alert(&mut *tx, alert).await? {
                written += 1;
            }
        }
        tx.commit().await?;
        Ok(written)
    }
}
