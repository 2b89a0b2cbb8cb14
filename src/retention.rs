//! Age-based retention for the audit log
//!
//! Purging removes whole records, oldest first per key: for every key the
//! id prefix up to its newest expired record goes, so a record stamped by a
//! skewed clock never leaves a hole in the middle of a history. This may
//! remove the CREATE of a still-live entry, after which `value_as_of`
//! reports `NotFound`. Callers needing point-in-time values must stay
//! within the retention horizon.

use crate::error::Result;
use crate::log::AuditLog;
use crate::types::now_millis;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Prunes records older than a retention horizon
pub struct RetentionManager {
    log: Arc<AuditLog>,
}

impl RetentionManager {
    pub fn new(log: Arc<AuditLog>) -> Self {
        Self { log }
    }

    /// Remove every record whose `occurred_at` is older than `horizon`
    ///
    /// Running it again with the same horizon removes nothing further.
    pub async fn purge_older_than(&self, horizon: Duration) -> Result<u64> {
        let horizon_ms = u64::try_from(horizon.as_millis()).unwrap_or(u64::MAX);
        self.purge_before(now_millis().saturating_sub(horizon_ms)).await
    }

    /// Remove each key's history up to its newest record with
    /// `occurred_at < cutoff` (Unix milliseconds)
    ///
    /// The cutoff set is computed under a read snapshot first, then deleted
    /// in one store pass, so appends are never blocked while scanning.
    pub async fn purge_before(&self, cutoff: u64) -> Result<u64> {
        let expired = self.log.expired_ids(cutoff).await?;
        if expired.is_empty() {
            tracing::debug!(cutoff, "Retention purge found nothing to remove");
            return Ok(0);
        }

        let removed = self.log.remove(&expired).await?;
        tracing::info!(
            cutoff,
            candidates = expired.len(),
            removed,
            "Retention purge completed"
        );
        Ok(removed)
    }

    /// Run `purge_older_than(horizon)` every `interval` until stopped
    ///
    /// The first purge happens one interval after the call.
    pub fn spawn_scheduled(self: Arc<Self>, interval: Duration, horizon: Duration) -> RetentionTask {
        let (stop_tx, mut stop_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            tracing::info!(?interval, ?horizon, "Scheduled retention started");
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.purge_older_than(horizon).await {
                            tracing::error!(error = %e, "Scheduled retention purge failed");
                        }
                    }
                    _ = stop_rx.changed() => break,
                }
            }
            tracing::info!("Scheduled retention stopped");
        });

        RetentionTask { stop_tx, handle }
    }
}

/// Handle to a background retention loop
///
/// Dropping the handle also stops the loop.
pub struct RetentionTask {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl RetentionTask {
    /// Signal the loop to stop and wait for it to finish
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        if let Err(e) = self.handle.await {
            tracing::warn!(error = %e, "Retention task ended abnormally");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}
