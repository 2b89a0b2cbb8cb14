//! Delivery failure sink for alerts that did not fully land
//!
//! The dispatcher never retries. Fan-outs with failed channels are handed
//! to a `DeliveryFailureSink` so operators can inspect them and re-send
//! by hand; what the sink does with them is up to the implementation.

use super::{ChannelResult, NotificationEnvelope};
use crate::error::Result;
use crate::types::now_millis;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::RwLock;

/// An alert with at least one failed channel
#[derive(Debug, Clone)]
pub struct FailedDelivery {
    pub envelope: NotificationEnvelope,

    /// Results of the channels that did not succeed
    pub failures: Vec<ChannelResult>,

    /// Whether no channel succeeded at all
    pub total_loss: bool,

    /// Unix timestamp in milliseconds when the failure was recorded
    pub recorded_at: u64,
}

impl FailedDelivery {
    /// Build from a dispatch outcome; None when every channel succeeded
    pub fn from_results(envelope: &NotificationEnvelope, results: &[ChannelResult]) -> Option<Self> {
        let failures: Vec<ChannelResult> = results.iter().filter(|r| !r.succeeded).cloned().collect();
        if failures.is_empty() {
            return None;
        }
        Some(Self {
            envelope: envelope.clone(),
            total_loss: failures.len() == results.len(),
            failures,
            recorded_at: now_millis(),
        })
    }
}

/// Trait for failed-delivery sinks
#[async_trait]
pub trait DeliveryFailureSink: Send + Sync {
    /// Record a failed delivery
    async fn record(&self, failure: FailedDelivery) -> Result<()>;

    /// Get the number of failures currently held
    async fn count(&self) -> Result<usize>;

    /// List recent failures, newest first
    async fn list(&self, limit: usize) -> Result<Vec<FailedDelivery>>;
}

/// In-memory failure sink with bounded capacity
///
/// Oldest failures are dropped once `max_entries` is exceeded.
pub struct MemoryFailureSink {
    failures: Arc<RwLock<VecDeque<FailedDelivery>>>,
    max_entries: usize,
}

impl MemoryFailureSink {
    pub fn new(max_entries: usize) -> Self {
        Self {
            failures: Arc::new(RwLock::new(VecDeque::new())),
            max_entries,
        }
    }
}

impl Default for MemoryFailureSink {
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[async_trait]
impl DeliveryFailureSink for MemoryFailureSink {
    async fn record(&self, failure: FailedDelivery) -> Result<()> {
        tracing::warn!(
            notification = %failure.envelope.id,
            subject = %failure.envelope.subject_entity_id,
            severity = %failure.envelope.severity,
            failed = failure.failures.len(),
            total_loss = failure.total_loss,
            "Notification delivery failure recorded"
        );

        let mut failures = self.failures.write().await;
        failures.push_back(failure);

        if self.max_entries > 0 {
            while failures.len() > self.max_entries {
                failures.pop_front();
            }
        }

        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.failures.read().await.len())
    }

    async fn list(&self, limit: usize) -> Result<Vec<FailedDelivery>> {
        let failures = self.failures.read().await;
        Ok(failures.iter().rev().take(limit).cloned().collect())
    }
}
