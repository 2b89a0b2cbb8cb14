//! Audit store trait, the core abstraction for log backends
//!
//! All backends (in-memory, JSON-lines file, databases) implement
//! `AuditStore` to provide an ordered, append-only record store. Id
//! assignment, validation and ordering policy live above this layer in
//! `AuditLog`.

use crate::error::Result;
use crate::types::{EventRecord, RecordFilter};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

pub mod file;
pub mod memory;

/// Core trait for audit log backends
///
/// Implementations must make an inserted record visible to readers only
/// once it is completely written, and must keep records immutable.
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Persist a record whose id has already been assigned
    async fn insert(&self, record: &EventRecord) -> Result<()>;

    /// All records matching the filter's selection criteria, id ascending
    ///
    /// Ordering and pagination in the filter are ignored here.
    async fn scan(&self, filter: &RecordFilter) -> Result<Vec<EventRecord>>;

    /// Highest id ever stored (0 for an empty store)
    async fn last_id(&self) -> Result<u64>;

    /// Ids of expired records, id ascending
    ///
    /// For each entry key this is the id prefix ending at the newest record
    /// whose `occurred_at` is strictly before `cutoff`. Records are never
    /// taken out of the middle of a key's history, even when a skewed clock
    /// stamped a later record as older than an earlier one.
    async fn expired_ids(&self, cutoff: u64) -> Result<Vec<u64>>;

    /// Remove whole records in a single pass, returning how many existed
    ///
    /// Ids that are already gone are ignored.
    async fn remove(&self, ids: &[u64]) -> Result<u64>;

    /// Get store info (record count, id range)
    async fn info(&self) -> Result<StoreInfo>;

    /// Store name (e.g., "memory", "file")
    fn name(&self) -> &str;

    /// Health check, true if the store is operational
    ///
    /// Default implementation delegates to `info()` and returns true if it succeeds.
    async fn health(&self) -> Result<bool> {
        self.info().await.map(|_| true)
    }
}

/// Store status information
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreInfo {
    /// Store name
    pub provider: String,

    /// Records currently held
    pub records: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oldest_id: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub newest_id: Option<u64>,
}

/// Per-key expired id prefixes over an id-keyed record map
pub(crate) fn expired_prefixes(records: &BTreeMap<u64, EventRecord>, cutoff: u64) -> Vec<u64> {
    let mut last_expired: HashMap<&str, u64> = HashMap::new();
    for record in records.values().filter(|r| r.occurred_at < cutoff) {
        last_expired.insert(record.entry_key.as_str(), record.id);
    }

    records
        .values()
        .filter(|r| {
            last_expired
                .get(r.entry_key.as_str())
                .is_some_and(|last| r.id <= *last)
        })
        .map(|r| r.id)
        .collect()
}
