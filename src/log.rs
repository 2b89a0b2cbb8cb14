//! Append-only audit log built on pluggable stores
//!
//! `AuditLog` assigns record ids and provides query and aggregation over
//! any `AuditStore` implementation. Id assignment is the only serialized
//! step; store I/O for concurrent appends proceeds in parallel.

use crate::error::Result;
use crate::provider::{AuditStore, StoreInfo};
use crate::types::{
    AuditStatistics, EventRecord, RankedCount, RecordFilter, SortOrder,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Append-only audit log backed by a pluggable store
pub struct AuditLog {
    store: Box<dyn AuditStore>,

    /// Last id handed out
    sequence: AtomicU64,
}

impl AuditLog {
    /// Open a log over a store, resuming the id sequence after its last record
    pub async fn open(store: impl AuditStore + 'static) -> Result<Self> {
        let last_id = store.last_id().await?;
        tracing::debug!(store = store.name(), last_id, "Audit log opened");
        Ok(Self {
            store: Box::new(store),
            sequence: AtomicU64::new(last_id),
        })
    }

    /// Get the store name
    pub fn store_name(&self) -> &str {
        self.store.name()
    }

    /// Append a record, returning its newly assigned id
    ///
    /// Any id already set on the record is replaced. Records are expected
    /// to have passed validation; the log itself rejects nothing that the
    /// store accepts. A failed store write burns the id.
    pub async fn append(&self, mut record: EventRecord) -> Result<u64> {
        let id = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        record.id = id;

        self.store.insert(&record).await?;

        tracing::debug!(
            id,
            entry_key = %record.entry_key,
            action = %record.action,
            actor = %record.actor_id,
            "Audit record appended"
        );
        Ok(id)
    }

    /// Records matching the filter, ordered by id and paginated
    pub async fn query(&self, filter: &RecordFilter) -> Result<Vec<EventRecord>> {
        let records = self.store.scan(filter).await?;
        let page = match filter.order {
            SortOrder::Ascending => filter.pagination.apply(records.into_iter()),
            SortOrder::Descending => filter.pagination.apply(records.into_iter().rev()),
        };
        Ok(page)
    }

    /// Counts by action plus top actors and keys, in one pass
    ///
    /// Pagination in the filter is ignored; every matching record counts.
    pub async fn aggregate(&self, filter: &RecordFilter, top_n: usize) -> Result<AuditStatistics> {
        let records = self.store.scan(filter).await?;

        let mut stats = AuditStatistics::default();
        let mut actors: HashMap<&str, u64> = HashMap::new();
        let mut keys: HashMap<&str, u64> = HashMap::new();

        for record in &records {
            stats.total += 1;
            *stats.counts_by_action.entry(record.action).or_insert(0) += 1;
            *actors.entry(record.actor_id.as_str()).or_insert(0) += 1;
            *keys.entry(record.entry_key.as_str()).or_insert(0) += 1;
            stats.earliest_at = Some(
                stats
                    .earliest_at
                    .map_or(record.occurred_at, |t| t.min(record.occurred_at)),
            );
            stats.latest_at = Some(
                stats
                    .latest_at
                    .map_or(record.occurred_at, |t| t.max(record.occurred_at)),
            );
        }

        stats.top_actors = rank(actors, top_n);
        stats.top_keys = rank(keys, top_n);
        Ok(stats)
    }

    /// Ids of each key's history prefix older than `cutoff` (Unix milliseconds)
    pub async fn expired_ids(&self, cutoff: u64) -> Result<Vec<u64>> {
        self.store.expired_ids(cutoff).await
    }

    /// Remove whole records by id
    pub async fn remove(&self, ids: &[u64]) -> Result<u64> {
        self.store.remove(ids).await
    }

    /// Get store info
    pub async fn info(&self) -> Result<StoreInfo> {
        self.store.info().await
    }

    /// Get a reference to the underlying store
    pub fn store(&self) -> &dyn AuditStore {
        self.store.as_ref()
    }
}

/// Highest counts first, ties broken by name
fn rank(counts: HashMap<&str, u64>, top_n: usize) -> Vec<RankedCount> {
    let mut ranked: Vec<RankedCount> = counts
        .into_iter()
        .map(|(name, count)| RankedCount {
            name: name.to_string(),
            count,
        })
        .collect();
    ranked.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.name.cmp(&b.name)));
    ranked.truncate(top_n);
    ranked
}
