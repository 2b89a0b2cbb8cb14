//! In-memory audit store for development and testing
//!
//! Records are held in a `BTreeMap` keyed by id, so scans are id-ordered
//! regardless of the order concurrent inserts complete in. Contents are
//! lost when the store is dropped.

use super::{AuditStore, StoreInfo};
use crate::error::{AuditError, Result};
use crate::types::{EventRecord, RecordFilter};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// In-memory `AuditStore`
#[derive(Default, Clone)]
pub struct MemoryAuditStore {
    records: Arc<RwLock<BTreeMap<u64, EventRecord>>>,
}

impl MemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuditStore for MemoryAuditStore {
    async fn insert(&self, record: &EventRecord) -> Result<()> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.id) {
            return Err(AuditError::storage(
                "append",
                format!("record id {} already exists", record.id),
            ));
        }
        records.insert(record.id, record.clone());
        Ok(())
    }

    async fn scan(&self, filter: &RecordFilter) -> Result<Vec<EventRecord>> {
        let records = self.records.read().await;
        Ok(records
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect())
    }

    async fn last_id(&self) -> Result<u64> {
        let records = self.records.read().await;
        Ok(records.keys().next_back().copied().unwrap_or(0))
    }

    async fn expired_ids(&self, cutoff: u64) -> Result<Vec<u64>> {
        let records = self.records.read().await;
        Ok(super::expired_prefixes(&records, cutoff))
    }

    async fn remove(&self, ids: &[u64]) -> Result<u64> {
        let mut records = self.records.write().await;
        let removed = ids.iter().filter(|id| records.remove(*id).is_some()).count();
        Ok(removed as u64)
    }

    async fn info(&self) -> Result<StoreInfo> {
        let records = self.records.read().await;
        Ok(StoreInfo {
            provider: "memory".to_string(),
            records: records.len() as u64,
            oldest_id: records.keys().next().copied(),
            newest_id: records.keys().next_back().copied(),
        })
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Actor, AuditAction};

    fn record(id: u64, key: &str, at: u64) -> EventRecord {
        let mut rec = EventRecord::new(key, AuditAction::Create, &Actor::new("u-1", "Alice"), vec![])
            .at(at);
        rec.id = id;
        rec
    }

    #[tokio::test]
    async fn test_insert_and_scan_in_id_order() {
        let store = MemoryAuditStore::new();
        store.insert(&record(3, "a", 300)).await.unwrap();
        store.insert(&record(1, "a", 100)).await.unwrap();
        store.insert(&record(2, "b", 200)).await.unwrap();

        let all = store.scan(&RecordFilter::all()).await.unwrap();
        let ids: Vec<u64> = all.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);

        let only_a = store.scan(&RecordFilter::for_key("a")).await.unwrap();
        assert_eq!(only_a.len(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_id_rejected() {
        let store = MemoryAuditStore::new();
        store.insert(&record(1, "a", 100)).await.unwrap();
        let err = store.insert(&record(1, "a", 100)).await.unwrap_err();
        assert!(err.is_storage());
    }

    #[tokio::test]
    async fn test_last_id_and_info() {
        let store = MemoryAuditStore::new();
        assert_eq!(store.last_id().await.unwrap(), 0);

        store.insert(&record(4, "a", 100)).await.unwrap();
        store.insert(&record(9, "a", 100)).await.unwrap();
        assert_eq!(store.last_id().await.unwrap(), 9);

        let info = store.info().await.unwrap();
        assert_eq!(info.provider, "memory");
        assert_eq!(info.records, 2);
        assert_eq!(info.oldest_id, Some(4));
        assert_eq!(info.newest_id, Some(9));
        assert!(store.health().await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_ids_and_idempotent_remove() {
        let store = MemoryAuditStore::new();
        store.insert(&record(1, "a", 100)).await.unwrap();
        store.insert(&record(2, "a", 200)).await.unwrap();
        store.insert(&record(3, "a", 300)).await.unwrap();

        let expired = store.expired_ids(300).await.unwrap();
        assert_eq!(expired, vec![1, 2]);

        assert_eq!(store.remove(&expired).await.unwrap(), 2);
        assert_eq!(store.remove(&expired).await.unwrap(), 0);
        assert_eq!(store.info().await.unwrap().records, 1);
    }

    #[tokio::test]
    async fn test_expired_ids_take_per_key_prefix() {
        let store = MemoryAuditStore::new();
        store.insert(&record(1, "a", 5_000)).await.unwrap();
        // Skewed clock: stamped older than its predecessor
        store.insert(&record(2, "a", 100)).await.unwrap();
        store.insert(&record(3, "a", 6_000)).await.unwrap();
        store.insert(&record(4, "b", 5_000)).await.unwrap();
        store.insert(&record(5, "b", 200)).await.unwrap();
        store.insert(&record(6, "c", 7_000)).await.unwrap();

        assert_eq!(store.expired_ids(1_000).await.unwrap(), vec![1, 2, 4, 5]);
        assert!(store.expired_ids(50).await.unwrap().is_empty());
    }
}
