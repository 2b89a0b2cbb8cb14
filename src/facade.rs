//! Single entry point used by the surrounding CRUD layer
//!
//! `AuditFacade` records every mutation, answers history and
//! point-in-time questions, and raises alerts for changes that are also
//! operational incidents. Alert delivery runs detached: a recorded change
//! never waits on, or fails because of, notifications.

use crate::alert::{
    AlertRouter, ChannelDispatcher, ChannelRegistry, ChannelResult, DeliveryFailureSink,
    FailedDelivery, MemoryFailureSink, NotificationEnvelope, Severity,
};
use crate::config::AuditConfig;
use crate::diff::{diff, uses_reserved_field, SCALAR_FIELD};
use crate::error::{AuditError, Result};
use crate::log::AuditLog;
use crate::pipeline::{RecordPipeline, StageContext};
use crate::provider::{AuditStore, StoreInfo};
use crate::reconstruct::{Reconstruction, StateReconstructor};
use crate::report::{self, Disclosure, ExportFormat};
use crate::retention::{RetentionManager, RetentionTask};
use crate::types::{
    Actor, AuditAction, AuditStatistics, EventRecord, FieldChange, Pagination, RecordFilter,
    SortOrder,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::{AbortHandle, JoinHandle};

/// Alert to raise alongside a recorded change
#[derive(Debug, Clone, PartialEq)]
pub struct Incident {
    pub severity: Severity,
    pub title: String,
    pub body: String,
}

impl Incident {
    pub fn new(severity: Severity, title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            severity,
            title: title.into(),
            body: body.into(),
        }
    }
}

/// Optional inputs to `record_change`
#[derive(Debug, Clone, Default)]
pub struct RecordOptions {
    /// Override the wall-clock timestamp (Unix milliseconds)
    pub occurred_at: Option<u64>,

    /// Mark the record sensitive regardless of its key
    pub sensitive: bool,

    pub metadata: HashMap<String, String>,

    /// Raise an alert once the record is appended
    pub incident: Option<Incident>,
}

impl RecordOptions {
    pub fn at(mut self, occurred_at: u64) -> Self {
        self.occurred_at = Some(occurred_at);
        self
    }

    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn incident(mut self, incident: Incident) -> Self {
        self.incident = Some(incident);
        self
    }
}

/// One key's change within a bulk update
#[derive(Debug, Clone, PartialEq)]
pub struct BulkChange {
    pub entry_key: String,
    pub old_value: Value,
    pub new_value: Value,
}

impl BulkChange {
    pub fn new(entry_key: impl Into<String>, old_value: Value, new_value: Value) -> Self {
        Self {
            entry_key: entry_key.into(),
            old_value,
            new_value,
        }
    }
}

/// Audit trail and alerting facade
pub struct AuditFacade {
    log: Arc<AuditLog>,
    reconstructor: StateReconstructor,
    retention: Arc<RetentionManager>,
    dispatcher: Arc<ChannelDispatcher>,
    failures: Arc<dyn DeliveryFailureSink>,
    pipeline: RecordPipeline,
    config: AuditConfig,

    /// Detached notification tasks that may still be running
    in_flight: Mutex<Vec<AbortHandle>>,
}

impl AuditFacade {
    /// Open the facade over a store with an explicit channel registry
    pub async fn open(
        store: impl AuditStore + 'static,
        registry: ChannelRegistry,
        config: AuditConfig,
    ) -> Result<Self> {
        config.validate()?;

        let log = Arc::new(AuditLog::open(store).await?);
        let dispatcher = ChannelDispatcher::new(
            AlertRouter::new(config.routing.clone()),
            registry,
            config.dispatch,
        );

        tracing::info!(
            store = log.store_name(),
            channels = dispatcher.registry().len(),
            "Audit facade opened"
        );

        Ok(Self {
            reconstructor: StateReconstructor::new(log.clone()),
            retention: Arc::new(RetentionManager::new(log.clone())),
            log,
            dispatcher: Arc::new(dispatcher),
            failures: Arc::new(MemoryFailureSink::default()),
            pipeline: RecordPipeline::standard(),
            config,
            in_flight: Mutex::new(Vec::new()),
        })
    }

    /// Replace the sink receiving failed deliveries
    pub fn with_failure_sink(mut self, sink: Arc<dyn DeliveryFailureSink>) -> Self {
        self.failures = sink;
        self
    }

    /// Replace the record pipeline
    pub fn with_pipeline(mut self, pipeline: RecordPipeline) -> Self {
        self.pipeline = pipeline;
        self
    }

    /// Record one mutation and return the appended record
    ///
    /// For CREATE only `new` is considered, for DELETE only `old`. Returns
    /// as soon as the record is appended; an incident alert, if any, is
    /// delivered in the background.
    pub async fn record_change(
        &self,
        actor: &Actor,
        entry_key: &str,
        action: AuditAction,
        old: Option<&Value>,
        new: Option<&Value>,
        opts: RecordOptions,
    ) -> Result<EventRecord> {
        let absent = Value::Null;
        let old = old.unwrap_or(&absent);
        let new = new.unwrap_or(&absent);
        check_values(entry_key, action, old, new)?;
        let changes = match action {
            AuditAction::Create => diff(&absent, new),
            AuditAction::Delete => diff(old, &absent),
            _ => diff(old, new),
        };

        let record = self.prepare(self.build(actor, entry_key, action, changes, &opts))?;
        let record = self.commit(record).await?;

        if let Some(incident) = opts.incident {
            self.notify(incident_envelope(&record, incident));
        }
        Ok(record)
    }

    /// Record one BULK_UPDATE per change, sharing a batch id
    ///
    /// Every change is validated before anything is appended, but the
    /// appends themselves are not atomic: a storage failure part way through
    /// leaves the earlier records of the batch in the log. The failure is
    /// logged with the batch id and how many records made it in.
    pub async fn record_bulk(
        &self,
        actor: &Actor,
        changes: Vec<BulkChange>,
        opts: RecordOptions,
    ) -> Result<Vec<EventRecord>> {
        let batch_id = format!("batch-{}", uuid::Uuid::new_v4());
        let batch_size = changes.len().to_string();

        let prepared = changes
            .iter()
            .map(|change| {
                check_values(&change.entry_key, AuditAction::BulkUpdate, &change.old_value, &change.new_value)?;
                let record = self
                    .build(
                        actor,
                        &change.entry_key,
                        AuditAction::BulkUpdate,
                        diff(&change.old_value, &change.new_value),
                        &opts,
                    )
                    .with_metadata("batchId", batch_id.as_str())
                    .with_metadata("batchSize", batch_size.as_str());
                self.prepare(record)
            })
            .collect::<Result<Vec<_>>>()?;

        let mut appended = Vec::with_capacity(prepared.len());
        for record in prepared {
            match self.commit(record).await {
                Ok(record) => appended.push(record),
                Err(e) => {
                    tracing::error!(
                        %batch_id,
                        appended = appended.len(),
                        batch_size = changes.len(),
                        "Bulk update stopped part way; earlier records of the batch remain"
                    );
                    return Err(e);
                }
            }
        }

        if let Some(incident) = opts.incident {
            let envelope = NotificationEnvelope::new(&batch_id, incident.severity, incident.title, incident.body)
                .with_field("batchSize", appended.len())
                .with_field("actorId", actor.id.as_str());
            self.notify(envelope);
        }
        Ok(appended)
    }

    /// Restore an entry to its value as of `to_timestamp`
    ///
    /// `current` is the live value from the primary store. The restore is
    /// recorded as a ROLLBACK diff against it, or as CREATE when the entry
    /// is currently absent.
    pub async fn rollback(
        &self,
        actor: &Actor,
        entry_key: &str,
        to_timestamp: u64,
        current: Option<&Value>,
        opts: RecordOptions,
    ) -> Result<EventRecord> {
        let target = match self.value_as_of(entry_key, to_timestamp).await? {
            Reconstruction::Found(value) => value,
            Reconstruction::NotFound(gap) => {
                return Err(AuditError::Rollback {
                    entry_key: entry_key.to_string(),
                    reason: format!("no value as of {} ({:?})", to_timestamp, gap),
                });
            }
        };

        let (action, changes) = match current {
            Some(current) if !current.is_null() => (AuditAction::Rollback, diff(current, &target)),
            _ => (AuditAction::Create, diff(&Value::Null, &target)),
        };
        if action == AuditAction::Rollback && changes.is_empty() {
            return Err(AuditError::Rollback {
                entry_key: entry_key.to_string(),
                reason: "already at the requested value".to_string(),
            });
        }

        let record = self
            .build(actor, entry_key, action, changes, &opts)
            .with_metadata("rolledBackTo", to_timestamp.to_string());
        let record = self.commit(self.prepare(record)?).await?;

        if let Some(incident) = opts.incident {
            self.notify(incident_envelope(&record, incident));
        }
        Ok(record)
    }

    /// Render matching records for an operator and record the export
    pub async fn export(
        &self,
        actor: &Actor,
        filter: &RecordFilter,
        format: ExportFormat,
        disclosure: Disclosure<'_>,
    ) -> Result<String> {
        let records = self.logged("export", self.log.query(filter).await)?;
        let rendered = report::render(&records, format, &disclosure)?;

        let entry_key = filter.entry_key.clone().unwrap_or_else(|| "*".to_string());
        let mut record = self
            .build(actor, &entry_key, AuditAction::Export, Vec::new(), &RecordOptions::default())
            .with_metadata("format", format.to_string())
            .with_metadata("recordCount", records.len().to_string())
            .with_metadata("redacted", disclosure.is_redacted().to_string());
        if let Disclosure::Unredacted(cap) = disclosure {
            record = record
                .with_metadata("unredactedFor", cap.granted_to())
                .with_metadata("unredactReason", cap.reason());
        }
        let record = self.commit(self.prepare(record)?).await?;

        tracing::info!(
            actor = %actor.id,
            export_id = record.id,
            records = records.len(),
            %format,
            redacted = disclosure.is_redacted(),
            "Audit records exported"
        );
        Ok(rendered)
    }

    /// Fan an alert out to its routed channels in the background
    ///
    /// The returned handle resolves to the per-channel results; dropping it
    /// does not cancel delivery. Channels that failed are reported to the
    /// failure sink.
    pub fn notify(&self, envelope: NotificationEnvelope) -> JoinHandle<Vec<ChannelResult>> {
        let dispatcher = self.dispatcher.clone();
        let failures = self.failures.clone();

        let handle = tokio::spawn(async move {
            let results = dispatcher.dispatch(&envelope).await;
            if let Some(failed) = FailedDelivery::from_results(&envelope, &results) {
                if let Err(e) = failures.record(failed).await {
                    tracing::error!(
                        notification = %envelope.id,
                        error = %e,
                        "Failed to record delivery failure"
                    );
                }
            }
            results
        });

        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        in_flight.retain(|h| !h.is_finished());
        in_flight.push(handle.abort_handle());
        handle
    }

    /// Cancel every notification still in flight, returning how many
    pub fn shutdown(&self) -> usize {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        let pending: Vec<AbortHandle> = in_flight.drain(..).filter(|h| !h.is_finished()).collect();
        for handle in &pending {
            handle.abort();
        }
        if !pending.is_empty() {
            tracing::info!(cancelled = pending.len(), "In-flight notifications cancelled");
        }
        pending.len()
    }

    /// Value of an entry as of a timestamp (inclusive)
    pub async fn value_as_of(&self, entry_key: &str, timestamp: u64) -> Result<Reconstruction> {
        self.logged(
            "reconstruct",
            self.reconstructor.value_as_of(entry_key, timestamp).await,
        )
    }

    /// Whether replaying an entry's history yields its live value
    pub async fn verify_consistency(&self, entry_key: &str, live: Option<&Value>) -> Result<bool> {
        self.logged(
            "verify",
            self.reconstructor.verify_consistency(entry_key, live).await,
        )
    }

    /// Changes to one entry, newest first
    pub async fn history_for(&self, entry_key: &str, page: Pagination) -> Result<Vec<EventRecord>> {
        let filter = RecordFilter::for_key(entry_key).descending().page(page);
        self.logged("query", self.log.query(&filter).await)
    }

    /// Records written by one actor, newest first
    pub async fn actions_by(&self, actor_id: &str, page: Pagination) -> Result<Vec<EventRecord>> {
        let filter = RecordFilter::by_actor(actor_id).descending().page(page);
        self.logged("query", self.log.query(&filter).await)
    }

    /// Records matching a filter, newest first
    pub async fn recent_changes(&self, filter: RecordFilter) -> Result<Vec<EventRecord>> {
        let filter = RecordFilter {
            order: SortOrder::Descending,
            ..filter
        };
        self.logged("query", self.log.query(&filter).await)
    }

    /// Counts by action and top actors/keys for matching records
    pub async fn statistics(&self, filter: &RecordFilter) -> Result<AuditStatistics> {
        self.logged("aggregate", self.log.aggregate(filter, self.config.top_n).await)
    }

    /// Remove records older than the horizon
    pub async fn purge_older_than(&self, horizon: Duration) -> Result<u64> {
        self.logged("purge", self.retention.purge_older_than(horizon).await)
    }

    /// Start scheduled purging if the configuration enables it
    pub fn start_retention(&self) -> Option<RetentionTask> {
        let retention = self.config.retention;
        if !retention.scheduled {
            tracing::debug!("Scheduled retention disabled");
            return None;
        }
        Some(
            self.retention
                .clone()
                .spawn_scheduled(retention.interval(), retention.horizon()),
        )
    }

    /// Get store info
    pub async fn info(&self) -> Result<StoreInfo> {
        self.log.info().await
    }

    /// Get the underlying log
    pub fn log(&self) -> &Arc<AuditLog> {
        &self.log
    }

    pub fn dispatcher(&self) -> &ChannelDispatcher {
        &self.dispatcher
    }

    pub fn failures(&self) -> &dyn DeliveryFailureSink {
        self.failures.as_ref()
    }

    pub fn config(&self) -> &AuditConfig {
        &self.config
    }

    fn build(
        &self,
        actor: &Actor,
        entry_key: &str,
        action: AuditAction,
        changes: Vec<FieldChange>,
        opts: &RecordOptions,
    ) -> EventRecord {
        let mut record = EventRecord::new(entry_key, action, actor, changes).sensitive(opts.sensitive);
        if let Some(at) = opts.occurred_at {
            record.occurred_at = at;
        }
        record
            .metadata
            .extend(opts.metadata.iter().map(|(k, v)| (k.clone(), v.clone())));
        record
    }

    fn prepare(&self, record: EventRecord) -> Result<EventRecord> {
        let ctx = StageContext {
            sensitive_keys: &self.config.sensitive_keys,
        };
        let (entry_key, action) = (record.entry_key.clone(), record.action);
        self.pipeline.run(record, &ctx).inspect_err(|e| {
            tracing::warn!(%entry_key, %action, error = %e, "Audit record rejected");
        })
    }

    async fn commit(&self, mut record: EventRecord) -> Result<EventRecord> {
        match self.log.append(record.clone()).await {
            Ok(id) => {
                record.id = id;
                Ok(record)
            }
            Err(e) => {
                tracing::error!(
                    entry_key = %record.entry_key,
                    action = %record.action,
                    actor = %record.actor_id,
                    error = %e,
                    "Audit append failed; the mutation has no audit record"
                );
                Err(e)
            }
        }
    }

    fn logged<T>(&self, operation: &'static str, result: Result<T>) -> Result<T> {
        result.inspect_err(|e| {
            tracing::error!(operation, error = %e, "Audit log operation failed");
        })
    }
}

/// Reject values the diff encoding cannot represent faithfully
fn check_values(entry_key: &str, action: AuditAction, old: &Value, new: &Value) -> Result<()> {
    if (action == AuditAction::Create || action.is_update_shaped()) && new.is_null() {
        return Err(AuditError::validation(
            entry_key,
            format!("{} to an absent value; record a DELETE instead", action),
        ));
    }
    if uses_reserved_field(old) || uses_reserved_field(new) {
        return Err(AuditError::validation(
            entry_key,
            format!("field name `{}` is reserved", SCALAR_FIELD),
        ));
    }
    Ok(())
}

fn incident_envelope(record: &EventRecord, incident: Incident) -> NotificationEnvelope {
    NotificationEnvelope::new(&record.entry_key, incident.severity, incident.title, incident.body)
        .with_field("recordId", record.id)
        .with_field("action", record.action.as_str())
        .with_field("actorId", record.actor_id.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::memory::MemoryAuditStore;
    use serde_json::json;

    async fn facade() -> AuditFacade {
        AuditFacade::open(MemoryAuditStore::new(), ChannelRegistry::new(), AuditConfig::default())
            .await
            .unwrap()
    }

    fn alice() -> Actor {
        Actor::new("u-alice", "Alice")
    }

    #[tokio::test]
    async fn test_record_change_shapes_diff_by_action() {
        let audit = facade().await;

        let created = audit
            .record_change(&alice(), "theme", AuditAction::Create, Some(&json!("ignored")), Some(&json!("dark")), RecordOptions::default())
            .await
            .unwrap();
        assert_eq!(created.id, 1);
        assert_eq!(created.diff[0].old_value, Value::Null);

        let deleted = audit
            .record_change(&alice(), "theme", AuditAction::Delete, Some(&json!("dark")), Some(&json!("x")), RecordOptions::default())
            .await
            .unwrap();
        assert_eq!(deleted.diff[0].new_value, Value::Null);
        assert_eq!(deleted.diff[0].old_value, json!("dark"));
    }

    #[tokio::test]
    async fn test_rejected_record_is_not_appended() {
        let audit = facade().await;
        let err = audit
            .record_change(&alice(), "theme", AuditAction::Update, Some(&json!(1)), Some(&json!(1)), RecordOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, AuditError::Validation { .. }));
        assert_eq!(audit.info().await.unwrap().records, 0);
    }

    #[tokio::test]
    async fn test_unrepresentable_values_rejected() {
        let audit = facade().await;
        let reserved = json!({"$value": 1});

        let cases = [
            (AuditAction::Create, None, None),
            (AuditAction::Create, None, Some(&Value::Null)),
            (AuditAction::Update, Some(&reserved), None),
            (AuditAction::Create, None, Some(&reserved)),
            (AuditAction::Delete, Some(&reserved), None),
        ];
        for (action, old, new) in cases {
            let err = audit.record_change(&alice(), "theme", action, old, new, RecordOptions::default()).await.unwrap_err();
            assert!(matches!(err, AuditError::Validation { .. }), "{} {:?} {:?}", action, old, new);
        }

        let err = audit
            .record_bulk(&alice(), vec![BulkChange::new("theme", json!(1), Value::Null)], RecordOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AuditError::Validation { .. }));
        assert_eq!(audit.info().await.unwrap().records, 0);

        // A plain object is still fine, and so is deleting a scalar
        audit
            .record_change(&alice(), "theme", AuditAction::Create, None, Some(&json!({"value": 1})), RecordOptions::default())
            .await
            .unwrap();
        audit
            .record_change(&alice(), "theme", AuditAction::Delete, Some(&json!({"value": 1})), None, RecordOptions::default())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_options_applied() {
        let audit = facade().await;
        let rec = audit
            .record_change(
                &alice(),
                "theme",
                AuditAction::Create,
                None,
                Some(&json!("dark")),
                RecordOptions::default().at(42).sensitive().with_metadata("source", "ui"),
            )
            .await
            .unwrap();

        assert_eq!(rec.occurred_at, 42);
        assert!(rec.sensitive);
        assert_eq!(rec.metadata["source"], "ui");
    }

    #[tokio::test]
    async fn test_sensitive_key_classified() {
        let audit = facade().await;
        let rec = audit
            .record_change(&alice(), "smtp_password", AuditAction::Create, None, Some(&json!("pw")), RecordOptions::default())
            .await
            .unwrap();
        assert!(rec.sensitive);
    }

    #[tokio::test]
    async fn test_start_retention_respects_config() {
        let audit = facade().await;
        assert!(audit.start_retention().is_none());

        let mut config = AuditConfig::default();
        config.retention.scheduled = true;
        let audit = AuditFacade::open(MemoryAuditStore::new(), ChannelRegistry::new(), config)
            .await
            .unwrap();
        let task = audit.start_retention().unwrap();
        task.stop().await;
    }

    #[tokio::test]
    async fn test_open_rejects_invalid_config() {
        let mut config = AuditConfig::default();
        config.top_n = 0;
        let result = AuditFacade::open(MemoryAuditStore::new(), ChannelRegistry::new(), config).await;
        assert!(matches!(result, Err(AuditError::Config(_))));
    }
}
