//! Core audit types for the a3s-audit system
//!
//! All types use camelCase JSON serialization for wire compatibility.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Kind of mutation an `EventRecord` describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    Create,
    Update,
    Delete,
    BulkUpdate,
    Rollback,
    Export,
}

impl AuditAction {
    /// Every action, in declaration order
    pub const ALL: [AuditAction; 6] = [
        AuditAction::Create,
        AuditAction::Update,
        AuditAction::Delete,
        AuditAction::BulkUpdate,
        AuditAction::Rollback,
        AuditAction::Export,
    ];

    /// Wire name of the action
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "CREATE",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
            Self::BulkUpdate => "BULK_UPDATE",
            Self::Rollback => "ROLLBACK",
            Self::Export => "EXPORT",
        }
    }

    /// Actions whose diff is applied on top of an existing value
    pub fn is_update_shaped(&self) -> bool {
        matches!(self, Self::Update | Self::BulkUpdate | Self::Rollback)
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pre-validated identity of whoever performed a mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Actor {
    /// Stable actor identifier
    pub id: String,

    /// Human-readable label shown in reports
    pub display_label: String,
}

impl Actor {
    pub fn new(id: impl Into<String>, display_label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_label: display_label.into(),
        }
    }
}

/// One field-level change inside a record's diff
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldChange {
    pub field: String,
    pub old_value: serde_json::Value,
    pub new_value: serde_json::Value,
}

impl FieldChange {
    pub fn new(
        field: impl Into<String>,
        old_value: serde_json::Value,
        new_value: serde_json::Value,
    ) -> Self {
        Self {
            field: field.into(),
            old_value,
            new_value,
        }
    }
}

/// A single immutable entry in the audit log
///
/// `id` is assigned by `AuditLog::append` and is the only valid ordering
/// key. `occurred_at` is wall-clock time and is used for filtering only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    /// Log-assigned sequence number (0 until appended)
    pub id: u64,

    /// Key of the audited entry (e.g., "max_tasks")
    pub entry_key: String,

    pub action: AuditAction,

    pub actor_id: String,

    pub actor_label: String,

    /// Unix timestamp in milliseconds
    pub occurred_at: u64,

    /// Field changes in deterministic (alphabetical) order
    #[serde(default)]
    pub diff: Vec<FieldChange>,

    /// Gates redaction on the reporting surface
    #[serde(default)]
    pub sensitive: bool,

    /// Action-specific data (e.g., export format, batch id)
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl EventRecord {
    /// Create an unappended record stamped with the current time
    pub fn new(
        entry_key: impl Into<String>,
        action: AuditAction,
        actor: &Actor,
        diff: Vec<FieldChange>,
    ) -> Self {
        Self {
            id: 0,
            entry_key: entry_key.into(),
            action,
            actor_id: actor.id.clone(),
            actor_label: actor.display_label.clone(),
            occurred_at: now_millis(),
            diff,
            sensitive: false,
            metadata: HashMap::new(),
        }
    }

    /// Override the wall-clock timestamp
    pub fn at(mut self, occurred_at: u64) -> Self {
        self.occurred_at = occurred_at;
        self
    }

    /// Mark the record as sensitive
    pub fn sensitive(mut self, sensitive: bool) -> Self {
        self.sensitive = sensitive;
        self
    }

    /// Add a metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Ordering of query results by record id
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

/// Offset/limit pagination applied after ordering
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    #[serde(default)]
    pub offset: usize,

    /// Maximum number of records (None = unbounded)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl Pagination {
    pub fn new(offset: usize, limit: usize) -> Self {
        Self {
            offset,
            limit: Some(limit),
        }
    }

    /// First `limit` records
    pub fn first(limit: usize) -> Self {
        Self::new(0, limit)
    }

    /// Apply this page to an already-ordered iterator
    pub fn apply<T>(&self, items: impl Iterator<Item = T>) -> Vec<T> {
        let page = items.skip(self.offset);
        match self.limit {
            Some(limit) => page.take(limit).collect(),
            None => page.collect(),
        }
    }
}

/// Query filter over the audit log
///
/// All criteria are conjunctive. An empty `actions` list matches every
/// action. `since`/`until` bound `occurred_at` inclusively.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor_id: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<AuditAction>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub until: Option<u64>,

    #[serde(default)]
    pub order: SortOrder,

    #[serde(default)]
    pub pagination: Pagination,
}

impl RecordFilter {
    /// Match every record
    pub fn all() -> Self {
        Self::default()
    }

    /// Records for a single entry key
    pub fn for_key(entry_key: impl Into<String>) -> Self {
        Self {
            entry_key: Some(entry_key.into()),
            ..Self::default()
        }
    }

    /// Records written by a single actor
    pub fn by_actor(actor_id: impl Into<String>) -> Self {
        Self {
            actor_id: Some(actor_id.into()),
            ..Self::default()
        }
    }

    pub fn with_actions(mut self, actions: impl IntoIterator<Item = AuditAction>) -> Self {
        self.actions = actions.into_iter().collect();
        self
    }

    pub fn since(mut self, occurred_at: u64) -> Self {
        self.since = Some(occurred_at);
        self
    }

    pub fn until(mut self, occurred_at: u64) -> Self {
        self.until = Some(occurred_at);
        self
    }

    pub fn descending(mut self) -> Self {
        self.order = SortOrder::Descending;
        self
    }

    pub fn page(mut self, pagination: Pagination) -> Self {
        self.pagination = pagination;
        self
    }

    /// Whether a record satisfies the selection criteria
    ///
    /// Ordering and pagination are not part of matching.
    pub fn matches(&self, record: &EventRecord) -> bool {
        if let Some(ref key) = self.entry_key {
            if &record.entry_key != key {
                return false;
            }
        }
        if let Some(ref actor) = self.actor_id {
            if &record.actor_id != actor {
                return false;
            }
        }
        if !self.actions.is_empty() && !self.actions.contains(&record.action) {
            return false;
        }
        if self.since.is_some_and(|since| record.occurred_at < since) {
            return false;
        }
        if self.until.is_some_and(|until| record.occurred_at > until) {
            return false;
        }
        true
    }
}

/// Name with an occurrence count, used for top-N rankings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedCount {
    pub name: String,
    pub count: u64,
}

/// Aggregate view over a filtered slice of the log
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditStatistics {
    /// Total matching records
    pub total: u64,

    pub counts_by_action: BTreeMap<AuditAction, u64>,

    /// Most active actors, highest count first
    pub top_actors: Vec<RankedCount>,

    /// Most frequently changed keys, highest count first
    pub top_keys: Vec<RankedCount>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub earliest_at: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_at: Option<u64>,
}

/// Current time in Unix milliseconds
pub(crate) fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
