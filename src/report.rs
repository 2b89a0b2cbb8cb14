//! Operator-facing reporting: redaction and export
//!
//! Sensitive records leave this module with every field value replaced by
//! [`REDACTION_MARKER`] unless the caller presents an
//! [`UnredactCapability`]. Storage serialization of `EventRecord` is not
//! affected; only the reporting surface redacts.

use crate::error::Result;
use crate::types::{Actor, EventRecord};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Replacement for sensitive field values
pub const REDACTION_MARKER: &str = "[REDACTED]";

/// Explicit permission to see sensitive values in reports
///
/// Not `Clone`: whoever was granted it has to pass it along by reference.
#[derive(Debug)]
pub struct UnredactCapability {
    granted_to: String,
    reason: String,
}

impl UnredactCapability {
    /// Grant unredacted access to an actor; the grant is logged
    pub fn grant(actor: &Actor, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        tracing::info!(actor = %actor.id, reason = %reason, "Unredact capability granted");
        Self {
            granted_to: actor.id.clone(),
            reason,
        }
    }

    pub fn granted_to(&self) -> &str {
        &self.granted_to
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}

/// How sensitive values are presented
#[derive(Debug, Clone, Copy, Default)]
pub enum Disclosure<'a> {
    #[default]
    Redacted,
    Unredacted(&'a UnredactCapability),
}

impl Disclosure<'_> {
    pub fn is_redacted(&self) -> bool {
        matches!(self, Self::Redacted)
    }

    /// The record as it may be shown under this disclosure
    pub fn apply(&self, record: &EventRecord) -> EventRecord {
        match self {
            Self::Redacted => record.redacted(),
            Self::Unredacted(_) => record.clone(),
        }
    }
}

impl EventRecord {
    /// Copy with field values masked if the record is sensitive
    pub fn redacted(&self) -> EventRecord {
        let mut copy = self.clone();
        if copy.sensitive {
            for change in &mut copy.diff {
                change.old_value = REDACTION_MARKER.into();
                change.new_value = REDACTION_MARKER.into();
            }
        }
        copy
    }
}

/// Export encoding
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    /// Single JSON array
    #[default]
    Json,
    /// One JSON object per line
    Jsonl,
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json => f.write_str("json"),
            Self::Jsonl => f.write_str("jsonl"),
        }
    }
}

/// Serialized form of a record on the reporting surface
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportRecord {
    #[serde(flatten)]
    pub record: EventRecord,

    /// `occurred_at` as RFC 3339
    pub occurred_at_iso: String,

    /// Whether values were masked
    pub redacted: bool,
}

impl ReportRecord {
    pub fn new(record: &EventRecord, disclosure: &Disclosure<'_>) -> Self {
        Self {
            record: disclosure.apply(record),
            occurred_at_iso: iso_timestamp(record.occurred_at),
            redacted: record.sensitive && disclosure.is_redacted(),
        }
    }
}

/// Render records for export
pub fn render(
    records: &[EventRecord],
    format: ExportFormat,
    disclosure: &Disclosure<'_>,
) -> Result<String> {
    let rows: Vec<ReportRecord> = records
        .iter()
        .map(|r| ReportRecord::new(r, disclosure))
        .collect();

    match format {
        ExportFormat::Json => Ok(serde_json::to_string_pretty(&rows)?),
        ExportFormat::Jsonl => {
            let mut out = String::new();
            for row in &rows {
                out.push_str(&serde_json::to_string(row)?);
                out.push('\n');
            }
            Ok(out)
        }
    }
}

fn iso_timestamp(millis: u64) -> String {
    i64::try_from(millis)
        .ok()
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_default()
}
