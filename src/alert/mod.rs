//! Severity-tagged alerts and their fan-out to notification channels
//!
//! `AlertRouter` decides which channels receive an alert; `ChannelDispatcher`
//! sends it to all of them concurrently and reports per-channel outcomes.
//! Transport details live behind the `NotificationChannel` trait and are
//! supplied by the embedding application.

pub mod dispatch;
pub mod failures;
pub mod router;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Alert severity, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Urgent,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Urgent => "urgent",
            Self::Critical => "critical",
        };
        f.write_str(name)
    }
}

/// Notification channel identifier
///
/// Declaration order is the order in which dispatch results are reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    /// Realtime operator dashboard
    Dashboard,
    Email,
    /// Chat webhook
    Chat,
    Sms,
    /// Mobile push
    Push,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Dashboard => "dashboard",
            Self::Email => "email",
            Self::Chat => "chat",
            Self::Sms => "sms",
            Self::Push => "push",
        };
        f.write_str(name)
    }
}

/// Transient alert payload handed to every selected channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationEnvelope {
    /// Unique notification identifier (ntf-<uuid>)
    pub id: String,

    /// Entity the alert is about (usually an entry key)
    pub subject_entity_id: String,

    pub severity: Severity,

    pub title: String,

    pub body: String,

    #[serde(default)]
    pub structured_fields: BTreeMap<String, serde_json::Value>,

    /// Unix timestamp in milliseconds
    pub created_at: u64,
}

impl NotificationEnvelope {
    pub fn new(
        subject_entity_id: impl Into<String>,
        severity: Severity,
        title: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            id: format!("ntf-{}", uuid::Uuid::new_v4()),
            subject_entity_id: subject_entity_id.into(),
            severity,
            title: title.into(),
            body: body.into(),
            structured_fields: BTreeMap::new(),
            created_at: crate::types::now_millis(),
        }
    }

    /// Add a structured field
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.structured_fields.insert(key.into(), value.into());
        self
    }
}

/// Failure of a single channel send
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    /// Transport reported an error
    #[error("send failed: {0}")]
    Send(String),

    /// No answer within the channel's time budget
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Router selected a channel with no registered implementation
    #[error("no channel registered")]
    NotRegistered,

    /// Channel implementation panicked
    #[error("channel panicked: {0}")]
    Panicked(String),
}

/// Outcome of one channel within a dispatch
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelResult {
    pub channel: Channel,

    /// Whether a send was actually started
    pub attempted: bool,

    pub succeeded: bool,

    pub error: Option<ChannelError>,

    /// Time from send start to outcome
    pub latency: Duration,
}

impl ChannelResult {
    pub(crate) fn success(channel: Channel, latency: Duration) -> Self {
        Self {
            channel,
            attempted: true,
            succeeded: true,
            error: None,
            latency,
        }
    }

    pub(crate) fn failure(channel: Channel, error: ChannelError, latency: Duration) -> Self {
        Self {
            channel,
            attempted: true,
            succeeded: false,
            error: Some(error),
            latency,
        }
    }

    pub(crate) fn skipped(channel: Channel, error: ChannelError) -> Self {
        Self {
            channel,
            attempted: false,
            succeeded: false,
            error: Some(error),
            latency: Duration::ZERO,
        }
    }

    /// Whether the failure was a timeout
    pub fn timed_out(&self) -> bool {
        matches!(self.error, Some(ChannelError::Timeout(_)))
    }
}

pub use dispatch::{ChannelDispatcher, ChannelRegistry, NotificationChannel};
pub use failures::{DeliveryFailureSink, FailedDelivery, MemoryFailureSink};
pub use router::{AlertRouter, RoutingPolicy};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_creation() {
        let env = NotificationEnvelope::new("max_tasks", Severity::Urgent, "Limit changed", "body")
            .with_field("recordId", 42)
            .with_field("actorId", "u-1");

        assert!(env.id.starts_with("ntf-"));
        assert_eq!(env.severity, Severity::Urgent);
        assert_eq!(env.structured_fields["recordId"], 42);
        assert!(env.created_at > 0);
    }

    #[test]
    fn test_envelope_serialization() {
        let env = NotificationEnvelope::new("theme", Severity::Critical, "t", "b");
        let json = serde_json::to_string(&env).unwrap();
        assert!(json.contains("\"subjectEntityId\":\"theme\""));
        assert!(json.contains("\"severity\":\"critical\""));
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Info < Severity::Warning);
        assert!(Severity::Urgent < Severity::Critical);
    }

    #[test]
    fn test_channel_result_constructors() {
        let ok = ChannelResult::success(Channel::Email, Duration::from_millis(5));
        assert!(ok.attempted && ok.succeeded && ok.error.is_none());

        let timeout = ChannelResult::failure(
            Channel::Sms,
            ChannelError::Timeout(Duration::from_secs(2)),
            Duration::from_secs(2),
        );
        assert!(timeout.timed_out());

        let skipped = ChannelResult::skipped(Channel::Push, ChannelError::NotRegistered);
        assert!(!skipped.attempted);
        assert!(!skipped.succeeded);
    }
}
