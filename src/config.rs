//! Audit subsystem configuration
//!
//! Loaded from a JSON file or built in code. Every section has defaults,
//! so an empty object (`{}`) is a valid configuration.

use crate::alert::RoutingPolicy;
use crate::error::{AuditError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuditConfig {
    pub dispatch: DispatchConfig,

    pub retention: RetentionConfig,

    /// Severity → channel routing
    pub routing: RoutingPolicy,

    /// Case-insensitive substrings marking an entry key as sensitive
    pub sensitive_keys: Vec<String>,

    /// Size of top-actor/top-key rankings in statistics
    pub top_n: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            dispatch: DispatchConfig::default(),
            retention: RetentionConfig::default(),
            routing: RoutingPolicy::default(),
            sensitive_keys: ["secret", "password", "token", "api_key", "credential"]
                .into_iter()
                .map(String::from)
                .collect(),
            top_n: 10,
        }
    }
}

impl AuditConfig {
    /// Load and validate a JSON configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            AuditError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        let config: Self = serde_json::from_str(&json).map_err(|e| {
            AuditError::Config(format!(
                "Failed to parse config file {}: {}",
                path.display(),
                e
            ))
        })?;

        config.validate()?;
        tracing::debug!(path = %path.display(), "Audit config loaded");
        Ok(config)
    }

    /// Reject values that would make the subsystem misbehave
    pub fn validate(&self) -> Result<()> {
        if self.dispatch.channel_timeout_ms == 0 {
            return Err(AuditError::Config(
                "dispatch.channelTimeoutMs must be > 0".to_string(),
            ));
        }
        if self.dispatch.deadline_ms == 0 {
            return Err(AuditError::Config(
                "dispatch.deadlineMs must be > 0".to_string(),
            ));
        }
        if self.retention.interval_secs == 0 {
            return Err(AuditError::Config(
                "retention.intervalSecs must be > 0".to_string(),
            ));
        }
        if self.top_n == 0 {
            return Err(AuditError::Config("topN must be > 0".to_string()));
        }
        Ok(())
    }
}

/// Notification fan-out timing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DispatchConfig {
    /// Per-channel send timeout in milliseconds
    pub channel_timeout_ms: u64,

    /// Overall deadline for one dispatch in milliseconds
    pub deadline_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            channel_timeout_ms: 2_000,
            deadline_ms: 5_000,
        }
    }
}

impl DispatchConfig {
    pub fn channel_timeout(&self) -> Duration {
        Duration::from_millis(self.channel_timeout_ms)
    }

    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }
}

/// Retention horizon and scheduling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetentionConfig {
    /// Records older than this many days may be purged
    pub horizon_days: u64,

    /// Run purge periodically in the background
    ///
    /// Off by default: purging may leave gaps in per-key history.
    pub scheduled: bool,

    /// Seconds between scheduled purges
    pub interval_secs: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            horizon_days: 90,
            scheduled: false,
            interval_secs: 3_600,
        }
    }
}

impl RetentionConfig {
    pub fn horizon(&self) -> Duration {
        Duration::from_secs(self.horizon_days * 24 * 60 * 60)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}
