//! Error types for a3s-audit

use thiserror::Error;

/// Errors that can occur in the audit subsystem
///
/// Notification failures are deliberately absent: they never escape
/// `ChannelDispatcher::dispatch` and are reported as `ChannelResult` data.
#[derive(Debug, Error)]
pub enum AuditError {
    /// Backing store failure on append, query, or purge
    #[error("Storage error during {operation}: {reason}")]
    Storage {
        operation: &'static str,
        reason: String,
    },

    /// Malformed record, rejected before anything is written
    #[error("Invalid audit record for '{entry_key}': {reason}")]
    Validation {
        entry_key: String,
        reason: String,
    },

    /// Serialization/deserialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Rollback target has no value to restore
    #[error("Cannot roll back '{entry_key}': {reason}")]
    Rollback {
        entry_key: String,
        reason: String,
    },
}

impl AuditError {
    /// Build a storage error for the given operation
    pub fn storage(operation: &'static str, reason: impl std::fmt::Display) -> Self {
        Self::Storage {
            operation,
            reason: reason.to_string(),
        }
    }

    /// Build a validation error for the given entry key
    pub fn validation(entry_key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            entry_key: entry_key.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error came from the backing store
    pub fn is_storage(&self) -> bool {
        matches!(self, Self::Storage { .. })
    }
}

/// Result type alias for audit operations
pub type Result<T> = std::result::Result<T, AuditError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_display() {
        let err = AuditError::storage("append", "disk full");
        assert_eq!(err.to_string(), "Storage error during append: disk full");
        assert!(err.is_storage());
    }

    #[test]
    fn test_validation_error_display() {
        let err = AuditError::validation("max_tasks", "UPDATE with empty diff");
        assert_eq!(
            err.to_string(),
            "Invalid audit record for 'max_tasks': UPDATE with empty diff"
        );
        assert!(!err.is_storage());
    }
}
