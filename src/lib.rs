//! # a3s-audit
//!
//! Audit trail and alerting for mutable configuration entries.
//!
//! ## Overview
//!
//! `a3s-audit` records who changed what, when, and from which value, in an
//! append-only log. The log answers history and statistics queries,
//! reconstructs any entry's value as of a past instant, and is pruned by
//! age. Changes that are also operational incidents are fanned out to
//! notification channels by severity, with a per-channel timeout and an
//! overall deadline.
//!
//! ## Quick Start
//!
//! ```rust
//! use a3s_audit::{Actor, AuditAction, AuditConfig, AuditFacade, ChannelRegistry, RecordOptions};
//! use a3s_audit::provider::memory::MemoryAuditStore;
//!
//! # async fn example() -> a3s_audit::Result<()> {
//! let audit = AuditFacade::open(
//!     MemoryAuditStore::default(),
//!     ChannelRegistry::new(),
//!     AuditConfig::default(),
//! )
//! .await?;
//!
//! let alice = Actor::new("u-alice", "Alice");
//! let record = audit
//!     .record_change(
//!         &alice,
//!         "max_tasks",
//!         AuditAction::Update,
//!         Some(&serde_json::json!(5)),
//!         Some(&serde_json::json!(10)),
//!         RecordOptions::default(),
//!     )
//!     .await?;
//!
//! println!("Recorded: {}", record.id);
//! # Ok(())
//! # }
//! ```
//!
//! ## Providers
//!
//! - **memory**: In-memory store for testing and single-process use
//! - **file**: JSON-lines file, durable across restarts
//!
//! ## Architecture
//!
//! - **AuditStore** trait: storage abstraction all backends implement
//! - **AuditLog**: id assignment, filtered queries, aggregation
//! - **RecordPipeline**: normalize, validate, classify before append
//! - **StateReconstructor**: point-in-time values by replaying diffs
//! - **RetentionManager**: age-based purge, optionally scheduled
//! - **ChannelDispatcher**: bounded, isolated fan-out of alerts
//! - **AuditFacade**: the single entry point wiring all of the above

pub mod alert;
pub mod config;
pub mod diff;
pub mod error;
pub mod facade;
pub mod log;
pub mod pipeline;
pub mod provider;
pub mod reconstruct;
pub mod report;
pub mod retention;
pub mod types;

// Re-export core types
pub use alert::{
    AlertRouter, Channel, ChannelDispatcher, ChannelError, ChannelRegistry, ChannelResult,
    DeliveryFailureSink, FailedDelivery, MemoryFailureSink, NotificationChannel,
    NotificationEnvelope, RoutingPolicy, Severity,
};
pub use config::{AuditConfig, DispatchConfig, RetentionConfig};
pub use error::{AuditError, Result};
pub use facade::{AuditFacade, BulkChange, Incident, RecordOptions};
pub use log::AuditLog;
pub use pipeline::{RecordPipeline, StageContext};
pub use provider::{AuditStore, StoreInfo};
pub use reconstruct::{Reconstruction, ReconstructionGap, StateReconstructor};
pub use report::{Disclosure, ExportFormat, UnredactCapability};
pub use retention::{RetentionManager, RetentionTask};
pub use types::{
    Actor, AuditAction, AuditStatistics, EventRecord, FieldChange, Pagination, RankedCount,
    RecordFilter, SortOrder,
};

// Re-export providers for convenience
pub use provider::file::FileAuditStore;
pub use provider::memory::MemoryAuditStore;
