#![allow(clippy::result_large_err)]
//! # Snaplog Core
//!
//! Primary-based, snapshot-accelerated log consistency for replicated,
//! event-sourced entities.
//!
//! ## Architecture
//!
//! - **Protocol**: the per-replica log-view adaptor (read, write, log segments,
//!   notifications), write vectors, snapshot strategies and retry policies
//! - **Storage**: primary record store and independent event store contracts,
//!   with in-memory and file-backed implementations
//! - **Events**: entity keys, replica ids, the aggregate trait and a sample
//!   Person entity
//! - **Replica**: host-side wrapper with pending events and a notification pump
//! - **Bus**: notification transport between replicas of one entity
//! - **Telemetry**: logging setup and metric names

pub mod bus;
pub mod config;
pub mod error;
pub mod events;
pub mod protocol;
pub mod replica;
pub mod storage;
pub mod telemetry;

pub use error::{ErrorCode, ErrorContext, ErrorSeverity, Result, SnaplogError};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::bus::{InProcessBus, NotificationTransport};
    pub use crate::config::{Config, ProtocolConfig, SnapshotConfig};
    pub use crate::error::{ErrorCode, ErrorContext, ErrorSeverity, Result, SnaplogError};
    pub use crate::events::{
        apply_fn, Aggregate, ApplyError, ApplyFn, ETag, EntityKey, EventRegistry, LogEntry,
        PersonEvent, PersonState, ReplicaId, TypedEvent,
    };
    pub use crate::protocol::{
        AnyOf, BackoffStrategy, LogConsistencyProvider, LogViewAdaptor, MaxAgeStrategy,
        NeverSnapshot, Notification, ProcessOutcome, RetryPolicy, SnapshotMetadata,
        SnapshotStrategy, SnapshotStrategyInfo, StorageRecord, ThresholdStrategy,
        UpdateNotification, WriteVector,
    };
    pub use crate::replica::Replica;
    pub use crate::storage::{
        EventStore, FileEventStore, FilePrimaryStore, InMemoryEventStore, InMemoryPrimaryStore,
        PrimaryStore,
    };
    pub use crate::telemetry::{init_logging, LogFormat, LoggingConfig};
}
