//! Primary-based, snapshot-accelerated log consistency.
//!
//! - **`write_vector`**: per-replica write bits
//! - **`metadata`**: the durable record (snapshot, cached log tail, versions)
//! - **`strategy`**: when to fold the log into a snapshot
//! - **`retry`**: backoff, retry state machine, storage issue tracking
//! - **`notification`**: update broadcasts, merging, inbound buffering
//! - **`adaptor`**: the per-replica protocol core
//! - **`provider`**: builds adaptors from configuration and stores

pub mod adaptor;
pub mod metadata;
pub mod notification;
pub mod provider;
pub mod retry;
pub mod strategy;
pub mod write_vector;

pub use adaptor::{AdaptorParts, LogViewAdaptor, ProcessOutcome};
pub use metadata::{SnapshotMetadata, SnapshotStrategyInfo, StorageRecord};
pub use notification::{
    merge, Notification, NotificationBuffer, NotificationOutbox, UpdateNotification,
    MAX_ENTRIES_IN_NOTIFICATIONS,
};
pub use provider::LogConsistencyProvider;
pub use retry::{
    BackoffStrategy, IssueKind, IssueTracker, PrimaryIssue, RetryLoop, RetryPolicy, RetryState,
};
pub use strategy::{AnyOf, MaxAgeStrategy, NeverSnapshot, SnapshotStrategy, ThresholdStrategy};
pub use write_vector::WriteVector;
