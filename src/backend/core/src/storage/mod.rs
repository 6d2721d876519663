//! Store contracts consumed by the protocol, with in-memory and file-backed
//! implementations.
//!
//! - **PrimaryStore**: one record per entity, replaced atomically under an
//!   optimistic-concurrency tag
//! - **EventStore**: append-only, versioned log per entity

pub mod file;
pub mod memory;

pub use file::{FileEventStore, FilePrimaryStore};
pub use memory::{FaultInjector, InMemoryEventStore, InMemoryPrimaryStore};

use async_trait::async_trait;

use crate::error::Result;
use crate::events::{ETag, EntityKey};
use crate::protocol::metadata::{SnapshotMetadata, StorageRecord};

// ═══════════════════════════════════════════════════════════════════════════════
// Primary Store
// ═══════════════════════════════════════════════════════════════════════════════

/// Durable home of the snapshot metadata record.
#[async_trait]
pub trait PrimaryStore<V, E>: Send + Sync {
    /// Load the record of `key`, or `None` if nothing was ever written.
    async fn read_state(&self, key: &EntityKey) -> Result<Option<StorageRecord<V, E>>>;

    /// Replace the record of `key` if its current tag equals `expected`.
    ///
    /// `expected == None` only succeeds when no record exists yet. Either the
    /// whole record is replaced and a fresh tag returned, or nothing changes
    /// and a `ConcurrencyConflict` error is returned.
    async fn write_state(
        &self,
        key: &EntityKey,
        metadata: &SnapshotMetadata<V, E>,
        expected: Option<&ETag>,
    ) -> Result<ETag>;

    /// Get the store name.
    fn name(&self) -> &'static str;
}

// ═══════════════════════════════════════════════════════════════════════════════
// Event Store
// ═══════════════════════════════════════════════════════════════════════════════

/// Append-only entry log, independent of the metadata record.
#[async_trait]
pub trait EventStore<E>: Send + Sync {
    /// Append `entries` at `expected_version`. Fails with
    /// `EventVersionConflict`, appending nothing, if the log holds a different
    /// number of entries.
    async fn save_events(&self, key: &EntityKey, entries: &[E], expected_version: u64)
        -> Result<()>;

    /// Up to `count` entries starting at `start`, in version order. Shorter
    /// only at the end of the log; empty for unknown streams.
    async fn read_events(&self, key: &EntityKey, start: u64, count: u64) -> Result<Vec<E>>;

    /// Total number of durable entries.
    async fn events_count(&self, key: &EntityKey) -> Result<u64>;

    /// Get the store name.
    fn name(&self) -> &'static str;
}
