//! In-memory stores with fault injection.
//!
//! Faults are armed per store and consumed one operation at a time:
//! - failed reads and writes (nothing happens, an error is returned)
//! - lost acknowledgements (the write is applied, then an error is returned)

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use tracing::{debug, instrument};

use super::{EventStore, PrimaryStore};
use crate::error::{Result, SnaplogError};
use crate::events::{ETag, EntityKey};
use crate::protocol::metadata::{SnapshotMetadata, StorageRecord};

// ═══════════════════════════════════════════════════════════════════════════════
// Fault Injection
// ═══════════════════════════════════════════════════════════════════════════════

/// Counters of pending injected faults.
#[derive(Debug, Default)]
pub struct FaultInjector {
    failing_reads: AtomicU32,
    failing_writes: AtomicU32,
    lost_acks: AtomicU32,
}

impl FaultInjector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` reads.
    pub fn fail_next_reads(&self, n: u32) {
        self.failing_reads.fetch_add(n, Ordering::SeqCst);
    }

    /// Fail the next `n` writes without applying them.
    pub fn fail_next_writes(&self, n: u32) {
        self.failing_writes.fetch_add(n, Ordering::SeqCst);
    }

    /// Apply the next `n` writes but report them as failed.
    pub fn drop_next_write_acks(&self, n: u32) {
        self.lost_acks.fetch_add(n, Ordering::SeqCst);
    }

    /// Disarm all pending faults.
    pub fn clear(&self) {
        self.failing_reads.store(0, Ordering::SeqCst);
        self.failing_writes.store(0, Ordering::SeqCst);
        self.lost_acks.store(0, Ordering::SeqCst);
    }

    fn consume(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn read_fault(&self, store: &'static str) -> Result<()> {
        if Self::consume(&self.failing_reads) {
            debug!(store, "Injected read failure");
            return Err(SnaplogError::unavailable(format!(
                "{}: injected read failure",
                store
            )));
        }
        Ok(())
    }

    fn write_fault(&self, store: &'static str) -> Result<()> {
        if Self::consume(&self.failing_writes) {
            debug!(store, "Injected write failure");
            return Err(SnaplogError::unavailable(format!(
                "{}: injected write failure",
                store
            )));
        }
        Ok(())
    }

    fn ack_lost(&self) -> bool {
        Self::consume(&self.lost_acks)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// In-Memory Primary Store
// ═══════════════════════════════════════════════════════════════════════════════

/// Primary store keeping records in a concurrent map.
pub struct InMemoryPrimaryStore<V, E> {
    records: DashMap<EntityKey, StorageRecord<V, E>>,
    faults: FaultInjector,
    commits: AtomicU64,
}

impl<V, E> Default for InMemoryPrimaryStore<V, E> {
    fn default() -> Self {
        Self {
            records: DashMap::new(),
            faults: FaultInjector::new(),
            commits: AtomicU64::new(0),
        }
    }
}

impl<V: Clone, E: Clone> InMemoryPrimaryStore<V, E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn faults(&self) -> &FaultInjector {
        &self.faults
    }

    /// Current record of `key`, bypassing fault injection.
    pub fn record(&self, key: &EntityKey) -> Option<StorageRecord<V, E>> {
        self.records.get(key).map(|r| r.value().clone())
    }

    /// Number of successful commits across all entities.
    pub fn commits(&self) -> u64 {
        self.commits.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl<V, E> PrimaryStore<V, E> for InMemoryPrimaryStore<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    #[instrument(skip(self), fields(store = "memory"))]
    async fn read_state(&self, key: &EntityKey) -> Result<Option<StorageRecord<V, E>>> {
        self.faults.read_fault(self.name())?;
        Ok(self.record(key))
    }

    #[instrument(skip(self, metadata), fields(store = "memory", global_version = metadata.global_version))]
    async fn write_state(
        &self,
        key: &EntityKey,
        metadata: &SnapshotMetadata<V, E>,
        expected: Option<&ETag>,
    ) -> Result<ETag> {
        self.faults.write_fault(self.name())?;

        let etag = ETag::generate();
        let record = StorageRecord {
            metadata: metadata.clone(),
            etag: etag.clone(),
        };

        match self.records.entry(key.clone()) {
            Entry::Occupied(mut current) => {
                if expected != Some(&current.get().etag) {
                    return Err(SnaplogError::conflict(format!(
                        "{}: tag mismatch (expected {:?}, found {})",
                        key,
                        expected.map(|t| t.0.as_str()),
                        current.get().etag
                    )));
                }
                current.insert(record);
            }
            Entry::Vacant(slot) => {
                if let Some(tag) = expected {
                    return Err(SnaplogError::conflict(format!(
                        "{}: expected tag {} but no record exists",
                        key, tag
                    )));
                }
                slot.insert(record);
            }
        }
        self.commits.fetch_add(1, Ordering::Relaxed);

        if self.faults.ack_lost() {
            debug!(entity = %key, "Injected lost acknowledgement");
            return Err(SnaplogError::unavailable(format!(
                "{}: acknowledgement lost",
                key
            )));
        }
        Ok(etag)
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// In-Memory Event Store
// ═══════════════════════════════════════════════════════════════════════════════

/// Event store keeping one vector of entries per entity.
pub struct InMemoryEventStore<E> {
    streams: DashMap<EntityKey, Vec<E>>,
    faults: FaultInjector,
}

impl<E> Default for InMemoryEventStore<E> {
    fn default() -> Self {
        Self {
            streams: DashMap::new(),
            faults: FaultInjector::new(),
        }
    }
}

impl<E: Clone> InMemoryEventStore<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn faults(&self) -> &FaultInjector {
        &self.faults
    }

    /// Full stream of `key`, bypassing fault injection.
    pub fn stream(&self, key: &EntityKey) -> Vec<E> {
        self.streams
            .get(key)
            .map(|s| s.value().clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl<E> EventStore<E> for InMemoryEventStore<E>
where
    E: Clone + Send + Sync + 'static,
{
    #[instrument(skip(self, entries), fields(store = "memory", count = entries.len()))]
    async fn save_events(
        &self,
        key: &EntityKey,
        entries: &[E],
        expected_version: u64,
    ) -> Result<()> {
        self.faults.write_fault(self.name())?;

        let mut stream = self.streams.entry(key.clone()).or_default();
        let actual = stream.len() as u64;
        if actual != expected_version {
            return Err(SnaplogError::event_version_conflict(expected_version, actual));
        }
        stream.extend_from_slice(entries);
        Ok(())
    }

    #[instrument(skip(self), fields(store = "memory"))]
    async fn read_events(&self, key: &EntityKey, start: u64, count: u64) -> Result<Vec<E>> {
        self.faults.read_fault(self.name())?;

        let Some(stream) = self.streams.get(key) else {
            return Ok(Vec::new());
        };
        let len = stream.len() as u64;
        let from = start.min(len) as usize;
        let to = start.saturating_add(count).min(len) as usize;
        Ok(stream[from..to].to_vec())
    }

    async fn events_count(&self, key: &EntityKey) -> Result<u64> {
        self.faults.read_fault(self.name())?;
        Ok(self.streams.get(key).map_or(0, |s| s.len() as u64))
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
