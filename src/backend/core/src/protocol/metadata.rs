//! Durable record layout shared by every replica of an entity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::write_vector::WriteVector;
use crate::error::{ErrorCode, Result, SnaplogError};
use crate::events::ETag;

/// Snapshot plus cached log tail, as stored in the primary store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMetadata<V, E> {
    /// Number of entries folded into `snapshot`.
    pub snapshot_version: u64,
    /// Number of entries in the canonical log.
    pub global_version: u64,
    /// Entries `[global_version - log.len(), global_version)`. Only populated
    /// when entries are kept inline.
    pub log: Vec<E>,
    pub snapshot: V,
    pub snapshot_updated_time: Option<DateTime<Utc>>,
    pub write_vector: WriteVector,
}

impl<V: Default, E> Default for SnapshotMetadata<V, E> {
    fn default() -> Self {
        Self {
            snapshot_version: 0,
            global_version: 0,
            log: Vec::new(),
            snapshot: V::default(),
            snapshot_updated_time: None,
            write_vector: WriteVector::new(),
        }
    }
}

impl<V, E> SnapshotMetadata<V, E> {
    /// First version served by the inline log cache.
    pub fn cache_start(&self) -> u64 {
        self.global_version
            .saturating_sub(self.log.len() as u64)
    }

    /// Inputs for the snapshot strategy, given the confirmed version the
    /// caller will have once the current batch lands.
    pub fn strategy_info(&self, current_confirmed_version: u64) -> SnapshotStrategyInfo {
        SnapshotStrategyInfo {
            current_confirmed_version,
            snapshot_version: self.snapshot_version,
            snapshot_updated_time: self.snapshot_updated_time,
        }
    }

    /// Reject records whose versions cannot describe a real log.
    pub fn validate(&self, inline_log: bool) -> Result<()> {
        if self.snapshot_version > self.global_version {
            return Err(SnaplogError::new(
                ErrorCode::RecordCorrupted,
                format!(
                    "snapshot version {} is ahead of global version {}",
                    self.snapshot_version, self.global_version
                ),
            ));
        }
        if (self.log.len() as u64) > self.global_version {
            return Err(SnaplogError::new(
                ErrorCode::RecordCorrupted,
                format!(
                    "{} cached entries exceed global version {}",
                    self.log.len(),
                    self.global_version
                ),
            ));
        }
        if inline_log && self.snapshot_version + self.log.len() as u64 != self.global_version {
            return Err(SnaplogError::new(
                ErrorCode::RecordCorrupted,
                format!(
                    "inline log of {} entries does not bridge snapshot {} to global {}",
                    self.log.len(),
                    self.snapshot_version,
                    self.global_version
                ),
            ));
        }
        Ok(())
    }
}

/// Metadata together with the tag under which it was committed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageRecord<V, E> {
    pub metadata: SnapshotMetadata<V, E>,
    pub etag: ETag,
}

/// Read-only input to a snapshot strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotStrategyInfo {
    pub current_confirmed_version: u64,
    pub snapshot_version: u64,
    pub snapshot_updated_time: Option<DateTime<Utc>>,
}

impl SnapshotStrategyInfo {
    /// Entries confirmed since the last snapshot.
    pub fn entries_since_snapshot(&self) -> u64 {
        self.current_confirmed_version
            .saturating_sub(self.snapshot_version)
    }
}
