//! Per-replica write bits.
//!
//! A replica flips its own bit in the record before committing. If the commit
//! reports failure, re-reading the record and comparing the bit tells whether
//! the write landed anyway.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::events::ReplicaId;

/// Mapping from replica id to bit. Only set bits are stored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WriteVector {
    bits: BTreeMap<ReplicaId, bool>,
}

impl WriteVector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current bit of `replica`. Unknown replicas read as `false`.
    pub fn get(&self, replica: &ReplicaId) -> bool {
        self.bits.get(replica).copied().unwrap_or(false)
    }

    /// Toggle the bit of `replica` and return the new value.
    pub fn flip(&mut self, replica: &ReplicaId) -> bool {
        let next = !self.get(replica);
        self.set(replica, next);
        next
    }

    pub fn set(&mut self, replica: &ReplicaId, value: bool) {
        if value {
            self.bits.insert(replica.clone(), true);
        } else {
            self.bits.remove(replica);
        }
    }

    /// Replicas whose bit is set, in order.
    pub fn set_replicas(&self) -> impl Iterator<Item = &ReplicaId> {
        self.bits.keys()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    /// Compact form: comma-separated ids of the replicas whose bit is set.
    pub fn encode(&self) -> String {
        self.bits
            .keys()
            .map(ReplicaId::as_str)
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Inverse of [`encode`](Self::encode). Empty segments are ignored.
    pub fn decode(encoded: &str) -> Self {
        let bits = encoded
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| (ReplicaId::new(s), true))
            .collect();
        Self { bits }
    }
}
