//! Update notifications exchanged between replicas of one entity.
//!
//! This module provides:
//! - [`Notification`]: either a full update carrying entries, or a bare version
//!   marker telling receivers the log moved past what they hold
//! - [`merge`]: coalescing of queued notifications with a bounded payload
//! - [`NotificationBuffer`]: version-ordered inbound buffer
//! - [`NotificationOutbox`]: outbound queue that merges while the transport is down

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::events::{ETag, ReplicaId};

/// Merged notifications never carry this many entries or more.
pub const MAX_ENTRIES_IN_NOTIFICATIONS: usize = 200;

// =============================================================================
// Notifications
// =============================================================================

/// Entries `[from_version, to_version)` committed by `origin` under `etag`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateNotification<E> {
    pub origin: ReplicaId,
    pub from_version: u64,
    pub to_version: u64,
    pub entries: Vec<E>,
    pub etag: ETag,
}

impl<E> UpdateNotification<E> {
    pub fn new(origin: ReplicaId, from_version: u64, entries: Vec<E>, etag: ETag) -> Self {
        Self {
            origin,
            from_version,
            to_version: from_version + entries.len() as u64,
            entries,
            etag,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification<E> {
    Update(UpdateNotification<E>),
    /// The log of `origin`'s entity reached `version`; payload was dropped.
    Version { origin: ReplicaId, version: u64 },
}

impl<E> Notification<E> {
    pub fn origin(&self) -> &ReplicaId {
        match self {
            Self::Update(n) => &n.origin,
            Self::Version { origin, .. } => origin,
        }
    }

    /// Global version the sender reached.
    pub fn version(&self) -> u64 {
        match self {
            Self::Update(n) => n.to_version,
            Self::Version { version, .. } => *version,
        }
    }

    pub fn is_marker(&self) -> bool {
        matches!(self, Self::Version { .. })
    }
}

/// Coalesce two queued notifications, `earlier` sent before `later`.
///
/// Contiguous updates from the same origin become one update while the
/// combined payload stays under [`MAX_ENTRIES_IN_NOTIFICATIONS`]. Anything
/// else collapses to a version marker.
pub fn merge<E>(earlier: Notification<E>, later: Notification<E>) -> Notification<E> {
    match (earlier, later) {
        (Notification::Update(mut first), Notification::Update(second))
            if first.origin == second.origin
                && first.to_version == second.from_version
                && first.len() + second.len() < MAX_ENTRIES_IN_NOTIFICATIONS =>
        {
            first.entries.extend(second.entries);
            first.to_version = second.to_version;
            first.etag = second.etag;
            Notification::Update(first)
        }
        (earlier, later) => Notification::Version {
            version: earlier.version().max(later.version()),
            origin: later.origin().clone(),
        },
    }
}

// =============================================================================
// Inbound Buffer
// =============================================================================

/// Inbound notifications waiting for the local log to reach their start.
#[derive(Debug)]
pub struct NotificationBuffer<E> {
    pending: BTreeMap<u64, UpdateNotification<E>>,
    /// Highest version announced by a marker or a discarded update.
    announced: u64,
}

impl<E> Default for NotificationBuffer<E> {
    fn default() -> Self {
        Self {
            pending: BTreeMap::new(),
            announced: 0,
        }
    }
}

impl<E> NotificationBuffer<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer a notification. Markers only raise the announced version.
    pub fn insert(&mut self, notification: Notification<E>) {
        match notification {
            Notification::Update(update) => {
                self.pending.insert(update.from_version, update);
            }
            Notification::Version { version, .. } => {
                self.announced = self.announced.max(version);
            }
        }
    }

    /// Drop updates starting below `version`; returns how many were dropped.
    ///
    /// An update reaching past `version` cannot be applied partially, so its
    /// end is remembered as announced.
    pub fn discard_below(&mut self, version: u64) -> usize {
        let keep = self.pending.split_off(&version);
        let stale = std::mem::replace(&mut self.pending, keep);
        for update in stale.values() {
            self.announced = self.announced.max(update.to_version);
        }
        stale.len()
    }

    /// Remove the update starting exactly at `version`, if buffered.
    pub fn take_at(&mut self, version: u64) -> Option<UpdateNotification<E>> {
        self.pending.remove(&version)
    }

    /// Whether the log is known to have moved past `version` without the
    /// entries being available here.
    pub fn is_ahead_of(&self, version: u64) -> bool {
        self.announced > version
    }

    /// Lowest start version among buffered updates.
    pub fn first_pending(&self) -> Option<u64> {
        self.pending.keys().next().copied()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

// =============================================================================
// Outbound Queue
// =============================================================================

/// Notifications not yet handed to the transport, merged into one.
#[derive(Debug)]
pub struct NotificationOutbox<E> {
    queued: Option<Notification<E>>,
}

impl<E> Default for NotificationOutbox<E> {
    fn default() -> Self {
        Self { queued: None }
    }
}

impl<E> NotificationOutbox<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a notification after whatever is already queued.
    pub fn enqueue(&mut self, notification: Notification<E>) {
        self.queued = Some(match self.queued.take() {
            None => notification,
            Some(queued) => merge(queued, notification),
        });
    }

    /// Put back a notification the transport failed to send. It precedes
    /// anything enqueued since it was taken.
    pub fn requeue(&mut self, notification: Notification<E>) {
        self.queued = Some(match self.queued.take() {
            None => notification,
            Some(later) => merge(notification, later),
        });
    }

    pub fn take(&mut self) -> Option<Notification<E>> {
        self.queued.take()
    }

    pub fn is_empty(&self) -> bool {
        self.queued.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(origin: &str, from: u64, n: usize) -> Notification<u64> {
        Notification::Update(UpdateNotification::new(
            ReplicaId::from(origin),
            from,
            (from..from + n as u64).collect(),
            ETag::generate(),
        ))
    }

    #[test]
    fn test_merge_contiguous_same_origin() {
        let merged = merge(update("a", 0, 5), update("a", 5, 7));
        match merged {
            Notification::Update(n) => {
                assert_eq!((n.from_version, n.to_version), (0, 12));
                assert_eq!(n.entries, (0..12).collect::<Vec<_>>());
            }
            other => panic!("expected update, got {:?}", other),
        }
    }

    #[test]
    fn test_merge_over_ceiling_keeps_marker() {
        let merged = merge(update("a", 0, 150), update("a", 150, 60));
        assert_eq!(
            merged,
            Notification::Version {
                origin: ReplicaId::from("a"),
                version: 210
            }
        );
    }

    #[test]
    fn test_merge_at_ceiling_keeps_marker() {
        let merged = merge(update("a", 0, 100), update("a", 100, 100));
        assert!(merged.is_marker());
        assert_eq!(merged.version(), 200);
    }

    #[test]
    fn test_merge_rejects_gaps_and_foreign_origins() {
        assert!(merge(update("a", 0, 2), update("a", 3, 2)).is_marker());
        assert!(merge(update("a", 0, 2), update("b", 2, 2)).is_marker());
    }

    #[test]
    fn test_buffer_orders_and_discards() {
        let mut buffer = NotificationBuffer::new();
        buffer.insert(update("a", 4, 2));
        buffer.insert(update("a", 0, 2));
        buffer.insert(update("b", 2, 2));

        assert_eq!(buffer.first_pending(), Some(0));
        assert!(!buffer.is_ahead_of(0));
        assert_eq!(buffer.discard_below(2), 1);
        assert!(buffer.take_at(3).is_none());
        assert_eq!(buffer.take_at(2).map(|n| n.to_version), Some(4));
        assert_eq!(buffer.len(), 1);
        assert!(!buffer.is_ahead_of(4));
    }

    #[test]
    fn test_discarding_overlap_announces_its_end() {
        let mut buffer = NotificationBuffer::new();
        buffer.insert(update("a", 0, 12));
        assert_eq!(buffer.discard_below(5), 1);
        assert!(buffer.is_ahead_of(5));
        assert!(!buffer.is_ahead_of(12));
    }

    #[test]
    fn test_marker_only_raises_announced_version() {
        let mut buffer = NotificationBuffer::<u64>::new();
        buffer.insert(Notification::Version {
            origin: ReplicaId::from("a"),
            version: 9,
        });
        assert!(buffer.is_empty());
        assert!(buffer.is_ahead_of(8));
    }

    #[test]
    fn test_outbox_merges_while_queued() {
        let mut outbox = NotificationOutbox::new();
        outbox.enqueue(update("a", 0, 1));
        outbox.enqueue(update("a", 1, 2));

        let sent = outbox.take().unwrap();
        assert_eq!(sent.version(), 3);
        assert!(!sent.is_marker());

        outbox.enqueue(update("a", 3, 1));
        outbox.requeue(sent);
        match outbox.take().unwrap() {
            Notification::Update(n) => assert_eq!((n.from_version, n.to_version), (0, 4)),
            other => panic!("expected update, got {:?}", other),
        }
        assert!(outbox.is_empty());

        outbox.enqueue(update("a", 9, 1));
        outbox.requeue(update("a", 4, 1));
        assert!(outbox.take().unwrap().is_marker());
    }
}
