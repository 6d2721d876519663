//! The log-view adaptor: one replica's view of a replicated entity.
//!
//! The adaptor keeps a confirmed view derived from durably committed entries,
//! plus a cached copy of the primary record. It runs the protocol's three
//! state machines:
//!
//! - **read**: load the record, jump to its snapshot if ahead, replay the
//!   missing log segment; retried through storage failures
//! - **write**: persist a batch, maybe fold a snapshot, commit under the
//!   cached concurrency tag; on failure re-read and use the write vector to
//!   decide whether the batch landed anyway. With an event store, a batch
//!   whose entries are durable is rolled forward until a record covers it,
//!   and a tail left behind by another writer is adopted
//! - **notifications**: buffer inbound updates by start version and apply
//!   them once the local log reaches them
//!
//! A rejected entry ([`ApplyError`](crate::events::ApplyError)) is logged and
//! counted, and still advances the confirmed version. Confirmation never
//! blocks on a faulty view transition.
//!
//! The host must not run two operations on one adaptor concurrently; every
//! operation takes `&mut self`.

use chrono::Utc;
use metrics::{counter, gauge};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use super::metadata::SnapshotMetadata;
use super::notification::{Notification, NotificationBuffer, NotificationOutbox, UpdateNotification};
use super::retry::{IssueKind, IssueTracker, PrimaryIssue, RetryLoop, RetryPolicy};
use super::strategy::SnapshotStrategy;
use crate::error::{Result, SnaplogError};
use crate::events::{replay, ApplyFn, ETag, EntityKey, LogEntry, ReplicaId};
use crate::storage::{EventStore, PrimaryStore};
use crate::telemetry::metrics as m;

/// Result of one [`LogViewAdaptor::process_notifications`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessOutcome {
    /// Notifications applied to the confirmed view.
    pub applied: usize,
    /// Entries those notifications carried.
    pub entries: usize,
    /// Stale notifications dropped.
    pub discarded: usize,
    /// Notifications still waiting for a gap to close.
    pub pending: usize,
    /// The log is known to be ahead; the host should `read`.
    pub needs_refresh: bool,
}

/// Collaborators an adaptor is built from.
pub struct AdaptorParts<V, E> {
    pub key: EntityKey,
    pub replica: ReplicaId,
    pub apply: ApplyFn<V, E>,
    pub primary: Arc<dyn PrimaryStore<V, E>>,
    /// Present only when entries live in the independent event store.
    pub events: Option<Arc<dyn EventStore<E>>>,
    pub strategy: Arc<dyn SnapshotStrategy>,
    pub retry: RetryPolicy,
    pub cancel: CancellationToken,
}

pub struct LogViewAdaptor<V, E> {
    key: EntityKey,
    replica: ReplicaId,
    apply: ApplyFn<V, E>,
    primary: Arc<dyn PrimaryStore<V, E>>,
    events: Option<Arc<dyn EventStore<E>>>,
    strategy: Arc<dyn SnapshotStrategy>,
    retry: RetryPolicy,
    cancel: CancellationToken,

    confirmed_view: V,
    confirmed_version: u64,
    /// Last fetched or committed record.
    record: SnapshotMetadata<V, E>,
    /// `None` until a record exists in the primary store.
    etag: Option<ETag>,
    /// Set once a read has completed.
    loaded: bool,

    inbound: NotificationBuffer<E>,
    outbound: NotificationOutbox<E>,
    issues: IssueTracker,
    apply_failures: u64,
}

impl<V, E> LogViewAdaptor<V, E>
where
    V: Default + Clone + Send + Sync + 'static,
    E: LogEntry,
{
    pub fn new(parts: AdaptorParts<V, E>) -> Self {
        Self {
            key: parts.key,
            replica: parts.replica,
            apply: parts.apply,
            primary: parts.primary,
            events: parts.events,
            strategy: parts.strategy,
            retry: parts.retry,
            cancel: parts.cancel,
            confirmed_view: V::default(),
            confirmed_version: 0,
            record: SnapshotMetadata::default(),
            etag: None,
            loaded: false,
            inbound: NotificationBuffer::new(),
            outbound: NotificationOutbox::new(),
            issues: IssueTracker::new(),
            apply_failures: 0,
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    pub fn entity_key(&self) -> &EntityKey {
        &self.key
    }

    pub fn replica_id(&self) -> &ReplicaId {
        &self.replica
    }

    pub fn confirmed_view(&self) -> &V {
        &self.confirmed_view
    }

    pub fn confirmed_version(&self) -> u64 {
        self.confirmed_version
    }

    /// Cached copy of the primary record.
    pub fn metadata(&self) -> &SnapshotMetadata<V, E> {
        &self.record
    }

    pub fn etag(&self) -> Option<&ETag> {
        self.etag.as_ref()
    }

    pub fn uses_event_store(&self) -> bool {
        self.events.is_some()
    }

    /// Storage failure currently blocking progress, if any.
    pub fn current_issue(&self) -> Option<&PrimaryIssue> {
        self.issues.current()
    }

    /// Entries the view rejected since activation.
    pub fn apply_failures(&self) -> u64 {
        self.apply_failures
    }

    pub fn pending_notifications(&self) -> usize {
        self.inbound.len()
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Next notification to broadcast to sibling replicas.
    pub fn take_notification(&mut self) -> Option<Notification<E>> {
        self.outbound.take()
    }

    /// Return a notification the transport failed to deliver.
    pub fn requeue_notification(&mut self, notification: Notification<E>) {
        self.outbound.requeue(notification);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Read
    // ─────────────────────────────────────────────────────────────────────────

    /// Bring the confirmed view up to the latest durable state.
    ///
    /// Retries storage failures per the retry policy. Only cancellation or an
    /// exhausted bounded policy are returned as errors.
    #[instrument(skip(self), fields(entity = %self.key, replica = %self.replica))]
    pub async fn read(&mut self) -> Result<()> {
        self.refresh_until_success("read").await?;
        counter!(m::READS_TOTAL).increment(1);
        debug!(
            version = self.confirmed_version,
            global_version = self.record.global_version,
            "Read success"
        );
        Ok(())
    }

    async fn refresh_until_success(&mut self, operation: &'static str) -> Result<()> {
        let mut retry = RetryLoop::new(operation, self.retry.clone(), self.cancel.clone());
        loop {
            retry.begin_attempt()?;
            match self.refresh_once().await {
                Ok(()) => {
                    retry.succeed();
                    self.issues.resolve();
                    return Ok(());
                }
                Err((kind, error)) => {
                    self.issues.record(kind, &error);
                    retry.back_off().await?;
                }
            }
        }
    }

    /// One read attempt. Local state only changes once everything needed was
    /// fetched.
    async fn refresh_once(&mut self) -> std::result::Result<(), (IssueKind, SnaplogError)> {
        let stored = self
            .primary
            .read_state(&self.key)
            .await
            .map_err(|e| (IssueKind::ReadFromSnapshotStorageFailed, e))?;

        let (metadata, etag) = match stored {
            Some(record) => (record.metadata, Some(record.etag)),
            None => (SnapshotMetadata::default(), None),
        };
        metadata
            .validate(self.events.is_none())
            .map_err(|e| (IssueKind::ReadFromSnapshotStorageFailed, e))?;

        let jump = metadata.snapshot_version > self.confirmed_version;
        let start = if jump {
            metadata.snapshot_version
        } else {
            self.confirmed_version
        };
        let segment = self
            .segment_of(&metadata, start, metadata.global_version)
            .await
            .map_err(|e| (IssueKind::ReadFromEventStorageFailed, e))?;

        if jump {
            debug!(
                from = self.confirmed_version,
                to = metadata.snapshot_version,
                "Jumping to snapshot"
            );
            self.confirmed_view = metadata.snapshot.clone();
            self.confirmed_version = metadata.snapshot_version;
        }
        self.record = metadata;
        self.etag = etag;
        self.loaded = true;
        self.apply_entries(&segment);
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Log Segments
    // ─────────────────────────────────────────────────────────────────────────

    /// Entries `[from, to)` of the canonical log, as of the cached record.
    pub async fn retrieve_log_segment(&self, from: u64, to: u64) -> Result<Vec<E>> {
        self.segment_of(&self.record, from, to).await
    }

    async fn segment_of(
        &self,
        metadata: &SnapshotMetadata<V, E>,
        from: u64,
        to: u64,
    ) -> Result<Vec<E>> {
        if from >= to {
            return Ok(Vec::new());
        }
        if to > metadata.global_version {
            return Err(SnaplogError::segment_unavailable(
                from,
                to,
                format_args!("log ends at {}", metadata.global_version),
            ));
        }

        let cache_start = metadata.cache_start();
        let mut segment = Vec::with_capacity((to - from) as usize);

        if from < cache_start {
            let store_to = to.min(cache_start);
            let events = self.events.as_ref().ok_or_else(|| {
                SnaplogError::segment_unavailable(
                    from,
                    to,
                    format_args!("entries below {} were folded into the snapshot", cache_start),
                )
            })?;
            let wanted = store_to - from;
            let fetched = events.read_events(&self.key, from, wanted).await?;
            if fetched.len() as u64 != wanted {
                return Err(SnaplogError::unavailable(format!(
                    "event store returned {} of {} entries starting at {}",
                    fetched.len(),
                    wanted,
                    from
                )));
            }
            segment.extend(fetched);
        }

        if to > cache_start {
            let lo = (from.max(cache_start) - cache_start) as usize;
            let hi = (to - cache_start) as usize;
            segment.extend_from_slice(&metadata.log[lo..hi]);
        }

        Ok(segment)
    }

    fn apply_entries(&mut self, entries: &[E]) {
        for entry in entries {
            if let Err(error) = (self.apply)(&mut self.confirmed_view, entry) {
                self.apply_failures += 1;
                counter!(m::APPLY_FAILURES_TOTAL).increment(1);
                warn!(
                    entity = %self.key,
                    version = self.confirmed_version,
                    error = %error,
                    "View rejected entry; version still advances"
                );
            }
            self.confirmed_version += 1;
        }
        gauge!(m::CONFIRMED_VERSION).set(self.confirmed_version as f64);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Write
    // ─────────────────────────────────────────────────────────────────────────

    /// Commit `batch` as the next entries of the log.
    ///
    /// Returns `batch.len()` when the batch was committed (directly, confirmed
    /// through the write vector after an ambiguous failure, or rolled forward
    /// from the event store) and `0` when it did not land. A failed batch is
    /// not resubmitted.
    #[instrument(skip(self, batch), fields(entity = %self.key, replica = %self.replica, batch = batch.len()))]
    pub async fn write(&mut self, batch: Vec<E>) -> Result<usize> {
        if batch.is_empty() {
            return Ok(0);
        }
        if self.cancel.is_cancelled() {
            return Err(SnaplogError::cancelled("write"));
        }
        if !self.loaded {
            // The write bit must be flipped against the stored vector.
            debug!("Loading record before first write");
            self.refresh_until_success("write").await?;
        }

        let from_version = self.record.global_version;
        let (next, write_bit) = self.successor(&batch);

        let logs_saved = match &self.events {
            Some(events) => match events.save_events(&self.key, &batch, from_version).await {
                Ok(()) => true,
                Err(error) => {
                    self.issues.record(IssueKind::UpdateEventStorageFailed, &error);
                    false
                }
            },
            None => true,
        };

        if logs_saved && self.commit(next, &batch).await {
            return Ok(batch.len());
        }

        debug!(from_version, "Write apparently failed");
        self.reconcile(write_bit, logs_saved, from_version, batch).await
    }

    /// The cached record with `batch` appended, and this replica's new bit.
    fn successor(&self, batch: &[E]) -> (SnapshotMetadata<V, E>, bool) {
        let mut next = self.record.clone();
        let write_bit = next.write_vector.flip(&self.replica);
        if self.events.is_none() {
            next.log.extend(batch.iter().cloned());
        }
        next.global_version += batch.len() as u64;
        (next, write_bit)
    }

    /// Replace the stored record with `next` under the cached tag. On success
    /// the batch is confirmed and its notification queued.
    async fn commit(&mut self, mut next: SnapshotMetadata<V, E>, batch: &[E]) -> bool {
        let n = batch.len() as u64;
        let from_version = self.record.global_version;

        let mut folded = None;
        let info = next.strategy_info(self.confirmed_version + n);
        if self.strategy.should_snapshot(&info) {
            let mut view = self.confirmed_view.clone();
            let rejected = replay(&mut view, batch, &self.apply);
            next.snapshot = view.clone();
            next.snapshot_version = next.global_version;
            next.snapshot_updated_time = Some(Utc::now());
            next.log.clear();
            folded = Some((view, rejected));
        }

        match self
            .primary
            .write_state(&self.key, &next, self.etag.as_ref())
            .await
        {
            Ok(etag) => {
                self.record = next;
                self.etag = Some(etag.clone());
                self.issues.resolve();
                self.confirm_batch(batch, folded);

                counter!(m::WRITES_TOTAL, "outcome" => "committed").increment(1);
                counter!(m::ENTRIES_COMMITTED_TOTAL).increment(n);
                debug!(version = self.confirmed_version, "Write success");

                self.outbound.enqueue(Notification::Update(UpdateNotification::new(
                    self.replica.clone(),
                    from_version,
                    batch.to_vec(),
                    etag,
                )));
                true
            }
            Err(error) => {
                self.issues.record(IssueKind::UpdateSnapshotStorageFailed, &error);
                false
            }
        }
    }

    fn confirm_batch(&mut self, batch: &[E], folded: Option<(V, usize)>) {
        match folded {
            Some((view, rejected)) => {
                self.confirmed_view = view;
                self.confirmed_version += batch.len() as u64;
                if rejected > 0 {
                    self.apply_failures += rejected as u64;
                    counter!(m::APPLY_FAILURES_TOTAL).increment(rejected as u64);
                    warn!(entity = %self.key, rejected, "View rejected entries; version still advances");
                }
                counter!(m::SNAPSHOTS_TOTAL).increment(1);
                debug!(snapshot_version = self.confirmed_version, "Snapshot taken");
                gauge!(m::CONFIRMED_VERSION).set(self.confirmed_version as f64);
            }
            None => self.apply_entries(batch),
        }
    }

    /// Decide the fate of a batch whose commit reported failure.
    async fn reconcile(
        &mut self,
        write_bit: bool,
        logs_saved: bool,
        from_version: u64,
        batch: Vec<E>,
    ) -> Result<usize> {
        self.refresh_until_success("write").await?;

        let landed = match (self.events.is_some(), logs_saved) {
            (false, _) => self.record.write_vector.get(&self.replica) == write_bit,
            (true, false) => {
                self.adopt_orphaned_tail().await?;
                false
            }
            (true, true) => {
                if self.record.global_version == from_version {
                    return self.roll_forward(from_version, batch).await;
                }
                // The slot held this batch, so any newer record covers it.
                true
            }
        };

        if !landed {
            counter!(m::WRITES_TOTAL, "outcome" => "failed").increment(1);
            debug!(
                global_version = self.record.global_version,
                "Write did not land; batch returned to caller"
            );
            return Ok(0);
        }

        let count = batch.len();
        let n = count as u64;
        counter!(m::WRITES_TOTAL, "outcome" => "reconciled").increment(1);
        counter!(m::ENTRIES_COMMITTED_TOTAL).increment(n);
        debug!(
            version = self.confirmed_version,
            "Last write was actually a success"
        );

        // The current tag is the batch's own only if nothing landed after it.
        let notification = match &self.etag {
            Some(etag) if self.record.global_version == from_version + n => {
                Notification::Update(UpdateNotification::new(
                    self.replica.clone(),
                    from_version,
                    batch,
                    etag.clone(),
                ))
            }
            _ => Notification::Version {
                origin: self.replica.clone(),
                version: self.record.global_version,
            },
        };
        self.outbound.enqueue(notification);
        Ok(count)
    }

    /// Commit a batch whose entries are durable in the event store but whose
    /// record commit failed.
    ///
    /// Slot `[from_version, from_version + n)` of the event store holds this
    /// batch, so no other writer can advance the record past `from_version`
    /// except by committing these very entries.
    async fn roll_forward(&mut self, from_version: u64, batch: Vec<E>) -> Result<usize> {
        let n = batch.len() as u64;
        let mut retry = RetryLoop::new("write", self.retry.clone(), self.cancel.clone());
        loop {
            retry.begin_attempt()?;
            let global = self.record.global_version;
            if global != from_version {
                // Another replica adopted the durable slot.
                retry.succeed();
                debug!(global_version = global, "Durable batch committed by another replica");
                counter!(m::WRITES_TOTAL, "outcome" => "reconciled").increment(1);
                counter!(m::ENTRIES_COMMITTED_TOTAL).increment(n);
                self.outbound.enqueue(Notification::Version {
                    origin: self.replica.clone(),
                    version: global,
                });
                return Ok(batch.len());
            }

            debug!(from_version, "Rolling durable batch forward");
            let (next, _) = self.successor(&batch);
            if self.commit(next, &batch).await {
                retry.succeed();
                return Ok(batch.len());
            }
            retry.back_off().await?;
            self.refresh_until_success("write").await?;
        }
    }

    /// Commit entries the event store holds beyond the record. They belong to
    /// a writer whose record commit never landed, and they block every later
    /// append until some record covers them.
    async fn adopt_orphaned_tail(&mut self) -> Result<()> {
        let Some(events) = self.events.clone() else {
            return Ok(());
        };
        let durable = match events.events_count(&self.key).await {
            Ok(count) => count,
            Err(error) => {
                self.issues.record(IssueKind::ReadFromEventStorageFailed, &error);
                return Ok(());
            }
        };
        let global = self.record.global_version;
        if durable <= global {
            return Ok(());
        }

        warn!(global_version = global, durable, "Adopting uncommitted event store tail");
        let mut next = self.record.clone();
        next.global_version = durable;
        match self
            .primary
            .write_state(&self.key, &next, self.etag.as_ref())
            .await
        {
            Ok(_) => {
                counter!(m::WRITES_TOTAL, "outcome" => "adopted").increment(1);
                self.outbound.enqueue(Notification::Version {
                    origin: self.replica.clone(),
                    version: durable,
                });
            }
            Err(error) => {
                self.issues.record(IssueKind::UpdateSnapshotStorageFailed, &error);
            }
        }
        self.refresh_until_success("write").await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Notifications
    // ─────────────────────────────────────────────────────────────────────────

    /// Buffer a notification from a sibling replica.
    pub fn on_notification_received(&mut self, notification: Notification<E>) {
        if notification.origin() == &self.replica {
            return;
        }
        counter!(m::NOTIFICATIONS_TOTAL, "outcome" => "buffered").increment(1);
        self.inbound.insert(notification);
    }

    /// Apply every buffered notification the local log has reached.
    pub fn process_notifications(&mut self) -> ProcessOutcome {
        let mut outcome = ProcessOutcome::default();

        loop {
            let global = self.record.global_version;
            let stale = self.inbound.discard_below(global);
            if stale > 0 {
                outcome.discarded += stale;
                counter!(m::NOTIFICATIONS_TOTAL, "outcome" => "discarded").increment(stale as u64);
                debug!(count = stale, global_version = global, "Discarded stale notifications");
            }

            let Some(update) = self.inbound.take_at(global) else {
                break;
            };
            outcome.applied += 1;
            outcome.entries += update.len();
            self.apply_update(update);
            counter!(m::NOTIFICATIONS_TOTAL, "outcome" => "applied").increment(1);
        }

        outcome.pending = self.inbound.len();
        outcome.needs_refresh = self.inbound.is_ahead_of(self.record.global_version);
        if outcome.pending > 0 {
            debug!(
                count = outcome.pending,
                next = ?self.inbound.first_pending(),
                "Unprocessed notifications"
            );
        }
        outcome
    }

    fn apply_update(&mut self, update: UpdateNotification<E>) {
        debug!(
            origin = %update.origin,
            from = update.from_version,
            to = update.to_version,
            "Applying notification"
        );
        if self.events.is_none() {
            self.record.log.extend(update.entries.iter().cloned());
        }
        self.record.write_vector.flip(&update.origin);
        self.record.global_version = update.to_version;
        self.etag = Some(update.etag);
        self.apply_entries(&update.entries);
    }
}

impl<V, E> std::fmt::Debug for LogViewAdaptor<V, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogViewAdaptor")
            .field("key", &self.key)
            .field("replica", &self.replica)
            .field("confirmed_version", &self.confirmed_version)
            .field("global_version", &self.record.global_version)
            .field("etag", &self.etag)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::events::{apply_fn, Aggregate, ApplyError};
    use crate::protocol::retry::BackoffStrategy;
    use crate::protocol::strategy::{NeverSnapshot, ThresholdStrategy};
    use crate::storage::{InMemoryEventStore, InMemoryPrimaryStore};
    use std::time::Duration;

    #[derive(Debug, Clone, Default, PartialEq)]
    struct Letters(Vec<String>);

    impl Aggregate<String> for Letters {
        fn apply(&mut self, entry: &String) -> std::result::Result<(), ApplyError> {
            if entry == "bad" {
                return Err(ApplyError::new("bad entry"));
            }
            self.0.push(entry.clone());
            Ok(())
        }
    }

    type Primary = InMemoryPrimaryStore<Letters, String>;

    fn adaptor(
        replica: &str,
        primary: Arc<Primary>,
        events: Option<Arc<InMemoryEventStore<String>>>,
        strategy: Arc<dyn SnapshotStrategy>,
    ) -> LogViewAdaptor<Letters, String> {
        LogViewAdaptor::new(AdaptorParts {
            key: EntityKey::new("letters", "1"),
            replica: ReplicaId::from(replica),
            apply: apply_fn::<Letters, String>(),
            primary,
            events: events.map(|e| e as Arc<dyn EventStore<String>>),
            strategy,
            retry: RetryPolicy::unbounded(BackoffStrategy::fixed(Duration::from_millis(1))),
            cancel: CancellationToken::new(),
        })
    }

    fn batch(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_write_commits_and_queues_notification() {
        let primary = Arc::new(Primary::new());
        let mut a = adaptor("a", primary.clone(), None, Arc::new(NeverSnapshot));

        assert_eq!(a.write(batch(&["x", "y"])).await.unwrap(), 2);
        assert_eq!(a.confirmed_version(), 2);
        assert_eq!(a.confirmed_view().0, vec!["x", "y"]);

        match a.take_notification().unwrap() {
            Notification::Update(n) => {
                assert_eq!((n.from_version, n.to_version), (0, 2));
                assert_eq!(Some(&n.etag), a.etag());
            }
            other => panic!("expected update, got {:?}", other),
        }

        let stored = primary.record(a.entity_key()).unwrap();
        assert_eq!(stored.metadata.global_version, 2);
        assert_eq!(stored.metadata.log, batch(&["x", "y"]));
        assert!(stored.metadata.write_vector.get(&ReplicaId::from("a")));
    }

    #[tokio::test]
    async fn test_empty_batch_is_a_no_op() {
        let primary = Arc::new(Primary::new());
        let mut a = adaptor("a", primary.clone(), None, Arc::new(NeverSnapshot));
        assert_eq!(a.write(Vec::new()).await.unwrap(), 0);
        assert_eq!(primary.commits(), 0);
        assert!(a.take_notification().is_none());
    }

    #[tokio::test]
    async fn test_stale_writer_gets_zero_and_catches_up() {
        let primary = Arc::new(Primary::new());
        let mut a = adaptor("a", primary.clone(), None, Arc::new(NeverSnapshot));
        let mut b = adaptor("b", primary.clone(), None, Arc::new(NeverSnapshot));
        b.read().await.unwrap();

        a.write(batch(&["a1"])).await.unwrap();
        assert_eq!(b.write(batch(&["b1"])).await.unwrap(), 0);
        assert_eq!(b.confirmed_version(), 1);
        assert_eq!(b.confirmed_view().0, vec!["a1"]);
        assert!(b.take_notification().is_none());

        assert_eq!(b.write(batch(&["b1"])).await.unwrap(), 1);
        assert_eq!(b.confirmed_view().0, vec!["a1", "b1"]);
    }

    #[tokio::test]
    async fn test_reactivated_replica_loads_before_first_write() {
        let primary = Arc::new(Primary::new());
        let mut first = adaptor("a", primary.clone(), None, Arc::new(NeverSnapshot));
        first.write(batch(&["x"])).await.unwrap();
        drop(first);

        let mut second = adaptor("a", primary.clone(), None, Arc::new(NeverSnapshot));
        assert_eq!(second.write(batch(&["y"])).await.unwrap(), 1);
        assert_eq!(second.confirmed_view().0, vec!["x", "y"]);

        let stored = primary.record(second.entity_key()).unwrap().metadata;
        assert_eq!(stored.log, batch(&["x", "y"]));
        assert!(!stored.write_vector.get(&ReplicaId::from("a")));
        assert_eq!(primary.commits(), 2);
    }

    #[tokio::test]
    async fn test_rejected_entry_still_advances() {
        let primary = Arc::new(Primary::new());
        let mut a = adaptor("a", primary, None, Arc::new(NeverSnapshot));

        assert_eq!(a.write(batch(&["x", "bad", "z"])).await.unwrap(), 3);
        assert_eq!(a.confirmed_version(), 3);
        assert_eq!(a.confirmed_view().0, vec!["x", "z"]);
        assert_eq!(a.apply_failures(), 1);
    }

    #[tokio::test]
    async fn test_snapshot_truncates_inline_log() {
        let primary = Arc::new(Primary::new());
        let mut a = adaptor("a", primary.clone(), None, Arc::new(ThresholdStrategy::new(3)));

        a.write(batch(&["1", "2"])).await.unwrap();
        a.write(batch(&["3"])).await.unwrap();

        let stored = primary.record(a.entity_key()).unwrap().metadata;
        assert_eq!(stored.snapshot_version, 3);
        assert!(stored.log.is_empty());
        assert_eq!(stored.snapshot.0, vec!["1", "2", "3"]);
        assert!(stored.snapshot_updated_time.is_some());
        assert_eq!(a.confirmed_view(), &stored.snapshot);
    }

    #[tokio::test]
    async fn test_segment_cases() {
        let primary = Arc::new(Primary::new());
        let events = Arc::new(InMemoryEventStore::new());
        let mut a = adaptor("a", primary, Some(events), Arc::new(NeverSnapshot));
        a.write(batch(&["0", "1", "2", "3"])).await.unwrap();

        assert!(a.retrieve_log_segment(2, 2).await.unwrap().is_empty());
        assert_eq!(a.retrieve_log_segment(1, 3).await.unwrap(), batch(&["1", "2"]));
        let err = a.retrieve_log_segment(2, 5).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::SegmentUnavailable);
    }

    #[tokio::test]
    async fn test_segment_straddles_event_store_and_cache() {
        let primary = Arc::new(Primary::new());
        let events = Arc::new(InMemoryEventStore::<String>::new());
        let key = EntityKey::new("letters", "1");

        let mut metadata = SnapshotMetadata::<Letters, String>::default();
        metadata.global_version = 4;
        metadata.log = batch(&["2", "3"]);
        primary.write_state(&key, &metadata, None).await.unwrap();
        events.save_events(&key, &batch(&["0", "1"]), 0).await.unwrap();

        let mut a = adaptor("a", primary, Some(events), Arc::new(NeverSnapshot));
        a.read().await.unwrap();
        assert_eq!(a.confirmed_view().0, vec!["0", "1", "2", "3"]);

        assert_eq!(a.retrieve_log_segment(1, 3).await.unwrap(), batch(&["1", "2"]));
        assert_eq!(a.retrieve_log_segment(0, 4).await.unwrap(), batch(&["0", "1", "2", "3"]));
        assert_eq!(a.retrieve_log_segment(2, 4).await.unwrap(), batch(&["2", "3"]));
        assert_eq!(a.retrieve_log_segment(0, 2).await.unwrap(), batch(&["0", "1"]));
    }

    #[tokio::test]
    async fn test_durable_batch_rolls_forward() {
        let primary = Arc::new(Primary::new());
        let events = Arc::new(InMemoryEventStore::<String>::new());
        let mut a = adaptor("a", primary.clone(), Some(events.clone()), Arc::new(NeverSnapshot));
        let mut b = adaptor("b", primary.clone(), Some(events.clone()), Arc::new(NeverSnapshot));

        primary.faults().fail_next_writes(1);
        assert_eq!(a.write(batch(&["x"])).await.unwrap(), 1);
        assert_eq!(a.confirmed_view().0, vec!["x"]);
        assert!(a.current_issue().is_none());

        let stored = primary.record(a.entity_key()).unwrap().metadata;
        assert_eq!(stored.global_version, 1);
        assert_eq!(events.stream(a.entity_key()), batch(&["x"]));

        for item in ["y", "z", "w"] {
            assert_eq!(a.write(batch(&[item])).await.unwrap(), 1);
        }
        b.read().await.unwrap();
        assert_eq!(b.write(batch(&["v"])).await.unwrap(), 1);
        assert_eq!(events.stream(b.entity_key()).len(), 5);
        assert_eq!(b.confirmed_view().0, vec!["x", "y", "z", "w", "v"]);
    }

    #[tokio::test]
    async fn test_orphaned_tail_is_adopted() {
        let primary = Arc::new(Primary::new());
        let events = Arc::new(InMemoryEventStore::<String>::new());
        let key = EntityKey::new("letters", "1");
        // Entries of a writer that stopped before committing the record.
        events.save_events(&key, &batch(&["ghost"]), 0).await.unwrap();

        let mut b = adaptor("b", primary.clone(), Some(events.clone()), Arc::new(NeverSnapshot));
        assert_eq!(b.write(batch(&["y"])).await.unwrap(), 0);
        assert_eq!(primary.record(&key).unwrap().metadata.global_version, 1);
        assert_eq!(b.confirmed_view().0, vec!["ghost"]);
        match b.take_notification().unwrap() {
            Notification::Version { version, .. } => assert_eq!(version, 1),
            other => panic!("expected marker, got {:?}", other),
        }

        assert_eq!(b.write(batch(&["y"])).await.unwrap(), 1);
        assert_eq!(b.confirmed_view().0, vec!["ghost", "y"]);
        assert_eq!(events.stream(&key), batch(&["ghost", "y"]));
    }

    #[tokio::test]
    async fn test_folded_entries_need_event_store() {
        let primary = Arc::new(Primary::new());
        let mut a = adaptor("a", primary, None, Arc::new(ThresholdStrategy::new(2)));
        a.write(batch(&["0", "1"])).await.unwrap();
        a.write(batch(&["2"])).await.unwrap();

        assert_eq!(a.retrieve_log_segment(2, 3).await.unwrap(), batch(&["2"]));
        let err = a.retrieve_log_segment(1, 3).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::SegmentUnavailable);
    }

    #[tokio::test]
    async fn test_read_retries_through_failures() {
        let primary = Arc::new(Primary::new());
        let mut a = adaptor("a", primary.clone(), None, Arc::new(NeverSnapshot));
        a.write(batch(&["x"])).await.unwrap();

        let mut b = adaptor("b", primary.clone(), None, Arc::new(NeverSnapshot));
        primary.faults().fail_next_reads(3);
        b.read().await.unwrap();

        assert_eq!(b.confirmed_view().0, vec!["x"]);
        assert!(b.current_issue().is_none());
    }

    #[tokio::test]
    async fn test_cancelled_read() {
        let primary = Arc::new(Primary::new());
        let mut a = adaptor("a", primary.clone(), None, Arc::new(NeverSnapshot));
        primary.faults().fail_next_reads(u32::MAX);
        a.cancellation().cancel();

        let err = a.read().await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::Cancelled);
    }

    #[tokio::test]
    async fn test_process_ignores_own_and_applies_in_order() {
        let primary = Arc::new(Primary::new());
        let mut a = adaptor("a", primary, None, Arc::new(NeverSnapshot));

        let update = |from: u64, items: &[&str]| {
            Notification::Update(UpdateNotification::new(
                ReplicaId::from("b"),
                from,
                batch(items),
                ETag::generate(),
            ))
        };

        a.on_notification_received(update(1, &["q"]));
        let outcome = a.process_notifications();
        assert_eq!(outcome.applied, 0);
        assert_eq!(outcome.pending, 1);
        assert!(!outcome.needs_refresh);

        a.on_notification_received(update(0, &["p"]));
        let outcome = a.process_notifications();
        assert_eq!(outcome.applied, 2);
        assert_eq!(outcome.entries, 2);
        assert_eq!(a.confirmed_view().0, vec!["p", "q"]);
        assert_eq!(a.metadata().log, batch(&["p", "q"]));
        assert!(!a.metadata().write_vector.get(&ReplicaId::from("b")));

        a.on_notification_received(Notification::Version {
            origin: ReplicaId::from("a"),
            version: 10,
        });
        assert!(!a.process_notifications().needs_refresh);
    }
}
