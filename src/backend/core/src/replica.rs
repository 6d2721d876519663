//! Host-side wrapper around a [`LogViewAdaptor`].
//!
//! A [`Replica`] is what an application holds for one active entity instance.
//! It queues raised events until they are confirmed, serializes protocol
//! operations behind an async mutex, and moves notifications between the
//! adaptor and a [`NotificationTransport`].

use parking_lot::Mutex as PendingLock;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bus::NotificationTransport;
use crate::error::Result;
use crate::events::{replay, ApplyFn, EntityKey, LogEntry, ReplicaId};
use crate::protocol::{LogConsistencyProvider, LogViewAdaptor, Notification, ProcessOutcome};

pub struct Replica<V, E> {
    key: EntityKey,
    id: ReplicaId,
    apply: ApplyFn<V, E>,
    adaptor: Mutex<LogViewAdaptor<V, E>>,
    /// Raised but not yet confirmed, in raise order.
    pending: PendingLock<Vec<E>>,
    transport: Arc<dyn NotificationTransport<E>>,
}

impl<V, E> Replica<V, E>
where
    V: Default + Clone + Send + Sync + 'static,
    E: LogEntry,
{
    pub fn new(
        provider: &LogConsistencyProvider<V, E>,
        key: EntityKey,
        id: ReplicaId,
        apply: ApplyFn<V, E>,
        transport: Arc<dyn NotificationTransport<E>>,
    ) -> Self {
        let adaptor = provider.make_adaptor(key.clone(), id.clone(), apply.clone());
        Self {
            key,
            id,
            apply,
            adaptor: Mutex::new(adaptor),
            pending: PendingLock::new(Vec::new()),
            transport,
        }
    }

    /// Create the replica and load the latest durable state.
    pub async fn activate(
        provider: &LogConsistencyProvider<V, E>,
        key: EntityKey,
        id: ReplicaId,
        apply: ApplyFn<V, E>,
        transport: Arc<dyn NotificationTransport<E>>,
    ) -> Result<Arc<Self>> {
        let replica = Arc::new(Self::new(provider, key, id, apply, transport));
        replica.refresh().await?;
        let version = replica.confirmed_version().await;
        info!(entity = %replica.key, replica = %replica.id, version, "Replica activated");
        Ok(replica)
    }

    pub fn entity_key(&self) -> &EntityKey {
        &self.key
    }

    pub fn id(&self) -> &ReplicaId {
        &self.id
    }

    /// Exclusive access to the adaptor, blocking other operations meanwhile.
    pub async fn lock_adaptor(&self) -> MutexGuard<'_, LogViewAdaptor<V, E>> {
        self.adaptor.lock().await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Events
    // ─────────────────────────────────────────────────────────────────────────

    /// Queue an event for the next [`confirm_events`](Self::confirm_events).
    pub fn raise_event(&self, event: E) {
        self.pending.lock().push(event);
    }

    pub fn raise_events(&self, events: impl IntoIterator<Item = E>) {
        self.pending.lock().extend(events);
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    pub async fn confirmed_view(&self) -> V {
        self.adaptor.lock().await.confirmed_view().clone()
    }

    pub async fn confirmed_version(&self) -> u64 {
        self.adaptor.lock().await.confirmed_version()
    }

    /// Confirmed view with every pending event applied on top.
    pub async fn tentative_view(&self) -> V {
        let adaptor = self.adaptor.lock().await;
        let mut view = adaptor.confirmed_view().clone();
        let pending = self.pending.lock().clone();
        replay(&mut view, &pending, &self.apply);
        view
    }

    /// Commit every pending event as one batch.
    ///
    /// Returns the number of committed events. When the batch did not land
    /// the events stay queued, ahead of anything raised meanwhile, and `0` is
    /// returned; the view has been refreshed so the caller can decide whether
    /// to resubmit.
    pub async fn confirm_events(&self) -> Result<usize> {
        let mut adaptor = self.adaptor.lock().await;
        let batch = std::mem::take(&mut *self.pending.lock());
        if batch.is_empty() {
            return Ok(0);
        }

        let outcome = adaptor.write(batch.clone()).await;
        if !matches!(outcome, Ok(n) if n > 0) {
            let mut pending = self.pending.lock();
            let raised_meanwhile = std::mem::replace(&mut *pending, batch);
            pending.extend(raised_meanwhile);
        }
        let committed = outcome?;

        self.flush(&mut adaptor).await;
        Ok(committed)
    }

    /// Catch up with the primary store and apply buffered notifications.
    pub async fn refresh(&self) -> Result<()> {
        let mut adaptor = self.adaptor.lock().await;
        adaptor.read().await?;
        adaptor.process_notifications();
        self.flush(&mut adaptor).await;
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Notifications
    // ─────────────────────────────────────────────────────────────────────────

    /// Hand an inbound notification to the adaptor and apply what it can.
    ///
    /// Reads from storage when the notification shows the log moved past
    /// what is locally available.
    pub async fn deliver(&self, notification: Notification<E>) -> Result<ProcessOutcome> {
        let mut adaptor = self.adaptor.lock().await;
        adaptor.on_notification_received(notification);
        let mut outcome = adaptor.process_notifications();

        if outcome.needs_refresh {
            debug!(entity = %self.key, replica = %self.id, "Notification ahead of local log, reading");
            adaptor.read().await?;
            outcome = adaptor.process_notifications();
        }
        Ok(outcome)
    }

    /// Send queued outbound notifications. Returns whether the outbox drained.
    pub async fn flush_outbox(&self) -> bool {
        let mut adaptor = self.adaptor.lock().await;
        self.flush(&mut adaptor).await
    }

    async fn flush(&self, adaptor: &mut LogViewAdaptor<V, E>) -> bool {
        let Some(notification) = adaptor.take_notification() else {
            return true;
        };
        match self.transport.broadcast(&self.key, notification.clone()).await {
            Ok(()) => true,
            Err(error) => {
                warn!(
                    entity = %self.key,
                    replica = %self.id,
                    version = notification.version(),
                    error = %error,
                    "Notification broadcast failed; kept for next flush"
                );
                adaptor.requeue_notification(notification);
                false
            }
        }
    }

    /// Subscribe now and process inbound notifications on a background task
    /// until `cancel` fires.
    pub fn spawn_notification_pump(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<Result<()>> {
        let receiver = self.transport.subscribe(&self.key);
        let replica = Arc::clone(self);
        tokio::spawn(async move { replica.pump(receiver, cancel).await })
    }

    /// Subscribe and process inbound notifications until `cancel` fires.
    pub async fn run_notification_pump(&self, cancel: CancellationToken) -> Result<()> {
        let receiver = self.transport.subscribe(&self.key);
        self.pump(receiver, cancel).await
    }

    async fn pump(
        &self,
        mut receiver: broadcast::Receiver<Notification<E>>,
        cancel: CancellationToken,
    ) -> Result<()> {
        debug!(entity = %self.key, replica = %self.id, "Notification pump started");
        loop {
            let received = tokio::select! {
                _ = cancel.cancelled() => break,
                received = receiver.recv() => received,
            };

            match received {
                Ok(notification) if notification.origin() == &self.id => {}
                Ok(notification) => {
                    self.deliver(notification).await?;
                }
                Err(RecvError::Lagged(missed)) => {
                    warn!(entity = %self.key, replica = %self.id, missed, "Notifications lost, reading");
                    self.refresh().await?;
                }
                Err(RecvError::Closed) => break,
            }
        }
        debug!(entity = %self.key, replica = %self.id, "Notification pump stopped");
        Ok(())
    }
}

impl<V, E> std::fmt::Debug for Replica<V, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Replica")
            .field("key", &self.key)
            .field("id", &self.id)
            .field("pending", &self.pending.lock().len())
            .finish_non_exhaustive()
    }
}
