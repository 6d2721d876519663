//! Notification transport between replicas of the same entity.
//!
//! The protocol only needs a best-effort broadcast: a lost notification is
//! recovered by the receiver's next read. [`InProcessBus`] keeps one tokio
//! broadcast channel per entity, created on first use.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use tokio::sync::broadcast;
use tracing::{debug, trace};

use crate::error::{Result, SnaplogError};
use crate::events::EntityKey;
use crate::protocol::Notification;

/// Default per-entity channel capacity.
pub const DEFAULT_BUS_CAPACITY: usize = 256;

/// Delivers notifications to every replica subscribed to an entity.
#[async_trait]
pub trait NotificationTransport<E>: Send + Sync {
    /// Send `notification` to all subscribers of `key`.
    async fn broadcast(&self, key: &EntityKey, notification: Notification<E>) -> Result<()>;

    /// Receive every notification broadcast for `key` from now on.
    fn subscribe(&self, key: &EntityKey) -> broadcast::Receiver<Notification<E>>;
}

/// Single-process bus backed by one broadcast channel per entity.
pub struct InProcessBus<E> {
    channels: RwLock<HashMap<EntityKey, broadcast::Sender<Notification<E>>>>,
    capacity: usize,
}

impl<E: Clone + Send + 'static> InProcessBus<E> {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUS_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    fn channel(&self, key: &EntityKey) -> broadcast::Sender<Notification<E>> {
        if let Some(sender) = self.channels.read().get(key) {
            return sender.clone();
        }

        let mut channels = self.channels.write();
        channels
            .entry(key.clone())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    /// Number of live subscribers for `key`.
    pub fn subscriber_count(&self, key: &EntityKey) -> usize {
        self.channels
            .read()
            .get(key)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }
}

impl<E: Clone + Send + 'static> Default for InProcessBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<E> NotificationTransport<E> for InProcessBus<E>
where
    E: Clone + Send + Sync + 'static,
{
    async fn broadcast(&self, key: &EntityKey, notification: Notification<E>) -> Result<()> {
        let version = notification.version();
        match self.channel(key).send(notification) {
            Ok(receivers) => {
                trace!(entity = %key, version, receivers, "Notification broadcast");
                Ok(())
            }
            Err(_) => {
                // Nobody is listening; every sibling will read on activation.
                debug!(entity = %key, version, "No subscribers for notification");
                Ok(())
            }
        }
    }

    fn subscribe(&self, key: &EntityKey) -> broadcast::Receiver<Notification<E>> {
        self.channel(key).subscribe()
    }
}

/// Transport that rejects every broadcast. Useful to exercise outbox retries.
#[derive(Debug, Default)]
pub struct DisconnectedBus;

#[async_trait]
impl<E> NotificationTransport<E> for DisconnectedBus
where
    E: Clone + Send + Sync + 'static,
{
    async fn broadcast(&self, key: &EntityKey, _notification: Notification<E>) -> Result<()> {
        Err(SnaplogError::unavailable(format!(
            "notification transport disconnected for {}",
            key
        )))
    }

    fn subscribe(&self, _key: &EntityKey) -> broadcast::Receiver<Notification<E>> {
        broadcast::channel(1).1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ReplicaId;

    fn marker(version: u64) -> Notification<u64> {
        Notification::Version {
            origin: ReplicaId::from("a"),
            version,
        }
    }

    #[tokio::test]
    async fn test_subscribers_receive_per_entity() {
        let bus = InProcessBus::new();
        let one = EntityKey::new("person", "1");
        let two = EntityKey::new("person", "2");

        let mut rx_one = bus.subscribe(&one);
        let mut rx_two = bus.subscribe(&two);
        assert_eq!(bus.subscriber_count(&one), 1);

        bus.broadcast(&one, marker(3)).await.unwrap();
        assert_eq!(rx_one.recv().await.unwrap().version(), 3);
        assert!(rx_two.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_broadcast_without_subscribers_succeeds() {
        let bus = InProcessBus::new();
        let key = EntityKey::new("person", "1");
        bus.broadcast(&key, marker(1)).await.unwrap();
        assert_eq!(bus.subscriber_count(&key), 0);
    }

    #[tokio::test]
    async fn test_disconnected_bus_fails() {
        let bus = DisconnectedBus;
        let key = EntityKey::new("person", "1");
        assert!(bus.broadcast(&key, marker(1)).await.is_err());
    }
}
