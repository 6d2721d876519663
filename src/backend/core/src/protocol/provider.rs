//! Factory that wires configuration and stores into adaptors.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::adaptor::{AdaptorParts, LogViewAdaptor};
use super::strategy::{self, SnapshotStrategy};
use crate::config::ProtocolConfig;
use crate::error::{Result, SnaplogError};
use crate::events::{ApplyFn, EntityKey, LogEntry, ReplicaId};
use crate::storage::{EventStore, PrimaryStore};

/// Shared stores and options for every replica of one entity type.
pub struct LogConsistencyProvider<V, E> {
    config: ProtocolConfig,
    primary: Arc<dyn PrimaryStore<V, E>>,
    events: Option<Arc<dyn EventStore<E>>>,
    strategy: Arc<dyn SnapshotStrategy>,
    shutdown: CancellationToken,
}

impl<V, E> LogConsistencyProvider<V, E>
where
    V: Default + Clone + Send + Sync + 'static,
    E: LogEntry,
{
    /// Build a provider. Fails if independent event storage is requested
    /// without an event store.
    pub fn new(
        config: ProtocolConfig,
        primary: Arc<dyn PrimaryStore<V, E>>,
        events: Option<Arc<dyn EventStore<E>>>,
    ) -> Result<Self> {
        if config.use_independent_event_storage && events.is_none() {
            return Err(SnaplogError::configuration(
                "independent event storage requested but no event store configured",
            ));
        }

        // Entries stay inline unless the event store is in use.
        let events = events.filter(|_| config.use_independent_event_storage);
        let strategy = strategy::from_config(&config.snapshot);

        info!(
            primary = primary.name(),
            events = events.as_ref().map(|e| e.name()),
            every_n_events = ?config.snapshot.every_n_events,
            max_age = ?config.snapshot.max_age,
            "Log consistency provider ready"
        );

        Ok(Self {
            config,
            primary,
            events,
            strategy,
            shutdown: CancellationToken::new(),
        })
    }

    /// Replace the configured snapshot strategy.
    pub fn with_strategy(mut self, strategy: impl SnapshotStrategy + 'static) -> Self {
        self.strategy = Arc::new(strategy);
        self
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    /// Cancels every adaptor made by this provider.
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Create the adaptor of `replica` for entity `key`.
    pub fn make_adaptor(
        &self,
        key: EntityKey,
        replica: ReplicaId,
        apply: ApplyFn<V, E>,
    ) -> LogViewAdaptor<V, E> {
        LogViewAdaptor::new(AdaptorParts {
            key,
            replica,
            apply,
            primary: self.primary.clone(),
            events: self.events.clone(),
            strategy: self.strategy.clone(),
            retry: self.config.retry.clone(),
            cancel: self.shutdown.child_token(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::events::{apply_fn, PersonEvent, PersonState};
    use crate::storage::{InMemoryEventStore, InMemoryPrimaryStore};

    fn primary() -> Arc<dyn PrimaryStore<PersonState, PersonEvent>> {
        Arc::new(InMemoryPrimaryStore::new())
    }

    #[test]
    fn test_independent_storage_requires_event_store() {
        let config = ProtocolConfig {
            use_independent_event_storage: true,
            ..Default::default()
        };
        let err = LogConsistencyProvider::new(config, primary(), None)
            .err()
            .unwrap();
        assert_eq!(err.code(), ErrorCode::ConfigurationError);
    }

    #[test]
    fn test_event_store_ignored_when_inline() {
        let events: Arc<dyn EventStore<PersonEvent>> = Arc::new(InMemoryEventStore::new());
        let provider =
            LogConsistencyProvider::new(ProtocolConfig::default(), primary(), Some(events)).unwrap();
        let adaptor = provider.make_adaptor(
            EntityKey::new("person", "1"),
            ReplicaId::from("a"),
            apply_fn::<PersonState, PersonEvent>(),
        );
        assert!(!adaptor.uses_event_store());
    }

    #[test]
    fn test_shutdown_cancels_adaptors() {
        let provider =
            LogConsistencyProvider::new(ProtocolConfig::default(), primary(), None).unwrap();
        let adaptor = provider.make_adaptor(
            EntityKey::new("person", "1"),
            ReplicaId::from("a"),
            apply_fn::<PersonState, PersonEvent>(),
        );
        provider.shutdown_token().cancel();
        assert!(adaptor.cancellation().is_cancelled());
    }
}
