//! Integration tests for the log-view adaptor across several replicas.
//!
//! Tests cover:
//! - Snapshot folding and equivalence with plain log replay
//! - Conflicting writers converging on one log
//! - Lost acknowledgements resolved through the write vector
//! - Independent event storage and log segments below the snapshot
//! - Notification delivery, gaps, duplicates and version markers
//! - Bounded retries and cancellation

use snaplog_core::config::{ProtocolConfig, SnapshotConfig};
use snaplog_core::error::ErrorCode;
use snaplog_core::events::{apply_fn, EntityKey, PersonEvent, PersonState, ReplicaId};
use snaplog_core::protocol::{
    BackoffStrategy, LogConsistencyProvider, LogViewAdaptor, NeverSnapshot, Notification,
    RetryPolicy,
};
use snaplog_core::storage::{EventStore, InMemoryEventStore, InMemoryPrimaryStore, PrimaryStore};
use std::sync::Arc;
use std::time::Duration;

type Adaptor = LogViewAdaptor<PersonState, PersonEvent>;
type Provider = LogConsistencyProvider<PersonState, PersonEvent>;
type Primary = InMemoryPrimaryStore<PersonState, PersonEvent>;

fn fast_retry() -> RetryPolicy {
    RetryPolicy::unbounded(BackoffStrategy::fixed(Duration::from_millis(1)))
}

fn config(every_n_events: Option<u64>, independent: bool) -> ProtocolConfig {
    ProtocolConfig {
        use_independent_event_storage: independent,
        snapshot: SnapshotConfig {
            every_n_events,
            max_age: None,
        },
        retry: fast_retry(),
    }
}

fn inline_provider(primary: &Arc<Primary>, every_n_events: Option<u64>) -> Provider {
    let primary: Arc<dyn PrimaryStore<PersonState, PersonEvent>> = primary.clone();
    LogConsistencyProvider::new(config(every_n_events, false), primary, None).unwrap()
}

fn key() -> EntityKey {
    EntityKey::new("person", "ada")
}

fn adaptor(provider: &Provider, replica: &str) -> Adaptor {
    provider.make_adaptor(
        key(),
        ReplicaId::from(replica),
        apply_fn::<PersonState, PersonEvent>(),
    )
}

fn said(items: &[&str]) -> Vec<PersonEvent> {
    items.iter().map(|s| PersonEvent::said(*s)).collect()
}

// ============================================================================
// Snapshots
// ============================================================================

#[tokio::test]
async fn test_snapshot_fires_at_threshold_and_readers_agree() {
    let primary = Arc::new(Primary::new());
    let provider = inline_provider(&primary, Some(5));
    let mut a = adaptor(&provider, "a");

    assert_eq!(a.write(said(&["a1", "a2"])).await.unwrap(), 2);
    let record = primary.record(&key()).unwrap().metadata;
    assert_eq!(record.snapshot_version, 0);
    assert_eq!(record.log.len(), 2);

    for entry in ["a3", "a4", "a5"] {
        assert_eq!(a.write(said(&[entry])).await.unwrap(), 1);
    }

    let record = primary.record(&key()).unwrap().metadata;
    assert_eq!(record.snapshot_version, 5);
    assert_eq!(record.global_version, 5);
    assert!(record.log.is_empty());
    assert!(record.snapshot_updated_time.is_some());

    let mut b = adaptor(&provider, "b");
    b.read().await.unwrap();
    assert_eq!(b.confirmed_version(), 5);
    assert_eq!(b.confirmed_view(), a.confirmed_view());
    assert_eq!(
        b.confirmed_view().history_saids,
        vec!["a1", "a2", "a3", "a4", "a5"]
    );

    // Same history without snapshots: replayed from the inline log.
    let replay_primary = Arc::new(Primary::new());
    let replay_provider = inline_provider(&replay_primary, None);
    let mut writer = adaptor(&replay_provider, "a");
    writer.write(said(&["a1", "a2"])).await.unwrap();
    for entry in ["a3", "a4", "a5"] {
        writer.write(said(&[entry])).await.unwrap();
    }

    let record = replay_primary.record(&key()).unwrap().metadata;
    assert_eq!(record.snapshot_version, 0);
    assert_eq!(record.log.len(), 5);

    let mut reader = adaptor(&replay_provider, "c");
    reader.read().await.unwrap();
    assert_eq!(reader.confirmed_view(), b.confirmed_view());
}

#[tokio::test]
async fn test_custom_strategy_replaces_config() {
    let primary = Arc::new(Primary::new());
    let provider = inline_provider(&primary, Some(1)).with_strategy(NeverSnapshot);
    let mut a = adaptor(&provider, "a");

    a.write(said(&["x"])).await.unwrap();
    a.write(said(&["y"])).await.unwrap();
    assert_eq!(primary.record(&key()).unwrap().metadata.snapshot_version, 0);
}

// ============================================================================
// Conflicts
// ============================================================================

#[tokio::test]
async fn test_conflicting_writers_converge() {
    let primary = Arc::new(Primary::new());
    let provider = inline_provider(&primary, Some(4));
    let mut replicas: Vec<Adaptor> = ["a", "b", "c"]
        .iter()
        .map(|id| adaptor(&provider, id))
        .collect();

    let mut written = 0;
    for round in 0..4 {
        for (i, replica) in replicas.iter_mut().enumerate() {
            let entry = format!("{}-{}", i, round);
            // Stale writers learn of the conflict, then resubmit.
            while replica.write(said(&[entry.as_str()])).await.unwrap() == 0 {}
            written += 1;
        }
    }

    for replica in replicas.iter_mut() {
        replica.read().await.unwrap();
        assert_eq!(replica.confirmed_version(), written);
    }
    assert_eq!(replicas[0].confirmed_view(), replicas[1].confirmed_view());
    assert_eq!(replicas[1].confirmed_view(), replicas[2].confirmed_view());
    assert_eq!(replicas[0].confirmed_view().history_saids.len(), 12);
}

#[tokio::test]
async fn test_failed_commit_returns_zero() {
    let primary = Arc::new(Primary::new());
    let provider = inline_provider(&primary, None);
    let mut a = adaptor(&provider, "a");

    primary.faults().fail_next_writes(1);
    assert_eq!(a.write(said(&["lost"])).await.unwrap(), 0);
    assert_eq!(a.confirmed_version(), 0);
    assert!(primary.record(&key()).is_none());
    assert!(a.take_notification().is_none());

    assert_eq!(a.write(said(&["kept"])).await.unwrap(), 1);
    assert_eq!(a.confirmed_view().history_saids, vec!["kept"]);
}

#[tokio::test]
async fn test_lost_ack_is_recognised_through_write_vector() {
    let primary = Arc::new(Primary::new());
    let provider = inline_provider(&primary, None);
    let mut a = adaptor(&provider, "a");
    a.write(said(&["first"])).await.unwrap();
    a.take_notification();

    primary.faults().drop_next_write_acks(1);
    assert_eq!(a.write(said(&["second"])).await.unwrap(), 1);

    // Applied once, from the re-read record.
    assert_eq!(a.confirmed_version(), 2);
    assert_eq!(a.confirmed_view().history_saids, vec!["first", "second"]);
    let stored = primary.record(&key()).unwrap();
    assert_eq!(stored.metadata.log.len(), 2);
    assert_eq!(a.etag(), Some(&stored.etag));

    match a.take_notification().unwrap() {
        Notification::Update(update) => {
            assert_eq!((update.from_version, update.to_version), (1, 2));
            assert_eq!(update.etag, stored.etag);
        }
        other => panic!("expected update, got {:?}", other),
    }
}

// ============================================================================
// Independent Event Storage
// ============================================================================

#[tokio::test]
async fn test_event_store_serves_entries_below_snapshot() {
    let primary = Arc::new(Primary::new());
    let events = Arc::new(InMemoryEventStore::new());
    let provider = LogConsistencyProvider::new(
        config(Some(2), true),
        primary.clone() as Arc<dyn PrimaryStore<PersonState, PersonEvent>>,
        Some(events.clone() as Arc<dyn EventStore<PersonEvent>>),
    )
    .unwrap();

    let mut a = adaptor(&provider, "a");
    for entry in ["e0", "e1", "e2"] {
        a.write(said(&[entry])).await.unwrap();
    }

    let record = primary.record(&key()).unwrap().metadata;
    assert_eq!(record.snapshot_version, 2);
    assert_eq!(record.global_version, 3);
    assert!(record.log.is_empty());
    assert_eq!(events.stream(&key()).len(), 3);

    let mut b = adaptor(&provider, "b");
    b.read().await.unwrap();
    assert_eq!(b.confirmed_view(), a.confirmed_view());

    let segment = b.retrieve_log_segment(0, 3).await.unwrap();
    let texts: Vec<_> = segment
        .iter()
        .map(|e| match e {
            PersonEvent::Said(s) => s.said.clone(),
            other => panic!("unexpected {:?}", other),
        })
        .collect();
    assert_eq!(texts, vec!["e0", "e1", "e2"]);
}

#[tokio::test]
async fn test_event_store_failures() {
    let primary = Arc::new(Primary::new());
    let events = Arc::new(InMemoryEventStore::new());
    let provider = LogConsistencyProvider::new(
        config(None, true),
        primary.clone() as Arc<dyn PrimaryStore<PersonState, PersonEvent>>,
        Some(events.clone() as Arc<dyn EventStore<PersonEvent>>),
    )
    .unwrap();

    let mut a = adaptor(&provider, "a");
    events.faults().fail_next_writes(1);
    assert_eq!(a.write(said(&["dropped"])).await.unwrap(), 0);
    assert!(events.stream(&key()).is_empty());
    assert!(primary.record(&key()).is_none());

    a.write(said(&["x", "y"])).await.unwrap();

    let mut b = adaptor(&provider, "b");
    events.faults().fail_next_reads(2);
    b.read().await.unwrap();
    assert_eq!(b.confirmed_view().history_saids, vec!["x", "y"]);
    assert!(b.current_issue().is_none());
}

// ============================================================================
// Notifications
// ============================================================================

#[tokio::test]
async fn test_notifications_apply_once_and_in_order() {
    let primary = Arc::new(Primary::new());
    let provider = inline_provider(&primary, None);
    let mut a = adaptor(&provider, "a");
    let mut b = adaptor(&provider, "b");

    a.write(said(&["n0", "n1"])).await.unwrap();
    let first = a.take_notification().unwrap();
    a.write(said(&["n2"])).await.unwrap();
    let second = a.take_notification().unwrap();

    b.on_notification_received(second.clone());
    let outcome = b.process_notifications();
    assert_eq!(outcome.applied, 0);
    assert_eq!(outcome.pending, 1);
    assert!(!outcome.needs_refresh);
    assert_eq!(b.confirmed_version(), 0);

    b.on_notification_received(first.clone());
    let outcome = b.process_notifications();
    assert_eq!(outcome.applied, 2);
    assert_eq!(outcome.entries, 3);
    assert_eq!(b.confirmed_view(), a.confirmed_view());
    assert_eq!(b.etag(), a.etag());

    b.on_notification_received(first);
    b.on_notification_received(second);
    let outcome = b.process_notifications();
    assert_eq!(outcome.discarded, 2);
    assert_eq!(b.confirmed_version(), 3);

    // The cached tag is current, so b can write without a conflict.
    assert_eq!(b.write(said(&["n3"])).await.unwrap(), 1);
}

#[tokio::test]
async fn test_oversized_merge_becomes_marker() {
    let primary = Arc::new(Primary::new());
    let provider = inline_provider(&primary, None);
    let mut a = adaptor(&provider, "a");
    let mut b = adaptor(&provider, "b");

    let big: Vec<PersonEvent> = (0..150).map(|i| PersonEvent::said(i.to_string())).collect();
    let more: Vec<PersonEvent> = (0..60).map(|i| PersonEvent::said(i.to_string())).collect();
    a.write(big).await.unwrap();
    a.write(more).await.unwrap();

    let notification = a.take_notification().unwrap();
    assert!(notification.is_marker());
    assert_eq!(notification.version(), 210);

    b.on_notification_received(notification);
    let outcome = b.process_notifications();
    assert!(outcome.needs_refresh);

    b.read().await.unwrap();
    assert_eq!(b.confirmed_version(), 210);
    assert!(!b.process_notifications().needs_refresh);
}

// ============================================================================
// Retries
// ============================================================================

#[tokio::test]
async fn test_bounded_retry_gives_up() {
    let primary = Arc::new(Primary::new());
    let mut config = config(None, false);
    config.retry = RetryPolicy::bounded(3, BackoffStrategy::fixed(Duration::from_millis(1)));
    let provider = LogConsistencyProvider::new(
        config,
        primary.clone() as Arc<dyn PrimaryStore<PersonState, PersonEvent>>,
        None,
    )
    .unwrap();
    let mut a = adaptor(&provider, "a");

    primary.faults().fail_next_reads(10);
    let err = a.read().await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::RetriesExhausted);
    assert!(a.current_issue().is_some());
}

#[tokio::test]
async fn test_cancelled_reconciliation_leaves_state_untouched() {
    let primary = Arc::new(Primary::new());
    let provider = inline_provider(&primary, None);
    let mut a = adaptor(&provider, "a");
    a.write(said(&["kept"])).await.unwrap();

    primary.faults().fail_next_writes(1);
    primary.faults().fail_next_reads(u32::MAX);
    let cancel = a.cancellation().clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
    });

    let err = a.write(said(&["pending"])).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::Cancelled);
    assert_eq!(a.confirmed_version(), 1);
    assert_eq!(a.metadata().global_version, 1);
    assert_eq!(a.confirmed_view().history_saids, vec!["kept"]);
}
