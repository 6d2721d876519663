//! Benchmarks for view reconstruction: plain replay versus snapshot reads.
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use snaplog_core::config::{ProtocolConfig, SnapshotConfig};
use snaplog_core::events::{apply_fn, replay, EntityKey, PersonEvent, PersonState, ReplicaId};
use snaplog_core::protocol::{merge, LogConsistencyProvider, Notification, UpdateNotification};
use snaplog_core::storage::{InMemoryPrimaryStore, PrimaryStore};
use snaplog_core::events::ETag;
use std::sync::Arc;

fn events(n: usize) -> Vec<PersonEvent> {
    (0..n).map(|i| if i % 10 == 0 { PersonEvent::nick_name_updated(format!("nick-{}", i)) } else { PersonEvent::said(format!("said-{}", i)) }).collect()
}

fn bench_replay(c: &mut Criterion) {
    let mut group = c.benchmark_group("replay");
    let apply = apply_fn::<PersonState, PersonEvent>();
    for n in [10, 100, 1_000] {
        let log = events(n);
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::from_parameter(n), &log, |b, log| {
            b.iter(|| { let mut view = PersonState::default(); black_box(replay(&mut view, log, &apply)); black_box(view) });
        });
    }
    group.finish();
}

/// Populate a store with `n` single-entry writes, then time a cold read.
fn bench_cold_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("cold_read");
    let rt = tokio::runtime::Runtime::new().unwrap();
    let key = EntityKey::new("person", "bench");

    for (label, every_n_events) in [("inline_log", None), ("snapshot_every_50", Some(50))] {
        for n in [100, 500] {
            let primary: Arc<dyn PrimaryStore<PersonState, PersonEvent>> = Arc::new(InMemoryPrimaryStore::new());
            let config = ProtocolConfig { snapshot: SnapshotConfig { every_n_events, max_age: None }, ..Default::default() };
            let provider = LogConsistencyProvider::new(config, primary, None).unwrap();
            rt.block_on(async {
                let mut writer = provider.make_adaptor(key.clone(), ReplicaId::from("writer"), apply_fn());
                for chunk in events(n).chunks(10) { writer.write(chunk.to_vec()).await.unwrap(); }
            });

            group.bench_with_input(BenchmarkId::new(label, n), &n, |b, _| {
                b.iter(|| rt.block_on(async {
                    let mut reader = provider.make_adaptor(key.clone(), ReplicaId::from("reader"), apply_fn());
                    reader.read().await.unwrap();
                    black_box(reader.confirmed_version())
                }));
            });
        }
    }
    group.finish();
}

fn bench_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("notification_merge");
    let update = |from: u64, n: usize| Notification::Update(UpdateNotification::new(ReplicaId::from("a"), from, events(n), ETag::generate()));
    group.bench_function("contiguous_10_10", |b| { b.iter(|| black_box(merge(update(0, 10), update(10, 10)))); });
    group.bench_function("over_ceiling", |b| { b.iter(|| black_box(merge(update(0, 150), update(150, 60)))); });
    group.finish();
}

criterion_group!(benches, bench_replay, bench_cold_read, bench_merge);
criterion_main!(benches);
