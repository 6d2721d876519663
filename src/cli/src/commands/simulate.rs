//! Simulation command.
//!
//! Activates several replicas of one Person entity, connects them through an
//! in-process bus and issues writes round-robin. Stale replicas learn of
//! conflicts on write and resubmit, so every write eventually lands.

use anyhow::{bail, Context, Result};
use clap::{Args, ValueEnum};
use serde::Serialize;
use snaplog_core::bus::{InProcessBus, NotificationTransport};
use snaplog_core::config::Config;
use snaplog_core::events::{apply_fn, EntityKey, PersonEvent, PersonState, ReplicaId, PERSON_ENTITY_TYPE};
use snaplog_core::protocol::LogConsistencyProvider;
use snaplog_core::replica::Replica;
use snaplog_core::storage::{
    EventStore, FileEventStore, FilePrimaryStore, InMemoryEventStore, InMemoryPrimaryStore,
    PrimaryStore,
};
use std::path::PathBuf;
use std::sync::Arc;
use tabled::Tabled;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::output::{self, OutputFormat};

/// Attempts per write before the simulation gives up on it.
const MAX_SUBMISSIONS: usize = 16;

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum StoreKind {
    /// Keep everything in process memory
    Memory,
    /// Store records and events under --dir
    File,
}

#[derive(Args)]
pub struct SimulateArgs {
    /// Number of replicas
    #[arg(short, long, default_value_t = 3)]
    replicas: usize,

    /// Number of writes, issued round-robin across replicas
    #[arg(short, long, default_value_t = 12)]
    writes: usize,

    /// Events per write
    #[arg(short, long, default_value_t = 1)]
    batch: usize,

    /// Snapshot every N events (overrides configuration; 0 disables)
    #[arg(long)]
    every_n_events: Option<u64>,

    /// Persist entries in the independent event store
    #[arg(long)]
    independent_events: bool,

    /// Backing store
    #[arg(long, value_enum, default_value = "memory")]
    store: StoreKind,

    /// Root directory for the file store
    #[arg(long, default_value = "./snaplog-data")]
    dir: PathBuf,

    /// Entity id of the simulated person
    #[arg(long, default_value = "demo")]
    entity_id: String,
}

#[derive(Tabled, Serialize)]
struct ReplicaRow {
    #[tabled(rename = "Replica")]
    replica: String,
    #[tabled(rename = "Version")]
    version: u64,
    #[tabled(rename = "Nickname")]
    nick_name: String,
    #[tabled(rename = "Said")]
    said: usize,
    #[tabled(rename = "Resubmits")]
    resubmits: usize,
}

#[derive(Serialize)]
struct Report {
    replicas: Vec<ReplicaRow>,
    snapshot_version: u64,
    global_version: u64,
    cached_log: usize,
    converged: bool,
}

type Person = Replica<PersonState, PersonEvent>;

type Stores = (
    Arc<dyn PrimaryStore<PersonState, PersonEvent>>,
    Arc<dyn EventStore<PersonEvent>>,
);

fn stores(args: &SimulateArgs) -> Stores {
    match args.store {
        StoreKind::Memory => (
            Arc::new(InMemoryPrimaryStore::<PersonState, PersonEvent>::new()),
            Arc::new(InMemoryEventStore::<PersonEvent>::new()),
        ),
        StoreKind::File => (
            Arc::new(FilePrimaryStore::<PersonState, PersonEvent>::new(args.dir.clone())),
            Arc::new(FileEventStore::new(
                args.dir.clone(),
                Arc::new(PersonEvent::registry()),
            )),
        ),
    }
}

fn events_for(replica: usize, write: usize, batch: usize) -> Vec<PersonEvent> {
    (0..batch)
        .map(|i| {
            if (write + i) % 7 == 6 {
                PersonEvent::nick_name_updated(format!("nick-{}-{}", replica, write))
            } else {
                PersonEvent::said(format!("r{} w{} #{}", replica, write, i))
            }
        })
        .collect()
}

pub async fn execute(args: SimulateArgs, config: &Config, format: OutputFormat) -> Result<()> {
    if args.replicas == 0 {
        bail!("--replicas must be at least 1");
    }

    let mut protocol = config.protocol.clone();
    if let Some(n) = args.every_n_events {
        protocol.snapshot.every_n_events = (n > 0).then_some(n);
    }
    protocol.use_independent_event_storage |= args.independent_events;

    let (primary, events) = stores(&args);
    let provider = LogConsistencyProvider::new(protocol, primary, Some(events))
        .context("Failed to build provider")?;

    let bus: Arc<dyn NotificationTransport<PersonEvent>> = Arc::new(InProcessBus::new());
    let key = EntityKey::new(PERSON_ENTITY_TYPE, args.entity_id.clone());
    let cancel = CancellationToken::new();

    let mut replicas: Vec<Arc<Person>> = Vec::with_capacity(args.replicas);
    let mut pumps = Vec::with_capacity(args.replicas);
    for i in 0..args.replicas {
        let replica = Replica::activate(
            &provider,
            key.clone(),
            ReplicaId::new(format!("replica-{}", i)),
            apply_fn::<PersonState, PersonEvent>(),
            bus.clone(),
        )
        .await
        .with_context(|| format!("Failed to activate replica-{}", i))?;
        pumps.push(replica.spawn_notification_pump(cancel.child_token()));
        replicas.push(replica);
    }

    let mut resubmits = vec![0usize; args.replicas];
    for write in 0..args.writes {
        let index = write % args.replicas;
        let replica = &replicas[index];
        replica.raise_events(events_for(index, write, args.batch));

        let mut submissions = 0;
        while replica.confirm_events().await? == 0 {
            submissions += 1;
            resubmits[index] += 1;
            debug!(write, replica = %replica.id(), submissions, "Write conflicted, resubmitting");
            if submissions >= MAX_SUBMISSIONS {
                bail!("write {} from {} kept conflicting", write, replica.id());
            }
        }
    }

    info!(writes = args.writes, replicas = args.replicas, "Writes committed");

    // Converge deterministically instead of waiting on the pumps.
    for replica in &replicas {
        replica.refresh().await?;
    }
    cancel.cancel();
    for pump in pumps {
        if let Err(e) = pump.await? {
            output::print_warning(&format!("Notification pump stopped with error: {:#}", e));
        }
    }

    let mut rows = Vec::with_capacity(replicas.len());
    let mut views = Vec::with_capacity(replicas.len());
    for (replica, resubmits) in replicas.iter().zip(resubmits) {
        let view = replica.confirmed_view().await;
        rows.push(ReplicaRow {
            replica: replica.id().to_string(),
            version: replica.confirmed_version().await,
            nick_name: view.nick_name.clone(),
            said: view.history_saids.len(),
            resubmits,
        });
        views.push(view);
    }
    let converged = views.windows(2).all(|pair| pair[0] == pair[1]);

    let (record, etag) = {
        let adaptor = replicas[0].lock_adaptor().await;
        (adaptor.metadata().clone(), adaptor.etag().map(|t| t.to_string()))
    };

    if format.is_table() {
        output::print_section("Replicas", &rows);
        output::print_record("Primary Record", &key, etag.as_deref(), &record);
        println!();
        if converged {
            output::print_success("All replicas converged");
        } else {
            output::print_error("Replicas diverged");
        }
    } else {
        output::print_report(
            &Report {
                replicas: rows,
                snapshot_version: record.snapshot_version,
                global_version: record.global_version,
                cached_log: record.log.len(),
                converged,
            },
            format,
        )?;
    }

    if !converged {
        bail!("replica views differ");
    }
    Ok(())
}
