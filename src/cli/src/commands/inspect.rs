//! Inspection command.
//!
//! Reads the primary record and, when present, the independent event log of
//! one file-backed Person entity.

use anyhow::{bail, Context, Result};
use clap::Args;
use serde::Serialize;
use snaplog_core::events::{EntityKey, PersonEvent, PersonState, TypedEvent, PERSON_ENTITY_TYPE};
use snaplog_core::protocol::SnapshotMetadata;
use snaplog_core::storage::{EventStore, FileEventStore, FilePrimaryStore, PrimaryStore};
use std::path::PathBuf;
use std::sync::Arc;
use tabled::Tabled;

use crate::output::{self, OutputFormat};

#[derive(Args)]
pub struct InspectArgs {
    /// Entity id
    entity_id: String,

    /// Root directory of the file store
    #[arg(long, default_value = "./snaplog-data")]
    dir: PathBuf,

    /// Also print the independent event log
    #[arg(short, long)]
    events: bool,
}

#[derive(Tabled, Serialize)]
struct EntryRow {
    #[tabled(rename = "Version")]
    version: u64,
    #[tabled(rename = "Type")]
    type_key: String,
    #[tabled(rename = "Payload")]
    payload: String,
}

#[derive(Serialize)]
struct Inspection<'a> {
    entity: String,
    etag: String,
    metadata: &'a SnapshotMetadata<PersonState, PersonEvent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    events: Option<Vec<EntryRow>>,
}

fn rows(start: u64, entries: &[PersonEvent]) -> Result<Vec<EntryRow>> {
    entries
        .iter()
        .enumerate()
        .map(|(offset, entry)| {
            Ok(EntryRow {
                version: start + offset as u64,
                type_key: entry.type_key().to_string(),
                payload: serde_json::to_string(&entry.to_json()?)?,
            })
        })
        .collect()
}

pub async fn execute(args: InspectArgs, format: OutputFormat) -> Result<()> {
    let key = EntityKey::new(PERSON_ENTITY_TYPE, args.entity_id.clone());
    let primary = FilePrimaryStore::<PersonState, PersonEvent>::new(args.dir.clone());

    let Some(record) = primary
        .read_state(&key)
        .await
        .with_context(|| format!("Failed to read record of {}", key))?
    else {
        bail!("no record for {} under {}", key, args.dir.display());
    };
    let metadata = &record.metadata;
    let cache_start = metadata.cache_start();

    let events = if args.events {
        let store = FileEventStore::new(args.dir.clone(), Arc::new(PersonEvent::registry()));
        let count = store.events_count(&key).await?;
        let entries = store.read_events(&key, 0, count).await?;
        if count < metadata.global_version {
            output::print_warning(&format!(
                "event log holds {} entries but the record is at version {}",
                count, metadata.global_version
            ));
        } else if count > metadata.global_version {
            output::print_warning(&format!(
                "entries {}..{} are not yet covered by the record; the next write adopts them",
                metadata.global_version, count
            ));
        }
        Some(rows(0, &entries)?)
    } else {
        None
    };

    if format.is_table() {
        let etag = record.etag.to_string();
        output::print_record("Primary Record", &key, Some(&etag), metadata);
        output::print_field("Nickname", &metadata.snapshot.nick_name);
        output::print_field("Said (in snapshot)", metadata.snapshot.history_saids.len());

        output::print_section("Cached Log", &rows(cache_start, &metadata.log)?);
        if let Some(events) = &events {
            output::print_section("Event Log", events);
        }
    } else {
        output::print_report(
            &Inspection {
                entity: key.to_string(),
                etag: record.etag.to_string(),
                metadata,
                events,
            },
            format,
        )?;
    }

    Ok(())
}
