//! Directory-backed stores.
//!
//! Layout under the store root:
//!
//! ```text
//! records/{entity_type}/{entity_id}.json       record + concurrency tag
//! events/{entity_type}/{entity_id}/{n}.json    entry n, tagged with its type key
//! ```
//!
//! Every file is written to a temporary sibling and renamed into place, so a
//! reader never observes a torn document. An append that fails part way
//! removes the entries it already wrote.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::ErrorKind;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use super::{EventStore, PrimaryStore};
use crate::error::{ErrorCode, ErrorContext, Result, SnaplogError};
use crate::events::{ETag, EntityKey, EventRegistry, TypedEvent};
use crate::protocol::metadata::{SnapshotMetadata, StorageRecord};

/// Reject path components that would escape the store root.
fn safe_component(name: &str) -> Result<&str> {
    if name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\'])
        || name.contains('\0')
    {
        return Err(SnaplogError::configuration(format!(
            "`{}` is not usable as a path component",
            name
        )));
    }
    Ok(name)
}

async fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, bytes)
        .await
        .context(format!("writing {}", tmp.display()))?;
    tokio::fs::rename(&tmp, path)
        .await
        .context(format!("renaming {}", tmp.display()))?;
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════════
// File Primary Store
// ═══════════════════════════════════════════════════════════════════════════════

/// Borrowed form of [`StorageRecord`], written without cloning the metadata.
#[derive(Serialize)]
struct RecordDocument<'a, V, E> {
    metadata: &'a SnapshotMetadata<V, E>,
    etag: &'a ETag,
}

/// Primary store holding one JSON document per entity.
pub struct FilePrimaryStore<V, E> {
    root: PathBuf,
    commit_lock: Mutex<()>,
    _marker: PhantomData<fn() -> (V, E)>,
}

impl<V, E> FilePrimaryStore<V, E> {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into().join("records"),
            commit_lock: Mutex::new(()),
            _marker: PhantomData,
        }
    }

    pub fn record_path(&self, key: &EntityKey) -> Result<PathBuf> {
        Ok(self
            .root
            .join(safe_component(&key.entity_type)?)
            .join(format!("{}.json", safe_component(&key.entity_id)?)))
    }
}

impl<V, E> FilePrimaryStore<V, E>
where
    V: DeserializeOwned,
    E: DeserializeOwned,
{
    async fn load(&self, path: &Path) -> Result<Option<StorageRecord<V, E>>> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(SnaplogError::unavailable(format!("reading {}", path.display()))
                    .with_source(e))
            }
        };
        serde_json::from_slice(&bytes)
            .with_code(
                ErrorCode::RecordCorrupted,
                format!("decoding {}", path.display()),
            )
            .map(Some)
    }
}

#[async_trait]
impl<V, E> PrimaryStore<V, E> for FilePrimaryStore<V, E>
where
    V: Serialize + DeserializeOwned + Send + Sync + 'static,
    E: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    #[instrument(skip(self), fields(store = "file"))]
    async fn read_state(&self, key: &EntityKey) -> Result<Option<StorageRecord<V, E>>> {
        let path = self.record_path(key)?;
        self.load(&path).await
    }

    #[instrument(skip(self, metadata), fields(store = "file", global_version = metadata.global_version))]
    async fn write_state(
        &self,
        key: &EntityKey,
        metadata: &SnapshotMetadata<V, E>,
        expected: Option<&ETag>,
    ) -> Result<ETag> {
        let path = self.record_path(key)?;
        let _guard = self.commit_lock.lock().await;

        let current = self.load(&path).await?.map(|r| r.etag);
        if current.as_ref() != expected {
            return Err(SnaplogError::conflict(format!(
                "{}: tag mismatch (expected {:?}, found {:?})",
                key, expected, current
            )));
        }

        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .context(format!("creating {}", dir.display()))?;
        }

        let etag = ETag::generate();
        let document = RecordDocument {
            metadata,
            etag: &etag,
        };
        write_atomically(&path, &serde_json::to_vec_pretty(&document)?).await?;

        debug!(entity = %key, etag = %etag, "Record committed");
        Ok(etag)
    }

    fn name(&self) -> &'static str {
        "file"
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// File Event Store
// ═══════════════════════════════════════════════════════════════════════════════

/// Event store writing one file per entry, decoded through an [`EventRegistry`].
pub struct FileEventStore<E> {
    root: PathBuf,
    registry: Arc<EventRegistry<E>>,
    append_lock: Mutex<()>,
}

impl<E> FileEventStore<E> {
    pub fn new(root: impl Into<PathBuf>, registry: Arc<EventRegistry<E>>) -> Self {
        Self {
            root: root.into().join("events"),
            registry,
            append_lock: Mutex::new(()),
        }
    }

    pub fn stream_dir(&self, key: &EntityKey) -> Result<PathBuf> {
        Ok(self
            .root
            .join(safe_component(&key.entity_type)?)
            .join(safe_component(&key.entity_id)?))
    }

    /// Undo a partial append, newest entry first.
    async fn remove_entries(dir: &Path, versions: std::ops::Range<u64>) {
        for version in versions.rev() {
            let path = dir.join(format!("{}.json", version));
            if let Err(e) = tokio::fs::remove_file(&path).await {
                warn!(path = %path.display(), error = %e, "Failed to remove partially appended entry");
            }
        }
    }

    async fn count_in(dir: &Path) -> Result<u64> {
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => {
                return Err(SnaplogError::unavailable(format!("listing {}", dir.display()))
                    .with_source(e))
            }
        };

        let mut count = 0;
        while let Some(entry) = entries
            .next_entry()
            .await
            .context(format!("listing {}", dir.display()))?
        {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            let is_entry = name
                .strip_suffix(".json")
                .map_or(false, |stem| stem.parse::<u64>().is_ok());
            if is_entry {
                count += 1;
            }
        }
        Ok(count)
    }
}

#[async_trait]
impl<E> EventStore<E> for FileEventStore<E>
where
    E: TypedEvent + Send + Sync + 'static,
{
    #[instrument(skip(self, entries), fields(store = "file", count = entries.len()))]
    async fn save_events(
        &self,
        key: &EntityKey,
        entries: &[E],
        expected_version: u64,
    ) -> Result<()> {
        let dir = self.stream_dir(key)?;
        let _guard = self.append_lock.lock().await;

        let actual = Self::count_in(&dir).await?;
        if actual != expected_version {
            return Err(SnaplogError::event_version_conflict(expected_version, actual));
        }

        // Encode everything first so a bad entry appends nothing.
        let documents = entries
            .iter()
            .map(|entry| -> Result<Vec<u8>> {
                let value = self.registry.encode(entry)?;
                Ok(serde_json::to_vec_pretty(&value)?)
            })
            .collect::<Result<Vec<_>>>()?;

        tokio::fs::create_dir_all(&dir)
            .await
            .context(format!("creating {}", dir.display()))?;
        for (offset, bytes) in documents.iter().enumerate() {
            let version = expected_version + offset as u64;
            let path = dir.join(format!("{}.json", version));
            if let Err(error) = write_atomically(&path, bytes).await {
                Self::remove_entries(&dir, expected_version..version).await;
                return Err(error);
            }
        }
        Ok(())
    }

    #[instrument(skip(self), fields(store = "file"))]
    async fn read_events(&self, key: &EntityKey, start: u64, count: u64) -> Result<Vec<E>> {
        let dir = self.stream_dir(key)?;
        let mut entries = Vec::new();

        for version in start..start.saturating_add(count) {
            let path = dir.join(format!("{}.json", version));
            let bytes = match tokio::fs::read(&path).await {
                Ok(bytes) => bytes,
                Err(e) if e.kind() == ErrorKind::NotFound => break,
                Err(e) => {
                    return Err(SnaplogError::unavailable(format!("reading {}", path.display()))
                        .with_source(e))
                }
            };
            let value: serde_json::Value = serde_json::from_slice(&bytes).with_code(
                ErrorCode::RecordCorrupted,
                format!("decoding {}", path.display()),
            )?;
            entries.push(self.registry.decode(value)?);
        }
        Ok(entries)
    }

    async fn events_count(&self, key: &EntityKey) -> Result<u64> {
        Self::count_in(&self.stream_dir(key)?).await
    }

    fn name(&self) -> &'static str {
        "file"
    }
}
