//! Identity types and the typed event registry.
//!
//! This module provides:
//! - [`EntityKey`] namespacing an entity id by its entity type
//! - [`ReplicaId`] naming one cluster member (the write-vector key)
//! - [`ETag`], the opaque optimistic-concurrency token issued by a primary store
//! - [`TypedEvent`] and [`EventRegistry`] for storing entries under a string
//!   discriminator and decoding them back without runtime type scanning

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

use crate::error::{ErrorCode, Result, SnaplogError};

// =============================================================================
// Entity Key
// =============================================================================

/// Stable identity of a replicated entity, namespaced by entity type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityKey {
    pub entity_type: String,
    pub entity_id: String,
}

impl EntityKey {
    pub fn new(entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
        }
    }

    /// Flat stream name, e.g. `person-42`.
    pub fn stream_name(&self) -> String {
        format!("{}-{}", self.entity_type, self.entity_id)
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.entity_type, self.entity_id)
    }
}

// =============================================================================
// Replica Id
// =============================================================================

/// Identity of one cluster member hosting a replica. Unique per member.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReplicaId(pub String);

impl ReplicaId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReplicaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ReplicaId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// =============================================================================
// Concurrency Tag
// =============================================================================

/// Opaque optimistic-concurrency token. Changes on every successful commit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ETag(pub String);

impl ETag {
    /// Issue a fresh, unique tag.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl fmt::Display for ETag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Log Entry
// =============================================================================

/// Bound shared by every log entry type the protocol moves around.
///
/// Entries are immutable once appended; the protocol only clones them into
/// caches, notifications and snapshots.
pub trait LogEntry: Clone + Send + Sync + fmt::Debug + 'static {}

impl<T: Clone + Send + Sync + fmt::Debug + 'static> LogEntry for T {}

// =============================================================================
// Typed Events
// =============================================================================

/// Name of the JSON field holding an event's discriminator.
pub const TYPE_KEY_FIELD: &str = "type_key";

/// An entry that knows its stable storage discriminator.
pub trait TypedEvent {
    /// Stable discriminator, e.g. `person.said`.
    fn type_key(&self) -> &'static str;

    /// Serialize the event payload (without the discriminator).
    fn to_json(&self) -> serde_json::Result<serde_json::Value>;
}

/// Decodes one JSON payload into an entry.
pub type DecodeFn<E> = fn(serde_json::Value) -> serde_json::Result<E>;

/// Explicit discriminator → decoder table, populated at startup by the entity
/// module that owns the event types.
pub struct EventRegistry<E> {
    decoders: HashMap<&'static str, DecodeFn<E>>,
}

impl<E> Default for EventRegistry<E> {
    fn default() -> Self {
        Self {
            decoders: HashMap::new(),
        }
    }
}

impl<E> fmt::Debug for EventRegistry<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<_> = self.decoders.keys().collect();
        keys.sort();
        f.debug_struct("EventRegistry").field("type_keys", &keys).finish()
    }
}

impl<E> EventRegistry<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a decoder. A later registration for the same key replaces the
    /// earlier one.
    pub fn register(&mut self, type_key: &'static str, decode: DecodeFn<E>) -> &mut Self {
        self.decoders.insert(type_key, decode);
        self
    }

    /// Builder form of [`register`](Self::register).
    pub fn with(mut self, type_key: &'static str, decode: DecodeFn<E>) -> Self {
        self.register(type_key, decode);
        self
    }

    pub fn contains(&self, type_key: &str) -> bool {
        self.decoders.contains_key(type_key)
    }

    pub fn len(&self) -> usize {
        self.decoders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decoders.is_empty()
    }

    /// Decode a stored payload by dispatching on its discriminator field.
    pub fn decode(&self, value: serde_json::Value) -> Result<E> {
        let type_key = value
            .get(TYPE_KEY_FIELD)
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                SnaplogError::new(
                    ErrorCode::RecordCorrupted,
                    format!("stored event has no `{}` field", TYPE_KEY_FIELD),
                )
            })?
            .to_string();

        let decode = self.decoders.get(type_key.as_str()).ok_or_else(|| {
            SnaplogError::new(
                ErrorCode::UnknownEventType,
                format!("no decoder registered for `{}`", type_key),
            )
        })?;

        decode(value).map_err(SnaplogError::from)
    }
}

impl<E: TypedEvent> EventRegistry<E> {
    /// Encode an event as its payload plus the discriminator field.
    pub fn encode(&self, event: &E) -> Result<serde_json::Value> {
        let mut value = event.to_json()?;
        match value {
            serde_json::Value::Object(ref mut map) => {
                map.insert(
                    TYPE_KEY_FIELD.to_string(),
                    serde_json::Value::String(event.type_key().to_string()),
                );
                Ok(value)
            }
            _ => Err(SnaplogError::new(
                ErrorCode::SerializationError,
                format!("event `{}` must serialize to a JSON object", event.type_key()),
            )),
        }
    }
}
