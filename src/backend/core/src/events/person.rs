//! Sample entity: a person who says things and has a nickname.
//!
//! Used by the CLI simulation and the integration tests. The event types carry
//! an id and creation time alongside their payload, and register their
//! discriminators explicitly in [`PersonEvent::registry`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::aggregate::{Aggregate, ApplyError};
use super::entry::{EventRegistry, TypedEvent};

/// Entity type under which persons are stored.
pub const PERSON_ENTITY_TYPE: &str = "person";

// =============================================================================
// Event Metadata
// =============================================================================

/// Fields common to every sample event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMeta {
    pub id: Uuid,
    pub created: DateTime<Utc>,
}

impl EventMeta {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            created: Utc::now(),
        }
    }
}

impl Default for EventMeta {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Events
// =============================================================================

/// Event: the person said something.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonSaid {
    #[serde(flatten)]
    pub meta: EventMeta,
    pub said: String,
}

/// Event: the person's nickname changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonNickNameUpdated {
    #[serde(flatten)]
    pub meta: EventMeta,
    pub new_nick_name: String,
}

/// All events of the person entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PersonEvent {
    Said(PersonSaid),
    NickNameUpdated(PersonNickNameUpdated),
}

impl PersonEvent {
    pub const SAID: &'static str = "person.said";
    pub const NICK_NAME_UPDATED: &'static str = "person.nickNameUpdated";

    pub fn said(content: impl Into<String>) -> Self {
        Self::Said(PersonSaid {
            meta: EventMeta::new(),
            said: content.into(),
        })
    }

    pub fn nick_name_updated(new_nick_name: impl Into<String>) -> Self {
        Self::NickNameUpdated(PersonNickNameUpdated {
            meta: EventMeta::new(),
            new_nick_name: new_nick_name.into(),
        })
    }

    pub fn meta(&self) -> &EventMeta {
        match self {
            Self::Said(e) => &e.meta,
            Self::NickNameUpdated(e) => &e.meta,
        }
    }

    /// Discriminator table for stores that persist entries by type key.
    pub fn registry() -> EventRegistry<PersonEvent> {
        EventRegistry::new()
            .with(Self::SAID, |v| serde_json::from_value(v).map(PersonEvent::Said))
            .with(Self::NICK_NAME_UPDATED, |v| {
                serde_json::from_value(v).map(PersonEvent::NickNameUpdated)
            })
    }
}

impl TypedEvent for PersonEvent {
    fn type_key(&self) -> &'static str {
        match self {
            Self::Said(_) => Self::SAID,
            Self::NickNameUpdated(_) => Self::NICK_NAME_UPDATED,
        }
    }

    fn to_json(&self) -> serde_json::Result<serde_json::Value> {
        match self {
            Self::Said(e) => serde_json::to_value(e),
            Self::NickNameUpdated(e) => serde_json::to_value(e),
        }
    }
}

// =============================================================================
// Person Aggregate
// =============================================================================

/// Reconstructed state of a person.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonState {
    pub nick_name: String,
    pub history_saids: Vec<String>,
}

impl Default for PersonState {
    fn default() -> Self {
        Self {
            nick_name: "anonymous".to_string(),
            history_saids: Vec::new(),
        }
    }
}

impl Aggregate<PersonEvent> for PersonState {
    fn apply(&mut self, entry: &PersonEvent) -> Result<(), ApplyError> {
        match entry {
            PersonEvent::Said(e) => {
                self.history_saids.push(e.said.clone());
            }
            PersonEvent::NickNameUpdated(e) => {
                if e.new_nick_name.trim().is_empty() {
                    return Err(ApplyError::new("nickname must not be blank"));
                }
                self.nick_name = e.new_nick_name.clone();
            }
        }
        Ok(())
    }
}
