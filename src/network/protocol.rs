//! Protocol Records
//!
//! Wire format for the websocket connection. Every message is a JSON
//! [`Event`](crate::game::events::Event) envelope `{type, from, payload}`.
//!
//! The join handshake sends two of them:
//!
//! ```text
//! {"type":"room",   "from":<room id>, "payload":<RoomState>}
//! {"type":"assign", "from":<room id>, "payload":<entity id>}
//! ```
//!
//! After that the client sends `input` and receives `update`, `add`,
//! `deleted` and `game-over`.

use serde::{Serialize, Deserialize};

use crate::game::entity::TypeTag;
use crate::game::events::Payload;

// =============================================================================
// ROOM STATE
// =============================================================================

/// Room lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    /// Created, not ticking yet.
    #[default]
    Idle,
    /// Ticking.
    Running,
}

/// One serialized entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEntity {
    /// Type tag, selects the constructor.
    #[serde(rename = "type")]
    pub type_tag: TypeTag,
    /// Entity state blob.
    pub data: Payload,
}

/// Full room state, enough to rebuild every entity through the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomState {
    /// Room id.
    pub id: i64,
    /// Room type.
    #[serde(rename = "type")]
    pub room_type: String,
    /// Lifecycle.
    pub state: Lifecycle,
    /// Room-type specific state.
    #[serde(default)]
    pub custom_state: serde_json::Value,
    /// Live entities, ordered by id.
    #[serde(default)]
    pub elements: Vec<RawEntity>,
}

impl RoomState {
    /// Serialize to JSON text.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse from JSON text.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
