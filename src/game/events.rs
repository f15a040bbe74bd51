//! Events
//!
//! The `{type, from, payload}` envelope shared by the wire protocol and the
//! room's internal bookkeeping (creation, deletion, state deltas, semantic
//! events raised by entities).

use std::fmt;
use serde::{Serialize, Deserialize};
use serde::de::DeserializeOwned;
use serde_json::value::RawValue;

/// Opaque JSON document carried verbatim.
///
/// Entity state and input travel as payloads. The room never looks inside
/// one; it only compares bytes to detect changes.
#[derive(Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(Box<RawValue>);

impl Payload {
    /// The JSON `null` document.
    pub fn null() -> Self {
        Self(RawValue::NULL.to_owned())
    }

    /// Serialize a value into a payload.
    pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Self, serde_json::Error> {
        serde_json::value::to_raw_value(value).map(Self)
    }

    /// Deserialize the payload into a concrete type.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(self.0.get())
    }

    /// Wrap already-serialized JSON text. Fails if the text is not valid JSON.
    pub fn from_text(text: impl Into<String>) -> Result<Self, serde_json::Error> {
        RawValue::from_string(text.into()).map(Self)
    }

    /// JSON text of the payload.
    pub fn as_str(&self) -> &str {
        self.0.get()
    }

    /// Raw bytes, used for change detection.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.get().as_bytes()
    }

    /// True for the `null` document.
    pub fn is_null(&self) -> bool {
        self.0.get() == "null"
    }
}

impl Default for Payload {
    fn default() -> Self {
        Self::null()
    }
}

impl PartialEq for Payload {
    fn eq(&self, other: &Self) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl Eq for Payload {}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Payload({})", self.0.get())
    }
}

/// Event kind. Serialized as its wire string.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventKind {
    /// Replace an entity's state (client -> server, server -> client).
    Update,
    /// Replace a playable entity's input (client -> server).
    Input,
    /// Mark an entity for end-of-tick deletion.
    Delete,
    /// Construct an entity from a type tag and a state blob.
    Add,
    /// Entity removed (server -> client), removes immediately when received.
    Deleted,
    /// Full room state, first handshake message.
    Room,
    /// Assigned entity id, second handshake message.
    Assign,
    /// The client's own entity was deleted.
    GameOver,
    /// Room-type specific event, dispatched through the handler table.
    Custom(String),
}

impl EventKind {
    /// Wire name of the kind.
    pub fn as_str(&self) -> &str {
        match self {
            EventKind::Update => "update",
            EventKind::Input => "input",
            EventKind::Delete => "delete",
            EventKind::Add => "add",
            EventKind::Deleted => "deleted",
            EventKind::Room => "room",
            EventKind::Assign => "assign",
            EventKind::GameOver => "game-over",
            EventKind::Custom(name) => name,
        }
    }

    /// Build a custom kind.
    pub fn custom(name: impl Into<String>) -> Self {
        EventKind::from(name.into())
    }
}

impl From<String> for EventKind {
    fn from(name: String) -> Self {
        match name.as_str() {
            "update" => EventKind::Update,
            "input" => EventKind::Input,
            "delete" => EventKind::Delete,
            "add" => EventKind::Add,
            "deleted" => EventKind::Deleted,
            "room" => EventKind::Room,
            "assign" => EventKind::Assign,
            "game-over" => EventKind::GameOver,
            _ => EventKind::Custom(name),
        }
    }
}

impl From<&str> for EventKind {
    fn from(name: &str) -> Self {
        EventKind::from(name.to_string())
    }
}

impl From<EventKind> for String {
    fn from(kind: EventKind) -> Self {
        match kind {
            EventKind::Custom(name) => name,
            other => other.as_str().to_string(),
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event envelope.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Event kind.
    #[serde(rename = "type")]
    pub kind: EventKind,
    /// Origin. An entity id, except for `add` (type tag) and the handshake
    /// messages (room id).
    #[serde(default)]
    pub from: i64,
    /// Opaque body.
    #[serde(default = "Payload::null")]
    pub payload: Payload,
}

impl Event {
    /// Event with a `null` payload.
    pub fn new(kind: EventKind, from: i64) -> Self {
        Self {
            kind,
            from,
            payload: Payload::null(),
        }
    }

    /// Event with a payload.
    pub fn with_payload(kind: EventKind, from: i64, payload: Payload) -> Self {
        Self { kind, from, payload }
    }

    /// Serialize to JSON text.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse from JSON text.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
