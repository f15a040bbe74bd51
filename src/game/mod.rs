//! Simulation Module
//!
//! Rooms, the entities they hold and the rules they run by.
//!
//! ## Module Structure
//!
//! - `entity`: Entity contract and capability traits
//! - `events`: `{type, from, payload}` event envelope
//! - `registry`: Type registry, room types and settings
//! - `room`: Authoritative room and its tick
//! - `context`: Room access for movers during a tick
//! - `handle`: Cloneable reference to a running room task
//! - `elements`: Built-in entities
//! - `render`: Canvas and input abstractions for clients

pub mod context;
pub mod elements;
pub mod entity;
pub mod events;
pub mod handle;
pub mod registry;
pub mod render;
pub mod room;

// Re-export key types
pub use context::TickContext;
pub use entity::{Capabilities, Collidable, Drawable, Entity, EntityError, EntityId, Movable, Playable, TypeTag};
pub use events::{Event, EventKind, Payload};
pub use handle::{RoomCommand, RoomHandle};
pub use registry::{RoomIds, RoomSettings, RoomType, Rules, TypeRegistry};
pub use room::{ClientBinding, Room, RoomError, TickReport};
