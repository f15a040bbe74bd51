//! # Tickroom Server
//!
//! Authoritative real-time room server. Each room holds a set of entities,
//! advances them on a fixed tick, resolves collisions between them and
//! streams state changes to connected clients over WebSocket.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      TICKROOM SERVER                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Geometry                                  │
//! │  ├── vec2.rs     - 2D vector                                 │
//! │  └── shape.rs    - Box / circle / chain collision            │
//! │                                                              │
//! │  game/           - Simulation                                │
//! │  ├── entity.rs   - Entity contract and capabilities          │
//! │  ├── events.rs   - {type, from, payload} envelope            │
//! │  ├── registry.rs - Type registry, room types, settings       │
//! │  ├── room.rs     - Room state and tick                       │
//! │  ├── context.rs  - Room access during movement               │
//! │  ├── handle.rs   - Handle to a room task                     │
//! │  ├── elements.rs - Built-in entities                         │
//! │  └── render.rs   - Canvas and input abstractions             │
//! │                                                              │
//! │  network/        - Networking                                │
//! │  ├── server.rs   - WebSocket dispatcher                      │
//! │  ├── connection.rs - Per-client loop                         │
//! │  ├── session.rs  - Room tasks                                │
//! │  └── protocol.rs - Room state records                        │
//! │                                                              │
//! │  demo/           - Snake demo wiring                         │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Tick Ordering
//!
//! Within one tick: snapshot, movement, collision, events, deletion sweep,
//! diff broadcast, room-type hook. Client events therefore reach movement
//! logic on the next tick, while deletions and diffs go out in the tick
//! that caused them.
//!
//! Rooms never block on clients. Every queue between a room and the network
//! is bounded; when one is full the newest message is dropped and a warning
//! is logged.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

use std::time::Duration;

pub mod core;
pub mod demo;
pub mod game;
pub mod network;

// Re-export commonly used types
pub use core::{collide, Aabb, Circle, Collision, Shape, Vec2};
pub use game::{Entity, EntityId, Event, EventKind, Payload, Room, RoomError, RoomHandle, Rules, TypeRegistry};
pub use network::{GameServer, RoomState, ServerConfig};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default room tick interval (about 60 Hz)
pub const TICK_INTERVAL: Duration = Duration::from_millis(16);

/// Pending event queue capacity per room
pub const EVENT_QUEUE_CAPACITY: usize = 100;

/// Maximum queued events dispatched per tick
pub const MAX_EVENTS_PER_TICK: usize = 100;

/// Number of draw layers
pub const LAYERS: usize = 10;

/// Layer used by drawables that do not pick one
pub const DEFAULT_LAYER: usize = 5;
