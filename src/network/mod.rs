//! Network Layer
//!
//! WebSocket server for real-time multiplayer communication.
//! Rooms never block on the network: every queue crossing this layer is
//! bounded and written with `try_send`.

pub mod connection;
pub mod protocol;
pub mod server;
pub mod session;

pub use connection::{serve_client, Disconnect};
pub use protocol::{Lifecycle, RawEntity, RoomState};
pub use server::{GameServer, GameServerError, RoomSelector, ServerConfig};
pub use session::{run_room, spawn_room, PendingRoom};
