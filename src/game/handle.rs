//! Room Handle
//!
//! Cloneable reference to a room running in its own task. Everything
//! outside the room task talks to the room through one of these: client
//! events go into the bounded event queue, lifecycle requests go through
//! the command channel and are served between ticks.

use std::fmt;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use crate::game::entity::EntityId;
use crate::game::events::Event;
use crate::game::room::{ClientBinding, RoomError};
use crate::network::protocol::RoomState;

/// Request served by the room task between ticks.
pub enum RoomCommand {
    /// Bind a connection and run the join handshake.
    Join {
        /// Connection queues.
        binding: ClientBinding,
        /// Assigned entity id.
        reply: oneshot::Sender<Result<EntityId, RoomError>>,
    },
    /// Unbind a connection. The entity stays in the room.
    Leave {
        /// Entity bound to the connection.
        id: EntityId,
    },
    /// Start ticking without waiting for a player.
    Start,
    /// Full serialized state.
    Snapshot {
        /// Room state.
        reply: oneshot::Sender<Result<RoomState, RoomError>>,
    },
    /// Stop the room task.
    Stop,
}

impl fmt::Debug for RoomCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoomCommand::Join { .. } => f.write_str("Join"),
            RoomCommand::Leave { id } => write!(f, "Leave({})", id),
            RoomCommand::Start => f.write_str("Start"),
            RoomCommand::Snapshot { .. } => f.write_str("Snapshot"),
            RoomCommand::Stop => f.write_str("Stop"),
        }
    }
}

/// Reference to a room task.
#[derive(Clone)]
pub struct RoomHandle {
    id: i64,
    room_type: Arc<str>,
    events: mpsc::Sender<Event>,
    commands: mpsc::Sender<RoomCommand>,
}

impl RoomHandle {
    /// Wrap the sending halves of a room's queues.
    pub fn new(
        id: i64,
        room_type: Arc<str>,
        events: mpsc::Sender<Event>,
        commands: mpsc::Sender<RoomCommand>,
    ) -> Self {
        Self { id, room_type, events, commands }
    }

    /// Room id.
    pub fn id(&self) -> i64 {
        self.id
    }

    /// Room type.
    pub fn room_type(&self) -> &str {
        &self.room_type
    }

    /// Enqueue a client event without waiting.
    ///
    /// Returns `false` when the event was dropped: the queue is full or the
    /// room is gone. A full queue is an overload signal, not an error.
    pub fn submit(&self, event: Event) -> bool {
        match self.events.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                warn!("Room {} overloaded, dropping {} from {}", self.id, event.kind, event.from);
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!("Room {} closed, event dropped", self.id);
                false
            }
        }
    }

    /// Join the room. Returns the entity assigned to the connection.
    pub async fn join(&self, binding: ClientBinding) -> Result<EntityId, RoomError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(RoomCommand::Join { binding, reply })
            .await
            .map_err(|_| RoomError::RoomClosed)?;
        rx.await.map_err(|_| RoomError::RoomClosed)?
    }

    /// Leave the room.
    pub async fn leave(&self, id: EntityId) {
        if self.commands.send(RoomCommand::Leave { id }).await.is_err() {
            debug!("Room {} closed before player {} left", self.id, id);
        }
    }

    /// Start ticking.
    pub async fn start(&self) -> Result<(), RoomError> {
        self.commands
            .send(RoomCommand::Start)
            .await
            .map_err(|_| RoomError::RoomClosed)
    }

    /// Fetch the full room state.
    pub async fn snapshot(&self) -> Result<RoomState, RoomError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(RoomCommand::Snapshot { reply })
            .await
            .map_err(|_| RoomError::RoomClosed)?;
        rx.await.map_err(|_| RoomError::RoomClosed)?
    }

    /// Ask the room task to stop after the current tick.
    pub async fn stop(&self) {
        let _ = self.commands.send(RoomCommand::Stop).await;
    }

    /// Whether the room task is gone.
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }
}

impl fmt::Debug for RoomHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoomHandle")
            .field("id", &self.id)
            .field("room_type", &self.room_type)
            .finish()
    }
}
