//! Room Sessions
//!
//! Runs each room in its own tokio task. The task owns the [`Room`]; the rest
//! of the server reaches it through a [`RoomHandle`].
//!
//! Queues are created before the room itself ([`PendingRoom`]) so handles to
//! rooms that reference each other can be wired into the [`Rules`] that the
//! rooms are then built with.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::game::entity::Entity;
use crate::game::events::Event;
use crate::game::handle::{RoomCommand, RoomHandle};
use crate::game::registry::{RoomSettings, Rules};
use crate::game::room::{Room, RoomError};

/// Room whose queues exist but whose task is not running yet.
#[derive(Debug)]
pub struct PendingRoom {
    id: i64,
    room_type: Arc<str>,
    handle: RoomHandle,
    events: (mpsc::Sender<Event>, mpsc::Receiver<Event>),
    commands: mpsc::Receiver<RoomCommand>,
}

impl PendingRoom {
    /// Create the queues of a room.
    pub fn new(id: i64, room_type: impl Into<Arc<str>>, settings: &RoomSettings) -> Self {
        let room_type = room_type.into();
        let (events_tx, events_rx) = mpsc::channel(settings.event_capacity);
        let (commands_tx, commands_rx) = mpsc::channel(settings.event_capacity);
        let handle = RoomHandle::new(id, room_type.clone(), events_tx.clone(), commands_tx);
        Self {
            id,
            room_type,
            handle,
            events: (events_tx, events_rx),
            commands: commands_rx,
        }
    }

    /// Handle to the room, usable before it runs. Commands queue up.
    pub fn handle(&self) -> RoomHandle {
        self.handle.clone()
    }

    /// Build the room without starting its task.
    pub fn build(
        self,
        rules: Arc<Rules>,
        entities: Vec<Box<dyn Entity>>,
    ) -> Result<(Room, mpsc::Receiver<RoomCommand>), RoomError> {
        let room = Room::with_queue(self.id, self.room_type, rules, entities, self.events)?;
        Ok((room, self.commands))
    }

    /// Build the room and spawn its task.
    pub fn launch(self, rules: Arc<Rules>, entities: Vec<Box<dyn Entity>>) -> Result<RoomHandle, RoomError> {
        let handle = self.handle();
        let (room, commands) = self.build(rules, entities)?;
        tokio::spawn(run_room(room, commands));
        Ok(handle)
    }
}

/// Create and launch a room with a fresh id.
pub fn spawn_room(
    rules: Arc<Rules>,
    room_type: &str,
    entities: Vec<Box<dyn Entity>>,
) -> Result<RoomHandle, RoomError> {
    let pending = PendingRoom::new(rules.room_ids.next(), room_type, &rules.settings);
    pending.launch(rules, entities)
}

/// Serve one command between ticks.
fn serve_command(room: &mut Room, command: RoomCommand) {
    match command {
        RoomCommand::Join { binding, reply } => {
            let result = room.join(binding);
            if let Err(e) = &result {
                warn!("Room {}: join rejected: {}", room.id(), e);
            }
            let _ = reply.send(result);
        }
        RoomCommand::Leave { id } => room.leave(id),
        RoomCommand::Start => room.start(),
        RoomCommand::Snapshot { reply } => {
            let _ = reply.send(room.to_state());
        }
        // handled by the loop
        RoomCommand::Stop => {}
    }
}

/// Room task: ticks at the configured cadence while running and serves
/// commands in between.
///
/// Exits on [`RoomCommand::Stop`] or once every handle is dropped. A tick
/// slower than the interval is logged and the missed ticks are skipped.
pub async fn run_room(mut room: Room, mut commands: mpsc::Receiver<RoomCommand>) {
    let tick_interval = room.rules().settings.tick_interval;
    let mut ticker = interval(tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last_tick = Instant::now();

    info!("Room {} ({}) task started", room.id(), room.room_type());

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let now = Instant::now();
                let elapsed = now.duration_since(last_tick);
                last_tick = now;
                if !room.is_running() {
                    continue;
                }

                let report = room.tick(elapsed);
                #[cfg(feature = "debug-tracing")]
                tracing::trace!(room = room.id(), ?elapsed, ?report, "tick");
                let spent = now.elapsed();
                if spent > tick_interval {
                    warn!("Room {} overloaded: tick took {:?} (budget {:?})", room.id(), spent, tick_interval);
                }
                if !report.deleted.is_empty() {
                    debug!("Room {} swept {:?}", room.id(), report.deleted);
                }
            }
            command = commands.recv() => {
                match command {
                    Some(RoomCommand::Stop) | None => break,
                    Some(command) => serve_command(&mut room, command),
                }
            }
        }
    }

    info!("Room {} ({}) task stopped", room.id(), room.room_type());
}
