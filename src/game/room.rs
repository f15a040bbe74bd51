//! Room
//!
//! Authoritative simulation context. A room owns its entity set and the
//! capability indices derived from it, the bindings of connected clients,
//! and the bounded queue of pending client events.
//!
//! One tick runs, in this order:
//!
//! 1. snapshot the state of every movable entity
//! 2. movement pass, each mover gets a [`TickContext`]
//! 3. collision pass over every ordered pair of collidables
//! 4. event processing: events raised this tick, then up to
//!    `events_per_tick` queued client events
//! 5. deletion sweep
//! 6. diff broadcast of movables whose state bytes changed
//! 7. room-type tick hook
//!
//! Client events therefore reach movement logic one tick after they are
//! dispatched, while this tick's deletions and diffs go out in this tick.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

use crate::game::context::TickContext;
use crate::game::entity::{Capabilities, Entity, EntityError, EntityId, TypeTag};
use crate::game::events::{Event, EventKind, Payload};
use crate::game::handle::RoomHandle;
use crate::game::registry::Rules;
use crate::game::render::Canvas;
use crate::network::protocol::{Lifecycle, RawEntity, RoomState};
use crate::LAYERS;

/// Room errors.
#[derive(Debug, thiserror::Error)]
pub enum RoomError {
    /// Event or request referenced an entity the room does not hold.
    #[error("Entity {id} not found on {op}")]
    EntityNotFound {
        /// Entity id.
        id: EntityId,
        /// Operation that failed.
        op: &'static str,
    },

    /// Inserted an entity whose id is live.
    #[error("Entity {0} already exists")]
    DuplicateEntity(EntityId),

    /// An `update` tried to change the entity's id.
    #[error("Update for entity {expected} changed its id to {found}")]
    IdMismatch {
        /// Id the update was addressed to.
        expected: EntityId,
        /// Id the new state carried.
        found: EntityId,
    },

    /// Type tag missing from the registry.
    #[error("Unknown entity type {0}")]
    UnknownType(TypeTag),

    /// State blob rejected for a known type.
    #[error("Failed to construct entity of type {tag}: {source}")]
    Construct {
        /// Type tag.
        tag: TypeTag,
        /// Cause.
        #[source]
        source: EntityError,
    },

    /// Assignment policy found no free entity.
    #[error("Room full")]
    RoomFull,

    /// Entity already bound to a connection.
    #[error("Entity {0} is already bound to a connection")]
    AlreadyJoined(EntityId),

    /// Assignment policy picked an entity that cannot take input.
    #[error("Entity {0} is not playable")]
    NotPlayable(EntityId),

    /// Room type has no assignment policy.
    #[error("No assignment policy for room type {0}")]
    NoAssignPolicy(String),

    /// Client queues closed or full.
    #[error("Client bound to entity {0} is unreachable")]
    ClientUnreachable(EntityId),

    /// Room task is gone.
    #[error("Room closed")]
    RoomClosed,

    /// Entity error.
    #[error("Entity error: {0}")]
    Entity(#[from] EntityError),

    /// Serialization error.
    #[error("Codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Queues of one connected client, held by the room it is in.
#[derive(Debug)]
pub struct ClientBinding {
    outbound: mpsc::Sender<Event>,
    transfer: mpsc::Sender<RoomHandle>,
    pub(crate) transferring: bool,
}

impl ClientBinding {
    /// Bind an outbound event queue and the connection's transfer slot.
    pub fn new(outbound: mpsc::Sender<Event>, transfer: mpsc::Sender<RoomHandle>) -> Self {
        Self {
            outbound,
            transfer,
            transferring: false,
        }
    }

    fn send(&self, id: EntityId, event: Event) {
        match self.outbound.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                warn!("Outbound queue full for player {}, dropping {}", id, event.kind);
            }
            Err(TrySendError::Closed(_)) => {
                debug!("Player {} connection closed", id);
            }
        }
    }
}

/// Deposit `target` in a client's transfer slot.
///
/// `Ok(true)` when the slot was free. `Ok(false)` when a transfer is already
/// pending; the request is dropped. The binding is kept (marked as
/// transferring) until the connection leaves.
pub(crate) fn offer_transfer(
    clients: &mut BTreeMap<EntityId, ClientBinding>,
    id: EntityId,
    target: &RoomHandle,
) -> Result<bool, RoomError> {
    let binding = clients
        .get_mut(&id)
        .ok_or(RoomError::EntityNotFound { id, op: "transfer" })?;
    if binding.transferring {
        warn!("Player {} is busy, transfer to room {} dropped", id, target.id());
        return Ok(false);
    }
    match binding.transfer.try_send(target.clone()) {
        Ok(()) => {
            binding.transferring = true;
            Ok(true)
        }
        Err(TrySendError::Full(_)) => {
            warn!("Player {} is busy, transfer to room {} dropped", id, target.id());
            Ok(false)
        }
        Err(TrySendError::Closed(_)) => Err(RoomError::ClientUnreachable(id)),
    }
}

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Movers advanced.
    pub moved: usize,
    /// Ordered collision pairs tested.
    pub collision_checks: usize,
    /// Events dispatched, raised and queued.
    pub events_processed: usize,
    /// Entities removed by the deletion sweep.
    pub deleted: Vec<EntityId>,
    /// `update` broadcasts sent.
    pub updates: usize,
}

/// Simulation context.
pub struct Room {
    id: i64,
    room_type: Arc<str>,
    lifecycle: Lifecycle,
    /// Room-type specific state, free for handlers and hooks to use.
    pub custom_state: serde_json::Value,
    rules: Arc<Rules>,

    entities: BTreeMap<EntityId, Box<dyn Entity>>,
    capabilities: BTreeMap<EntityId, Capabilities>,
    movable: BTreeSet<EntityId>,
    collidable: BTreeSet<EntityId>,
    playable: BTreeSet<EntityId>,
    draw_layers: Vec<BTreeSet<EntityId>>,

    clients: BTreeMap<EntityId, ClientBinding>,
    events_tx: mpsc::Sender<Event>,
    events_rx: mpsc::Receiver<Event>,

    to_delete: BTreeSet<EntityId>,
    snapshot: BTreeMap<EntityId, Payload>,
    raised: Vec<Event>,
    next_id: EntityId,
}

impl Room {
    /// Create an idle room holding `entities`.
    pub fn new(
        id: i64,
        room_type: impl Into<Arc<str>>,
        rules: Arc<Rules>,
        entities: Vec<Box<dyn Entity>>,
    ) -> Result<Self, RoomError> {
        let queue = mpsc::channel(rules.settings.event_capacity);
        Self::with_queue(id, room_type, rules, entities, queue)
    }

    /// Create an idle room over an existing event queue.
    pub fn with_queue(
        id: i64,
        room_type: impl Into<Arc<str>>,
        rules: Arc<Rules>,
        entities: Vec<Box<dyn Entity>>,
        (events_tx, events_rx): (mpsc::Sender<Event>, mpsc::Receiver<Event>),
    ) -> Result<Self, RoomError> {
        let mut room = Self {
            id,
            room_type: room_type.into(),
            lifecycle: Lifecycle::Idle,
            custom_state: serde_json::Value::Null,
            rules,
            entities: BTreeMap::new(),
            capabilities: BTreeMap::new(),
            movable: BTreeSet::new(),
            collidable: BTreeSet::new(),
            playable: BTreeSet::new(),
            draw_layers: vec![BTreeSet::new(); LAYERS],
            clients: BTreeMap::new(),
            events_tx,
            events_rx,
            to_delete: BTreeSet::new(),
            snapshot: BTreeMap::new(),
            raised: Vec::new(),
            next_id: 0,
        };
        for entity in entities {
            room.insert_entity(entity)?;
        }
        Ok(room)
    }

    /// Rebuild a room from its serialized state.
    pub fn from_state(state: RoomState, rules: Arc<Rules>) -> Result<Self, RoomError> {
        let mut entities = Vec::with_capacity(state.elements.len());
        for raw in &state.elements {
            entities.push(rules.registry.restore(raw.type_tag, &raw.data)?);
        }
        let mut room = Self::new(state.id, state.room_type, rules, entities)?;
        room.custom_state = state.custom_state;
        room.lifecycle = state.state;
        Ok(room)
    }

    /// Serialize the full room state, entities ordered by id.
    pub fn to_state(&self) -> Result<RoomState, RoomError> {
        let mut elements = Vec::with_capacity(self.entities.len());
        for entity in self.entities.values() {
            elements.push(RawEntity {
                type_tag: entity.type_tag(),
                data: entity.state()?,
            });
        }
        Ok(RoomState {
            id: self.id,
            room_type: self.room_type.to_string(),
            state: self.lifecycle,
            custom_state: self.custom_state.clone(),
            elements,
        })
    }

    // =========================================================================
    // ACCESSORS
    // =========================================================================

    /// Room id.
    pub fn id(&self) -> i64 {
        self.id
    }

    /// Room type.
    pub fn room_type(&self) -> &str {
        &self.room_type
    }

    /// Lifecycle.
    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    /// Whether the room is ticking.
    pub fn is_running(&self) -> bool {
        self.lifecycle == Lifecycle::Running
    }

    /// Shared configuration.
    pub fn rules(&self) -> &Arc<Rules> {
        &self.rules
    }

    /// Look up an entity.
    pub fn entity(&self, id: EntityId) -> Option<&(dyn Entity + 'static)> {
        self.entities.get(&id).map(|e| e.as_ref())
    }

    /// Look up an entity mutably.
    pub fn entity_mut(&mut self, id: EntityId) -> Option<&mut (dyn Entity + 'static)> {
        self.entities.get_mut(&id).map(|e| e.as_mut())
    }

    /// Live entity ids, ascending.
    pub fn entity_ids(&self) -> Vec<EntityId> {
        self.entities.keys().copied().collect()
    }

    /// Number of live entities.
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Whether the room holds no entity.
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Capabilities resolved when the entity was inserted.
    pub fn capabilities(&self, id: EntityId) -> Option<Capabilities> {
        self.capabilities.get(&id).copied()
    }

    /// Index membership of an entity, read back from the indices.
    pub fn indexed(&self, id: EntityId) -> Capabilities {
        Capabilities {
            movable: self.movable.contains(&id),
            collidable: self.collidable.contains(&id),
            playable: self.playable.contains(&id),
            layer: self.draw_layers.iter().position(|layer| layer.contains(&id)),
        }
    }

    /// Entity ids bound to connected clients, ascending. Clients with a
    /// pending transfer are not listed.
    pub fn players(&self) -> Vec<EntityId> {
        self.clients
            .iter()
            .filter(|(_, binding)| !binding.transferring)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Allocate a fresh entity id.
    pub fn next_id(&mut self) -> EntityId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Sender for the pending event queue.
    pub fn event_sender(&self) -> mpsc::Sender<Event> {
        self.events_tx.clone()
    }

    /// Enqueue an event without waiting. `false` when the queue is full.
    pub fn submit(&self, event: Event) -> bool {
        match self.events_tx.try_send(event) {
            Ok(()) => true,
            Err(e) => {
                warn!("Room {} overloaded, event dropped: {}", self.id, e);
                false
            }
        }
    }

    // =========================================================================
    // ENTITY SET
    // =========================================================================

    /// Insert an entity and index its capabilities.
    ///
    /// While the room is running an `add` is broadcast, `from` carrying the
    /// type tag.
    pub fn insert_entity(&mut self, mut entity: Box<dyn Entity>) -> Result<(), RoomError> {
        let id = entity.id();
        if self.entities.contains_key(&id) {
            return Err(RoomError::DuplicateEntity(id));
        }

        let caps = Capabilities::detect(entity.as_mut());
        if caps.movable {
            self.movable.insert(id);
        }
        if caps.collidable {
            self.collidable.insert(id);
        }
        if caps.playable {
            self.playable.insert(id);
        }
        if let Some(layer) = caps.layer {
            self.draw_layers[layer].insert(id);
        }
        self.capabilities.insert(id, caps);
        if id >= self.next_id {
            self.next_id = id + 1;
        }

        if self.is_running() {
            match entity.state() {
                Ok(state) => {
                    self.broadcast(&Event::with_payload(EventKind::Add, entity.type_tag(), state));
                }
                Err(e) => warn!("Room {}: cannot announce entity {}: {}", self.id, id, e),
            }
        }
        self.entities.insert(id, entity);
        Ok(())
    }

    /// Remove an entity from the set and every index.
    pub fn remove_entity(&mut self, id: EntityId) -> Option<Box<dyn Entity>> {
        let entity = self.entities.remove(&id)?;
        if let Some(caps) = self.capabilities.remove(&id) {
            if caps.movable {
                self.movable.remove(&id);
            }
            if caps.collidable {
                self.collidable.remove(&id);
            }
            if caps.playable {
                self.playable.remove(&id);
            }
            if let Some(layer) = caps.layer {
                self.draw_layers[layer].remove(&id);
            }
        }
        Some(entity)
    }

    // =========================================================================
    // TICK
    // =========================================================================

    /// Switch to running. No-op when already running.
    pub fn start(&mut self) {
        if self.lifecycle == Lifecycle::Idle {
            self.lifecycle = Lifecycle::Running;
            info!("Room {} ({}) started", self.id, self.room_type);
        }
    }

    /// Run one tick.
    pub fn tick(&mut self, elapsed: Duration) -> TickReport {
        let mut report = TickReport::default();

        // 1. Snapshot
        self.snapshot.clear();
        for id in &self.movable {
            if let Some(entity) = self.entities.get(id) {
                match entity.state() {
                    Ok(state) => {
                        self.snapshot.insert(*id, state);
                    }
                    Err(e) => warn!("Room {}: state of {} unavailable: {}", self.id, id, e),
                }
            }
        }

        // 2. Movement
        let mut spawned = Vec::new();
        let movers: Vec<EntityId> = self.movable.iter().copied().collect();
        for id in movers {
            let mut mover = match self.entities.remove(&id) {
                Some(entity) => entity,
                None => continue,
            };
            let mut departed = Vec::new();
            let result = match mover.as_movable() {
                Some(movable) => {
                    let mut ctx = TickContext {
                        entities: &mut self.entities,
                        clients: &mut self.clients,
                        next_id: &mut self.next_id,
                        spawned: &mut spawned,
                        to_delete: &mut self.to_delete,
                        raised: &mut self.raised,
                        departed: &mut departed,
                        rules: self.rules.as_ref(),
                    };
                    movable.advance(elapsed, &mut ctx)
                }
                None => Ok(()),
            };
            self.entities.insert(id, mover);
            report.moved += 1;
            if let Err(e) = result {
                warn!("Room {}: entity {} failed to move: {}", self.id, id, e);
            }
            for gone in departed {
                self.depart(gone);
            }
        }
        for entity in spawned {
            let id = entity.id();
            if let Err(e) = self.insert_entity(entity) {
                warn!("Room {}: spawn of {} rejected: {}", self.id, id, e);
            }
        }

        // 3. Collision
        let colliders: Vec<EntityId> = self.collidable.iter().copied().collect();
        for &i in &colliders {
            let mut entity = match self.entities.remove(&i) {
                Some(entity) => entity,
                None => continue,
            };
            if let Some(collidable) = entity.as_collidable_mut() {
                for &j in &colliders {
                    if i == j {
                        continue;
                    }
                    if let Some(other) = self.entities.get(&j) {
                        report.collision_checks += 1;
                        if let Err(e) = collidable.collide(other.as_ref()) {
                            warn!("Room {}: collision {} -> {} failed: {}", self.id, i, j, e);
                        }
                    }
                }
            }
            self.entities.insert(i, entity);
        }

        // 4. Events
        let raised = std::mem::take(&mut self.raised);
        for event in raised {
            self.dispatch(event);
            report.events_processed += 1;
        }
        for _ in 0..self.rules.settings.events_per_tick {
            match self.events_rx.try_recv() {
                Ok(event) => {
                    self.dispatch(event);
                    report.events_processed += 1;
                }
                Err(_) => break,
            }
        }

        // 5. Deletion sweep
        let doomed = std::mem::take(&mut self.to_delete);
        for id in doomed {
            if self.remove_entity(id).is_none() {
                continue;
            }
            self.broadcast(&Event::new(EventKind::Deleted, id));
            if let Some(binding) = self.clients.remove(&id) {
                binding.send(id, Event::new(EventKind::GameOver, id));
                info!("Player {} lost its entity in room {}", id, self.id);
            }
            report.deleted.push(id);
        }

        // 6. Diff broadcast
        let snapshot = std::mem::take(&mut self.snapshot);
        for (id, before) in snapshot {
            let after = match self.entities.get(&id) {
                Some(entity) => entity.state(),
                None => continue,
            };
            match after {
                Ok(after) if after != before => {
                    self.broadcast(&Event::with_payload(EventKind::Update, id, after));
                    report.updates += 1;
                }
                Ok(_) => {}
                Err(e) => warn!("Room {}: state of {} unavailable: {}", self.id, id, e),
            }
        }

        // 7. Room-type hook
        let hook = self.rules.room_type(&self.room_type).and_then(|t| t.tick_hook());
        if let Some(hook) = hook {
            hook(self);
        }

        report
    }

    fn dispatch(&mut self, event: Event) {
        if let Err(e) = self.process_event(&event) {
            warn!("Room {}: failed to process {} from {}: {}", self.id, event.kind, event.from, e);
        }
    }

    // =========================================================================
    // EVENTS
    // =========================================================================

    /// Apply one event.
    ///
    /// Built-in kinds are handled here. Any other kind goes to the room
    /// type's handler table; a kind without a handler is ignored.
    pub fn process_event(&mut self, event: &Event) -> Result<(), RoomError> {
        let from = event.from;
        match &event.kind {
            EventKind::Update => {
                let entity = self
                    .entities
                    .get_mut(&from)
                    .ok_or(RoomError::EntityNotFound { id: from, op: "update" })?;
                let previous = entity.state()?;
                entity.set_state(&event.payload)?;
                let found = entity.id();
                if found != from {
                    entity.set_state(&previous)?;
                    return Err(RoomError::IdMismatch { expected: from, found });
                }
                Ok(())
            }
            EventKind::Input => {
                let missing = RoomError::EntityNotFound { id: from, op: "input" };
                if !self.playable.contains(&from) {
                    return Err(missing);
                }
                let player = self
                    .entities
                    .get_mut(&from)
                    .and_then(|e| e.as_playable())
                    .ok_or(missing)?;
                player.set_input(&event.payload)?;
                Ok(())
            }
            EventKind::Delete => {
                if !self.entities.contains_key(&from) {
                    return Err(RoomError::EntityNotFound { id: from, op: "delete" });
                }
                self.to_delete.insert(from);
                Ok(())
            }
            EventKind::Add => {
                let entity = self.rules.registry.restore(from, &event.payload)?;
                self.insert_entity(entity)
            }
            EventKind::Deleted => {
                self.remove_entity(from);
                Ok(())
            }
            kind => {
                let handler = self.rules.room_type(&self.room_type).and_then(|t| t.handler(kind));
                match handler {
                    Some(handler) => handler(event, self),
                    None => {
                        debug!("Room {}: no handler for {}", self.id, kind);
                        Ok(())
                    }
                }
            }
        }
    }

    // =========================================================================
    // CLIENTS
    // =========================================================================

    /// Bind a connection.
    ///
    /// Starts the room if idle, asks the room type's policy for an entity,
    /// then sends the `room` and `assign` handshake messages. If the client
    /// cannot be bound, an entity the policy created for it is removed again.
    pub fn join(&mut self, binding: ClientBinding) -> Result<EntityId, RoomError> {
        self.start();

        let policy = self
            .rules
            .room_type(&self.room_type)
            .and_then(|t| t.assign_policy())
            .ok_or_else(|| RoomError::NoAssignPolicy(self.room_type.to_string()))?;
        // ids are never reused, so anything at or above this was created by the policy
        let first_new = self.next_id;
        let id = policy(self)?;

        if let Err(e) = self.bind(id, binding) {
            if id >= first_new && self.remove_entity(id).is_some() {
                debug!("Room {}: dropping entity {} after failed join", self.id, id);
                self.broadcast(&Event::new(EventKind::Deleted, id));
            }
            return Err(e);
        }

        info!("Player {} joined room {} ({})", id, self.id, self.room_type);
        Ok(id)
    }

    fn bind(&mut self, id: EntityId, binding: ClientBinding) -> Result<(), RoomError> {
        if !self.playable.contains(&id) {
            return Err(RoomError::NotPlayable(id));
        }
        if self.clients.contains_key(&id) {
            return Err(RoomError::AlreadyJoined(id));
        }

        let state = Payload::encode(&self.to_state()?)?;
        let handshake = [
            Event::with_payload(EventKind::Room, self.id, state),
            Event::with_payload(EventKind::Assign, self.id, Payload::encode(&id)?),
        ];
        for event in handshake {
            binding
                .outbound
                .try_send(event)
                .map_err(|_| RoomError::ClientUnreachable(id))?;
        }

        self.clients.insert(id, binding);
        Ok(())
    }

    /// Unbind a connection. The entity stays in the room.
    pub fn leave(&mut self, id: EntityId) {
        if self.clients.remove(&id).is_some() {
            info!("Player {} left room {}", id, self.id);
        }
    }

    /// Hand a connected player over to another room.
    ///
    /// On success the entity leaves this room at once and `deleted` is
    /// broadcast. `Ok(false)` when a transfer is already pending for that
    /// connection.
    pub fn transfer(&mut self, id: EntityId, target: &RoomHandle) -> Result<bool, RoomError> {
        let moved = offer_transfer(&mut self.clients, id, target)?;
        if moved {
            self.depart(id);
        }
        Ok(moved)
    }

    fn depart(&mut self, id: EntityId) {
        if self.remove_entity(id).is_some() {
            self.broadcast(&Event::new(EventKind::Deleted, id));
        }
        info!("Player {} transferring out of room {}", id, self.id);
    }

    /// Send an event to every connected client. Never blocks: a full
    /// outbound queue drops the event for that client.
    pub fn broadcast(&self, event: &Event) {
        for (id, binding) in &self.clients {
            if binding.transferring {
                continue;
            }
            binding.send(*id, event.clone());
        }
    }

    /// Send an event to one client.
    pub fn send_to(&self, id: EntityId, event: Event) -> Result<(), RoomError> {
        let binding = self
            .clients
            .get(&id)
            .ok_or(RoomError::EntityNotFound { id, op: "send" })?;
        binding.send(id, event);
        Ok(())
    }

    // =========================================================================
    // DRAW
    // =========================================================================

    /// Paint every drawable, back layer first, higher ids first within a layer.
    pub fn draw(&self, canvas: &mut dyn Canvas) {
        for layer in self.draw_layers.iter().rev() {
            for id in layer.iter().rev() {
                if let Some(drawable) = self.entities.get(id).and_then(|e| e.as_drawable()) {
                    drawable.draw(canvas);
                }
            }
        }
    }
}

impl std::fmt::Debug for Room {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Room")
            .field("id", &self.id)
            .field("room_type", &self.room_type)
            .field("lifecycle", &self.lifecycle)
            .field("entities", &self.entities.len())
            .field("clients", &self.clients.len())
            .finish()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use crate::core::{Aabb, Vec2};
    use crate::game::elements::{self, Mob, NoOpPlayer, StaticBackground, Wall, NOOP_PLAYER_TYPE, WALL_TYPE};
    use crate::game::entity::{Movable, Playable};
    use crate::game::handle::RoomCommand;
    use crate::game::registry::{RoomSettings, RoomType, TypeRegistry};
    use crate::game::render::{DrawCall, InputSnapshot, RecordingCanvas};
    use crate::DEFAULT_LAYER;

    const WALKER_TYPE: TypeTag = 900;
    const TICK: Duration = Duration::from_millis(16);

    /// Moves by its input every tick.
    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    struct Walker {
        id: EntityId,
        pos: Vec2,
        step: Vec2,
        #[serde(default)]
        raise: Option<String>,
        #[serde(default)]
        spawn_wall: bool,
    }

    impl Walker {
        fn boxed(id: EntityId) -> Box<dyn Entity> {
            Box::new(Walker { id, ..Walker::default() })
        }
    }

    impl Entity for Walker {
        fn id(&self) -> EntityId {
            self.id
        }

        fn type_tag(&self) -> TypeTag {
            WALKER_TYPE
        }

        fn state(&self) -> Result<Payload, EntityError> {
            Ok(Payload::encode(self)?)
        }

        fn set_state(&mut self, state: &Payload) -> Result<(), EntityError> {
            *self = state.decode()?;
            Ok(())
        }

        fn as_movable(&mut self) -> Option<&mut dyn Movable> {
            Some(self)
        }

        fn as_playable(&mut self) -> Option<&mut dyn Playable> {
            Some(self)
        }
    }

    impl Movable for Walker {
        fn advance(&mut self, _elapsed: Duration, ctx: &mut TickContext<'_>) -> Result<(), EntityError> {
            self.pos += self.step;
            if let Some(kind) = self.raise.take() {
                ctx.raise(Event::new(EventKind::custom(kind), self.id));
            }
            if self.spawn_wall {
                self.spawn_wall = false;
                let id = ctx.next_id();
                ctx.spawn(Box::new(Wall::new(id, Aabb::new(self.pos, Vec2::new(1.0, 1.0)))));
            }
            Ok(())
        }
    }

    impl Playable for Walker {
        fn set_input(&mut self, input: &Payload) -> Result<(), EntityError> {
            self.step = input.decode()?;
            Ok(())
        }

        fn sample_input(&mut self, _input: &InputSnapshot) -> Result<Payload, EntityError> {
            Ok(Payload::encode(&self.step)?)
        }
    }

    fn registry() -> TypeRegistry {
        let mut registry = TypeRegistry::new();
        elements::register_builtin(&mut registry);
        registry.register_default::<Walker>(WALKER_TYPE);
        registry
    }

    fn rules_with(room_type: RoomType) -> Arc<Rules> {
        Arc::new(Rules::new(registry()).with_room_type("test", room_type))
    }

    fn spectator_rules() -> Arc<Rules> {
        rules_with(RoomType::new().assign_with(|room: &mut Room| {
            let id = room.next_id();
            room.insert_entity(Box::new(NoOpPlayer::new(id)))?;
            Ok(id)
        }))
    }

    fn room(entities: Vec<Box<dyn Entity>>) -> Room {
        Room::new(1, "test", spectator_rules(), entities).unwrap()
    }

    struct TestClient {
        outbound: mpsc::Receiver<Event>,
        transfers: mpsc::Receiver<RoomHandle>,
        binding: Option<ClientBinding>,
    }

    fn client() -> TestClient {
        let (out_tx, outbound) = mpsc::channel(64);
        let (transfer_tx, transfers) = mpsc::channel(1);
        TestClient {
            outbound,
            transfers,
            binding: Some(ClientBinding::new(out_tx, transfer_tx)),
        }
    }

    impl TestClient {
        fn take(&mut self) -> ClientBinding {
            self.binding.take().unwrap()
        }

        fn drain(&mut self) -> Vec<Event> {
            let mut events = Vec::new();
            while let Ok(event) = self.outbound.try_recv() {
                events.push(event);
            }
            events
        }
    }

    fn detached_handle(id: i64) -> (RoomHandle, mpsc::Receiver<RoomCommand>) {
        let (events, _) = mpsc::channel(1);
        let (commands, rx) = mpsc::channel(1);
        (RoomHandle::new(id, Arc::from("target"), events, commands), rx)
    }

    fn walker_state(room: &Room, id: EntityId) -> Walker {
        room.entity(id).and_then(|e| e.downcast_ref::<Walker>()).cloned().unwrap()
    }

    #[test]
    fn test_indices_follow_capabilities() {
        let mut room = room(vec![
            Box::new(Mob { id: 1, ..Mob::default() }),
            Box::new(Wall::new(2, Aabb::default())),
            Box::new(NoOpPlayer::new(3)),
            Box::new(StaticBackground::new(4, Aabb::default(), "bg.png")),
            Walker::boxed(5),
        ]);

        for id in room.entity_ids() {
            assert_eq!(room.indexed(id), room.capabilities(id).unwrap());
        }
        assert_eq!(room.indexed(1).layer, Some(DEFAULT_LAYER));
        assert_eq!(room.indexed(4).layer, Some(LAYERS - 1));
        assert_eq!(room.indexed(5), Capabilities { movable: true, playable: true, ..Capabilities::default() });

        for id in room.entity_ids() {
            assert!(room.remove_entity(id).is_some());
            assert_eq!(room.indexed(id), Capabilities::default());
            assert!(room.capabilities(id).is_none());
        }
        assert!(room.is_empty());
    }

    #[test]
    fn test_duplicate_insert_rejected() {
        let mut room = room(vec![Walker::boxed(1)]);
        let err = room.insert_entity(Walker::boxed(1)).unwrap_err();
        assert!(matches!(err, RoomError::DuplicateEntity(1)));
        assert_eq!(room.len(), 1);
    }

    #[test]
    fn test_ids_are_never_reused() {
        let mut room = room(vec![Walker::boxed(7)]);
        assert_eq!(room.next_id(), 8);
        room.remove_entity(7);
        assert_eq!(room.next_id(), 9);
    }

    #[test]
    fn test_state_round_trip() {
        let mut source = room(vec![
            Box::new(Mob { id: 1, bounds: Aabb::new(Vec2::new(3.0, 4.0), Vec2::new(1.0, 1.0)), ..Mob::default() }),
            Box::new(Wall::new(2, Aabb::new(Vec2::ZERO, Vec2::new(10.0, 1.0)))),
            Walker::boxed(9),
        ]);
        source.custom_state = serde_json::json!({"round": 2});

        let first = source.to_state().unwrap();
        let json = first.to_json().unwrap();
        let rebuilt = Room::from_state(RoomState::from_json(&json).unwrap(), spectator_rules()).unwrap();
        let second = rebuilt.to_state().unwrap();

        assert_eq!(first, second);
        assert_eq!(second.elements.len(), 3);
        assert_eq!(second.elements[2].type_tag, WALKER_TYPE);
    }

    #[test]
    fn test_from_state_unknown_type_fails() {
        let mut state = room(vec![]).to_state().unwrap();
        state.elements.push(RawEntity { type_tag: 4242, data: Payload::null() });
        assert!(matches!(Room::from_state(state, spectator_rules()), Err(RoomError::UnknownType(4242))));
    }

    #[test]
    fn test_deleted_is_idempotent() {
        let mut room = room(vec![Walker::boxed(1)]);
        room.process_event(&Event::new(EventKind::Deleted, 1)).unwrap();
        assert!(room.entity(1).is_none());
        room.process_event(&Event::new(EventKind::Deleted, 1)).unwrap();
        room.process_event(&Event::new(EventKind::Deleted, 77)).unwrap();
    }

    #[test]
    fn test_unknown_entity_errors() {
        let mut room = room(vec![Box::new(Wall::new(1, Aabb::default()))]);
        let payload = Payload::encode(&Vec2::new(1.0, 0.0)).unwrap();

        for kind in [EventKind::Update, EventKind::Input, EventKind::Delete] {
            let err = room
                .process_event(&Event::with_payload(kind.clone(), 99, payload.clone()))
                .unwrap_err();
            assert!(matches!(err, RoomError::EntityNotFound { id: 99, .. }), "{}", kind);
        }

        // a wall exists but takes no input
        let err = room.process_event(&Event::with_payload(EventKind::Input, 1, payload)).unwrap_err();
        assert!(matches!(err, RoomError::EntityNotFound { id: 1, op: "input" }));
    }

    #[test]
    fn test_update_replaces_state() {
        let mut room = room(vec![Walker::boxed(1)]);
        let next = Walker { id: 1, pos: Vec2::new(5.0, 6.0), ..Walker::default() };
        room.process_event(&Event::with_payload(EventKind::Update, 1, next.state().unwrap())).unwrap();
        assert_eq!(walker_state(&room, 1).pos, Vec2::new(5.0, 6.0));
    }

    #[test]
    fn test_update_cannot_change_id() {
        let mut room = room(vec![Walker::boxed(1)]);
        let hijack = Walker { id: 2, pos: Vec2::new(5.0, 6.0), ..Walker::default() };

        let err = room
            .process_event(&Event::with_payload(EventKind::Update, 1, hijack.state().unwrap()))
            .unwrap_err();
        assert!(matches!(err, RoomError::IdMismatch { expected: 1, found: 2 }));
        let walker = walker_state(&room, 1);
        assert_eq!(walker.id, 1);
        assert_eq!(walker.pos, Vec2::ZERO);
    }

    #[test]
    fn test_add_constructs_through_registry() {
        let mut room = room(vec![]);
        let wall = Wall::new(12, Aabb::new(Vec2::new(1.0, 1.0), Vec2::new(2.0, 2.0)));

        room.process_event(&Event::with_payload(EventKind::Add, WALL_TYPE, wall.state().unwrap())).unwrap();
        assert!(room.entity(12).is_some());
        assert!(room.indexed(12).collidable);

        // bad blob for a known type only fails this event
        let bad = Payload::from_text(r#"{"id":"x"}"#).unwrap();
        let err = room.process_event(&Event::with_payload(EventKind::Add, WALL_TYPE, bad)).unwrap_err();
        assert!(matches!(err, RoomError::Construct { tag: WALL_TYPE, .. }));
        assert_eq!(room.len(), 1);
    }

    #[test]
    fn test_custom_events_use_handler_table() {
        let rules = rules_with(RoomType::new().on_event("won", |event: &Event, room: &mut Room| {
            room.custom_state = serde_json::json!(event.from);
            Ok(())
        }));
        let mut room = Room::new(1, "test", rules, vec![]).unwrap();

        room.process_event(&Event::new(EventKind::custom("won"), 5)).unwrap();
        assert_eq!(room.custom_state, serde_json::json!(5));

        // no handler: ignored
        room.process_event(&Event::new(EventKind::custom("lost"), 6)).unwrap();
        assert_eq!(room.custom_state, serde_json::json!(5));
    }

    #[test]
    fn test_diff_broadcast_only_on_change() {
        let mut room = room(vec![Walker::boxed(1), Walker::boxed(2)]);
        let mut viewer = client();
        room.join(viewer.take()).unwrap();
        viewer.drain();

        // walker 2 moves, walker 1 stands still
        room.entity_mut(2).and_then(|e| e.downcast_mut::<Walker>()).unwrap().step = Vec2::new(1.0, 0.0);

        let report = room.tick(TICK);
        assert_eq!(report.updates, 1);

        let events = viewer.drain();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::Update);
        assert_eq!(events[0].from, 2);
        let moved: Walker = events[0].payload.decode().unwrap();
        assert_eq!(moved.pos, Vec2::new(1.0, 0.0));
    }

    #[test]
    fn test_input_reaches_movement_next_tick() {
        let mut room = room(vec![Walker::boxed(1)]);
        let step = Payload::encode(&Vec2::new(2.0, 0.0)).unwrap();
        assert!(room.submit(Event::with_payload(EventKind::Input, 1, step)));

        room.tick(TICK);
        // input applied after this tick's movement
        assert_eq!(walker_state(&room, 1).pos, Vec2::ZERO);
        assert_eq!(walker_state(&room, 1).step, Vec2::new(2.0, 0.0));

        room.tick(TICK);
        assert_eq!(walker_state(&room, 1).pos, Vec2::new(2.0, 0.0));
    }

    #[test]
    fn test_raised_events_dispatch_same_tick() {
        let rules = rules_with(RoomType::new().on_event("ping", |event: &Event, room: &mut Room| {
            room.custom_state = serde_json::json!(event.from);
            Ok(())
        }));
        let mut room = Room::new(1, "test", rules, vec![Box::new(Walker {
            id: 4,
            raise: Some("ping".to_string()),
            ..Walker::default()
        })])
        .unwrap();

        let report = room.tick(TICK);
        assert_eq!(report.events_processed, 1);
        assert_eq!(room.custom_state, serde_json::json!(4));
    }

    #[test]
    fn test_queue_drops_on_arrival_when_full() {
        let mut room = room(vec![]);

        let accepted = (0..101)
            .filter(|i| room.submit(Event::new(EventKind::custom("noise"), *i)))
            .count();
        assert_eq!(accepted, 100);

        assert_eq!(room.tick(TICK).events_processed, 100);
        assert_eq!(room.tick(TICK).events_processed, 0);
    }

    #[test]
    fn test_events_beyond_tick_cap_stay_queued() {
        let settings = RoomSettings { events_per_tick: 10, ..RoomSettings::default() };
        let rules = Arc::new(Rules::new(registry()).with_settings(settings));
        let mut room = Room::new(1, "test", rules, vec![]).unwrap();

        for i in 0..15 {
            assert!(room.submit(Event::new(EventKind::custom("noise"), i)));
        }
        assert_eq!(room.tick(TICK).events_processed, 10);
        assert_eq!(room.tick(TICK).events_processed, 5);
    }

    #[test]
    fn test_delete_sweeps_at_end_of_tick() {
        let mut room = room(vec![]);
        let mut owner = client();
        let mut viewer = client();
        let owned = room.join(owner.take()).unwrap();
        room.join(viewer.take()).unwrap();
        owner.drain();
        viewer.drain();

        room.process_event(&Event::new(EventKind::Delete, owned)).unwrap();
        assert!(room.entity(owned).is_some());

        let report = room.tick(TICK);
        assert_eq!(report.deleted, vec![owned]);
        assert!(room.entity(owned).is_none());
        assert_eq!(room.indexed(owned), Capabilities::default());

        let seen: Vec<_> = viewer.drain().into_iter().map(|e| (e.kind, e.from)).collect();
        assert_eq!(seen, vec![(EventKind::Deleted, owned)]);

        let kinds: Vec<_> = owner.drain().into_iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![EventKind::Deleted, EventKind::GameOver]);
        assert!(!room.players().contains(&owned));
    }

    #[test]
    fn test_join_handshake() {
        let mut room = room(vec![Box::new(StaticBackground::new(0, Aabb::default(), "lobby.png"))]);
        assert!(!room.is_running());

        let mut player = client();
        let id = room.join(player.take()).unwrap();
        assert!(room.is_running());
        assert_eq!(room.players(), vec![id]);

        let events = player.drain();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, EventKind::Room);
        let state: RoomState = events[0].payload.decode().unwrap();
        assert_eq!(state.room_type, "test");
        assert_eq!(state.state, Lifecycle::Running);
        assert_eq!(state.elements.len(), 2);

        assert_eq!(events[1].kind, EventKind::Assign);
        assert_eq!(events[1].payload.as_str(), id.to_string());
    }

    #[test]
    fn test_join_announces_new_player_to_others() {
        let mut room = room(vec![]);
        let mut first = client();
        room.join(first.take()).unwrap();
        first.drain();

        let mut second = client();
        let id = room.join(second.take()).unwrap();

        let events = first.drain();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::Add);
        assert_eq!(events[0].from, NOOP_PLAYER_TYPE);
        let added: NoOpPlayer = events[0].payload.decode().unwrap();
        assert_eq!(added.id, id);
    }

    #[test]
    fn test_join_policy_errors() {
        let mut player = client();
        let rules = rules_with(RoomType::new().assign_with(|_: &mut Room| Err(RoomError::RoomFull)));
        let mut full = Room::new(1, "test", rules, vec![]).unwrap();
        assert!(matches!(full.join(player.take()), Err(RoomError::RoomFull)));

        let mut player = client();
        let rules = rules_with(RoomType::new().assign_with(|_: &mut Room| Ok(1)));
        let mut wall_room = Room::new(1, "test", rules, vec![Box::new(Wall::new(1, Aabb::default()))]).unwrap();
        assert!(matches!(wall_room.join(player.take()), Err(RoomError::NotPlayable(1))));

        let mut player = client();
        let mut untyped = Room::new(1, "nowhere", spectator_rules(), vec![]).unwrap();
        assert!(matches!(untyped.join(player.take()), Err(RoomError::NoAssignPolicy(_))));
        assert!(player.drain().is_empty());
    }

    #[test]
    fn test_failed_handshake_removes_created_entity() {
        let mut room = room(vec![]);
        let mut watcher = client();
        let watcher_id = room.join(watcher.take()).unwrap();
        watcher.drain();

        // room fits, assign does not
        let (out_tx, _out_rx) = mpsc::channel(1);
        let (transfer_tx, _transfer_rx) = mpsc::channel(1);
        let err = room.join(ClientBinding::new(out_tx, transfer_tx)).err();
        let lost = match err {
            Some(RoomError::ClientUnreachable(id)) => id,
            other => panic!("unexpected join result: {:?}", other),
        };

        assert!(room.entity(lost).is_none());
        assert_eq!(room.entity_ids(), vec![watcher_id]);
        assert_eq!(room.players(), vec![watcher_id]);
        let kinds: Vec<_> = watcher.drain().into_iter().map(|e| (e.kind, e.from)).collect();
        assert_eq!(kinds, vec![(EventKind::Add, 0), (EventKind::Deleted, lost)]);
    }

    #[test]
    fn test_failed_handshake_keeps_existing_entity() {
        let rules = rules_with(RoomType::new().assign_with(|_: &mut Room| Ok(1)));
        let mut room = Room::new(1, "test", rules, vec![Walker::boxed(1)]).unwrap();

        let (out_tx, out_rx) = mpsc::channel(1);
        let (transfer_tx, _transfer_rx) = mpsc::channel(1);
        drop(out_rx);
        assert!(matches!(room.join(ClientBinding::new(out_tx, transfer_tx)), Err(RoomError::ClientUnreachable(1))));
        assert!(room.entity(1).is_some());
        assert!(room.players().is_empty());
    }

    #[test]
    fn test_rejoin_same_entity_rejected() {
        let rules = rules_with(RoomType::new().assign_with(|_: &mut Room| Ok(1)));
        let mut room = Room::new(1, "test", rules, vec![Walker::boxed(1)]).unwrap();

        let mut first = client();
        let mut second = client();
        assert_eq!(room.join(first.take()).unwrap(), 1);
        assert!(matches!(room.join(second.take()), Err(RoomError::AlreadyJoined(1))));
        assert!(second.drain().is_empty());
    }

    #[test]
    fn test_second_transfer_is_dropped() {
        let mut room = room(vec![]);
        let mut mover = client();
        let mut viewer = client();
        let id = room.join(mover.take()).unwrap();
        room.join(viewer.take()).unwrap();
        viewer.drain();

        let (first, _first_rx) = detached_handle(100);
        let (second, _second_rx) = detached_handle(200);

        assert!(room.transfer(id, &first).unwrap());
        assert!(!room.transfer(id, &second).unwrap());

        // exactly the first target is pending
        assert_eq!(mover.transfers.try_recv().unwrap().id(), 100);
        assert!(mover.transfers.try_recv().is_err());

        assert!(room.entity(id).is_none());
        assert!(!room.players().contains(&id));
        let seen: Vec<_> = viewer.drain().into_iter().map(|e| (e.kind, e.from)).collect();
        assert_eq!(seen, vec![(EventKind::Deleted, id)]);
    }

    #[test]
    fn test_transfer_unknown_client() {
        let mut room = room(vec![Walker::boxed(1)]);
        let (target, _rx) = detached_handle(2);
        assert!(matches!(
            room.transfer(1, &target),
            Err(RoomError::EntityNotFound { id: 1, op: "transfer" })
        ));
        assert!(room.entity(1).is_some());
    }

    #[test]
    fn test_spawned_entities_join_after_movement() {
        let mut room = room(vec![Box::new(Walker { id: 3, spawn_wall: true, ..Walker::default() })]);
        let mut viewer = client();
        let viewer_id = room.join(viewer.take()).unwrap();
        viewer.drain();

        room.tick(TICK);

        let wall_id = viewer_id + 1;
        assert!(room.indexed(wall_id).collidable);
        let events = viewer.drain();
        assert_eq!(events[0].kind, EventKind::Add);
        assert_eq!(events[0].from, WALL_TYPE);
        // spawner's own flag flip is a diff
        assert_eq!(events[1].kind, EventKind::Update);
        assert_eq!(events[1].from, 3);
    }

    #[test]
    fn test_collision_pass_runs_every_ordered_pair() {
        let mut room = room(vec![
            Box::new(Mob {
                id: 1,
                bounds: Aabb::new(Vec2::new(0.0, 8.0), Vec2::new(4.0, 4.0)),
                ..Mob::default()
            }),
            Box::new(Wall::new(2, Aabb::new(Vec2::new(-10.0, 10.0), Vec2::new(30.0, 5.0)))),
            Box::new(Wall::new(3, Aabb::new(Vec2::new(100.0, 100.0), Vec2::new(1.0, 1.0)))),
        ]);

        let report = room.tick(TICK);
        assert_eq!(report.collision_checks, 6);

        let mob = room.entity(1).and_then(|e| e.downcast_ref::<Mob>()).unwrap();
        // pushed back on top of the floor
        assert_eq!(mob.bounds.corner.y, 6.0);
        assert!(mob.grounded);
    }

    #[test]
    fn test_tick_hook_runs_after_tick() {
        let rules = rules_with(RoomType::new().on_tick(|room: &mut Room| {
            let ticks = room.custom_state.as_i64().unwrap_or(0);
            room.custom_state = serde_json::json!(ticks + 1);
        }));
        let mut room = Room::new(1, "test", rules, vec![]).unwrap();
        room.tick(TICK);
        room.tick(TICK);
        assert_eq!(room.custom_state, serde_json::json!(2));
    }

    #[test]
    fn test_draw_order() {
        let mut far = StaticBackground::new(1, Aabb::default(), "far");
        far.layer = 9;
        let mut near = StaticBackground::new(2, Aabb::default(), "near");
        near.layer = 1;
        let mid_low = StaticBackground { layer: 5, ..StaticBackground::new(3, Aabb::default(), "mid-3") };
        let mid_high = StaticBackground { layer: 5, ..StaticBackground::new(4, Aabb::default(), "mid-4") };

        let room = room(vec![Box::new(near), Box::new(mid_low), Box::new(far), Box::new(mid_high)]);
        let mut canvas = RecordingCanvas::default();
        room.draw(&mut canvas);

        let order: Vec<_> = canvas
            .calls
            .iter()
            .map(|call| match call {
                DrawCall::Shape { texture_id, .. } => texture_id.as_str(),
                _ => "",
            })
            .collect();
        assert_eq!(order, vec!["far", "mid-4", "mid-3", "near"]);
    }
}
