//! Tick Context
//!
//! Mutation facade handed to a movable entity while it advances. The mover
//! itself is lifted out of the room for the duration of the call, so every
//! lookup here sees the rest of the room only.

use std::collections::{BTreeMap, BTreeSet};

use crate::game::entity::{Entity, EntityId};
use crate::game::events::Event;
use crate::game::handle::RoomHandle;
use crate::game::registry::Rules;
use crate::game::room::{offer_transfer, ClientBinding, RoomError};

/// Room access during the movement pass.
pub struct TickContext<'a> {
    pub(crate) entities: &'a mut BTreeMap<EntityId, Box<dyn Entity>>,
    pub(crate) clients: &'a mut BTreeMap<EntityId, ClientBinding>,
    pub(crate) next_id: &'a mut EntityId,
    pub(crate) spawned: &'a mut Vec<Box<dyn Entity>>,
    pub(crate) to_delete: &'a mut BTreeSet<EntityId>,
    pub(crate) raised: &'a mut Vec<Event>,
    pub(crate) departed: &'a mut Vec<EntityId>,
    pub(crate) rules: &'a Rules,
}

impl<'a> TickContext<'a> {
    /// Look up another entity.
    pub fn entity(&self, id: EntityId) -> Option<&dyn Entity> {
        self.entities.get(&id).map(|e| e.as_ref())
    }

    /// Look up another entity mutably.
    pub fn entity_mut(&mut self, id: EntityId) -> Option<&mut (dyn Entity + 'static)> {
        self.entities.get_mut(&id).map(|e| e.as_mut())
    }

    /// Entity ids bound to connected clients, ascending.
    pub fn players(&self) -> Vec<EntityId> {
        self.clients
            .iter()
            .filter(|(_, binding)| !binding.transferring)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Allocate a fresh entity id.
    pub fn next_id(&mut self) -> EntityId {
        let id = *self.next_id;
        *self.next_id += 1;
        id
    }

    /// Add an entity to the room. It joins the indices once the movement
    /// pass is over: it collides this tick and moves from the next one.
    pub fn spawn(&mut self, entity: Box<dyn Entity>) {
        if entity.id() >= *self.next_id {
            *self.next_id = entity.id() + 1;
        }
        self.spawned.push(entity);
    }

    /// Mark an entity for deletion at the end of this tick.
    pub fn delete(&mut self, id: EntityId) {
        self.to_delete.insert(id);
    }

    /// Raise an event. Raised events are dispatched in this tick's event
    /// phase, ahead of queued client events.
    pub fn raise(&mut self, event: Event) {
        self.raised.push(event);
    }

    /// Hand a connected player over to another room.
    ///
    /// Returns `Ok(false)` when a transfer for that connection is already
    /// pending; the request is dropped.
    pub fn transfer(&mut self, id: EntityId, target: &RoomHandle) -> Result<bool, RoomError> {
        let moved = offer_transfer(self.clients, id, target)?;
        if moved {
            self.departed.push(id);
        }
        Ok(moved)
    }

    /// Room configuration.
    pub fn rules(&self) -> &Rules {
        self.rules
    }
}
