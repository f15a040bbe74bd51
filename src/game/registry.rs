//! Type Registry and Room Rules
//!
//! Immutable configuration built once at startup and shared by every room:
//!
//! - [`TypeRegistry`]: type tag -> constructor, used whenever an entity is
//!   rebuilt from its serialized state
//! - [`RoomType`]: per-room-type event handlers, player assignment policy
//!   and per-tick hook
//! - [`RoomSettings`]: tick cadence and queue sizes

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::game::entity::{Entity, EntityId, TypeTag};
use crate::game::events::{Event, EventKind, Payload};
use crate::game::room::{Room, RoomError};
use crate::{EVENT_QUEUE_CAPACITY, MAX_EVENTS_PER_TICK, TICK_INTERVAL};

/// Builds an empty entity of one concrete type.
pub type Constructor = fn() -> Box<dyn Entity>;

/// Handler for a room-type specific event kind.
pub type EventHandler = Arc<dyn Fn(&Event, &mut Room) -> Result<(), RoomError> + Send + Sync>;

/// Decides which entity a newly joined connection controls. May create it.
pub type AssignPolicy = Arc<dyn Fn(&mut Room) -> Result<EntityId, RoomError> + Send + Sync>;

/// Runs after every tick of rooms of one type.
pub type TickHook = Arc<dyn Fn(&mut Room) + Send + Sync>;

fn construct_default<T: Entity + Default + 'static>() -> Box<dyn Entity> {
    Box::new(T::default())
}

/// Type tag -> constructor map.
#[derive(Default, Clone)]
pub struct TypeRegistry {
    constructors: HashMap<TypeTag, Constructor>,
}

impl TypeRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a constructor. A later registration for the same tag wins.
    pub fn register(&mut self, tag: TypeTag, constructor: Constructor) -> &mut Self {
        self.constructors.insert(tag, constructor);
        self
    }

    /// Register a type through its `Default` impl.
    pub fn register_default<T: Entity + Default + 'static>(&mut self, tag: TypeTag) -> &mut Self {
        self.register(tag, construct_default::<T>)
    }

    /// Whether a tag is known.
    pub fn contains(&self, tag: TypeTag) -> bool {
        self.constructors.contains_key(&tag)
    }

    /// Build an empty entity.
    pub fn construct(&self, tag: TypeTag) -> Result<Box<dyn Entity>, RoomError> {
        self.constructors
            .get(&tag)
            .map(|make| make())
            .ok_or(RoomError::UnknownType(tag))
    }

    /// Build an entity and restore its state. A bad blob fails only this entity.
    pub fn restore(&self, tag: TypeTag, state: &Payload) -> Result<Box<dyn Entity>, RoomError> {
        let mut entity = self.construct(tag)?;
        entity
            .set_state(state)
            .map_err(|source| RoomError::Construct { tag, source })?;
        Ok(entity)
    }
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tags: Vec<_> = self.constructors.keys().collect();
        tags.sort();
        f.debug_struct("TypeRegistry").field("tags", &tags).finish()
    }
}

/// Behaviour shared by all rooms of one type.
#[derive(Default, Clone)]
pub struct RoomType {
    handlers: HashMap<EventKind, EventHandler>,
    assign: Option<AssignPolicy>,
    on_tick: Option<TickHook>,
}

impl RoomType {
    /// Room type with no handlers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle a custom event kind.
    pub fn on_event<F>(mut self, kind: impl Into<EventKind>, handler: F) -> Self
    where
        F: Fn(&Event, &mut Room) -> Result<(), RoomError> + Send + Sync + 'static,
    {
        self.handlers.insert(kind.into(), Arc::new(handler));
        self
    }

    /// Set the player assignment policy.
    pub fn assign_with<F>(mut self, policy: F) -> Self
    where
        F: Fn(&mut Room) -> Result<EntityId, RoomError> + Send + Sync + 'static,
    {
        self.assign = Some(Arc::new(policy));
        self
    }

    /// Run a hook after every tick.
    pub fn on_tick<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut Room) + Send + Sync + 'static,
    {
        self.on_tick = Some(Arc::new(hook));
        self
    }

    /// Handler for a kind.
    pub fn handler(&self, kind: &EventKind) -> Option<EventHandler> {
        self.handlers.get(kind).cloned()
    }

    /// Assignment policy.
    pub fn assign_policy(&self) -> Option<AssignPolicy> {
        self.assign.clone()
    }

    /// Tick hook.
    pub fn tick_hook(&self) -> Option<TickHook> {
        self.on_tick.clone()
    }
}

impl fmt::Debug for RoomType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<_> = self.handlers.keys().map(|k| k.as_str()).collect();
        kinds.sort_unstable();
        f.debug_struct("RoomType")
            .field("handlers", &kinds)
            .field("assign", &self.assign.is_some())
            .field("on_tick", &self.on_tick.is_some())
            .finish()
    }
}

/// Cadence and queue sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoomSettings {
    /// Target tick interval.
    pub tick_interval: Duration,
    /// Pending event queue capacity.
    pub event_capacity: usize,
    /// Maximum queued events dispatched per tick.
    pub events_per_tick: usize,
    /// Per-connection outbound queue capacity.
    pub outbound_capacity: usize,
}

impl Default for RoomSettings {
    fn default() -> Self {
        Self {
            tick_interval: TICK_INTERVAL,
            event_capacity: EVENT_QUEUE_CAPACITY,
            events_per_tick: MAX_EVENTS_PER_TICK,
            outbound_capacity: 64,
        }
    }
}

/// Process-wide room id allocator.
#[derive(Debug, Clone)]
pub struct RoomIds(Arc<AtomicI64>);

impl RoomIds {
    /// Allocator whose first id is `first`.
    pub fn starting_at(first: i64) -> Self {
        Self(Arc::new(AtomicI64::new(first)))
    }

    /// Next room id.
    pub fn next(&self) -> i64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for RoomIds {
    fn default() -> Self {
        Self::starting_at(1)
    }
}

/// Everything a room needs besides its own entities.
#[derive(Debug, Clone, Default)]
pub struct Rules {
    /// Entity constructors.
    pub registry: TypeRegistry,
    /// Cadence and queue sizes.
    pub settings: RoomSettings,
    /// Room id allocator.
    pub room_ids: RoomIds,
    room_types: HashMap<String, RoomType>,
}

impl Rules {
    /// Rules over a registry, default settings, no room types.
    pub fn new(registry: TypeRegistry) -> Self {
        Self {
            registry,
            ..Self::default()
        }
    }

    /// Add a room type.
    pub fn with_room_type(mut self, name: impl Into<String>, room_type: RoomType) -> Self {
        self.room_types.insert(name.into(), room_type);
        self
    }

    /// Override settings.
    pub fn with_settings(mut self, settings: RoomSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Share a room id allocator.
    pub fn with_room_ids(mut self, room_ids: RoomIds) -> Self {
        self.room_ids = room_ids;
        self
    }

    /// Look up a room type.
    pub fn room_type(&self, name: &str) -> Option<&RoomType> {
        self.room_types.get(name)
    }
}
