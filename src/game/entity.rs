//! Entity Capability Model
//!
//! Every simulated object implements [`Entity`]: a stable id, a type tag
//! and an opaque serializable state. On top of that an entity opts into any
//! combination of capabilities by overriding the matching accessor:
//!
//! - [`Movable`]: advanced once per tick with a [`TickContext`]
//! - [`Collidable`]: exposes a [`Shape`] and reacts to every other collidable
//! - [`Drawable`]: paints itself on a [`Canvas`] at a layer
//! - [`Playable`]: accepts input from a connected client
//!
//! The room asks for the capabilities once, when the entity is inserted,
//! and keeps the answer in [`Capabilities`].

use std::any::Any;
use std::fmt;
use std::time::Duration;

use crate::core::shape::Shape;
use crate::game::context::TickContext;
use crate::game::events::Payload;
use crate::game::render::{Canvas, InputSnapshot};
use crate::{DEFAULT_LAYER, LAYERS};

/// Entity identifier, unique among live entities of one room.
pub type EntityId = i64;

/// Concrete entity type, key into the type registry.
pub type TypeTag = i64;

/// Entity errors.
#[derive(Debug, thiserror::Error)]
pub enum EntityError {
    /// State or input blob could not be (de)serialized.
    #[error("Codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// Entity refused the operation.
    #[error("Rejected: {0}")]
    Rejected(String),
}

/// Upcast helper so `dyn Entity` can be downcast to its concrete type.
pub trait AsAny {
    /// Borrow as `Any`.
    fn as_any(&self) -> &dyn Any;
    /// Mutably borrow as `Any`.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Base entity contract.
pub trait Entity: AsAny + fmt::Debug + Send {
    /// Entity id.
    fn id(&self) -> EntityId;

    /// Type tag used to reconstruct the entity from its state.
    fn type_tag(&self) -> TypeTag;

    /// Serialize the full state.
    fn state(&self) -> Result<Payload, EntityError>;

    /// Replace the full state.
    fn set_state(&mut self, state: &Payload) -> Result<(), EntityError>;

    /// Movable capability.
    fn as_movable(&mut self) -> Option<&mut dyn Movable> {
        None
    }

    /// Collidable capability.
    fn as_collidable(&self) -> Option<&dyn Collidable> {
        None
    }

    /// Collidable capability, mutable.
    fn as_collidable_mut(&mut self) -> Option<&mut dyn Collidable> {
        None
    }

    /// Drawable capability.
    fn as_drawable(&self) -> Option<&dyn Drawable> {
        None
    }

    /// Playable capability.
    fn as_playable(&mut self) -> Option<&mut dyn Playable> {
        None
    }
}

impl<'a> dyn Entity + 'a {
    /// Downcast to a concrete entity type.
    pub fn downcast_ref<T: Entity + 'static>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    /// Mutably downcast to a concrete entity type.
    pub fn downcast_mut<T: Entity + 'static>(&mut self) -> Option<&mut T> {
        self.as_any_mut().downcast_mut::<T>()
    }

    /// Collision shape, if the entity is collidable.
    pub fn shape(&self) -> Option<Shape> {
        self.as_collidable().map(|c| c.shape())
    }
}

/// Entity that advances itself every tick.
pub trait Movable {
    /// Advance by `elapsed` real time. The context gives access to the rest
    /// of the room.
    fn advance(&mut self, elapsed: Duration, ctx: &mut TickContext<'_>) -> Result<(), EntityError>;
}

/// Entity that takes part in the pairwise collision pass.
pub trait Collidable {
    /// Current collision shape.
    fn shape(&self) -> Shape;

    /// React to `other`. Called once per ordered pair per tick; an entity
    /// that never reacts implements this as a no-op.
    fn collide(&mut self, other: &dyn Entity) -> Result<(), EntityError>;
}

/// Entity with a visual representation.
pub trait Drawable {
    /// Paint onto the canvas.
    fn draw(&self, canvas: &mut dyn Canvas);

    /// Explicit draw layer. `None` means the mid-range default.
    fn layer(&self) -> Option<i32> {
        None
    }
}

/// Entity driven by a connected client.
pub trait Playable {
    /// Replace the input state with one sent by the client.
    fn set_input(&mut self, input: &Payload) -> Result<(), EntityError>;

    /// Sample local input into the blob the client sends.
    fn sample_input(&mut self, input: &InputSnapshot) -> Result<Payload, EntityError>;
}

/// Map an optional explicit layer to a draw-index slot.
pub fn layer_index(layer: Option<i32>) -> usize {
    let top = LAYERS as i32 - 1;
    layer.unwrap_or(DEFAULT_LAYER as i32).clamp(0, top) as usize
}

/// Capability set resolved when an entity enters a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    /// In the movable index.
    pub movable: bool,
    /// In the collidable index.
    pub collidable: bool,
    /// In the playable index.
    pub playable: bool,
    /// Draw-index slot, if drawable.
    pub layer: Option<usize>,
}

impl Capabilities {
    /// Probe an entity once.
    pub fn detect(entity: &mut dyn Entity) -> Self {
        Self {
            movable: entity.as_movable().is_some(),
            collidable: entity.as_collidable().is_some(),
            playable: entity.as_playable().is_some(),
            layer: entity.as_drawable().map(|d| layer_index(d.layer())),
        }
    }
}
