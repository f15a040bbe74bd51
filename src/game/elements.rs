//! Built-in Elements
//!
//! Small entity library every room can use:
//!
//! - [`NoOpPlayer`]: a playable placeholder with no behaviour
//! - [`Mob`]: a falling box that lands on and slides along other shapes
//! - [`Wall`]: an immovable box
//! - [`StaticBackground`]: a textured backdrop drawn behind everything

use std::time::Duration;
use serde::{Serialize, Deserialize};

use crate::core::shape::{collide, Aabb, Shape};
use crate::core::vec2::Vec2;
use crate::game::context::TickContext;
use crate::game::entity::{Collidable, Drawable, Entity, EntityError, EntityId, Movable, Playable, TypeTag};
use crate::game::events::Payload;
use crate::game::registry::TypeRegistry;
use crate::game::render::{Canvas, InputSnapshot, Rgba};

/// Type tag of [`NoOpPlayer`].
pub const NOOP_PLAYER_TYPE: TypeTag = 0;
/// Type tag of [`Mob`].
pub const MOB_TYPE: TypeTag = 1;
/// Type tag of [`Wall`].
pub const WALL_TYPE: TypeTag = 2;
/// Type tag of [`StaticBackground`].
pub const STATIC_BACKGROUND_TYPE: TypeTag = 3;

/// Downward acceleration applied to an airborne mob, per tick.
pub const GRAVITY: f64 = 0.1;

/// Layer a background uses when none is set. Clamped to the back layer.
pub const BACKGROUND_LAYER: i32 = 10;

/// Register all built-in elements.
pub fn register_builtin(registry: &mut TypeRegistry) {
    registry
        .register_default::<NoOpPlayer>(NOOP_PLAYER_TYPE)
        .register_default::<Mob>(MOB_TYPE)
        .register_default::<Wall>(WALL_TYPE)
        .register_default::<StaticBackground>(STATIC_BACKGROUND_TYPE);
}

// =============================================================================
// NO-OP PLAYER
// =============================================================================

/// Playable entity that ignores its input. Binds a spectator connection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NoOpPlayer {
    /// Entity id.
    pub id: EntityId,
}

impl NoOpPlayer {
    /// New player with the given id.
    pub fn new(id: EntityId) -> Self {
        Self { id }
    }
}

impl Entity for NoOpPlayer {
    fn id(&self) -> EntityId {
        self.id
    }

    fn type_tag(&self) -> TypeTag {
        NOOP_PLAYER_TYPE
    }

    fn state(&self) -> Result<Payload, EntityError> {
        Ok(Payload::encode(self)?)
    }

    fn set_state(&mut self, state: &Payload) -> Result<(), EntityError> {
        *self = state.decode()?;
        Ok(())
    }

    fn as_drawable(&self) -> Option<&dyn Drawable> {
        Some(self)
    }

    fn as_playable(&mut self) -> Option<&mut dyn Playable> {
        Some(self)
    }
}

impl Drawable for NoOpPlayer {
    fn draw(&self, _canvas: &mut dyn Canvas) {}
}

impl Playable for NoOpPlayer {
    fn set_input(&mut self, _input: &Payload) -> Result<(), EntityError> {
        Ok(())
    }

    fn sample_input(&mut self, _input: &InputSnapshot) -> Result<Payload, EntityError> {
        Ok(Payload::null())
    }
}

// =============================================================================
// MOB
// =============================================================================

/// Box under gravity. Pushed out of anything it overlaps.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Mob {
    /// Entity id.
    pub id: EntityId,
    /// Position and size.
    pub bounds: Aabb,
    /// Velocity, per tick.
    pub speed: Vec2,
    /// Acceleration, per tick.
    pub acceleration: Vec2,
    /// Texture drawn over the bounds.
    #[serde(default)]
    pub texture_id: String,
    /// Standing on something since the last move.
    #[serde(default)]
    pub grounded: bool,
}

impl Entity for Mob {
    fn id(&self) -> EntityId {
        self.id
    }

    fn type_tag(&self) -> TypeTag {
        MOB_TYPE
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

    fn as_collidable(&self) -> Option<&dyn Collidable> {
        Some(self)
    }

    fn as_collidable_mut(&mut self) -> Option<&mut dyn Collidable> {
        Some(self)
    }

    fn as_drawable(&self) -> Option<&dyn Drawable> {
        Some(self)
    }
}

impl Movable for Mob {
    fn advance(&mut self, _elapsed: Duration, _ctx: &mut TickContext<'_>) -> Result<(), EntityError> {
        self.speed += self.acceleration;
        self.bounds.corner += self.speed;
        if !self.grounded {
            self.acceleration.y = GRAVITY;
        }
        self.grounded = false;
        Ok(())
    }
}

impl Collidable for Mob {
    fn shape(&self) -> Shape {
        Shape::Box(self.bounds)
    }

    fn collide(&mut self, other: &dyn Entity) -> Result<(), EntityError> {
        let other = match other.shape() {
            Some(shape) => shape,
            None => return Ok(()),
        };
        let hit = collide(&self.shape(), &other);
        if !hit.collided {
            return Ok(());
        }
        self.bounds.corner += hit.separation;
        self.grounded |= hit.contact.down;
        self.acceleration = hit.clamp(self.acceleration);
        self.speed = hit.clamp(self.speed);
        Ok(())
    }
}

impl Drawable for Mob {
    fn draw(&self, canvas: &mut dyn Canvas) {
        canvas.draw_shape(&self.texture_id, self.bounds, Aabb::new(Vec2::ZERO, self.bounds.size));
    }
}

// =============================================================================
// WALL
// =============================================================================

/// Immovable box. Never reacts to collisions itself.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Wall {
    /// Entity id.
    pub id: EntityId,
    /// Position and size.
    pub bounds: Aabb,
    /// Painted black when set.
    #[serde(default)]
    pub texture: String,
}

impl Wall {
    /// Wall over a box.
    pub fn new(id: EntityId, bounds: Aabb) -> Self {
        Self { id, bounds, texture: String::new() }
    }
}

impl Entity for Wall {
    fn id(&self) -> EntityId {
        self.id
    }

    fn type_tag(&self) -> TypeTag {
        WALL_TYPE
    }

    fn state(&self) -> Result<Payload, EntityError> {
        Ok(Payload::encode(self)?)
    }

    fn set_state(&mut self, state: &Payload) -> Result<(), EntityError> {
        *self = state.decode()?;
        Ok(())
    }

    fn as_collidable(&self) -> Option<&dyn Collidable> {
        Some(self)
    }

    fn as_collidable_mut(&mut self) -> Option<&mut dyn Collidable> {
        Some(self)
    }

    fn as_drawable(&self) -> Option<&dyn Drawable> {
        Some(self)
    }
}

impl Collidable for Wall {
    fn shape(&self) -> Shape {
        Shape::Box(self.bounds)
    }

    fn collide(&mut self, _other: &dyn Entity) -> Result<(), EntityError> {
        Ok(())
    }
}

impl Drawable for Wall {
    fn draw(&self, canvas: &mut dyn Canvas) {
        if !self.texture.is_empty() {
            canvas.draw_color(Rgba::BLACK, self.bounds);
        }
    }
}

// =============================================================================
// STATIC BACKGROUND
// =============================================================================

/// Textured backdrop.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StaticBackground {
    /// Entity id.
    pub id: EntityId,
    /// World region covered.
    pub bounds: Aabb,
    /// Texture region; empty means the whole texture at world size.
    #[serde(default)]
    pub texture: Aabb,
    /// Texture id.
    #[serde(default)]
    pub texture_id: String,
    /// Explicit layer, 0 for the default back layer.
    #[serde(default)]
    pub layer: i32,
}

impl StaticBackground {
    /// Background covering `bounds` with a texture.
    pub fn new(id: EntityId, bounds: Aabb, texture_id: impl Into<String>) -> Self {
        Self {
            id,
            bounds,
            texture: Aabb::default(),
            texture_id: texture_id.into(),
            layer: 0,
        }
    }
}

impl Entity for StaticBackground {
    fn id(&self) -> EntityId {
        self.id
    }

    fn type_tag(&self) -> TypeTag {
        STATIC_BACKGROUND_TYPE
    }

    fn state(&self) -> Result<Payload, EntityError> {
        Ok(Payload::encode(self)?)
    }

    fn set_state(&mut self, state: &Payload) -> Result<(), EntityError> {
        *self = state.decode()?;
        Ok(())
    }

    fn as_drawable(&self) -> Option<&dyn Drawable> {
        Some(self)
    }
}

impl Drawable for StaticBackground {
    fn draw(&self, canvas: &mut dyn Canvas) {
        let source = if self.texture.size == Vec2::ZERO {
            Aabb::new(Vec2::ZERO, self.bounds.size)
        } else {
            self.texture
        };
        canvas.draw_shape(&self.texture_id, self.bounds, source);
    }

    fn layer(&self) -> Option<i32> {
        if self.layer != 0 {
            Some(self.layer)
        } else {
            Some(BACKGROUND_LAYER)
        }
    }
}
