//! Demo Entities
//!
//! - [`Snake`]: a chain of orbs whose head chases the mouse; dies when the
//!   head touches anything collidable
//! - [`GameOverPlayer`]: sits on a game-over screen until the mouse is
//!   pressed, then goes back to the lobby

use std::time::Duration;
use serde::{Serialize, Deserialize};
use tracing::warn;

use crate::core::shape::{collide, Aabb, Circle, Shape};
use crate::core::vec2::Vec2;
use crate::game::context::TickContext;
use crate::game::elements::StaticBackground;
use crate::game::entity::{Collidable, Drawable, Entity, EntityError, EntityId, Movable, Playable, TypeTag};
use crate::game::events::{Event, EventKind, Payload};
use crate::game::handle::RoomHandle;
use crate::game::render::{Canvas, InputSnapshot, Rgba, KEY_SPACE};

/// Type tag of [`Snake`].
pub const SNAKE_TYPE: TypeTag = 232323;
/// Type tag of [`GameOverPlayer`].
pub const GAME_OVER_PLAYER_TYPE: TypeTag = 123;

/// Event a dying snake raises.
pub const LOSE_EVENT: &str = "lose";

/// Head velocity gained per unit of distance to the target.
pub const MOVE_ACCELERATION: f64 = 0.1;
/// Head speed limit per axis, per tick.
pub const MAX_SPEED: f64 = 10.0;
/// Fraction of the gap a following orb closes per tick.
pub const FOLLOW_FACTOR: f64 = 0.2;
/// Gap kept between neighbouring orbs.
pub const ORB_GAP: f64 = 10.0;
/// Orb radius of a fresh snake.
pub const ORB_RADIUS: f64 = 50.0;
/// Minimum time between two menus.
pub const MENU_COOLDOWN: Duration = Duration::from_millis(500);

/// Where spawned menus are placed.
const MENU_BOUNDS: Aabb = Aabb::new(Vec2::new(100.0, 100.0), Vec2::new(1464.0, 720.0));

// =============================================================================
// SNAKE
// =============================================================================

/// Input a snake client sends every frame.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SnakeInput {
    /// Point the head steers to.
    pub target: Vec2,
    /// Spawn a menu.
    pub gen_new: bool,
    /// Head follows the target.
    pub moving: bool,
}

/// Orb chain steered by the mouse.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snake {
    /// Entity id.
    pub id: EntityId,
    /// Orbs, head first.
    pub orbs: Vec<Circle>,
    /// Head velocity, per tick.
    pub velocity: Vec2,
    /// Head touched something.
    pub dead: bool,
    /// Death already reported.
    pub lost: bool,
    /// Latest client input.
    #[serde(default)]
    pub input: SnakeInput,
    /// Menus spawned so far.
    #[serde(default)]
    pub menus_created: u32,
    /// Time left before another menu may spawn. Local to the room, not
    /// part of the state.
    #[serde(skip)]
    pub menu_cooldown: Duration,
}

impl Snake {
    /// One-orb snake with its head at `head`.
    pub fn new(id: EntityId, head: Vec2) -> Self {
        Self {
            id,
            orbs: vec![Circle::new(head, ORB_RADIUS)],
            ..Self::default()
        }
    }

    /// Head orb.
    pub fn head(&self) -> Option<&Circle> {
        self.orbs.first()
    }

    fn steer(&mut self) {
        let head = match self.orbs.first_mut() {
            Some(head) => head,
            None => return,
        };
        let limit = Vec2::new(MAX_SPEED, MAX_SPEED);
        self.velocity = (self.input.target - head.center)
            .scale(MOVE_ACCELERATION)
            .clamp(-limit, limit);
        head.center += self.velocity;

        for i in 1..self.orbs.len() {
            let leader = self.orbs[i - 1];
            let orb = self.orbs[i];
            let rest = leader.center - (leader.center - orb.center).with_length(leader.radius + orb.radius + ORB_GAP);
            self.orbs[i].center = orb.center + (rest - orb.center).scale(FOLLOW_FACTOR);
        }
    }
}

impl Entity for Snake {
    fn id(&self) -> EntityId {
        self.id
    }

    fn type_tag(&self) -> TypeTag {
        SNAKE_TYPE
    }

    fn state(&self) -> Result<Payload, EntityError> {
        Ok(Payload::encode(self)?)
    }

    fn set_state(&mut self, state: &Payload) -> Result<(), EntityError> {
        let menu_cooldown = self.menu_cooldown;
        *self = state.decode()?;
        self.menu_cooldown = menu_cooldown;
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

    fn as_playable(&mut self) -> Option<&mut dyn Playable> {
        Some(self)
    }
}

impl Movable for Snake {
    fn advance(&mut self, elapsed: Duration, ctx: &mut TickContext<'_>) -> Result<(), EntityError> {
        if self.dead && !self.lost {
            self.lost = true;
            ctx.raise(Event::new(EventKind::custom(LOSE_EVENT), self.id));
            return Ok(());
        }

        self.menu_cooldown = self.menu_cooldown.saturating_sub(elapsed);
        if self.input.gen_new && self.menu_cooldown.is_zero() {
            self.menu_cooldown = MENU_COOLDOWN;
            self.input.gen_new = false;
            let id = ctx.next_id();
            ctx.spawn(Box::new(StaticBackground::new(id, MENU_BOUNDS, "win.png")));
            self.menus_created += 1;
        }

        if self.input.moving {
            self.steer();
        } else {
            self.velocity = Vec2::ZERO;
        }
        Ok(())
    }
}

impl Collidable for Snake {
    fn shape(&self) -> Shape {
        Shape::Chain(self.orbs.clone())
    }

    fn collide(&mut self, other: &dyn Entity) -> Result<(), EntityError> {
        let (head, other) = match (self.head(), other.shape()) {
            (Some(head), Some(other)) => (*head, other),
            _ => return Ok(()),
        };
        if collide(&Shape::Circle(head), &other).collided {
            self.dead = true;
        }
        Ok(())
    }
}

impl Drawable for Snake {
    fn draw(&self, canvas: &mut dyn Canvas) {
        for (i, orb) in self.orbs.iter().enumerate() {
            let color = if i == 0 { Rgba::GREEN } else { Rgba::RED };
            canvas.draw_color(color, orb.bounds());
        }
        if let Some(head) = self.head() {
            canvas.draw_text(&format!("Menus created: {}", self.menus_created), head.center, "72px serif");
        }
    }
}

impl Playable for Snake {
    fn set_input(&mut self, input: &Payload) -> Result<(), EntityError> {
        self.input = input.decode()?;
        Ok(())
    }

    fn sample_input(&mut self, input: &InputSnapshot) -> Result<Payload, EntityError> {
        self.input = SnakeInput {
            target: input.mouse_position,
            gen_new: input.is_pressed(KEY_SPACE),
            moving: true,
        };
        Ok(Payload::encode(&self.input)?)
    }
}

// =============================================================================
// GAME OVER PLAYER
// =============================================================================

/// Player on a game-over screen. A mouse press sends it back to the lobby.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GameOverPlayer {
    /// Entity id.
    pub id: EntityId,
    /// Mouse pressed.
    #[serde(default)]
    pub input: bool,
    /// Room to return to. Not part of the state.
    #[serde(skip)]
    pub lobby: Option<RoomHandle>,
}

impl GameOverPlayer {
    /// Player that returns to `lobby`.
    pub fn new(id: EntityId, lobby: RoomHandle) -> Self {
        Self {
            id,
            input: false,
            lobby: Some(lobby),
        }
    }
}

impl Entity for GameOverPlayer {
    fn id(&self) -> EntityId {
        self.id
    }

    fn type_tag(&self) -> TypeTag {
        GAME_OVER_PLAYER_TYPE
    }

    fn state(&self) -> Result<Payload, EntityError> {
        Ok(Payload::encode(self)?)
    }

    fn set_state(&mut self, state: &Payload) -> Result<(), EntityError> {
        let lobby = self.lobby.take();
        *self = state.decode()?;
        self.lobby = lobby;
        Ok(())
    }

    fn as_movable(&mut self) -> Option<&mut dyn Movable> {
        Some(self)
    }

    fn as_drawable(&self) -> Option<&dyn Drawable> {
        Some(self)
    }

    fn as_playable(&mut self) -> Option<&mut dyn Playable> {
        Some(self)
    }
}

impl Movable for GameOverPlayer {
    fn advance(&mut self, _elapsed: Duration, ctx: &mut TickContext<'_>) -> Result<(), EntityError> {
        if !self.input {
            return Ok(());
        }
        match &self.lobby {
            Some(lobby) => {
                ctx.transfer(self.id, lobby)
                    .map_err(|e| EntityError::Rejected(e.to_string()))?;
            }
            None => {
                warn!("Game-over player {} has no lobby to return to", self.id);
                self.input = false;
            }
        }
        Ok(())
    }
}

impl Drawable for GameOverPlayer {
    fn draw(&self, _canvas: &mut dyn Canvas) {}
}

impl Playable for GameOverPlayer {
    fn set_input(&mut self, input: &Payload) -> Result<(), EntityError> {
        self.input = input.decode()?;
        Ok(())
    }

    fn sample_input(&mut self, input: &InputSnapshot) -> Result<Payload, EntityError> {
        Ok(Payload::encode(&input.mouse_pressed())?)
    }
}
