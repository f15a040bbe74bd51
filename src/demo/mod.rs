//! Demo Game
//!
//! Wiring for the bundled two-player snake game:
//!
//! ```text
//!   lobby ──(2 players)──> snake ──(dies)──────> lose lobby ─┐
//!     ^                      └──(last alive)──> win lobby  ─┤
//!     └───────────────────────(mouse press)─────────────────┘
//! ```
//!
//! Every connection enters the lobby. As soon as two players wait there, a
//! fresh snake room is spawned and both are moved into it.

pub mod entities;

use std::sync::Arc;

use tracing::{info, warn};

use crate::core::shape::Aabb;
use crate::core::vec2::Vec2;
use crate::game::elements::{self, NoOpPlayer, StaticBackground};
use crate::game::entity::{Entity, EntityId};
use crate::game::events::Event;
use crate::game::handle::RoomHandle;
use crate::game::registry::{RoomIds, RoomSettings, RoomType, Rules, TypeRegistry};
use crate::game::room::{Room, RoomError};
use crate::network::session::{spawn_room, PendingRoom};

pub use entities::{GameOverPlayer, Snake, SnakeInput, GAME_OVER_PLAYER_TYPE, LOSE_EVENT, SNAKE_TYPE};

/// Room type every connection enters.
pub const LOBBY: &str = "lobby";
/// Room type of the win and lose screens.
pub const GAME_OVER_LOBBY: &str = "game-over-lobby";
/// Room type of a running match.
pub const SNAKE: &str = "snake";

/// Entity ids of the two snakes of a match.
pub const SNAKE_IDS: [EntityId; 2] = [10, 20];

const SCREEN: Aabb = Aabb::new(Vec2::new(100.0, 100.0), Vec2::new(1464.0, 720.0));

/// The long-lived rooms of the demo.
#[derive(Debug, Clone)]
pub struct Demo {
    /// Entry room.
    pub lobby: RoomHandle,
    /// Where a snake that died goes.
    pub lose_lobby: RoomHandle,
    /// Where the last snake standing goes.
    pub win_lobby: RoomHandle,
}

/// Registry with the built-in and demo entities.
pub fn registry() -> TypeRegistry {
    let mut registry = TypeRegistry::new();
    elements::register_builtin(&mut registry);
    registry
        .register_default::<Snake>(SNAKE_TYPE)
        .register_default::<GameOverPlayer>(GAME_OVER_PLAYER_TYPE);
    registry
}

/// Rules of the demo, given handles to its long-lived rooms.
pub fn rules(settings: RoomSettings, room_ids: RoomIds, demo: &Demo) -> Rules {
    let lobby = RoomType::new()
        .assign_with(spectator)
        .on_tick(start_match);

    let back_to_lobby = demo.lobby.clone();
    let game_over = RoomType::new().assign_with(move |room: &mut Room| {
        let id = room.next_id();
        room.insert_entity(Box::new(GameOverPlayer::new(id, back_to_lobby.clone())))?;
        Ok(id)
    });

    let lose_lobby = demo.lose_lobby.clone();
    let win_lobby = demo.win_lobby.clone();
    let snake = RoomType::new()
        .assign_with(free_snake)
        .on_event(LOSE_EVENT, move |event: &Event, room: &mut Room| {
            room.custom_state = serde_json::Value::Bool(true);
            room.transfer(event.from, &lose_lobby)?;
            Ok(())
        })
        .on_tick(move |room: &mut Room| {
            let decided = room.custom_state.as_bool().unwrap_or(false);
            let players = room.players();
            if decided && players.len() == 1 {
                info!("Player {} won in room {}", players[0], room.id());
                if let Err(e) = room.transfer(players[0], &win_lobby) {
                    warn!("Failed to move winner {} of room {}: {}", players[0], room.id(), e);
                }
            }
        });

    Rules::new(registry())
        .with_settings(settings)
        .with_room_ids(room_ids)
        .with_room_type(LOBBY, lobby)
        .with_room_type(GAME_OVER_LOBBY, game_over)
        .with_room_type(SNAKE, snake)
}

/// Launch the lobby and both game-over rooms.
pub fn launch(settings: RoomSettings) -> Result<Demo, RoomError> {
    let room_ids = RoomIds::default();
    let lobby = PendingRoom::new(room_ids.next(), LOBBY, &settings);
    let lose_lobby = PendingRoom::new(room_ids.next(), GAME_OVER_LOBBY, &settings);
    let win_lobby = PendingRoom::new(room_ids.next(), GAME_OVER_LOBBY, &settings);

    let demo = Demo {
        lobby: lobby.handle(),
        lose_lobby: lose_lobby.handle(),
        win_lobby: win_lobby.handle(),
    };
    let rules = Arc::new(rules(settings, room_ids, &demo));

    lobby.launch(rules.clone(), vec![screen("lobby.png")])?;
    lose_lobby.launch(rules.clone(), vec![screen("lose.png")])?;
    win_lobby.launch(rules, vec![screen("win.png")])?;
    info!(
        "Demo rooms up: lobby {}, lose {}, win {}",
        demo.lobby.id(),
        demo.lose_lobby.id(),
        demo.win_lobby.id()
    );
    Ok(demo)
}

fn screen(texture: &str) -> Box<dyn Entity> {
    Box::new(StaticBackground::new(0, SCREEN, texture))
}

fn spectator(room: &mut Room) -> Result<EntityId, RoomError> {
    let id = room.next_id();
    room.insert_entity(Box::new(NoOpPlayer::new(id)))?;
    Ok(id)
}

fn free_snake(room: &mut Room) -> Result<EntityId, RoomError> {
    let taken = room.players();
    SNAKE_IDS
        .into_iter()
        .find(|id| !taken.contains(id) && room.entity(*id).is_some())
        .ok_or(RoomError::RoomFull)
}

/// Lobby hook: move the first two waiting players into a new match.
fn start_match(room: &mut Room) {
    let players = room.players();
    if players.len() < 2 {
        return;
    }

    let snakes: Vec<Box<dyn Entity>> = vec![
        Box::new(Snake::new(SNAKE_IDS[0], Vec2::new(200.0, 200.0))),
        Box::new(Snake::new(SNAKE_IDS[1], Vec2::new(1200.0, 700.0))),
    ];
    let arena = match spawn_room(room.rules().clone(), SNAKE, snakes) {
        Ok(handle) => handle,
        Err(e) => {
            warn!("Room {}: failed to create match: {}", room.id(), e);
            return;
        }
    };
    info!("Room {}: players {:?} start match in room {}", room.id(), &players[..2], arena.id());

    for &player in &players[..2] {
        if let Err(e) = room.transfer(player, &arena) {
            warn!("Failed to move player {} to room {}: {}", player, arena.id(), e);
        }
    }
}
