//! Game simulation modules

pub mod bolt;
pub mod events;
pub mod game_loop;
pub mod player;
pub mod scheduler;
pub mod spatial;
pub mod vector;
pub mod world;

pub use bolt::{Bolt, Bolts};
pub use events::{
    CollectingSink, Concern, DestroyCause, DomainEvent, EventPayload, EventSink, ExhaustCause,
    NullSink,
};
pub use game_loop::{GameLoop, GameQueue, IngestQueue, LoopHandle, Task};
pub use player::{ConnectionState, Player, Players};
pub use scheduler::{EventScheduler, Hazard, WorldEvent};
pub use vector::{PositionVector, Vector2};
pub use world::{Game, GameStats};

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::config::Config;

/// Opaque identifier for players, bolts and hazards
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(Uuid);

impl EntityId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_u128(value: u128) -> Self {
        Self(Uuid::from_u128(value))
    }

    pub fn as_u128(&self) -> u128 {
        self.0.as_u128()
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for EntityId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Where a mutation came from.
///
/// Local commands are authoritative: they are validated, clamped and emitted
/// as facts. Replicated facts replay another node's decisions and emit nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Origin {
    Local,
    Replicated,
}

impl Origin {
    pub fn is_local(self) -> bool {
        self == Self::Local
    }
}

/// Domain tuning, derived from [`Config`]
#[derive(Debug, Clone)]
pub struct GameSettings {
    pub tick_interval_ms: u64,
    pub bolt_max_duration_ms: u64,
    pub bolt_speed: f64,
    pub bolt_collision_radius: f64,
    pub player_max_bolts: u32,
    pub player_max_move: f64,
    pub player_expunge_timeout_ms: u64,
    pub stall_sweep_interval_ms: u64,
    pub arena_width: f64,
    pub arena_height: f64,
    pub scheduler_window_ms: u64,
    pub scheduler_replay_windows: u32,
}

impl From<&Config> for GameSettings {
    fn from(config: &Config) -> Self {
        Self {
            tick_interval_ms: config.tick_interval_ms,
            bolt_max_duration_ms: config.bolt_max_duration_ms,
            bolt_speed: config.bolt_speed,
            bolt_collision_radius: config.bolt_collision_radius,
            player_max_bolts: config.player_max_bolts,
            player_max_move: config.player_max_move,
            player_expunge_timeout_ms: config.player_expunge_timeout_ms,
            stall_sweep_interval_ms: config.stall_sweep_interval_ms,
            arena_width: config.arena_width,
            arena_height: config.arena_height,
            scheduler_window_ms: config.scheduler_window_ms,
            scheduler_replay_windows: config.scheduler_replay_windows,
        }
    }
}

impl Default for GameSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

/// Errors raised by local commands
#[derive(Debug, thiserror::Error)]
pub enum GameError {
    #[error("Unknown player {0}")]
    UnknownPlayer(EntityId),

    #[error("Player {player} cannot {action} while {state:?}")]
    InvalidState {
        player: EntityId,
        state: ConnectionState,
        action: &'static str,
    },
}
