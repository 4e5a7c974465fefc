//! Player entity and registry

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::events::DestroyCause;
use super::vector::{PositionVector, Vector2};
use super::{EntityId, Origin};

/// Player connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Network dropped; kept until the stall sweep or a reconnect
    Disconnected,
    /// Joined but not in the arena
    Connected,
    /// In the arena with a position
    Spawned,
}

/// Player state (authoritative when `origin` is local)
#[derive(Debug, Clone)]
pub struct Player {
    id: EntityId,
    origin: Origin,
    state: ConnectionState,
    position: Option<PositionVector>,
    score: u32,
    last_activity: u64,
    bolt_count: u32,
    destroyed_by: Option<DestroyCause>,
    /// When the player was last destroyed or disconnected
    left_arena_at: Option<u64>,
}

impl Player {
    pub fn new(id: EntityId, origin: Origin, now: u64) -> Self {
        Self {
            id,
            origin,
            state: ConnectionState::Connected,
            position: None,
            score: 0,
            last_activity: now,
            bolt_count: 0,
            destroyed_by: None,
            left_arena_at: None,
        }
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_spawned(&self) -> bool {
        self.state == ConnectionState::Spawned
    }

    pub fn position(&self) -> Option<&PositionVector> {
        self.position.as_ref()
    }

    pub(crate) fn position_mut(&mut self) -> Option<&mut PositionVector> {
        self.position.as_mut()
    }

    pub fn score(&self) -> u32 {
        self.score
    }

    pub fn last_activity(&self) -> u64 {
        self.last_activity
    }

    pub fn bolt_count(&self) -> u32 {
        self.bolt_count
    }

    pub fn destroyed_by(&self) -> Option<DestroyCause> {
        self.destroyed_by
    }

    /// Whether a position stamped `timestamp` may put the player in the
    /// arena. Anything not newer than the last exit is stale.
    pub fn admits_entry_at(&self, timestamp: u64) -> bool {
        self.is_spawned() || self.left_arena_at.map_or(true, |left| timestamp > left)
    }

    /// Earliest stamp at or after `now` that replicas will accept as an entry
    pub(crate) fn entry_stamp(&self, now: u64) -> u64 {
        self.left_arena_at.map_or(now, |left| now.max(left + 1))
    }

    pub(crate) fn touch(&mut self, timestamp: u64) {
        self.last_activity = self.last_activity.max(timestamp);
    }

    pub(crate) fn set_origin(&mut self, origin: Origin) {
        self.origin = origin;
    }

    /// Back to `Connected` after a network drop
    pub(crate) fn reconnect(&mut self) {
        if self.state == ConnectionState::Disconnected {
            self.state = ConnectionState::Connected;
        }
    }

    pub(crate) fn disconnect(&mut self, timestamp: u64) {
        self.state = ConnectionState::Disconnected;
        self.position = None;
        self.mark_exit(timestamp);
    }

    fn mark_exit(&mut self, timestamp: u64) {
        self.left_arena_at = Some(self.left_arena_at.map_or(timestamp, |t| t.max(timestamp)));
    }

    pub(crate) fn spawn(&mut self, x: f64, y: f64, timestamp: u64) {
        self.place(x, y, Vector2::ZERO, timestamp);
    }

    /// Enter the arena already moving
    pub(crate) fn place(&mut self, x: f64, y: f64, velocity: Vector2, timestamp: u64) {
        self.position = Some(PositionVector::new(x, y, velocity, timestamp));
        self.state = ConnectionState::Spawned;
        self.destroyed_by = None;
    }

    /// Leave the arena. Returns false if the player was not spawned.
    pub(crate) fn destroy(&mut self, cause: DestroyCause, timestamp: u64) -> bool {
        if !self.is_spawned() {
            return false;
        }
        self.state = ConnectionState::Connected;
        self.position = None;
        self.destroyed_by = Some(cause);
        self.mark_exit(timestamp);
        self.score = 0;
        true
    }

    pub(crate) fn award_point(&mut self) -> u32 {
        self.score = self.score.saturating_add(1);
        self.score
    }

    pub(crate) fn set_score(&mut self, score: u32) {
        self.score = score;
    }

    pub(crate) fn bolt_fired(&mut self) {
        self.bolt_count = self.bolt_count.saturating_add(1);
    }

    pub(crate) fn bolt_removed(&mut self) {
        self.bolt_count = self.bolt_count.saturating_sub(1);
    }
}

/// Registry of players, mutated only on the game-loop thread
#[derive(Debug, Default)]
pub struct Players {
    entries: HashMap<EntityId, Player>,
}

impl Players {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &EntityId) -> Option<&Player> {
        self.entries.get(id)
    }

    pub(crate) fn get_mut(&mut self, id: &EntityId) -> Option<&mut Player> {
        self.entries.get_mut(id)
    }

    pub fn contains(&self, id: &EntityId) -> bool {
        self.entries.contains_key(id)
    }

    pub(crate) fn insert(&mut self, player: Player) {
        self.entries.insert(player.id, player);
    }

    pub(crate) fn get_or_insert(&mut self, id: EntityId, origin: Origin, now: u64) -> &mut Player {
        self.entries
            .entry(id)
            .or_insert_with(|| Player::new(id, origin, now))
    }

    pub(crate) fn remove(&mut self, id: &EntityId) -> Option<Player> {
        self.entries.remove(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Player> {
        self.entries.values()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut Player> {
        self.entries.values_mut()
    }

    pub fn spawned(&self) -> impl Iterator<Item = &Player> {
        self.entries.values().filter(|p| p.is_spawned())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
