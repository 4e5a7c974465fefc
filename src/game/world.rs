//! The authoritative game aggregate
//!
//! `Game` owns the player and bolt registries and is only ever touched from
//! the game-loop thread. Local commands and replicated facts share one set of
//! mutation paths; the [`Origin`] decides whether a change is validated,
//! clamped and published, or simply replayed.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

use super::bolt::{Bolt, Bolts};
use super::events::{
    Concern, DestroyCause, DomainEvent, EventPayload, EventSink, ExhaustCause,
};
use super::player::{ConnectionState, Player, Players};
use super::scheduler::{EventScheduler, Hazard, WorldEvent};
use super::spatial::{
    BarrierSpatialIndex, PlayerSpatialIndex, SnapshotPlayerIndex, StaticBarriers,
};
use super::vector::{distance_to_segment, segment_intersection, PositionVector, Vector2};
use super::{EntityId, GameError, GameSettings, Origin};
use crate::util::time::Clock;

/// Fraction of the arena used for random spawn points
const SPAWN_AREA: f64 = 0.9;

/// Counters exposed to health checks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GameStats {
    pub players: usize,
    pub local_players: usize,
    pub spawned: usize,
    pub bolts: usize,
    pub hazards: usize,
    pub tick: u64,
}

struct Deflection {
    contact: (f64, f64),
    end: (f64, f64),
    velocity: Vector2,
}

pub struct Game {
    settings: GameSettings,
    clock: Arc<dyn Clock>,
    players: Players,
    bolts: Bolts,
    scheduler: EventScheduler,
    hazards: Vec<Hazard>,
    player_index: Arc<dyn PlayerSpatialIndex>,
    barrier_index: Arc<dyn BarrierSpatialIndex>,
    sink: Arc<dyn EventSink>,
    rng: ChaCha8Rng,
    tick: u64,
    last_sweep: u64,
}

impl Game {
    pub fn new(settings: GameSettings, clock: Arc<dyn Clock>, sink: Arc<dyn EventSink>) -> Self {
        let now = clock.now_millis();
        Self {
            scheduler: EventScheduler::new(&settings),
            barrier_index: Arc::new(StaticBarriers::arena_walls(
                settings.arena_width,
                settings.arena_height,
            )),
            player_index: Arc::new(SnapshotPlayerIndex::new()),
            settings,
            clock,
            players: Players::new(),
            bolts: Bolts::new(),
            hazards: Vec::new(),
            sink,
            rng: ChaCha8Rng::seed_from_u64(rand::random::<u64>()),
            tick: 0,
            last_sweep: now,
        }
    }

    pub fn with_player_index(mut self, index: Arc<dyn PlayerSpatialIndex>) -> Self {
        self.player_index = index;
        self
    }

    pub fn with_barrier_index(mut self, index: Arc<dyn BarrierSpatialIndex>) -> Self {
        self.barrier_index = index;
        self
    }

    pub fn now(&self) -> u64 {
        self.clock.now_millis()
    }

    pub fn settings(&self) -> &GameSettings {
        &self.settings
    }

    pub fn players(&self) -> &Players {
        &self.players
    }

    pub fn player(&self, id: &EntityId) -> Option<&Player> {
        self.players.get(id)
    }

    pub fn bolts(&self) -> &Bolts {
        &self.bolts
    }

    pub fn hazards(&self) -> &[Hazard] {
        &self.hazards
    }

    pub fn stats(&self) -> GameStats {
        GameStats {
            players: self.players.len(),
            local_players: self.players.iter().filter(|p| p.origin().is_local()).count(),
            spawned: self.players.spawned().count(),
            bolts: self.bolts.len(),
            hazards: self.hazards.len(),
            tick: self.tick,
        }
    }

    /// Replay recent scheduler windows so restarts regenerate live hazards
    pub fn start(&mut self) {
        let now = self.now();
        for event in self.scheduler.start(now) {
            self.open_world_event(event, now);
        }
        info!(hazards = self.hazards.len(), "World scheduler started");
    }

    // ---------------------------------------------------------------------
    // Local commands
    // ---------------------------------------------------------------------

    /// Register a player, or reconnect one that dropped
    pub fn join(&mut self, id: EntityId) -> Result<(), GameError> {
        let now = self.now();
        self.join_from(Origin::Local, id, now);
        Ok(())
    }

    /// Spawn at a random point inside the arena
    pub fn spawn(&mut self, id: EntityId) -> Result<(f64, f64), GameError> {
        let half_w = self.settings.arena_width * SPAWN_AREA / 2.0;
        let half_h = self.settings.arena_height * SPAWN_AREA / 2.0;
        let x = self.rng.gen_range(-half_w..=half_w);
        let y = self.rng.gen_range(-half_h..=half_h);
        self.spawn_at(id, x, y)?;
        Ok((x, y))
    }

    pub fn spawn_at(&mut self, id: EntityId, x: f64, y: f64) -> Result<(), GameError> {
        let now = self.now();
        self.spawn_from(Origin::Local, id, x, y, now)
    }

    /// Apply a client-reported position.
    ///
    /// Returns `Ok(false)` when the update is older than the last one applied.
    pub fn move_player(
        &mut self,
        id: EntityId,
        x: f64,
        y: f64,
        timestamp: u64,
    ) -> Result<bool, GameError> {
        let max_speed = self.settings.player_max_move;
        let player = self.players.get_mut(&id).ok_or(GameError::UnknownPlayer(id))?;
        if !player.is_spawned() {
            return Err(GameError::InvalidState {
                player: id,
                state: player.state(),
                action: "move",
            });
        }
        let Some(pos) = player.position_mut() else {
            return Ok(false);
        };
        if !pos.move_to(x, y, timestamp, Some(max_speed)) {
            return Ok(false);
        }
        let (x, y, velocity) = (pos.x(), pos.y(), pos.velocity());
        player.touch(timestamp);

        self.sink.dispatch(DomainEvent::new(
            id,
            timestamp,
            EventPayload::PlayerMoved {
                x,
                y,
                angle: velocity.angle(),
                speed: velocity.magnitude(),
            },
        ));
        Ok(true)
    }

    /// Apply a position a connected client just reported, stamped with the
    /// loop clock. The stamp is pushed past the last applied one so two moves
    /// inside one millisecond (or right after a tick) are not taken as stale.
    pub fn report_position(&mut self, id: EntityId, x: f64, y: f64) -> Result<bool, GameError> {
        let now = self.now();
        let last = self
            .players
            .get(&id)
            .and_then(|p| p.position())
            .map(|pos| pos.timestamp());
        let timestamp = last.map_or(now, |last| now.max(last + 1));
        self.move_player(id, x, y, timestamp)
    }

    /// Fire a bolt from the player's position.
    ///
    /// Returns `Ok(None)` without publishing anything when the player is at
    /// the bolt cap.
    pub fn fire(&mut self, id: EntityId, angle: f64) -> Result<Option<EntityId>, GameError> {
        let now = self.now();
        let max_bolts = self.settings.player_max_bolts;
        let player = self.players.get_mut(&id).ok_or(GameError::UnknownPlayer(id))?;
        if !player.is_spawned() {
            return Err(GameError::InvalidState {
                player: id,
                state: player.state(),
                action: "fire",
            });
        }
        if player.bolt_count() >= max_bolts {
            debug!(player_id = %id, bolts = player.bolt_count(), "Bolt cap reached");
            return Ok(None);
        }
        let Some((x, y)) = player.position().map(|p| (p.x(), p.y())) else {
            return Ok(None);
        };
        player.bolt_fired();
        player.touch(now);

        let bolt_id = EntityId::new();
        let speed = self.settings.bolt_speed;
        self.bolts.insert(Bolt::new(
            bolt_id,
            id,
            Origin::Local,
            x,
            y,
            angle,
            speed,
            now,
            self.settings.bolt_max_duration_ms,
        ));

        let velocity = Vector2::new(angle, speed);
        self.sink.dispatch(DomainEvent::new(
            bolt_id,
            now,
            EventPayload::BoltFired {
                owner_id: id,
                x,
                y,
                angle: velocity.angle(),
                speed: velocity.magnitude(),
            },
        ));
        Ok(Some(bolt_id))
    }

    /// Network dropped; the player stays registered until it reconnects or
    /// the stall sweep expunges it
    pub fn disconnect(&mut self, id: EntityId) -> Result<(), GameError> {
        let now = self.now();
        let player = self.players.get_mut(&id).ok_or(GameError::UnknownPlayer(id))?;
        player.disconnect(now);
        self.sink
            .dispatch(DomainEvent::new(id, now, EventPayload::PlayerDisconnected));
        debug!(player_id = %id, "Player disconnected");
        Ok(())
    }

    /// Remove the player entirely
    pub fn leave(&mut self, id: EntityId) -> Result<(), GameError> {
        let now = self.now();
        if !self.remove_player(Origin::Local, id, now) {
            return Err(GameError::UnknownPlayer(id));
        }
        info!(player_id = %id, "Player left");
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Replicated facts
    // ---------------------------------------------------------------------

    /// Replay a fact produced by another node.
    ///
    /// Facts may reference entities this node has never seen (compacted logs
    /// keep only the latest record per key); those entities are created on the
    /// fly. Spawn, move and disconnect facts never override a player this node
    /// owns.
    pub fn apply_fact(&mut self, event: &DomainEvent) -> Result<(), GameError> {
        let (key, ts) = (event.key, event.timestamp);
        let Some(payload) = &event.payload else {
            self.apply_tombstone(event.concern, key);
            return Ok(());
        };

        match *payload {
            EventPayload::PlayerJoined => self.join_from(Origin::Replicated, key, ts),
            EventPayload::PlayerDisconnected => {
                if let Some(player) = self.replicated_player(key, ts) {
                    player.disconnect(ts);
                    player.touch(ts);
                }
            }
            EventPayload::PlayerSpawned { x, y } => {
                self.spawn_from(Origin::Replicated, key, x, y, ts)?;
            }
            EventPayload::PlayerMoved { x, y, angle, speed } => {
                if let Some(player) = self.replicated_player(key, ts) {
                    let velocity = Vector2::new(angle, speed);
                    if let Some(pos) = player.position_mut() {
                        pos.reset(x, y, velocity, ts);
                    } else if player.admits_entry_at(ts) {
                        // A move older than the last exit must not revive the replica
                        player.place(x, y, velocity, ts);
                    } else {
                        debug!(player_id = %key, ts, "Stale move for a player out of the arena");
                    }
                    player.touch(ts);
                }
            }
            EventPayload::PlayerDestroyed { cause } => {
                let player = self.players.get_or_insert(key, Origin::Replicated, ts);
                player.destroy(cause, ts);
                player.touch(ts);
            }
            EventPayload::BoltFired {
                owner_id,
                x,
                y,
                angle,
                speed,
            } => {
                if !self.bolts.contains(&key) {
                    self.bolts.insert(Bolt::new(
                        key,
                        owner_id,
                        Origin::Replicated,
                        x,
                        y,
                        angle,
                        speed,
                        ts,
                        self.settings.bolt_max_duration_ms,
                    ));
                    if let Some(owner) = self.players.get_mut(&owner_id) {
                        owner.bolt_fired();
                    }
                }
            }
            EventPayload::BoltExhausted { .. } => self.discard_bolt(key),
            EventPayload::BoltDeflected { x, y, angle } => {
                if let Some(bolt) = self.bolts.get_mut(&key) {
                    let pos = bolt.position_mut();
                    let velocity = Vector2::new(angle, pos.velocity().magnitude());
                    if !pos.reset(x, y, velocity, ts) {
                        // Already ticked past the bounce: re-project from it
                        let mut corrected = PositionVector::new(x, y, velocity, ts);
                        corrected.update(pos.timestamp());
                        *pos = corrected;
                    }
                }
            }
            EventPayload::ScoreChanged { score } => {
                self.players
                    .get_or_insert(key, Origin::Replicated, ts)
                    .set_score(score);
            }
        }
        Ok(())
    }

    fn apply_tombstone(&mut self, concern: Concern, key: EntityId) {
        match concern {
            Concern::JoinLeave | Concern::PlayerAction | Concern::Score => {
                if self.players.remove(&key).is_some() {
                    debug!(player_id = %key, %concern, "Player removed by tombstone");
                }
            }
            Concern::BoltLifecycle | Concern::BoltAction => self.discard_bolt(key),
        }
    }

    /// Player that replicated facts may update, or `None` if this node owns it
    fn replicated_player(&mut self, id: EntityId, ts: u64) -> Option<&mut Player> {
        let player = self.players.get_or_insert(id, Origin::Replicated, ts);
        if player.origin().is_local() {
            return None;
        }
        Some(player)
    }

    // ---------------------------------------------------------------------
    // Shared mutation paths
    // ---------------------------------------------------------------------

    fn emit(&self, origin: Origin, event: DomainEvent) {
        if origin.is_local() {
            self.sink.dispatch(event);
        }
    }

    fn join_from(&mut self, origin: Origin, id: EntityId, ts: u64) {
        let player = self.players.get_or_insert(id, origin, ts);
        // Whoever joined last owns the player
        player.set_origin(origin);
        player.reconnect();
        player.touch(ts);
        if origin.is_local() {
            info!(player_id = %id, state = ?player.state(), "Player joined");
        }
        self.emit(origin, DomainEvent::new(id, ts, EventPayload::PlayerJoined));
    }

    fn spawn_from(
        &mut self,
        origin: Origin,
        id: EntityId,
        x: f64,
        y: f64,
        ts: u64,
    ) -> Result<(), GameError> {
        let player = match origin {
            Origin::Local => {
                let player = self.players.get_mut(&id).ok_or(GameError::UnknownPlayer(id))?;
                if player.state() != ConnectionState::Connected {
                    return Err(GameError::InvalidState {
                        player: id,
                        state: player.state(),
                        action: "spawn",
                    });
                }
                player
            }
            Origin::Replicated => match self.replicated_player(id, ts) {
                Some(player) if player.admits_entry_at(ts) => {
                    if player.position().is_some_and(|pos| pos.timestamp() >= ts) {
                        return Ok(());
                    }
                    player
                }
                _ => return Ok(()),
            },
        };
        let ts = if origin.is_local() { player.entry_stamp(ts) } else { ts };
        player.spawn(x, y, ts);
        player.touch(ts);
        self.emit(origin, DomainEvent::new(id, ts, EventPayload::PlayerSpawned { x, y }));
        Ok(())
    }

    fn remove_player(&mut self, origin: Origin, id: EntityId, ts: u64) -> bool {
        if self.players.remove(&id).is_none() {
            return false;
        }
        for concern in [Concern::JoinLeave, Concern::PlayerAction, Concern::Score] {
            self.emit(origin, DomainEvent::tombstone(concern, id, ts));
        }
        true
    }

    /// Take a spawned local player out of the arena and publish the outcome
    fn destroy_player(&mut self, id: EntityId, cause: DestroyCause, ts: u64) {
        let Some(player) = self.players.get_mut(&id) else {
            return;
        };
        if !player.destroy(cause, ts) {
            return;
        }
        debug!(player_id = %id, ?cause, "Player destroyed");
        self.sink
            .dispatch(DomainEvent::new(id, ts, EventPayload::PlayerDestroyed { cause }));
        self.sink
            .dispatch(DomainEvent::new(id, ts, EventPayload::ScoreChanged { score: 0 }));

        if let DestroyCause::Bolt { owner_id, .. } = cause {
            if let Some(owner) = self.players.get_mut(&owner_id) {
                let score = owner.award_point();
                self.sink.dispatch(DomainEvent::new(
                    owner_id,
                    ts,
                    EventPayload::ScoreChanged { score },
                ));
            }
        }
    }

    /// Drop a bolt without publishing anything
    fn discard_bolt(&mut self, bolt_id: EntityId) {
        if let Some(bolt) = self.bolts.remove(&bolt_id) {
            if let Some(owner) = self.players.get_mut(&bolt.owner_id()) {
                owner.bolt_removed();
            }
        }
    }

    /// Remove a local bolt and publish its exhaustion
    fn exhaust_bolt(&mut self, bolt_id: EntityId, cause: ExhaustCause, ts: u64) {
        let Some(owner_id) = self.bolts.get(&bolt_id).map(|b| b.owner_id()) else {
            return;
        };
        self.discard_bolt(bolt_id);
        self.sink.dispatch(DomainEvent::new(
            bolt_id,
            ts,
            EventPayload::BoltExhausted { owner_id, cause },
        ));
        self.sink
            .dispatch(DomainEvent::tombstone(Concern::BoltLifecycle, bolt_id, ts));
    }

    fn open_world_event(&mut self, event: WorldEvent, now: u64) {
        match event {
            WorldEvent::HazardOpened(hazard) => {
                if now < hazard.ends_at {
                    debug!(hazard_id = %hazard.id, x = hazard.x, y = hazard.y, "Hazard opened");
                    self.hazards.push(hazard);
                }
            }
        }
    }

    // ---------------------------------------------------------------------
    // Fixed update
    // ---------------------------------------------------------------------

    /// Advance the world to `now`
    pub fn fixed_update(&mut self, now: u64) {
        self.tick += 1;

        for event in self.scheduler.poll(now) {
            self.open_world_event(event, now);
        }
        self.hazards.retain(|h| now < h.ends_at);

        // Dead-reckon everyone that did not report a position
        for player in self.players.iter_mut() {
            if let Some(pos) = player.position_mut() {
                pos.update(now);
            }
        }

        self.apply_hazards(now);
        self.player_index.refresh(&self.players);
        self.tick_bolts(now);

        if now.saturating_sub(self.last_sweep) >= self.settings.stall_sweep_interval_ms {
            self.last_sweep = now;
            self.sweep_stalled(now);
        }
    }

    fn apply_hazards(&mut self, now: u64) {
        let mut doomed = Vec::new();
        for hazard in self.hazards.iter().filter(|h| h.is_active(now)) {
            for player in self.players.spawned().filter(|p| p.origin().is_local()) {
                if let Some(pos) = player.position() {
                    if hazard.contains(pos.x(), pos.y()) {
                        doomed.push((player.id(), hazard.id));
                    }
                }
            }
        }
        for (player_id, hazard_id) in doomed {
            self.destroy_player(player_id, DestroyCause::Hazard { hazard_id }, now);
        }
    }

    fn tick_bolts(&mut self, now: u64) {
        let mut ids = self.bolts.ids();
        ids.sort();

        for bolt_id in ids {
            let Some(bolt) = self.bolts.get_mut(&bolt_id) else {
                continue;
            };
            let origin = bolt.origin();
            let owner_id = bolt.owner_id();
            let expired = bolt.is_expired(now);

            let pos = bolt.position_mut();
            pos.update(now);
            let start = pos.previous();
            let end = (pos.x(), pos.y());

            let mut path = vec![(start, end)];
            if let Some(bounce) = deflect(self.barrier_index.as_ref(), start, end, pos.velocity())
            {
                pos.bounce(bounce.contact, bounce.end.0, bounce.end.1, bounce.velocity);
                path = vec![(start, bounce.contact), (bounce.contact, bounce.end)];
                if origin.is_local() {
                    self.sink.dispatch(DomainEvent::new(
                        bolt_id,
                        now,
                        EventPayload::BoltDeflected {
                            x: bounce.end.0,
                            y: bounce.end.1,
                            angle: bounce.velocity.angle(),
                        },
                    ));
                }
            }

            // Only the node that fired a bolt decides what it hits
            let victim = if origin.is_local() {
                self.first_victim(owner_id, &path)
            } else {
                None
            };

            match (victim, origin) {
                (Some(player_id), _) => {
                    self.exhaust_bolt(bolt_id, ExhaustCause::Collision { player_id }, now);
                    self.destroy_player(player_id, DestroyCause::Bolt { bolt_id, owner_id }, now);
                }
                (None, Origin::Local) if expired => {
                    self.exhaust_bolt(bolt_id, ExhaustCause::Timeout, now);
                }
                (None, Origin::Replicated) if expired => self.discard_bolt(bolt_id),
                _ => {}
            }
        }
    }

    /// Nearest spawned non-owner player whose disc the path crosses
    fn first_victim(&self, owner_id: EntityId, path: &[((f64, f64), (f64, f64))]) -> Option<EntityId> {
        let radius = self.settings.bolt_collision_radius;
        for &(a, b) in path {
            let mut nearest: Option<(f64, EntityId)> = None;
            for id in self.player_index.search(a.0, a.1, b.0, b.1, radius) {
                if id == owner_id {
                    continue;
                }
                let Some(pos) = self
                    .players
                    .get(&id)
                    .filter(|p| p.is_spawned())
                    .and_then(|p| p.position())
                else {
                    continue;
                };
                if distance_to_segment(pos.x(), pos.y(), a.0, a.1, b.0, b.1) > radius {
                    continue;
                }
                let along = (pos.x() - a.0).hypot(pos.y() - a.1);
                if nearest.map_or(true, |(d, _)| along < d) {
                    nearest = Some((along, id));
                }
            }
            if let Some((_, id)) = nearest {
                return Some(id);
            }
        }
        None
    }

    fn sweep_stalled(&mut self, now: u64) {
        let timeout = self.settings.player_expunge_timeout_ms;
        let stalled: Vec<(EntityId, Origin)> = self
            .players
            .iter()
            .filter(|p| now.saturating_sub(p.last_activity()) > timeout)
            // Idle but connected local players stay; only dropped ones go
            .filter(|p| !p.origin().is_local() || p.state() == ConnectionState::Disconnected)
            .map(|p| (p.id(), p.origin()))
            .collect();

        for (id, origin) in stalled {
            info!(player_id = %id, ?origin, "Expunging stalled player");
            self.remove_player(origin, id, now);
        }
    }
}

/// First barrier crossed by `start -> end`, reflected once
fn deflect(
    barriers: &dyn BarrierSpatialIndex,
    start: (f64, f64),
    end: (f64, f64),
    velocity: Vector2,
) -> Option<Deflection> {
    let (t, barrier) = barriers
        .search(start.0, start.1, end.0, end.1, 0.0)
        .into_iter()
        .filter_map(|b| segment_intersection(start, end, b.a, b.b).map(|t| (t, b)))
        .filter(|(t, _)| *t > 1e-9)
        .min_by(|a, b| a.0.total_cmp(&b.0))?;

    let n = barrier.normal();
    let reflect = |x: f64, y: f64| {
        let dot = x * n.0 + y * n.1;
        (x - 2.0 * dot * n.0, y - 2.0 * dot * n.1)
    };

    let d = (end.0 - start.0, end.1 - start.1);
    let contact = (start.0 + t * d.0, start.1 + t * d.1);
    let r = reflect(d.0, d.1);
    let remaining = 1.0 - t;
    let (vx, vy) = reflect(velocity.x(), velocity.y());

    Some(Deflection {
        contact,
        end: (contact.0 + remaining * r.0, contact.1 + remaining * r.1),
        velocity: Vector2::from_cartesian(vx, vy),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::events::CollectingSink;
    use crate::util::time::ManualClock;
    use std::f64::consts::PI;

    const EPS: f64 = 1e-9;

    struct Harness {
        game: Game,
        clock: Arc<ManualClock>,
        sink: Arc<CollectingSink>,
    }

    fn harness(settings: GameSettings) -> Harness {
        let clock = Arc::new(ManualClock::new(0));
        let sink = Arc::new(CollectingSink::new());
        let game = Game::new(settings, clock.clone(), sink.clone());
        Harness { game, clock, sink }
    }

    impl Harness {
        fn tick(&mut self, now: u64) {
            self.clock.set(now);
            self.game.fixed_update(now);
        }

        fn spawned_player(&mut self, x: f64, y: f64) -> EntityId {
            let id = EntityId::new();
            self.game.join(id).unwrap();
            self.game.spawn_at(id, x, y).unwrap();
            id
        }

        fn exhausted(&self) -> Vec<ExhaustCause> {
            self.sink
                .events()
                .into_iter()
                .filter_map(|e| match e.payload {
                    Some(EventPayload::BoltExhausted { cause, .. }) => Some(cause),
                    _ => None,
                })
                .collect()
        }
    }

    #[test]
    fn bolt_kinematics_follow_angle() {
        let angles = [
            0.0,
            PI / 4.0,
            PI / 2.0,
            3.0 * PI / 4.0,
            PI,
            5.0 * PI / 4.0,
            3.0 * PI / 2.0,
        ];
        for angle in angles {
            let mut h = harness(GameSettings {
                bolt_speed: 0.01,
                ..GameSettings::default()
            });
            let owner = h.spawned_player(0.0, 0.0);
            let bolt_id = h.game.fire(owner, angle).unwrap().unwrap();

            h.tick(1_000);

            let pos = h.game.bolts().get(&bolt_id).unwrap().position();
            assert!((pos.x() - 0.01 * angle.cos()).abs() < EPS, "x at angle {angle}");
            assert!((pos.y() - 0.01 * angle.sin()).abs() < EPS, "y at angle {angle}");
        }
    }

    #[test]
    fn bolt_times_out_after_max_duration() {
        let mut h = harness(GameSettings::default());
        let owner = h.spawned_player(0.0, 0.0);
        let bolt_id = h.game.fire(owner, 0.0).unwrap().unwrap();

        h.tick(1_000);
        assert!(h.game.bolts().contains(&bolt_id));
        assert!(h.exhausted().is_empty());

        h.tick(2_000);
        assert!(!h.game.bolts().contains(&bolt_id));
        assert_eq!(h.exhausted(), vec![ExhaustCause::Timeout]);
        assert_eq!(h.game.player(&owner).unwrap().bolt_count(), 0);
    }

    #[test]
    fn collision_wins_over_timeout_in_the_same_tick() {
        let mut h = harness(GameSettings::default());
        let owner = h.spawned_player(0.0, 0.0);
        let victim = h.spawned_player(600.0, 5.0);
        h.game.fire(owner, 0.0).unwrap().unwrap();

        // Bolt sweeps 0 -> 800 and is past its 1500 ms lifetime
        h.tick(2_000);

        assert_eq!(
            h.exhausted(),
            vec![ExhaustCause::Collision { player_id: victim }]
        );
        assert!(h.game.bolts().is_empty());
    }

    #[test]
    fn collision_destroys_victim_and_scores_owner() {
        let mut h = harness(GameSettings::default());
        let owner = h.spawned_player(0.0, 0.0);
        let victim = h.spawned_player(100.0, 0.0);
        let bolt_id = h.game.fire(owner, 0.0).unwrap().unwrap();

        h.tick(1_000);

        let v = h.game.player(&victim).unwrap();
        assert_eq!(v.state(), ConnectionState::Connected);
        assert_eq!(
            v.destroyed_by(),
            Some(DestroyCause::Bolt {
                bolt_id,
                owner_id: owner
            })
        );
        assert_eq!(h.game.player(&owner).unwrap().score(), 1);

        let facts = h.sink.events();
        assert!(facts.iter().any(|e| e.key == owner
            && e.payload == Some(EventPayload::ScoreChanged { score: 1 })));
        assert!(facts
            .iter()
            .any(|e| e.key == bolt_id && e.concern == Concern::BoltLifecycle && e.is_tombstone()));
    }

    #[test]
    fn eleventh_bolt_is_silently_refused() {
        let mut h = harness(GameSettings::default());
        let owner = h.spawned_player(0.0, 0.0);
        for _ in 0..10 {
            assert!(h.game.fire(owner, 1.0).unwrap().is_some());
        }
        assert_eq!(h.game.fire(owner, 1.0).unwrap(), None);
        assert_eq!(h.game.bolts().len(), 10);
        assert_eq!(
            h.sink
                .count(|p| matches!(p, EventPayload::BoltFired { .. })),
            10
        );
    }

    #[test]
    fn stale_move_is_ignored() {
        let mut h = harness(GameSettings::default());
        let id = h.spawned_player(0.0, 0.0);
        assert!(h.game.move_player(id, 10.0, 0.0, 100).unwrap());
        let before = h.game.player(&id).unwrap().position().cloned();

        assert!(!h.game.move_player(id, 50.0, 50.0, 100).unwrap());
        assert!(!h.game.move_player(id, 50.0, 50.0, 90).unwrap());
        assert_eq!(h.game.player(&id).unwrap().position().cloned(), before);
        assert_eq!(
            h.sink
                .count(|p| matches!(p, EventPayload::PlayerMoved { .. })),
            1
        );
    }

    #[test]
    fn move_is_clamped_and_published() {
        let mut h = harness(GameSettings::default());
        let id = h.spawned_player(0.0, 0.0);
        // 1000 units in one second against a 200 u/s limit
        h.game.move_player(id, 1_000.0, 0.0, 1_000).unwrap();
        let pos = h.game.player(&id).unwrap().position().unwrap().clone();
        assert!((pos.x() - 200.0).abs() < EPS);

        let moved = h
            .sink
            .events()
            .into_iter()
            .find_map(|e| match e.payload {
                Some(EventPayload::PlayerMoved { x, speed, .. }) => Some((x, speed)),
                _ => None,
            })
            .unwrap();
        assert!((moved.0 - 200.0).abs() < EPS);
        assert!((moved.1 - 200.0).abs() < EPS);
    }

    #[test]
    fn commands_check_player_state() {
        let mut h = harness(GameSettings::default());
        let stranger = EntityId::new();
        assert!(matches!(
            h.game.fire(stranger, 0.0),
            Err(GameError::UnknownPlayer(_))
        ));

        let id = EntityId::new();
        h.game.join(id).unwrap();
        assert!(matches!(
            h.game.fire(id, 0.0),
            Err(GameError::InvalidState { action: "fire", .. })
        ));
        h.game.spawn_at(id, 0.0, 0.0).unwrap();
        assert!(matches!(
            h.game.spawn_at(id, 1.0, 1.0),
            Err(GameError::InvalidState { action: "spawn", .. })
        ));
    }

    #[test]
    fn random_spawn_stays_inside_arena() {
        let mut h = harness(GameSettings::default());
        for _ in 0..50 {
            let id = EntityId::new();
            h.game.join(id).unwrap();
            let (x, y) = h.game.spawn(id).unwrap();
            assert!(x.abs() <= 1_000.0 && y.abs() <= 1_000.0);
        }
    }

    #[test]
    fn tombstone_removes_player_and_is_idempotent() {
        let mut h = harness(GameSettings::default());
        let id = h.spawned_player(0.0, 0.0);
        h.sink.take();

        h.game
            .apply_fact(&DomainEvent::tombstone(Concern::JoinLeave, id, 10))
            .unwrap();
        assert!(h.game.player(&id).is_none());

        // Never seen: nothing to remove, nothing fails
        let unknown = EntityId::new();
        h.game
            .apply_fact(&DomainEvent::tombstone(Concern::PlayerAction, unknown, 11))
            .unwrap();
        h.game
            .apply_fact(&DomainEvent::tombstone(Concern::BoltLifecycle, unknown, 12))
            .unwrap();
        assert!(h.sink.events().is_empty());
    }

    #[test]
    fn replicated_facts_materialize_without_publishing() {
        let mut h = harness(GameSettings::default());
        let remote = EntityId::new();
        let moved = DomainEvent::new(
            remote,
            500,
            EventPayload::PlayerMoved {
                x: 30.0,
                y: -20.0,
                angle: 0.0,
                speed: 10.0,
            },
        );
        h.game.apply_fact(&moved).unwrap();

        let player = h.game.player(&remote).unwrap();
        assert_eq!(player.origin(), Origin::Replicated);
        assert!(player.is_spawned());
        assert_eq!(player.position().unwrap().x(), 30.0);

        // Dead reckoning carries it forward on the next tick
        h.tick(1_500);
        let x = h.game.player(&remote).unwrap().position().unwrap().x();
        assert!((x - 40.0).abs() < EPS);

        let bolt = EntityId::new();
        h.game
            .apply_fact(&DomainEvent::new(
                bolt,
                1_500,
                EventPayload::BoltFired {
                    owner_id: remote,
                    x: 30.0,
                    y: -20.0,
                    angle: PI,
                    speed: 400.0,
                },
            ))
            .unwrap();
        assert!(h.game.bolts().contains(&bolt));
        assert_eq!(h.game.player(&remote).unwrap().bolt_count(), 1);

        assert!(h.sink.events().is_empty());
    }

    #[test]
    fn replicated_moves_do_not_override_local_players() {
        let mut h = harness(GameSettings::default());
        let id = h.spawned_player(5.0, 5.0);
        h.game
            .apply_fact(&DomainEvent::new(
                id,
                999,
                EventPayload::PlayerMoved {
                    x: 100.0,
                    y: 100.0,
                    angle: 0.0,
                    speed: 0.0,
                },
            ))
            .unwrap();
        assert_eq!(h.game.player(&id).unwrap().position().unwrap().x(), 5.0);
    }

    #[test]
    fn replicated_destruction_applies_to_local_victim() {
        let mut h = harness(GameSettings::default());
        let id = h.spawned_player(5.0, 5.0);
        let cause = DestroyCause::Bolt {
            bolt_id: EntityId::new(),
            owner_id: EntityId::new(),
        };
        h.game
            .apply_fact(&DomainEvent::new(id, 10, EventPayload::PlayerDestroyed { cause }))
            .unwrap();
        let player = h.game.player(&id).unwrap();
        assert_eq!(player.state(), ConnectionState::Connected);
        assert_eq!(player.origin(), Origin::Local);
    }

    #[test]
    fn leave_publishes_tombstones() {
        let mut h = harness(GameSettings::default());
        let id = h.spawned_player(0.0, 0.0);
        h.sink.take();

        h.game.leave(id).unwrap();
        let concerns: Vec<Concern> = h
            .sink
            .events()
            .iter()
            .filter(|e| e.key == id && e.is_tombstone())
            .map(|e| e.concern)
            .collect();
        assert_eq!(
            concerns,
            vec![Concern::JoinLeave, Concern::PlayerAction, Concern::Score]
        );
        assert!(matches!(h.game.leave(id), Err(GameError::UnknownPlayer(_))));
    }

    #[test]
    fn rejoin_reconnects_dropped_player() {
        let mut h = harness(GameSettings::default());
        let id = h.spawned_player(0.0, 0.0);
        h.game.disconnect(id).unwrap();
        assert_eq!(
            h.game.player(&id).unwrap().state(),
            ConnectionState::Disconnected
        );
        h.game.join(id).unwrap();
        assert_eq!(
            h.game.player(&id).unwrap().state(),
            ConnectionState::Connected
        );
    }

    #[test]
    fn stall_sweep_expunges_idle_players() {
        let mut h = harness(GameSettings::default());
        let dropped = EntityId::new();
        h.game.join(dropped).unwrap();
        h.game.disconnect(dropped).unwrap();
        let playing = h.spawned_player(0.0, 0.0);
        h.sink.take();

        h.tick(30_000);
        assert!(h.game.player(&dropped).is_some());

        h.tick(65_000);
        assert!(h.game.player(&dropped).is_none());
        assert!(h.game.player(&playing).is_some());
        assert_eq!(
            h.sink
                .events()
                .iter()
                .filter(|e| e.key == dropped && e.is_tombstone())
                .count(),
            3
        );
    }

    #[test]
    fn stall_sweep_spares_destroyed_players_still_connected() {
        let mut h = harness(GameSettings::default());
        let id = h.spawned_player(0.0, 0.0);
        h.game.hazards.push(Hazard {
            id: EntityId::from_u128(3),
            x: 0.0,
            y: 0.0,
            radius: 50.0,
            starts_at: 60_000,
            ends_at: 62_000,
        });

        h.tick(61_000);
        assert!(!h.game.player(&id).unwrap().is_spawned());

        // Idle since t=0, destroyed, but the socket is still open
        h.tick(65_000);
        let player = h.game.player(&id).unwrap();
        assert_eq!(player.state(), ConnectionState::Connected);
        assert!(h.game.spawn(id).is_ok());
    }

    #[test]
    fn stale_facts_do_not_revive_a_destroyed_replica() {
        let mut h = harness(GameSettings::default());
        let remote = EntityId::new();
        h.game
            .apply_fact(&DomainEvent::new(
                remote,
                100,
                EventPayload::PlayerSpawned { x: 100.0, y: 0.0 },
            ))
            .unwrap();

        // Local shot lands before the owner's move from t=400 arrives
        h.clock.set(200);
        let shooter = h.spawned_player(0.0, 0.0);
        h.game.fire(shooter, 0.0).unwrap().unwrap();
        h.tick(500);
        assert!(!h.game.player(&remote).unwrap().is_spawned());
        assert_eq!(h.game.player(&shooter).unwrap().score(), 1);

        let moved = |ts| {
            DomainEvent::new(
                remote,
                ts,
                EventPayload::PlayerMoved {
                    x: 100.0,
                    y: 0.0,
                    angle: 0.0,
                    speed: 0.0,
                },
            )
        };
        h.game.apply_fact(&moved(400)).unwrap();
        h.game
            .apply_fact(&DomainEvent::new(
                remote,
                450,
                EventPayload::PlayerSpawned { x: 100.0, y: 0.0 },
            ))
            .unwrap();
        assert!(!h.game.player(&remote).unwrap().is_spawned());

        // A second shot through the same spot finds nobody
        h.game.fire(shooter, 0.0).unwrap().unwrap();
        h.tick(1_000);
        assert_eq!(h.game.player(&shooter).unwrap().score(), 1);
        assert_eq!(
            h.sink
                .count(|p| matches!(p, EventPayload::PlayerDestroyed { .. })),
            1
        );

        // The owner's respawn after the hit is honoured
        h.game.apply_fact(&moved(1_200)).unwrap();
        assert!(h.game.player(&remote).unwrap().is_spawned());
    }

    #[test]
    fn respawn_in_the_same_millisecond_is_stamped_after_the_exit() {
        let mut h = harness(GameSettings::default());
        h.clock.set(10);
        let id = h.spawned_player(0.0, 0.0);
        h.game
            .apply_fact(&DomainEvent::new(
                id,
                10,
                EventPayload::PlayerDestroyed {
                    cause: DestroyCause::Hazard {
                        hazard_id: EntityId::from_u128(1),
                    },
                },
            ))
            .unwrap();
        h.sink.take();

        h.game.spawn_at(id, 1.0, 1.0).unwrap();
        let spawned = h.sink.events();
        assert_eq!(spawned.len(), 1);
        assert_eq!(spawned[0].timestamp, 11);
    }

    #[test]
    fn back_to_back_reports_are_both_applied() {
        let mut h = harness(GameSettings::default());
        h.clock.set(1_000);
        let id = h.spawned_player(0.0, 0.0);
        h.sink.take();

        // Same loop millisecond as the spawn and as each other
        assert!(h.game.report_position(id, 0.1, 0.0).unwrap());
        assert!(h.game.report_position(id, 0.2, 0.0).unwrap());
        let pos = h.game.player(&id).unwrap().position().unwrap().clone();
        assert_eq!(pos.timestamp(), 1_002);
        assert!(pos.x() > 0.1);
        assert_eq!(
            h.sink
                .count(|p| matches!(p, EventPayload::PlayerMoved { .. })),
            2
        );
    }

    #[test]
    fn active_hazard_destroys_spawned_players() {
        let mut h = harness(GameSettings::default());
        let inside = h.spawned_player(10.0, 10.0);
        let outside = h.spawned_player(500.0, 500.0);
        let hazard_id = EntityId::from_u128(7);
        h.game.hazards.push(Hazard {
            id: hazard_id,
            x: 0.0,
            y: 0.0,
            radius: 50.0,
            starts_at: 0,
            ends_at: 10_000,
        });

        h.tick(50);
        assert_eq!(
            h.game.player(&inside).unwrap().destroyed_by(),
            Some(DestroyCause::Hazard { hazard_id })
        );
        assert!(h.game.player(&outside).unwrap().is_spawned());

        h.tick(10_000);
        assert!(h.game.hazards().is_empty());
    }

    #[test]
    fn bolts_bounce_off_arena_walls() {
        let mut h = harness(GameSettings {
            arena_width: 200.0,
            arena_height: 200.0,
            ..GameSettings::default()
        });
        let owner = h.spawned_player(0.0, 0.0);
        let bolt_id = h.game.fire(owner, 0.0).unwrap().unwrap();

        // 200 units of travel against a wall at x = 100
        h.tick(500);

        let pos = h.game.bolts().get(&bolt_id).unwrap().position();
        assert!(pos.x().abs() < 1e-6);
        assert!((pos.velocity().x() + 400.0).abs() < 1e-6);
        assert_eq!(
            h.sink
                .count(|p| matches!(p, EventPayload::BoltDeflected { .. })),
            1
        );
    }

    #[test]
    fn without_barriers_bolts_fly_straight() {
        let settings = GameSettings {
            arena_width: 200.0,
            arena_height: 200.0,
            ..GameSettings::default()
        };
        let mut h = harness(settings.clone());
        h.game = Game::new(settings, h.clock.clone(), h.sink.clone())
            .with_barrier_index(Arc::new(StaticBarriers::none()));
        let owner = h.spawned_player(0.0, 0.0);
        let bolt_id = h.game.fire(owner, 0.0).unwrap().unwrap();

        h.tick(500);

        let pos = h.game.bolts().get(&bolt_id).unwrap().position();
        assert!((pos.x() - 200.0).abs() < 1e-6);
        assert_eq!(
            h.sink
                .count(|p| matches!(p, EventPayload::BoltDeflected { .. })),
            0
        );
    }

    #[test]
    fn start_replays_recent_windows() {
        const WINDOW: u64 = 180_000;
        let mut h = harness(GameSettings::default());
        let now = 10 * WINDOW + WINDOW - 1;
        h.clock.set(now);
        h.game.start();

        let reference = EventScheduler::new(&GameSettings::default());
        let expected: Vec<Hazard> = (8..=10)
            .flat_map(|w| reference.events_for_window(w * WINDOW))
            .map(|WorldEvent::HazardOpened(hazard)| hazard)
            .filter(|hazard| now < hazard.ends_at)
            .collect();
        assert_eq!(h.game.hazards(), expected.as_slice());
    }
}
