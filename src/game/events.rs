//! Domain facts emitted by the aggregate
//!
//! Every state change the aggregate makes on behalf of a local command is
//! described by one [`DomainEvent`]. Facts are keyed by entity and routed by
//! [`Concern`]; a fact with no payload is a tombstone and deletes all state
//! held for its key.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::EntityId;

/// Logical category of facts, one ordered log per concern
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Concern {
    /// Player presence; key-compacted
    JoinLeave,
    /// Spawn, movement, destruction; key-compacted
    PlayerAction,
    /// Bolt creation and exhaustion; retained for roughly one bolt lifetime
    BoltLifecycle,
    /// Mid-flight bolt changes (deflections); same retention as lifecycle
    BoltAction,
    /// Scores; key-compacted
    Score,
}

impl Concern {
    pub const ALL: [Concern; 5] = [
        Concern::JoinLeave,
        Concern::PlayerAction,
        Concern::BoltLifecycle,
        Concern::BoltAction,
        Concern::Score,
    ];

    pub fn index(self) -> usize {
        match self {
            Self::JoinLeave => 0,
            Self::PlayerAction => 1,
            Self::BoltLifecycle => 2,
            Self::BoltAction => 3,
            Self::Score => 4,
        }
    }

    pub fn topic(self) -> &'static str {
        match self {
            Self::JoinLeave => "arena.join-leave",
            Self::PlayerAction => "arena.player-action",
            Self::BoltLifecycle => "arena.bolt-lifecycle",
            Self::BoltAction => "arena.bolt-action",
            Self::Score => "arena.score",
        }
    }

    /// Bolt facts go stale after one bolt lifetime
    pub fn is_short_lived(self) -> bool {
        matches!(self, Self::BoltLifecycle | Self::BoltAction)
    }
}

impl fmt::Display for Concern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.topic())
    }
}

/// Why a player left the arena
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DestroyCause {
    Bolt { bolt_id: EntityId, owner_id: EntityId },
    Hazard { hazard_id: EntityId },
}

/// Why a bolt stopped
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExhaustCause {
    Timeout,
    Collision { player_id: EntityId },
}

/// Fact payloads. Each kind belongs to exactly one concern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventPayload {
    PlayerJoined,
    PlayerDisconnected,
    PlayerSpawned {
        x: f64,
        y: f64,
    },
    PlayerMoved {
        x: f64,
        y: f64,
        angle: f64,
        speed: f64,
    },
    PlayerDestroyed {
        cause: DestroyCause,
    },
    BoltFired {
        owner_id: EntityId,
        x: f64,
        y: f64,
        angle: f64,
        speed: f64,
    },
    BoltExhausted {
        owner_id: EntityId,
        cause: ExhaustCause,
    },
    BoltDeflected {
        x: f64,
        y: f64,
        angle: f64,
    },
    ScoreChanged {
        score: u32,
    },
}

impl EventPayload {
    pub fn concern(&self) -> Concern {
        match self {
            Self::PlayerJoined | Self::PlayerDisconnected => Concern::JoinLeave,
            Self::PlayerSpawned { .. } | Self::PlayerMoved { .. } | Self::PlayerDestroyed { .. } => {
                Concern::PlayerAction
            }
            Self::BoltFired { .. } | Self::BoltExhausted { .. } => Concern::BoltLifecycle,
            Self::BoltDeflected { .. } => Concern::BoltAction,
            Self::ScoreChanged { .. } => Concern::Score,
        }
    }
}

/// A keyed, timestamped fact. `payload == None` is a tombstone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainEvent {
    pub concern: Concern,
    pub key: EntityId,
    pub timestamp: u64,
    pub payload: Option<EventPayload>,
}

impl DomainEvent {
    pub fn new(key: EntityId, timestamp: u64, payload: EventPayload) -> Self {
        Self {
            concern: payload.concern(),
            key,
            timestamp,
            payload: Some(payload),
        }
    }

    pub fn tombstone(concern: Concern, key: EntityId, timestamp: u64) -> Self {
        Self {
            concern,
            key,
            timestamp,
            payload: None,
        }
    }

    pub fn is_tombstone(&self) -> bool {
        self.payload.is_none()
    }
}

/// Receives every fact the aggregate produces
pub trait EventSink: Send + Sync {
    fn dispatch(&self, event: DomainEvent);
}

/// Discards facts; for a standalone node with no replication
#[derive(Debug, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn dispatch(&self, _event: DomainEvent) {}
}

/// Keeps facts in memory so tests can inspect them
#[derive(Debug, Default)]
pub struct CollectingSink {
    events: Mutex<Vec<DomainEvent>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<DomainEvent> {
        self.events.lock().clone()
    }

    pub fn take(&self) -> Vec<DomainEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    /// Count facts whose payload matches `pred`
    pub fn count(&self, pred: impl Fn(&EventPayload) -> bool) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| e.payload.as_ref().is_some_and(&pred))
            .count()
    }
}

impl EventSink for CollectingSink {
    fn dispatch(&self, event: DomainEvent) {
        self.events.lock().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_picks_its_concern() {
        let id = EntityId::new();
        let fired = DomainEvent::new(
            id,
            10,
            EventPayload::BoltFired {
                owner_id: EntityId::new(),
                x: 0.0,
                y: 0.0,
                angle: 0.0,
                speed: 1.0,
            },
        );
        assert_eq!(fired.concern, Concern::BoltLifecycle);
        assert!(!fired.is_tombstone());

        let gone = DomainEvent::tombstone(Concern::JoinLeave, id, 11);
        assert!(gone.is_tombstone());
    }

    #[test]
    fn concern_indexes_are_dense() {
        for (i, concern) in Concern::ALL.iter().enumerate() {
            assert_eq!(concern.index(), i);
        }
    }

    #[test]
    fn payload_serializes_tagged() {
        let json = serde_json::to_string(&EventPayload::ScoreChanged { score: 3 }).unwrap();
        assert_eq!(json, r#"{"kind":"score_changed","score":3}"#);
    }
}
