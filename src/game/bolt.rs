//! Bolts (projectiles) and their registry

use std::collections::HashMap;

use super::vector::{PositionVector, Vector2};
use super::{EntityId, Origin};

/// Active bolt in the arena. Exhaustion removes it from [`Bolts`].
#[derive(Debug, Clone)]
pub struct Bolt {
    id: EntityId,
    owner_id: EntityId,
    origin: Origin,
    position: PositionVector,
    created_at: u64,
    max_duration_ms: u64,
}

impl Bolt {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: EntityId,
        owner_id: EntityId,
        origin: Origin,
        x: f64,
        y: f64,
        angle: f64,
        speed: f64,
        created_at: u64,
        max_duration_ms: u64,
    ) -> Self {
        Self {
            id,
            owner_id,
            origin,
            position: PositionVector::new(x, y, Vector2::new(angle, speed), created_at),
            created_at,
            max_duration_ms,
        }
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn owner_id(&self) -> EntityId {
        self.owner_id
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    pub fn position(&self) -> &PositionVector {
        &self.position
    }

    pub(crate) fn position_mut(&mut self) -> &mut PositionVector {
        &mut self.position
    }

    /// Lifetime is over once strictly more than `max_duration_ms` has elapsed
    pub fn is_expired(&self, now: u64) -> bool {
        now.saturating_sub(self.created_at) > self.max_duration_ms
    }
}

/// Registry of live bolts, mutated only on the game-loop thread
#[derive(Debug, Default)]
pub struct Bolts {
    entries: HashMap<EntityId, Bolt>,
}

impl Bolts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &EntityId) -> Option<&Bolt> {
        self.entries.get(id)
    }

    pub(crate) fn get_mut(&mut self, id: &EntityId) -> Option<&mut Bolt> {
        self.entries.get_mut(id)
    }

    pub fn contains(&self, id: &EntityId) -> bool {
        self.entries.contains_key(id)
    }

    pub(crate) fn insert(&mut self, bolt: Bolt) {
        self.entries.insert(bolt.id, bolt);
    }

    pub(crate) fn remove(&mut self, id: &EntityId) -> Option<Bolt> {
        self.entries.remove(id)
    }

    pub fn ids(&self) -> Vec<EntityId> {
        self.entries.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Bolt> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bolt(created_at: u64) -> Bolt {
        Bolt::new(
            EntityId::new(),
            EntityId::new(),
            Origin::Local,
            0.0,
            0.0,
            0.0,
            1.0,
            created_at,
            1_500,
        )
    }

    #[test]
    fn expiry_is_strictly_after_max_duration() {
        let b = bolt(1_000);
        assert!(!b.is_expired(2_000));
        assert!(!b.is_expired(2_500));
        assert!(b.is_expired(2_501));
    }

    #[test]
    fn registry_tracks_inserts_and_removals() {
        let mut bolts = Bolts::new();
        let first = bolt(0);
        let id = first.id();
        bolts.insert(first);
        bolts.insert(bolt(0));
        assert_eq!(bolts.len(), 2);
        assert!(bolts.contains(&id));

        assert!(bolts.remove(&id).is_some());
        assert!(!bolts.contains(&id));
        assert_eq!(bolts.len(), 1);
    }
}
