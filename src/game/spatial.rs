//! Read-only spatial query surfaces used by collision checks

use parking_lot::RwLock;
use std::sync::Arc;

use super::player::Players;
use super::EntityId;

/// Spatial query over players.
///
/// The aggregate only reads through this; `refresh` is called from the game
/// loop after positions change so the index can rebuild its own copy.
pub trait PlayerSpatialIndex: Send + Sync {
    /// Players within `distance` of the box spanned by the two corners
    fn search(&self, x1: f64, y1: f64, x2: f64, y2: f64, distance: f64) -> Vec<EntityId>;

    fn refresh(&self, _players: &Players) {}
}

/// Position of one spawned player as of the last refresh
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlayerSpot {
    pub id: EntityId,
    pub x: f64,
    pub y: f64,
}

/// Snapshot index rebuilt on every refresh.
///
/// Other threads read the snapshot without touching the live registry.
#[derive(Debug, Default)]
pub struct SnapshotPlayerIndex {
    spots: RwLock<Arc<Vec<PlayerSpot>>>,
}

impl SnapshotPlayerIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.spots.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.spots.read().is_empty()
    }
}

impl PlayerSpatialIndex for SnapshotPlayerIndex {
    fn search(&self, x1: f64, y1: f64, x2: f64, y2: f64, distance: f64) -> Vec<EntityId> {
        let (min_x, max_x) = (x1.min(x2) - distance, x1.max(x2) + distance);
        let (min_y, max_y) = (y1.min(y2) - distance, y1.max(y2) + distance);
        self.spots
            .read()
            .iter()
            .filter(|s| s.x >= min_x && s.x <= max_x && s.y >= min_y && s.y <= max_y)
            .map(|s| s.id)
            .collect()
    }

    fn refresh(&self, players: &Players) {
        let spots: Vec<PlayerSpot> = players
            .spawned()
            .filter_map(|p| {
                p.position().map(|pos| PlayerSpot {
                    id: p.id(),
                    x: pos.x(),
                    y: pos.y(),
                })
            })
            .collect();
        *self.spots.write() = Arc::new(spots);
    }
}

/// A wall segment bolts bounce off
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Barrier {
    pub a: (f64, f64),
    pub b: (f64, f64),
}

impl Barrier {
    pub fn new(a: (f64, f64), b: (f64, f64)) -> Self {
        Self { a, b }
    }

    /// Unit normal; the sign is irrelevant for reflection
    pub fn normal(&self) -> (f64, f64) {
        let dx = self.b.0 - self.a.0;
        let dy = self.b.1 - self.a.1;
        let len = dx.hypot(dy);
        if len == 0.0 {
            return (0.0, 0.0);
        }
        (-dy / len, dx / len)
    }
}

/// Spatial query over barriers
pub trait BarrierSpatialIndex: Send + Sync {
    fn search(&self, x1: f64, y1: f64, x2: f64, y2: f64, distance: f64) -> Vec<Barrier>;
}

/// Fixed set of barriers; every search returns all of them
#[derive(Debug, Clone, Default)]
pub struct StaticBarriers {
    barriers: Vec<Barrier>,
}

impl StaticBarriers {
    pub fn new(barriers: Vec<Barrier>) -> Self {
        Self { barriers }
    }

    pub fn none() -> Self {
        Self::default()
    }

    /// Four walls of an arena centred on the origin
    pub fn arena_walls(width: f64, height: f64) -> Self {
        let (hw, hh) = (width / 2.0, height / 2.0);
        Self::new(vec![
            Barrier::new((-hw, -hh), (hw, -hh)),
            Barrier::new((hw, -hh), (hw, hh)),
            Barrier::new((hw, hh), (-hw, hh)),
            Barrier::new((-hw, hh), (-hw, -hh)),
        ])
    }

    pub fn len(&self) -> usize {
        self.barriers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.barriers.is_empty()
    }
}

impl BarrierSpatialIndex for StaticBarriers {
    fn search(&self, _x1: f64, _y1: f64, _x2: f64, _y2: f64, _distance: f64) -> Vec<Barrier> {
        self.barriers.clone()
    }
}
