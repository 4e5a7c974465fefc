//! Application state shared across routes

use std::sync::Arc;
use uuid::Uuid;

use crate::config::Config;
use crate::game::spatial::SnapshotPlayerIndex;
use crate::game::GameQueue;
use crate::replication::CatchUpGate;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    /// Origin stamped on every fact this process publishes
    pub node_id: Uuid,
    /// Command queue into the game loop
    pub queue: GameQueue,
    pub gate: Arc<CatchUpGate>,
    /// Last player positions published by the game loop
    pub player_index: Arc<SnapshotPlayerIndex>,
}
