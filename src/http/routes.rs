//! HTTP route definitions

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use serde::Serialize;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::app::AppState;
use crate::game::{Concern, GameStats};
use crate::queue::QueueError;
use crate::util::time::uptime_secs;
use crate::ws::handler::ws_handler;

/// How long a health check waits for the game loop
const STATS_TIMEOUT: Duration = Duration::from_secs(1);

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ============================================================================
// Health endpoint
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    node_id: Uuid,
    uptime_secs: u64,
    pending_concerns: Vec<Concern>,
    /// Spawned players as of the last fixed update
    visible_players: usize,
    stats: GameStats,
}

async fn health_handler(State(state): State<AppState>) -> Result<Json<HealthResponse>, AppError> {
    let reply = state.queue.request(|game| game.stats())?;
    let stats = tokio::time::timeout(STATS_TIMEOUT, reply)
        .await
        .map_err(|_| AppError::LoopUnresponsive)?
        .map_err(|_| AppError::LoopUnresponsive)?;

    let ready = state.gate.is_ready();
    Ok(Json(HealthResponse {
        status: if ready { "ok" } else { "catching_up" },
        node_id: state.node_id,
        uptime_secs: uptime_secs(),
        pending_concerns: if ready { Vec::new() } else { state.gate.pending() },
        visible_players: state.player_index.len(),
        stats,
    }))
}

// ============================================================================
// Error handling
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Replaying history; not accepting players yet")]
    NotReady(Vec<Concern>),

    #[error("Game loop is overloaded: {0}")]
    Busy(#[from] QueueError),

    #[error("Game loop did not answer in time")]
    LoopUnresponsive,
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let body = match &self {
            AppError::NotReady(pending) => serde_json::json!({
                "error": self.to_string(),
                "pending_concerns": pending,
            }),
            _ => serde_json::json!({ "error": self.to_string() }),
        };

        (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::Node;
    use crate::config::Config;
    use crate::replication::MemoryLog;
    use std::sync::Arc;

    #[tokio::test]
    async fn health_reports_loop_stats() {
        let node = Node::start(Config::default(), Arc::new(MemoryLog::new(1, 1_500))).unwrap();

        let Json(health) = health_handler(State(node.state().clone())).await.unwrap();
        assert_eq!(health.status, "ok");
        assert!(health.pending_concerns.is_empty());
        assert_eq!(health.stats.players, 0);

        node.shutdown();
    }

    #[test]
    fn errors_map_to_service_unavailable() {
        let response = AppError::NotReady(vec![Concern::Score]).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let busy = AppError::from(QueueError::CapacityExceeded { capacity: 2 });
        assert_eq!(busy.into_response().status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
