//! WebSocket upgrade handler

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{stream::SplitSink, SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::app::AppState;
use crate::game::EntityId;
use crate::http::AppError;
use crate::queue::QueueError;
use crate::util::rate_limit::ConnectionRateLimiter;
use crate::util::time::unix_millis;
use crate::ws::protocol::{ClientMsg, ErrorCode, ServerMsg};

/// Outbound messages buffered per connection
const OUTBOUND_BUFFER: usize = 64;

/// WebSocket upgrade handler. Refuses players until replication has caught up.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> Result<Response, AppError> {
    if !state.gate.is_ready() {
        return Err(AppError::NotReady(state.gate.pending()));
    }
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state)))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, state: AppState) {
    let player_id = EntityId::new();
    info!(%player_id, "New WebSocket connection");

    let (mut ws_sink, mut ws_stream) = socket.split();

    if let Err(e) = state.queue.enqueue(move |game| Ok(game.join(player_id)?)) {
        warn!(%player_id, error = %e, "Join rejected");
        let _ = send_msg(&mut ws_sink, &ServerMsg::error(ErrorCode::Busy, e.to_string())).await;
        return;
    }

    let welcome = ServerMsg::Welcome {
        player_id,
        server_time: unix_millis(),
    };
    if let Err(e) = send_msg(&mut ws_sink, &welcome).await {
        error!(%player_id, error = %e, "Failed to send welcome");
        disconnect(&state, player_id);
        return;
    }

    // Replies are produced on the game-loop thread and written here
    let (outbound, mut replies) = mpsc::channel::<ServerMsg>(OUTBOUND_BUFFER);
    let writer = tokio::spawn(async move {
        while let Some(msg) = replies.recv().await {
            if let Err(e) = send_msg(&mut ws_sink, &msg).await {
                debug!(%player_id, error = %e, "WebSocket send failed");
                break;
            }
        }
    });

    let limiter = ConnectionRateLimiter::new();
    let mut left = false;

    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                if !limiter.check_command() {
                    debug!(%player_id, "Rate limited command");
                    reply(&outbound, ServerMsg::error(ErrorCode::RateLimited, "Too many commands"));
                    continue;
                }

                match serde_json::from_str::<ClientMsg>(&text) {
                    Ok(ClientMsg::Leave) => {
                        if let Err(e) = dispatch(&state, player_id, ClientMsg::Leave, &outbound) {
                            warn!(%player_id, error = %e, "Leave rejected");
                        } else {
                            left = true;
                        }
                        break;
                    }
                    Ok(msg) => {
                        if let Err(e) = dispatch(&state, player_id, msg, &outbound) {
                            warn!(%player_id, error = %e, "Command queue full; dropping command");
                            reply(&outbound, ServerMsg::error(ErrorCode::Busy, e.to_string()));
                        }
                    }
                    Err(e) => {
                        debug!(%player_id, error = %e, "Failed to parse client message");
                        reply(&outbound, ServerMsg::error(ErrorCode::BadMessage, e.to_string()));
                    }
                }
            }
            Ok(Message::Binary(_)) => {
                warn!(%player_id, "Received binary message, ignoring");
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                info!(%player_id, "Client initiated close");
                break;
            }
            Err(e) => {
                debug!(%player_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    if !left {
        disconnect(&state, player_id);
    }
    writer.abort();

    info!(%player_id, left, "WebSocket connection closed");
}

/// Turn a client message into a game-loop task.
///
/// Replies are pushed from the loop thread without blocking it; a full
/// outbound buffer drops the reply.
pub(crate) fn dispatch(
    state: &AppState,
    player_id: EntityId,
    msg: ClientMsg,
    outbound: &mpsc::Sender<ServerMsg>,
) -> Result<(), QueueError> {
    let out = outbound.clone();
    match msg {
        ClientMsg::Ping { t } => {
            reply(
                outbound,
                ServerMsg::Pong {
                    t,
                    server_time: unix_millis(),
                },
            );
            Ok(())
        }
        ClientMsg::Spawn => state.queue.enqueue(move |game| {
            let msg = match game.spawn(player_id) {
                Ok((x, y)) => ServerMsg::Spawned { x, y },
                Err(e) => ServerMsg::rejected(&e),
            };
            reply(&out, msg);
            Ok(())
        }),
        ClientMsg::Move { x, y } => state.queue.enqueue(move |game| {
            if let Err(e) = game.report_position(player_id, x, y) {
                reply(&out, ServerMsg::rejected(&e));
            }
            Ok(())
        }),
        ClientMsg::Fire { angle } => state.queue.enqueue(move |game| {
            match game.fire(player_id, angle) {
                Ok(Some(bolt_id)) => reply(&out, ServerMsg::Fired { bolt_id }),
                Ok(None) => {}
                Err(e) => reply(&out, ServerMsg::rejected(&e)),
            }
            Ok(())
        }),
        ClientMsg::Leave => state.queue.enqueue(move |game| Ok(game.leave(player_id)?)),
    }
}

fn disconnect(state: &AppState, player_id: EntityId) {
    if let Err(e) = state
        .queue
        .enqueue(move |game| Ok(game.disconnect(player_id)?))
    {
        // The stall sweep will expunge the player instead
        warn!(%player_id, error = %e, "Disconnect dropped");
    }
}

fn reply(outbound: &mpsc::Sender<ServerMsg>, msg: ServerMsg) {
    if outbound.try_send(msg).is_err() {
        debug!("Outbound buffer full or closed; reply dropped");
    }
}

/// Send a message over WebSocket
async fn send_msg(sink: &mut SplitSink<WebSocket, Message>, msg: &ServerMsg) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json)).await.map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::Node;
    use crate::config::Config;
    use crate::replication::MemoryLog;
    use std::sync::Arc;

    fn roomy_node() -> Node {
        // Large arena so a scheduled hazard never lands on the spawn point
        let config = Config {
            arena_width: 100_000.0,
            arena_height: 100_000.0,
            ..Config::default()
        };
        Node::start(config, Arc::new(MemoryLog::new(1, 1_500))).unwrap()
    }

    fn joined(node: &Node) -> EntityId {
        let id = EntityId::new();
        node.state()
            .queue
            .enqueue(move |game| Ok(game.join(id)?))
            .unwrap();
        id
    }

    #[tokio::test]
    async fn commands_reply_through_the_outbound_channel() {
        let node = roomy_node();
        let state = node.state().clone();
        let id = joined(&node);
        let (tx, mut rx) = mpsc::channel(8);

        dispatch(&state, id, ClientMsg::Ping { t: 7 }, &tx).unwrap();
        assert!(matches!(rx.recv().await, Some(ServerMsg::Pong { t: 7, .. })));

        dispatch(&state, id, ClientMsg::Fire { angle: 0.0 }, &tx).unwrap();
        assert!(matches!(
            rx.recv().await,
            Some(ServerMsg::Error {
                code: ErrorCode::Rejected,
                ..
            })
        ));

        dispatch(&state, id, ClientMsg::Spawn, &tx).unwrap();
        assert!(matches!(rx.recv().await, Some(ServerMsg::Spawned { .. })));

        dispatch(&state, id, ClientMsg::Fire { angle: 0.0 }, &tx).unwrap();
        assert!(matches!(rx.recv().await, Some(ServerMsg::Fired { .. })));

        node.shutdown();
    }

    #[tokio::test]
    async fn leave_removes_the_player() {
        let node = roomy_node();
        let state = node.state().clone();
        let id = joined(&node);
        let (tx, _rx) = mpsc::channel(8);

        dispatch(&state, id, ClientMsg::Leave, &tx).unwrap();
        let present = state
            .queue
            .request(move |game| game.player(&id).is_some())
            .unwrap()
            .await
            .unwrap();
        assert!(!present);

        node.shutdown();
    }
}
