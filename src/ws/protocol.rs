//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use serde::{Deserialize, Serialize};

use crate::game::{EntityId, GameError};

/// Messages sent from client to server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    /// Enter the arena at a random point
    Spawn,

    /// Client-authoritative position update
    Move { x: f64, y: f64 },

    /// Fire a bolt; angle in radians
    Fire { angle: f64 },

    /// Leave for good (closing the socket only disconnects)
    Leave,

    /// Ping for latency measurement
    Ping {
        /// Client timestamp
        t: u64,
    },
}

/// Messages sent from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    /// Welcome message after connection
    Welcome {
        player_id: EntityId,
        server_time: u64,
    },

    Spawned { x: f64, y: f64 },

    Fired { bolt_id: EntityId },

    /// Error message
    Error { code: ErrorCode, message: String },

    /// Pong response
    Pong {
        /// Echo back client timestamp
        t: u64,
        server_time: u64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    RateLimited,
    BadMessage,
    /// The game refused the command in the player's current state
    Rejected,
    /// Command queue full; retry later
    Busy,
}

impl ServerMsg {
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error {
            code,
            message: message.into(),
        }
    }

    pub fn rejected(err: &GameError) -> Self {
        Self::error(ErrorCode::Rejected, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_messages_parse_from_tagged_json() {
        let msg: ClientMsg = serde_json::from_str(r#"{"type":"move","x":1.5,"y":-2}"#).unwrap();
        assert_eq!(msg, ClientMsg::Move { x: 1.5, y: -2.0 });

        let msg: ClientMsg = serde_json::from_str(r#"{"type":"leave"}"#).unwrap();
        assert_eq!(msg, ClientMsg::Leave);

        assert!(serde_json::from_str::<ClientMsg>(r#"{"type":"teleport"}"#).is_err());
    }

    #[test]
    fn errors_carry_a_code() {
        let json = serde_json::to_string(&ServerMsg::error(ErrorCode::RateLimited, "slow down"))
            .unwrap();
        assert_eq!(
            json,
            r#"{"type":"error","code":"rate_limited","message":"slow down"}"#
        );
    }
}
