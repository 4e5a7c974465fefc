//! Client WebSocket sessions

pub mod handler;
pub mod protocol;
