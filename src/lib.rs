//! Bolt Arena - authoritative, event-sourced arena simulation
//!
//! A node runs the whole world on one game-loop thread. Local player commands
//! become facts on per-concern logs; every node replays the other nodes' facts
//! so all of them converge on the same arena.

pub mod app;
pub mod config;
pub mod game;
pub mod http;
pub mod queue;
pub mod replication;
pub mod util;
pub mod ws;
