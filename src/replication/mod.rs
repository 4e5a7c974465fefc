//! Event-sourced replication
//!
//! Every fact the aggregate emits is appended to the log of its concern,
//! partitioned by entity key. Each node consumes every concern log and
//! replays foreign facts through [`Game::apply_fact`](crate::game::Game::apply_fact),
//! so the in-memory world is a materialized view of the logs.

pub mod codec;
pub mod consumer;
pub mod gate;
pub mod log;
pub mod publisher;

pub use consumer::{FactConsumer, ReplicationContext};
pub use gate::CatchUpGate;
pub use log::{FactLog, LogRecord, MemoryLog, Retention, TopicConfig};
pub use publisher::ReplicationSink;

use crate::game::Concern;
use crate::queue::QueueError;

/// Replication errors
#[derive(Debug, thiserror::Error)]
pub enum ReplicationError {
    #[error("Failed to encode fact: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("Malformed fact at {concern} offset {offset}: {source}")]
    Decode {
        concern: Concern,
        offset: u64,
        #[source]
        source: serde_json::Error,
    },

    #[error("Fact at {concern} offset {offset} belongs to {found}")]
    WrongConcern {
        concern: Concern,
        offset: u64,
        found: Concern,
    },

    #[error("Game loop rejected replicated facts: {0}")]
    Queue(#[from] QueueError),
}

impl ReplicationError {
    /// The record itself is bad; log it and move on
    pub fn is_malformed(&self) -> bool {
        matches!(self, Self::Decode { .. } | Self::WrongConcern { .. })
    }
}
