//! Per-concern log consumers
//!
//! A consumer reads its concern's partitions, decodes records and hands them
//! to the game loop in batches over its own unbounded ingest queue. Facts are
//! applied on the loop thread, and only then counted towards catch-up.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::codec;
use super::gate::CatchUpGate;
use super::log::{FactLog, LogRecord};
use super::ReplicationError;
use crate::game::{Concern, DomainEvent, IngestQueue};
use crate::util::time::Clock;

/// Records read per partition per poll
const BATCH_SIZE: usize = 256;

/// Everything the consumers of one node share
#[derive(Clone)]
pub struct ReplicationContext {
    pub log: Arc<dyn FactLog>,
    pub gate: Arc<CatchUpGate>,
    pub clock: Arc<dyn Clock>,
    /// Identity stamped on this process's own facts
    pub node_id: Uuid,
    /// Consumer group for offset commits
    pub group: String,
    pub bolt_max_duration_ms: u64,
}

struct Incoming {
    offset: u64,
    timestamp: u64,
    event: Option<DomainEvent>,
}

pub struct FactConsumer {
    concern: Concern,
    ctx: ReplicationContext,
    positions: Vec<u64>,
    ingest: IngestQueue,
}

impl FactConsumer {
    /// Pick starting offsets and register with the catch-up gate.
    ///
    /// Compacted concerns replay from the oldest retained record. Bolt
    /// concerns skip anything older than one bolt lifetime, or resume from
    /// the group's committed offset if that is further along.
    pub fn new(concern: Concern, ctx: ReplicationContext, ingest: IngestQueue) -> Self {
        let log = &ctx.log;
        let partitions = log.partitions(concern);
        let now = ctx.clock.now_millis();

        let positions: Vec<u64> = (0..partitions)
            .map(|p| {
                let start = log.start_offset(concern, p);
                if !concern.is_short_lived() {
                    return start;
                }
                let seek = log.offset_for_timestamp(
                    concern,
                    p,
                    now.saturating_sub(ctx.bolt_max_duration_ms),
                );
                let committed = log.committed(&ctx.group, concern, p).unwrap_or(0);
                start.max(seek).max(committed)
            })
            .collect();
        let targets: Vec<u64> = (0..partitions).map(|p| log.end_offset(concern, p)).collect();

        let backlog: u64 = targets
            .iter()
            .zip(&positions)
            .map(|(t, p)| t.saturating_sub(*p))
            .sum();
        info!(%concern, partitions, backlog, "Replication consumer starting");

        ctx.gate.register(concern, targets, positions.clone());
        Self {
            concern,
            ctx,
            positions,
            ingest,
        }
    }

    pub fn concern(&self) -> Concern {
        self.concern
    }

    /// Next offset to read, per partition
    pub fn positions(&self) -> &[u64] {
        &self.positions
    }

    /// Read one batch from every partition and hand it to the game loop.
    /// Returns the number of records consumed.
    pub fn poll(&mut self) -> Result<usize, ReplicationError> {
        let mut consumed = 0;
        for index in 0..self.positions.len() {
            let partition = index as u32;
            let records = self
                .ctx
                .log
                .read(self.concern, partition, self.positions[index], BATCH_SIZE);
            let Some(next) = records.last().map(|r| r.offset + 1) else {
                continue;
            };

            let batch: Vec<Incoming> = records.iter().map(|r| self.prepare(r)).collect();
            consumed += batch.len();

            let concern = self.concern;
            let gate = self.ctx.gate.clone();
            self.ingest.enqueue(move |game| {
                for item in batch {
                    if let Some(event) = item.event {
                        if let Err(e) = game.apply_fact(&event) {
                            warn!(error = %e, %concern, offset = item.offset, "Replicated fact rejected");
                        }
                    }
                    gate.record(concern, partition, item.offset, item.timestamp);
                }
                Ok(())
            })?;
            self.positions[index] = next;
        }
        Ok(consumed)
    }

    /// Decode a record; own facts and malformed records are passed through
    /// empty so they still count as consumed
    fn prepare(&self, record: &LogRecord) -> Incoming {
        let event = if record.origin == self.ctx.node_id {
            None
        } else {
            match codec::decode(self.concern, record) {
                Ok(event) => Some(event),
                Err(e) => {
                    warn!(error = %e, "Discarding malformed fact");
                    None
                }
            }
        };
        Incoming {
            offset: record.offset,
            timestamp: record.timestamp,
            event,
        }
    }

    /// Commit the offset a restarted consumer can safely resume from.
    ///
    /// For bolt concerns that is the first record younger than one bolt
    /// lifetime (never past what was read); everything before it is stale.
    pub fn commit(&self) {
        let now = self.ctx.clock.now_millis();
        for (index, &position) in self.positions.iter().enumerate() {
            let partition = index as u32;
            let offset = if self.concern.is_short_lived() {
                let boundary = self.ctx.log.offset_for_timestamp(
                    self.concern,
                    partition,
                    now.saturating_sub(self.ctx.bolt_max_duration_ms),
                );
                boundary.min(position)
            } else {
                position
            };
            self.ctx
                .log
                .commit(&self.ctx.group, self.concern, partition, offset);
        }
        debug!(concern = %self.concern, "Offsets committed");
    }

    /// Poll until the task is aborted
    pub async fn run(mut self, poll_every: Duration, commit_every: Duration) {
        let mut poll = tokio::time::interval(poll_every);
        let mut commit = tokio::time::interval(commit_every);
        poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = poll.tick() => {
                    if let Err(e) = self.poll() {
                        error!(error = %e, concern = %self.concern, "Replication poll failed");
                    }
                }
                _ = commit.tick() => self.commit(),
            }
        }
    }
}
