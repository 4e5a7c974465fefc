//! Startup catch-up gate
//!
//! A node must not accept players until it has replayed the facts that
//! existed when it started. Each concern log reports its partition end
//! offsets when its consumer registers. A partition is caught up once its
//! applied position reaches that target or once a record stamped at or after
//! node start has been applied from it. Partitions are independent: live
//! traffic on one says nothing about the backlog of another. The concern is
//! caught up when every partition is, or once its timeout runs out.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

use crate::game::Concern;
use crate::util::time::Clock;

#[derive(Debug)]
struct Progress {
    targets: Vec<u64>,
    positions: Vec<u64>,
    /// Per partition: replayed up to the target or seen live traffic
    done: Vec<bool>,
    registered_at: u64,
    caught_up: bool,
}

impl Progress {
    fn new(targets: Vec<u64>, positions: Vec<u64>, registered_at: u64) -> Self {
        let done = targets
            .iter()
            .enumerate()
            .map(|(p, target)| positions.get(p).is_some_and(|pos| pos >= target))
            .collect::<Vec<_>>();
        let caught_up = done.iter().all(|d| *d);
        Self {
            targets,
            positions,
            done,
            registered_at,
            caught_up,
        }
    }
}

pub struct CatchUpGate {
    started_at: u64,
    timeout_ms: u64,
    clock: Arc<dyn Clock>,
    concerns: Mutex<HashMap<Concern, Progress>>,
    ready: AtomicBool,
}

impl CatchUpGate {
    pub fn new(clock: Arc<dyn Clock>, timeout_ms: u64) -> Self {
        Self {
            started_at: clock.now_millis(),
            timeout_ms,
            clock,
            concerns: Mutex::new(HashMap::new()),
            ready: AtomicBool::new(false),
        }
    }

    /// Start tracking a concern.
    ///
    /// `targets` are the partition end offsets at registration, `positions`
    /// the offsets the consumer starts reading from.
    pub fn register(&self, concern: Concern, targets: Vec<u64>, positions: Vec<u64>) {
        let progress = Progress::new(targets, positions, self.clock.now_millis());
        if progress.caught_up {
            info!(%concern, "Nothing to replay");
        }

        let mut concerns = self.concerns.lock();
        concerns.insert(concern, progress);
        self.refresh(&concerns);
    }

    /// A record has been applied (or deliberately skipped)
    pub fn record(&self, concern: Concern, partition: u32, offset: u64, timestamp: u64) {
        if self.ready.load(Ordering::Acquire) {
            return;
        }
        let mut concerns = self.concerns.lock();
        let Some(progress) = concerns.get_mut(&concern) else {
            return;
        };
        let p = partition as usize;
        let (Some(position), Some(target)) = (progress.positions.get_mut(p), progress.targets.get(p))
        else {
            return;
        };
        *position = (*position).max(offset + 1);
        if *position >= *target || timestamp >= self.started_at {
            progress.done[p] = true;
        }
        if !progress.caught_up && progress.done.iter().all(|d| *d) {
            progress.caught_up = true;
            info!(%concern, partition, offset, "Concern caught up");
        }
        self.refresh(&concerns);
    }

    /// True once every concern has caught up
    pub fn is_ready(&self) -> bool {
        if self.ready.load(Ordering::Acquire) {
            return true;
        }
        let now = self.clock.now_millis();
        let mut concerns = self.concerns.lock();
        for (concern, progress) in concerns.iter_mut() {
            if !progress.caught_up && now.saturating_sub(progress.registered_at) >= self.timeout_ms
            {
                progress.caught_up = true;
                warn!(%concern, timeout_ms = self.timeout_ms, "Catch-up timed out; continuing");
            }
        }
        self.refresh(&concerns)
    }

    /// Concerns still replaying, including ones not yet registered
    pub fn pending(&self) -> Vec<Concern> {
        let concerns = self.concerns.lock();
        Concern::ALL
            .iter()
            .copied()
            .filter(|c| !concerns.get(c).is_some_and(|p| p.caught_up))
            .collect()
    }

    fn refresh(&self, concerns: &HashMap<Concern, Progress>) -> bool {
        let ready = Concern::ALL
            .iter()
            .all(|c| concerns.get(c).is_some_and(|p| p.caught_up));
        if ready && !self.ready.swap(true, Ordering::AcqRel) {
            info!(
                elapsed_ms = self.clock.now_millis().saturating_sub(self.started_at),
                "Replication caught up; accepting players"
            );
        }
        ready
    }
}
