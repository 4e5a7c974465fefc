//! One arena node: game loop thread, replication consumers and log upkeep

use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

use super::AppState;
use crate::config::Config;
use crate::game::spatial::SnapshotPlayerIndex;
use crate::game::{Concern, Game, GameLoop, GameSettings, LoopHandle};
use crate::queue::Backend;
use crate::replication::{CatchUpGate, FactConsumer, FactLog, ReplicationContext, ReplicationSink};
use crate::util::time::{Clock, SystemClock};

pub struct Node {
    state: AppState,
    game_loop: Option<LoopHandle>,
    tasks: Vec<JoinHandle<()>>,
}

impl Node {
    /// Start a node on wall-clock time. Must be called inside a Tokio runtime.
    pub fn start(config: Config, log: Arc<dyn FactLog>) -> anyhow::Result<Self> {
        Self::start_with_clock(config, log, Arc::new(SystemClock))
    }

    pub fn start_with_clock(
        config: Config,
        log: Arc<dyn FactLog>,
        clock: Arc<dyn Clock>,
    ) -> anyhow::Result<Self> {
        let config = Arc::new(config);
        let node_id = Uuid::new_v4();
        let settings = GameSettings::from(config.as_ref());

        let player_index = Arc::new(SnapshotPlayerIndex::new());
        let sink = Arc::new(ReplicationSink::new(log.clone(), node_id));
        let game = Game::new(settings, clock.clone(), sink).with_player_index(player_index.clone());
        let (mut game_loop, queue) = GameLoop::new(game, Backend::from_config(&config));

        let gate = Arc::new(CatchUpGate::new(clock.clone(), config.catch_up_timeout_ms));
        let ctx = ReplicationContext {
            log: log.clone(),
            gate: gate.clone(),
            clock: clock.clone(),
            node_id,
            group: config.node_name.clone(),
            bolt_max_duration_ms: config.bolt_max_duration_ms,
        };
        // Consumers register with the gate before the loop starts ticking
        let consumers: Vec<FactConsumer> = Concern::ALL
            .iter()
            .map(|&concern| FactConsumer::new(concern, ctx.clone(), game_loop.attach_ingest()))
            .collect();

        let handle = game_loop
            .spawn()
            .context("Failed to start game loop thread")?;

        let poll_every = Duration::from_millis(config.consumer_poll_ms.max(1));
        let upkeep_every = Duration::from_millis(config.retention_interval_ms.max(1));
        let mut tasks: Vec<JoinHandle<()>> = consumers
            .into_iter()
            .map(|consumer| tokio::spawn(consumer.run(poll_every, upkeep_every)))
            .collect();
        tasks.push(tokio::spawn(run_retention(log, clock, upkeep_every)));

        info!(%node_id, node_name = %config.node_name, "Node started");

        Ok(Self {
            state: AppState {
                config,
                node_id,
                queue,
                gate,
                player_index,
            },
            game_loop: Some(handle),
            tasks,
        })
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Stop replication and the game loop; returns the final world
    pub fn shutdown(mut self) -> Option<Game> {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        let game = self.game_loop.take().and_then(LoopHandle::stop);
        info!(node_id = %self.state.node_id, "Node stopped");
        game
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

async fn run_retention(log: Arc<dyn FactLog>, clock: Arc<dyn Clock>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        let dropped = log.maintain(clock.now_millis());
        if dropped > 0 {
            debug!(dropped, "Log retention applied");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::EntityId;
    use crate::replication::MemoryLog;

    #[tokio::test]
    async fn node_accepts_commands_and_publishes_facts() {
        let log = Arc::new(MemoryLog::new(2, 1_500));
        let node = Node::start(Config::default(), log.clone()).unwrap();
        assert!(node.state().gate.is_ready());

        let id = EntityId::new();
        node.state()
            .queue
            .enqueue(move |game| Ok(game.join(id)?))
            .unwrap();
        let count = node
            .state()
            .queue
            .request(|game| game.players().len())
            .unwrap()
            .await
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(log.len(Concern::JoinLeave), 1);

        let game = node.shutdown().unwrap();
        assert!(game.player(&id).is_some());
    }
}
