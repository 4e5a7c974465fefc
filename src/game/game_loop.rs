//! Single-threaded fixed-timestep loop that owns the [`Game`]
//!
//! Every mutation reaches the aggregate as a [`Task`] pushed onto a queue;
//! the loop thread is the only consumer. Network handlers use the shared
//! [`GameQueue`], each replication consumer gets its own [`IngestQueue`].

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle, Thread};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{error, info, warn};

use super::world::Game;
use crate::queue::{self, Backend, Consumer, MultiProducer, QueueError, SingleProducer};
use crate::util::time::Timer;

/// Deferred mutation executed on the loop thread
pub type Task = Box<dyn FnOnce(&mut Game) -> anyhow::Result<()> + Send + 'static>;

/// Unparks the loop thread when work arrives
#[derive(Clone, Default)]
struct LoopWaker {
    thread: Arc<OnceLock<Thread>>,
}

impl LoopWaker {
    fn register(&self) {
        let _ = self.thread.set(thread::current());
    }

    fn wake(&self) {
        if let Some(thread) = self.thread.get() {
            thread.unpark();
        }
    }
}

/// Handle for submitting work to the loop from any thread
#[derive(Clone)]
pub struct GameQueue {
    producer: MultiProducer<Task>,
    waker: LoopWaker,
}

impl GameQueue {
    /// Submit a mutation. A full ring is reported, never silently dropped.
    pub fn enqueue<F>(&self, task: F) -> Result<(), QueueError>
    where
        F: FnOnce(&mut Game) -> anyhow::Result<()> + Send + 'static,
    {
        self.producer.produce(Box::new(task))?;
        self.waker.wake();
        Ok(())
    }

    /// Run `query` on the loop thread and hand the result back
    pub fn request<R, F>(&self, query: F) -> Result<oneshot::Receiver<R>, QueueError>
    where
        R: Send + 'static,
        F: FnOnce(&Game) -> R + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.enqueue(move |game| {
            // Receiver may have given up waiting
            let _ = tx.send(query(game));
            Ok(())
        })?;
        Ok(rx)
    }
}

/// Dedicated unbounded queue for one producer (a replication consumer)
pub struct IngestQueue {
    producer: SingleProducer<Task>,
    waker: LoopWaker,
}

impl IngestQueue {
    pub fn enqueue<F>(&mut self, task: F) -> Result<(), QueueError>
    where
        F: FnOnce(&mut Game) -> anyhow::Result<()> + Send + 'static,
    {
        self.producer.produce(Box::new(task))?;
        self.waker.wake();
        Ok(())
    }
}

pub struct GameLoop {
    game: Game,
    commands: Consumer<Task>,
    ingest: Vec<Consumer<Task>>,
    waker: LoopWaker,
    tick_interval_ms: u64,
    last_tick: u64,
    running: Arc<AtomicBool>,
}

impl GameLoop {
    pub fn new(game: Game, backend: Backend) -> (Self, GameQueue) {
        let (producer, commands) = queue::mpsc(backend);
        let waker = LoopWaker::default();
        let game_loop = Self {
            tick_interval_ms: game.settings().tick_interval_ms.max(1),
            last_tick: game.now(),
            game,
            commands,
            ingest: Vec::new(),
            waker: waker.clone(),
            running: Arc::new(AtomicBool::new(true)),
        };
        (game_loop, GameQueue { producer, waker })
    }

    /// Add an unbounded single-producer queue drained alongside the commands
    pub fn attach_ingest(&mut self) -> IngestQueue {
        let (producer, consumer) = queue::spsc(Backend::Linked);
        self.ingest.push(consumer);
        IngestQueue {
            producer,
            waker: self.waker.clone(),
        }
    }

    pub fn game(&self) -> &Game {
        &self.game
    }

    pub fn game_mut(&mut self) -> &mut Game {
        &mut self.game
    }

    /// Drain every queue, ticking whenever a tick falls due. Returns the
    /// number of tasks executed.
    pub fn run_once(&mut self) -> usize {
        let mut executed = 0;
        loop {
            let mut progressed = false;

            if let Some(task) = self.commands.consume() {
                self.execute(task);
                self.tick_if_due();
                progressed = true;
                executed += 1;
            }

            for i in 0..self.ingest.len() {
                if let Some(task) = self.ingest[i].consume() {
                    self.execute(task);
                    self.tick_if_due();
                    progressed = true;
                    executed += 1;
                }
            }

            if !progressed {
                break;
            }
        }
        self.tick_if_due();
        executed
    }

    fn is_idle(&self) -> bool {
        self.commands.is_empty() && self.ingest.iter().all(|q| q.is_empty())
    }

    fn until_next_tick(&self) -> Duration {
        let elapsed = self.game.now().saturating_sub(self.last_tick);
        Duration::from_millis(self.tick_interval_ms.saturating_sub(elapsed).max(1))
    }

    fn execute(&mut self, task: Task) {
        match catch_unwind(AssertUnwindSafe(|| task(&mut self.game))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Game task failed"),
            Err(panic) => warn!(panic = %panic_message(&*panic), "Game task panicked"),
        }
    }

    fn tick_if_due(&mut self) {
        let now = self.game.now();
        if now.saturating_sub(self.last_tick) < self.tick_interval_ms {
            return;
        }
        self.last_tick = now;

        let timer = Timer::new();
        if let Err(panic) = catch_unwind(AssertUnwindSafe(|| self.game.fixed_update(now))) {
            error!(
                panic = %panic_message(&*panic),
                "Fixed update panicked; world state may be partially updated"
            );
        }
        let elapsed = timer.elapsed_ms();
        if elapsed > self.tick_interval_ms {
            warn!(elapsed_ms = elapsed, "Fixed update overran the tick interval");
        }
    }

    fn run(mut self) -> Game {
        self.waker.register();
        self.game.start();
        info!(tick_interval_ms = self.tick_interval_ms, "Game loop started");

        while self.running.load(Ordering::Acquire) {
            self.run_once();
            if self.is_idle() {
                thread::park_timeout(self.until_next_tick());
            }
        }

        info!("Game loop stopped");
        self.game
    }

    /// Move the loop onto its own OS thread
    pub fn spawn(self) -> std::io::Result<LoopHandle> {
        let running = self.running.clone();
        let waker = self.waker.clone();
        let join = thread::Builder::new()
            .name("game-loop".into())
            .spawn(move || self.run())?;
        Ok(LoopHandle {
            running,
            waker,
            join: Some(join),
        })
    }
}

/// Owner of the running loop thread
pub struct LoopHandle {
    running: Arc<AtomicBool>,
    waker: LoopWaker,
    join: Option<JoinHandle<Game>>,
}

impl LoopHandle {
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Stop the loop and take back the final game state
    pub fn stop(mut self) -> Option<Game> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Option<Game> {
        self.running.store(false, Ordering::Release);
        self.waker.wake();
        let join = self.join.take()?;
        match join.join() {
            Ok(game) => Some(game),
            Err(_) => {
                error!("Game loop thread panicked");
                None
            }
        }
    }
}

impl Drop for LoopHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
