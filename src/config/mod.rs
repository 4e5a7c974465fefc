//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Fixed-update cadence
    pub tick_interval_ms: u64,
    /// Bolt lifetime before it times out
    pub bolt_max_duration_ms: u64,
    /// Bolt speed in units per second
    pub bolt_speed: f64,
    /// Radius of a player's collision disc
    pub bolt_collision_radius: f64,
    /// Concurrent live bolts per player
    pub player_max_bolts: u32,
    /// Client-reported movement is clamped to this speed (units per second)
    pub player_max_move: f64,
    /// Idle time after which a stalled player is expunged
    pub player_expunge_timeout_ms: u64,
    /// How often the stall sweep runs
    pub stall_sweep_interval_ms: u64,

    /// Use the unbounded linked list for the command queue instead of the ring
    pub queue_use_linked_list: bool,
    /// Ring size is 2^k slots
    pub queue_capacity_exponent: u32,

    pub arena_width: f64,
    pub arena_height: f64,

    /// EventScheduler window granularity
    pub scheduler_window_ms: u64,
    /// Windows re-evaluated on startup
    pub scheduler_replay_windows: u32,

    /// Stable name of this node; used as the consumer group for offset commits
    pub node_name: String,
    /// Partitions per concern log
    pub log_partitions: u32,
    /// Per-concern fallback before the catch-up gate gives up waiting
    pub catch_up_timeout_ms: u64,
    /// Replication consumer poll cadence
    pub consumer_poll_ms: u64,
    /// Log retention/compaction and offset commit cadence
    pub retention_interval_ms: u64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let server_addr = if let Ok(port) = env::var("PORT") {
            format!("0.0.0.0:{}", port)
        } else {
            env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string())
        };

        let defaults = Self::default();

        let config = Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),

            tick_interval_ms: parse_var("TICK_INTERVAL_MS", defaults.tick_interval_ms)?,
            bolt_max_duration_ms: parse_var("BOLT_MAX_DURATION_MS", defaults.bolt_max_duration_ms)?,
            bolt_speed: parse_var("BOLT_SPEED", defaults.bolt_speed)?,
            bolt_collision_radius: parse_var(
                "BOLT_COLLISION_RADIUS",
                defaults.bolt_collision_radius,
            )?,
            player_max_bolts: parse_var("PLAYER_MAX_BOLTS", defaults.player_max_bolts)?,
            player_max_move: parse_var("PLAYER_MAX_MOVE", defaults.player_max_move)?,
            player_expunge_timeout_ms: parse_var(
                "PLAYER_EXPUNGE_TIMEOUT_MS",
                defaults.player_expunge_timeout_ms,
            )?,
            stall_sweep_interval_ms: parse_var(
                "STALL_SWEEP_INTERVAL_MS",
                defaults.stall_sweep_interval_ms,
            )?,

            queue_use_linked_list: parse_var(
                "QUEUE_USE_LINKED_LIST",
                defaults.queue_use_linked_list,
            )?,
            queue_capacity_exponent: parse_var(
                "QUEUE_CAPACITY_EXPONENT",
                defaults.queue_capacity_exponent,
            )?,

            arena_width: parse_var("ARENA_WIDTH", defaults.arena_width)?,
            arena_height: parse_var("ARENA_HEIGHT", defaults.arena_height)?,

            scheduler_window_ms: parse_var("SCHEDULER_WINDOW_MS", defaults.scheduler_window_ms)?,
            scheduler_replay_windows: parse_var(
                "SCHEDULER_REPLAY_WINDOWS",
                defaults.scheduler_replay_windows,
            )?,

            node_name: env::var("NODE_NAME").unwrap_or(defaults.node_name),
            log_partitions: parse_var("LOG_PARTITIONS", defaults.log_partitions)?,
            catch_up_timeout_ms: parse_var("CATCH_UP_TIMEOUT_MS", defaults.catch_up_timeout_ms)?,
            consumer_poll_ms: parse_var("CONSUMER_POLL_MS", defaults.consumer_poll_ms)?,
            retention_interval_ms: parse_var(
                "RETENTION_INTERVAL_MS",
                defaults.retention_interval_ms,
            )?,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid("TICK_INTERVAL_MS"));
        }
        // 2^31 slots is already far past anything sane for a command queue
        if !(1..=31).contains(&self.queue_capacity_exponent) {
            return Err(ConfigError::Invalid("QUEUE_CAPACITY_EXPONENT"));
        }
        if self.log_partitions == 0 {
            return Err(ConfigError::Invalid("LOG_PARTITIONS"));
        }
        if self.scheduler_window_ms == 0 {
            return Err(ConfigError::Invalid("SCHEDULER_WINDOW_MS"));
        }
        if self.arena_width <= 0.0 || self.arena_height <= 0.0 {
            return Err(ConfigError::Invalid("ARENA_WIDTH/ARENA_HEIGHT"));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            log_level: "info".to_string(),
            tick_interval_ms: 50,
            bolt_max_duration_ms: 1500,
            bolt_speed: 400.0,
            bolt_collision_radius: 10.0,
            player_max_bolts: 10,
            player_max_move: 200.0,
            player_expunge_timeout_ms: 60_000,
            stall_sweep_interval_ms: 5_000,
            queue_use_linked_list: false,
            queue_capacity_exponent: 16,
            arena_width: 2000.0,
            arena_height: 2000.0,
            scheduler_window_ms: 180_000,
            scheduler_replay_windows: 2,
            node_name: "arena-node".to_string(),
            log_partitions: 8,
            catch_up_timeout_ms: 10_000,
            consumer_poll_ms: 20,
            retention_interval_ms: 30_000,
        }
    }
}

/// Parse an optional environment variable, falling back to `default` when unset
fn parse_var<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(name)),
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,
}
