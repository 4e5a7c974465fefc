//! Ordered, partitioned fact logs
//!
//! One topic per [`Concern`]. Records within a partition are totally ordered
//! by offset, and every record for a key lands in the same partition.

use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};
use tracing::debug;
use uuid::Uuid;

use crate::config::Config;
use crate::game::{Concern, EntityId};

/// Tombstones survive compaction this long so lagging readers still see them
pub const TOMBSTONE_RETENTION_MS: u64 = 60_000;

/// One stored fact
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub offset: u64,
    pub key: EntityId,
    pub timestamp: u64,
    /// Node that produced the fact
    pub origin: Uuid,
    /// Encoded payload; `None` is a tombstone
    pub value: Option<Vec<u8>>,
}

/// How a topic forgets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retention {
    /// Keep only the latest record per key; tombstoned keys go away after
    /// [`TOMBSTONE_RETENTION_MS`]
    Compacted,
    /// Drop records older than `max_age_ms`
    Window { max_age_ms: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TopicConfig {
    pub partitions: u32,
    pub retention: Retention,
}

impl TopicConfig {
    /// Bolt concerns keep about one bolt lifetime (with slack); the rest compact
    pub fn for_concern(concern: Concern, partitions: u32, bolt_max_duration_ms: u64) -> Self {
        let retention = if concern.is_short_lived() {
            Retention::Window {
                max_age_ms: bolt_max_duration_ms.saturating_mul(2),
            }
        } else {
            Retention::Compacted
        };
        Self {
            partitions: partitions.max(1),
            retention,
        }
    }
}

/// Map a key onto one of `partitions`
pub fn partition_for(key: EntityId, partitions: u32) -> u32 {
    (key.as_u128() % u128::from(partitions.max(1))) as u32
}

/// Durable ordered storage for facts
pub trait FactLog: Send + Sync {
    /// Append to the key's partition; returns `(partition, offset)`
    fn append(
        &self,
        concern: Concern,
        key: EntityId,
        timestamp: u64,
        origin: Uuid,
        value: Option<Vec<u8>>,
    ) -> (u32, u64);

    fn partitions(&self, concern: Concern) -> u32;

    /// Up to `max` records with offset >= `from`, in offset order
    fn read(&self, concern: Concern, partition: u32, from: u64, max: usize) -> Vec<LogRecord>;

    /// Oldest retained offset
    fn start_offset(&self, concern: Concern, partition: u32) -> u64;

    /// Offset the next append will get
    fn end_offset(&self, concern: Concern, partition: u32) -> u64;

    /// First offset whose record timestamp is >= `timestamp`, or the end offset
    fn offset_for_timestamp(&self, concern: Concern, partition: u32, timestamp: u64) -> u64;

    fn commit(&self, group: &str, concern: Concern, partition: u32, offset: u64);

    fn committed(&self, group: &str, concern: Concern, partition: u32) -> Option<u64>;

    /// Apply retention; returns how many records were dropped
    fn maintain(&self, now: u64) -> usize;
}

#[derive(Debug, Default)]
struct Partition {
    records: VecDeque<LogRecord>,
    next_offset: u64,
}

impl Partition {
    fn first_at_or_after(&self, offset: u64) -> usize {
        self.records.partition_point(|r| r.offset < offset)
    }

    fn compact(&mut self, now: u64) -> usize {
        let latest: HashMap<EntityId, u64> =
            self.records.iter().map(|r| (r.key, r.offset)).collect();
        let before = self.records.len();
        self.records.retain(|r| {
            latest.get(&r.key) == Some(&r.offset)
                && (r.value.is_some() || now.saturating_sub(r.timestamp) <= TOMBSTONE_RETENTION_MS)
        });
        before - self.records.len()
    }

    fn trim_older_than(&mut self, cutoff: u64) -> usize {
        let before = self.records.len();
        while self.records.front().is_some_and(|r| r.timestamp < cutoff) {
            self.records.pop_front();
        }
        before - self.records.len()
    }
}

#[derive(Debug)]
struct Topic {
    config: TopicConfig,
    partitions: Vec<RwLock<Partition>>,
}

/// In-process log shared by every node in the process
#[derive(Debug)]
pub struct MemoryLog {
    topics: Vec<Topic>,
    commits: DashMap<(String, Concern, u32), u64>,
}

impl MemoryLog {
    pub fn new(partitions: u32, bolt_max_duration_ms: u64) -> Self {
        let topics = Concern::ALL
            .iter()
            .map(|&concern| {
                let config = TopicConfig::for_concern(concern, partitions, bolt_max_duration_ms);
                Topic {
                    partitions: (0..config.partitions)
                        .map(|_| RwLock::new(Partition::default()))
                        .collect(),
                    config,
                }
            })
            .collect();
        Self {
            topics,
            commits: DashMap::new(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.log_partitions, config.bolt_max_duration_ms)
    }

    pub fn topic_config(&self, concern: Concern) -> TopicConfig {
        self.topic(concern).config
    }

    /// Records currently retained across all partitions of a concern
    pub fn len(&self, concern: Concern) -> usize {
        self.topic(concern)
            .partitions
            .iter()
            .map(|p| p.read().records.len())
            .sum()
    }

    fn topic(&self, concern: Concern) -> &Topic {
        &self.topics[concern.index()]
    }

    fn partition(&self, concern: Concern, partition: u32) -> Option<&RwLock<Partition>> {
        self.topic(concern).partitions.get(partition as usize)
    }
}

impl FactLog for MemoryLog {
    fn append(
        &self,
        concern: Concern,
        key: EntityId,
        timestamp: u64,
        origin: Uuid,
        value: Option<Vec<u8>>,
    ) -> (u32, u64) {
        let topic = self.topic(concern);
        let index = partition_for(key, topic.config.partitions);
        let mut partition = topic.partitions[index as usize].write();
        let offset = partition.next_offset;
        partition.next_offset += 1;
        partition.records.push_back(LogRecord {
            offset,
            key,
            timestamp,
            origin,
            value,
        });
        (index, offset)
    }

    fn partitions(&self, concern: Concern) -> u32 {
        self.topic(concern).config.partitions
    }

    fn read(&self, concern: Concern, partition: u32, from: u64, max: usize) -> Vec<LogRecord> {
        let Some(partition) = self.partition(concern, partition) else {
            return Vec::new();
        };
        let partition = partition.read();
        let start = partition.first_at_or_after(from);
        partition.records.range(start..).take(max).cloned().collect()
    }

    fn start_offset(&self, concern: Concern, partition: u32) -> u64 {
        self.partition(concern, partition)
            .map(|p| {
                let p = p.read();
                p.records.front().map_or(p.next_offset, |r| r.offset)
            })
            .unwrap_or(0)
    }

    fn end_offset(&self, concern: Concern, partition: u32) -> u64 {
        self.partition(concern, partition)
            .map(|p| p.read().next_offset)
            .unwrap_or(0)
    }

    fn offset_for_timestamp(&self, concern: Concern, partition: u32, timestamp: u64) -> u64 {
        self.partition(concern, partition)
            .map(|p| {
                let p = p.read();
                p.records
                    .iter()
                    .find(|r| r.timestamp >= timestamp)
                    .map_or(p.next_offset, |r| r.offset)
            })
            .unwrap_or(0)
    }

    fn commit(&self, group: &str, concern: Concern, partition: u32, offset: u64) {
        self.commits
            .insert((group.to_string(), concern, partition), offset);
    }

    fn committed(&self, group: &str, concern: Concern, partition: u32) -> Option<u64> {
        self.commits
            .get(&(group.to_string(), concern, partition))
            .map(|entry| *entry)
    }

    fn maintain(&self, now: u64) -> usize {
        let mut dropped = 0;
        for (concern, topic) in Concern::ALL.iter().zip(&self.topics) {
            let removed: usize = topic
                .partitions
                .iter()
                .map(|p| {
                    let mut p = p.write();
                    match topic.config.retention {
                        Retention::Compacted => p.compact(now),
                        Retention::Window { max_age_ms } => {
                            p.trim_older_than(now.saturating_sub(max_age_ms))
                        }
                    }
                })
                .sum();
            if removed > 0 {
                debug!(%concern, removed, "Log retention applied");
            }
            dropped += removed;
        }
        dropped
    }
}
