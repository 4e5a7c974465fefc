//! Single-consumer task queues.
//!
//! The queues are the only synchronization boundary between network/replication
//! threads and the simulation thread. Two storage backends are available:
//!
//! - [`Backend::Ring`]: fixed `2^k` slots, fails fast with
//!   [`QueueError::CapacityExceeded`] when full.
//! - [`Backend::Linked`]: one allocation per item, never rejects.
//!
//! Each backend can be opened in multi-producer ([`mpsc`]) or single-producer
//! ([`spsc`]) mode. The consumer handle is not `Clone` and `consume` takes
//! `&mut self`, so exactly one thread drains a queue for its whole lifetime.
//!
//! FIFO holds per producer only. Items from different producers interleave in
//! an unspecified order. `is_empty` is a hint and may be stale.

mod linked;
mod ring;

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use crate::config::Config;

use linked::LinkedQueue;
use ring::RingQueue;

/// Storage backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// Bounded ring with `2^capacity_exponent` slots
    Ring { capacity_exponent: u32 },
    /// Unbounded linked list
    Linked,
}

impl Backend {
    pub fn from_config(config: &Config) -> Self {
        if config.queue_use_linked_list {
            Self::Linked
        } else {
            Self::Ring {
                capacity_exponent: config.queue_capacity_exponent,
            }
        }
    }
}

/// Queue errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("queue capacity of {capacity} slots exceeded")]
    CapacityExceeded { capacity: usize },
}

/// An item the queue refused, handed back so the caller can retry or drop it
pub struct Rejected<T> {
    item: T,
    capacity: usize,
}

impl<T> Rejected<T> {
    fn new(item: T, capacity: usize) -> Self {
        Self { item, capacity }
    }

    pub fn into_inner(self) -> T {
        self.item
    }

    pub fn error(&self) -> QueueError {
        QueueError::CapacityExceeded {
            capacity: self.capacity,
        }
    }
}

impl<T> fmt::Debug for Rejected<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rejected")
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

impl<T> From<Rejected<T>> for QueueError {
    fn from(rejected: Rejected<T>) -> Self {
        rejected.error()
    }
}

/// Keeps hot cursors on separate cache lines
#[repr(align(64))]
pub(crate) struct CachePadded<T>(T);

impl<T> CachePadded<T> {
    pub(crate) fn new(value: T) -> Self {
        Self(value)
    }
}

impl<T> Deref for CachePadded<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

enum Storage<T> {
    Ring(RingQueue<T>),
    Linked(LinkedQueue<T>),
}

impl<T> Storage<T> {
    fn new(backend: Backend) -> Self {
        match backend {
            Backend::Ring { capacity_exponent } => {
                Self::Ring(RingQueue::with_exponent(capacity_exponent))
            }
            Backend::Linked => Self::Linked(LinkedQueue::new()),
        }
    }

    fn push_shared(&self, item: T) -> Result<(), Rejected<T>> {
        match self {
            Self::Ring(ring) => ring.push_shared(item),
            Self::Linked(list) => {
                list.push_shared(item);
                Ok(())
            }
        }
    }

    /// # Safety
    /// Caller must be the only producer of this storage.
    unsafe fn push_exclusive(&self, item: T) -> Result<(), Rejected<T>> {
        match self {
            Self::Ring(ring) => ring.push_exclusive(item),
            Self::Linked(list) => {
                list.push_exclusive(item);
                Ok(())
            }
        }
    }

    /// # Safety
    /// Caller must be the only consumer of this storage.
    unsafe fn pop(&self) -> Option<T> {
        match self {
            Self::Ring(ring) => ring.pop(),
            Self::Linked(list) => list.pop(),
        }
    }

    fn is_empty(&self) -> bool {
        match self {
            Self::Ring(ring) => ring.is_empty(),
            Self::Linked(list) => list.is_empty(),
        }
    }
}

/// Producer handle that may be cloned onto any number of threads
pub struct MultiProducer<T> {
    storage: Arc<Storage<T>>,
}

impl<T> Clone for MultiProducer<T> {
    fn clone(&self) -> Self {
        Self {
            storage: self.storage.clone(),
        }
    }
}

impl<T> MultiProducer<T> {
    /// Never blocks. On a full ring the item comes back in the error.
    pub fn produce(&self, item: T) -> Result<(), Rejected<T>> {
        self.storage.push_shared(item)
    }

    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }
}

/// Producer handle owned by exactly one thread at a time
pub struct SingleProducer<T> {
    storage: Arc<Storage<T>>,
}

impl<T> SingleProducer<T> {
    /// Never blocks. On a full ring the item comes back in the error.
    pub fn produce(&mut self, item: T) -> Result<(), Rejected<T>> {
        // SAFETY: `SingleProducer` is not `Clone` and `produce` takes
        // `&mut self`, so this is the only producer.
        unsafe { self.storage.push_exclusive(item) }
    }

    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }
}

/// The single consumer of a queue
pub struct Consumer<T> {
    storage: Arc<Storage<T>>,
}

impl<T> Consumer<T> {
    /// Next item, or `None` when nothing is visible yet. Never blocks.
    pub fn consume(&mut self) -> Option<T> {
        // SAFETY: `Consumer` is not `Clone` and `consume` takes `&mut self`.
        unsafe { self.storage.pop() }
    }

    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }
}

/// Open a multi-producer, single-consumer queue
pub fn mpsc<T: Send>(backend: Backend) -> (MultiProducer<T>, Consumer<T>) {
    let storage = Arc::new(Storage::new(backend));
    (
        MultiProducer {
            storage: storage.clone(),
        },
        Consumer { storage },
    )
}

/// Open a single-producer, single-consumer queue
pub fn spsc<T: Send>(backend: Backend) -> (SingleProducer<T>, Consumer<T>) {
    let storage = Arc::new(Storage::new(backend));
    (
        SingleProducer {
            storage: storage.clone(),
        },
        Consumer { storage },
    )
}
