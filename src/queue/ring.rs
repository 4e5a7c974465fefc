//! Bounded ring backend.
//!
//! Every slot carries a sequence number. For a slot at ring position `pos`:
//! - `seq == pos` means the slot is free for the producer claiming `pos`
//! - `seq == pos + 1` means it holds the item produced at `pos`
//! - after the consumer takes it, `seq` becomes `pos + capacity`, i.e. free
//!   for the producer that wraps around to it next.
//!
//! Producers only touch `tail` (CAS when shared, plain store when exclusive).
//! The single consumer only touches `head`, so it never waits on producers.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::{CachePadded, Rejected};

struct Slot<T> {
    sequence: AtomicUsize,
    value: UnsafeCell<Option<T>>,
}

pub(super) struct RingQueue<T> {
    mask: usize,
    slots: Box<[Slot<T>]>,
    head: CachePadded<AtomicUsize>,
    tail: CachePadded<AtomicUsize>,
}

// Slot values are only reached by the thread that owns the slot's current
// sequence number, so sharing the ring is sound whenever items may move threads.
unsafe impl<T: Send> Send for RingQueue<T> {}
unsafe impl<T: Send> Sync for RingQueue<T> {}

impl<T> RingQueue<T> {
    /// Ring with `2^exponent` slots. The sequence scheme needs at least two.
    pub(super) fn with_exponent(exponent: u32) -> Self {
        let capacity = 1usize << exponent.clamp(1, 31);
        let slots = (0..capacity)
            .map(|i| Slot {
                sequence: AtomicUsize::new(i),
                value: UnsafeCell::new(None),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            mask: capacity - 1,
            slots,
            head: CachePadded::new(AtomicUsize::new(0)),
            tail: CachePadded::new(AtomicUsize::new(0)),
        }
    }

    pub(super) fn capacity(&self) -> usize {
        self.mask + 1
    }

    fn slot(&self, pos: usize) -> &Slot<T> {
        &self.slots[pos & self.mask]
    }

    /// Claim a slot with CAS on the tail cursor; safe for any number of producers.
    pub(super) fn push_shared(&self, item: T) -> Result<(), Rejected<T>> {
        let mut pos = self.tail.load(Ordering::Relaxed);
        loop {
            let slot = self.slot(pos);
            let seq = slot.sequence.load(Ordering::Acquire);
            let lag = seq.wrapping_sub(pos) as isize;

            if lag == 0 {
                match self.tail.compare_exchange_weak(
                    pos,
                    pos.wrapping_add(1),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        // SAFETY: winning the CAS gives this thread sole access
                        // to the slot until it publishes the new sequence.
                        unsafe { *slot.value.get() = Some(item) };
                        slot.sequence.store(pos.wrapping_add(1), Ordering::Release);
                        return Ok(());
                    }
                    Err(current) => pos = current,
                }
            } else if lag < 0 {
                // The slot still holds the item from one lap ago
                return Err(Rejected::new(item, self.capacity()));
            } else {
                pos = self.tail.load(Ordering::Relaxed);
            }
        }
    }

    /// Single-producer fast path.
    ///
    /// # Safety
    /// No other thread may call `push_exclusive` or `push_shared` concurrently.
    pub(super) unsafe fn push_exclusive(&self, item: T) -> Result<(), Rejected<T>> {
        let pos = self.tail.load(Ordering::Relaxed);
        let slot = self.slot(pos);
        if slot.sequence.load(Ordering::Acquire) != pos {
            return Err(Rejected::new(item, self.capacity()));
        }
        self.tail.store(pos.wrapping_add(1), Ordering::Relaxed);
        *slot.value.get() = Some(item);
        slot.sequence.store(pos.wrapping_add(1), Ordering::Release);
        Ok(())
    }

    /// # Safety
    /// Only one thread may ever pop from a given ring.
    pub(super) unsafe fn pop(&self) -> Option<T> {
        let pos = self.head.load(Ordering::Relaxed);
        let slot = self.slot(pos);
        if slot.sequence.load(Ordering::Acquire) != pos.wrapping_add(1) {
            return None;
        }
        let item = (*slot.value.get()).take();
        slot.sequence
            .store(pos.wrapping_add(self.capacity()), Ordering::Release);
        self.head.store(pos.wrapping_add(1), Ordering::Relaxed);
        item
    }

    pub(super) fn is_empty(&self) -> bool {
        self.head.load(Ordering::Acquire) == self.tail.load(Ordering::Acquire)
    }
}
