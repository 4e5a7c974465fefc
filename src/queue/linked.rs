//! Unbounded linked-list backend.
//!
//! The list always holds a stub node at `head`; the first real item lives in
//! `head.next`. Producers append by swapping `tail`, the consumer advances
//! `head` and frees the old stub. A producer that has swapped `tail` but not
//! yet linked `prev.next` makes its item (and anything queued behind it)
//! briefly invisible; `pop` reports empty and the item shows up on a later call.

use std::cell::UnsafeCell;
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

use super::CachePadded;

struct Node<T> {
    next: AtomicPtr<Node<T>>,
    value: UnsafeCell<Option<T>>,
}

impl<T> Node<T> {
    fn alloc(value: Option<T>) -> *mut Node<T> {
        Box::into_raw(Box::new(Node {
            next: AtomicPtr::new(ptr::null_mut()),
            value: UnsafeCell::new(value),
        }))
    }
}

pub(super) struct LinkedQueue<T> {
    head: CachePadded<AtomicPtr<Node<T>>>,
    tail: CachePadded<AtomicPtr<Node<T>>>,
    // Raised before an item is linked and lowered after it is popped, so it
    // never underflows. Lets producers ask `is_empty` without touching nodes.
    pending: AtomicUsize,
}

unsafe impl<T: Send> Send for LinkedQueue<T> {}
unsafe impl<T: Send> Sync for LinkedQueue<T> {}

impl<T> LinkedQueue<T> {
    pub(super) fn new() -> Self {
        let stub = Node::alloc(None);
        Self {
            head: CachePadded::new(AtomicPtr::new(stub)),
            tail: CachePadded::new(AtomicPtr::new(stub)),
            pending: AtomicUsize::new(0),
        }
    }

    pub(super) fn push_shared(&self, item: T) {
        let node = Node::alloc(Some(item));
        self.pending.fetch_add(1, Ordering::Relaxed);
        let prev = self.tail.swap(node, Ordering::AcqRel);
        // SAFETY: `prev` cannot be freed until the consumer sees its `next`,
        // which only this store sets.
        unsafe { (*prev).next.store(node, Ordering::Release) };
    }

    /// # Safety
    /// No other thread may push concurrently.
    pub(super) unsafe fn push_exclusive(&self, item: T) {
        let node = Node::alloc(Some(item));
        self.pending.fetch_add(1, Ordering::Relaxed);
        let prev = self.tail.load(Ordering::Relaxed);
        self.tail.store(node, Ordering::Relaxed);
        (*prev).next.store(node, Ordering::Release);
    }

    /// # Safety
    /// Only one thread may ever pop from a given list.
    pub(super) unsafe fn pop(&self) -> Option<T> {
        let head = self.head.load(Ordering::Relaxed);
        let next = (*head).next.load(Ordering::Acquire);
        if next.is_null() {
            return None;
        }
        self.head.store(next, Ordering::Relaxed);
        let item = (*(*next).value.get()).take();
        drop(Box::from_raw(head));
        self.pending.fetch_sub(1, Ordering::Relaxed);
        item
    }

    pub(super) fn is_empty(&self) -> bool {
        self.pending.load(Ordering::Acquire) == 0
    }
}

impl<T> Drop for LinkedQueue<T> {
    fn drop(&mut self) {
        let mut current = self.head.load(Ordering::Relaxed);
        while !current.is_null() {
            // SAFETY: `&mut self` means no producer or consumer is left, and
            // every node from `head` onward is still owned by the list.
            let node = unsafe { Box::from_raw(current) };
            current = node.next.load(Ordering::Relaxed);
        }
    }
}
