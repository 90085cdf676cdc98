//! Unbounded multi-producer task queue feeding a worker.
//!
//! Producers link nodes onto the tail with a single atomic swap. The consumer
//! side (the `head` cursor) sits behind a mutex: in steady state only the
//! worker thread takes it, and after shutdown a producer may take it to drain
//! tasks that raced with termination.

use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::{Mutex, PoisonError};

use crossbeam_utils::CachePadded;

struct Node<T> {
    next: AtomicPtr<Node<T>>,
    value: Option<T>,
}

impl<T> Node<T> {
    fn boxed(value: Option<T>) -> *mut Node<T> {
        Box::into_raw(Box::new(Node {
            next: AtomicPtr::new(ptr::null_mut()),
            value,
        }))
    }
}

/// Consumer cursor; always points at the current stub node.
struct Head<T>(*mut Node<T>);

pub(crate) struct TaskQueue<T> {
    head: Mutex<Head<T>>,
    tail: CachePadded<AtomicPtr<Node<T>>>,
}

// SAFETY: nodes are only reachable through the queue, values are moved in and
// out by value, and the consumer cursor is serialized by the mutex.
unsafe impl<T: Send> Send for TaskQueue<T> {}
unsafe impl<T: Send> Sync for TaskQueue<T> {}

impl<T> TaskQueue<T> {
    pub(crate) fn new() -> Self {
        let stub = Node::boxed(None);
        Self {
            head: Mutex::new(Head(stub)),
            tail: CachePadded::new(AtomicPtr::new(stub)),
        }
    }

    /// Appends `value`; never blocks.
    pub(crate) fn push(&self, value: T) {
        let node = Node::boxed(Some(value));
        // SeqCst pairs with the closed-flag check in `Worker::submit`: either
        // the worker's final drain sees this node or the producer sees the flag.
        let prev = self.tail.swap(node, Ordering::SeqCst);
        // SAFETY: `prev` stays allocated until the consumer moves past it, which
        // requires the `next` link stored here.
        unsafe { (*prev).next.store(node, Ordering::SeqCst) };
    }

    /// Removes the oldest value, if one is fully linked.
    pub(crate) fn pop(&self) -> Option<T> {
        let mut head = self.head.lock().unwrap_or_else(PoisonError::into_inner);
        let stub = head.0;
        // SAFETY: the stub is owned by the consumer cursor we hold.
        let next = unsafe { (*stub).next.load(Ordering::SeqCst) };
        if next.is_null() {
            return None;
        }

        head.0 = next;
        // SAFETY: `next` becomes the new stub; its value is taken exactly once
        // and the old stub is no longer reachable by producers.
        unsafe {
            let value = (*next).value.take();
            drop(Box::from_raw(stub));
            value
        }
    }

    /// Pops until empty, dropping every value.
    pub(crate) fn drain(&self) -> usize {
        let mut dropped = 0;
        while let Some(value) = self.pop() {
            drop(value);
            dropped += 1;
        }
        dropped
    }
}

impl<T> Drop for TaskQueue<T> {
    fn drop(&mut self) {
        let head = self.head.get_mut().unwrap_or_else(PoisonError::into_inner);
        let mut current = head.0;
        while !current.is_null() {
            // SAFETY: with `&mut self` no producer or consumer is active, and each
            // node is freed exactly once while walking the list.
            unsafe {
                let next = (*current).next.load(Ordering::Relaxed);
                drop(Box::from_raw(current));
                current = next;
            }
        }
    }
}
