//! Pending-task ordering.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Rank of a queued task. Higher values dispatch sooner.
pub type Priority = i32;

/// Priority used by [`ThrottleQueue::enqueue`](super::ThrottleQueue::enqueue).
pub const DEFAULT_PRIORITY: Priority = 0;

#[derive(Debug)]
struct Ranked<T> {
    priority: Priority,
    sequence: u64,
    item: T,
}

impl<T> PartialEq for Ranked<T> {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.sequence == other.sequence
    }
}

impl<T> Eq for Ranked<T> {}

impl<T> PartialOrd for Ranked<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Ranked<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.priority.cmp(&other.priority) {
            Ordering::Equal => other.sequence.cmp(&self.sequence), // Lower sequence = earlier
            ord => ord,
        }
    }
}

/// Max-heap of items, ties broken by insertion order.
#[derive(Debug)]
pub struct PendingQueue<T> {
    heap: BinaryHeap<Ranked<T>>,
    next_sequence: u64,
}

impl<T> PendingQueue<T> {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            next_sequence: 0,
        }
    }

    pub fn push(&mut self, item: T, priority: Priority) {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.heap.push(Ranked {
            priority,
            sequence,
            item,
        });
    }

    pub fn pop(&mut self) -> Option<T> {
        self.heap.pop().map(|r| r.item)
    }

    /// Remove everything, in dispatch order.
    pub fn drain_ordered(&mut self) -> Vec<T> {
        let mut items = Vec::with_capacity(self.heap.len());
        while let Some(item) = self.pop() {
            items.push(item);
        }
        items
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

impl<T> Default for PendingQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
