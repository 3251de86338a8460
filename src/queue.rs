//! Bounded single-producer/single-consumer queues.
//!
//! The analyzer's three FIFOs (event-mask, delay, per-source data) are all
//! the same shape: a fixed-capacity ring buffer with a `readable` /
//! `writable` backpressure predicate. `heapless::spsc::Queue` models this
//! for a capacity fixed at compile time; our FIFO depths are chosen per
//! source width at construction time (see [`crate::source::depth_for_width`]),
//! so capacity has to be a runtime value. [`BoundedQueue`] keeps the same
//! interface over a `VecDeque` pre-reserved to its capacity.

use std::collections::VecDeque;

/// A bounded FIFO queue with `readable`/`writable` backpressure.
#[derive(Debug, Clone)]
pub struct BoundedQueue<T> {
    buf: VecDeque<T>,
    capacity: usize,
}

impl<T> BoundedQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// True when [`Self::dequeue`] would return `Some`.
    pub fn readable(&self) -> bool {
        !self.buf.is_empty()
    }

    /// True when [`Self::enqueue`] would succeed.
    pub fn writable(&self) -> bool {
        self.buf.len() < self.capacity
    }

    /// Push `item`. Returns `false` without modifying the queue if it is
    /// full. Overflow recovery is the ingress caller's responsibility
    /// (the surrounding system pauses producers before this happens; this
    /// codec does not invent data to cover for it).
    pub fn enqueue(&mut self, item: T) -> bool {
        if !self.writable() {
            return false;
        }
        self.buf.push_back(item);
        true
    }

    pub fn dequeue(&mut self) -> Option<T> {
        self.buf.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn respects_capacity() {
        let mut q = BoundedQueue::new(2);
        assert!(q.writable());
        assert!(q.enqueue(1));
        assert!(q.enqueue(2));
        assert!(!q.writable());
        assert!(!q.enqueue(3));
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn fifo_order() {
        let mut q = BoundedQueue::new(4);
        q.enqueue('a');
        q.enqueue('b');
        assert_eq!(q.dequeue(), Some('a'));
        assert_eq!(q.dequeue(), Some('b'));
        assert_eq!(q.dequeue(), None);
        assert!(!q.readable());
    }
}
