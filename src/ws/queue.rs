use std::collections::VecDeque;
use tracing::warn;

/// Bounded FIFO of messages waiting for the socket to open.
///
/// Overflow drops the oldest entry; `push` itself never fails.
#[derive(Debug, Clone)]
pub struct OutboundQueue<T> {
    items: VecDeque<T>,
    capacity: usize,
    dropped: u64,
}

impl<T> OutboundQueue<T> {
    /// `capacity` is clamped to at least 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            dropped: 0,
        }
    }

    /// Enqueue `item`, returning the entry evicted to make room, if any.
    pub fn push(&mut self, item: T) -> Option<T> {
        let evicted = if self.items.len() >= self.capacity {
            self.dropped += 1;
            warn!(
                capacity = self.capacity,
                dropped_total = self.dropped,
                "outbound queue full, dropping oldest message"
            );
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(item);
        evicted
    }

    /// Put `items` back ahead of everything queued, keeping their order.
    ///
    /// Capacity still applies: the oldest entries are evicted first.
    pub fn restore(&mut self, items: Vec<T>) {
        for item in items.into_iter().rev() {
            self.items.push_front(item);
        }
        while self.items.len() > self.capacity {
            self.items.pop_front();
            self.dropped += 1;
        }
    }

    /// Take everything, oldest first.
    pub fn drain(&mut self) -> Vec<T> {
        self.items.drain(..).collect()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Entries evicted by overflow over the queue's lifetime.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overflow_keeps_newest() {
        let mut q = OutboundQueue::new(3);
        for i in 0..5 {
            q.push(i);
        }
        assert_eq!(q.len(), 3);
        assert_eq!(q.dropped(), 2);
        assert_eq!(q.drain(), vec![2, 3, 4]);
        assert!(q.is_empty());
    }

    #[test]
    fn test_push_reports_eviction() {
        let mut q = OutboundQueue::new(1);
        assert_eq!(q.push("a"), None);
        assert_eq!(q.push("b"), Some("a"));
    }

    #[test]
    fn test_restore_goes_ahead_of_newer_entries() {
        let mut q = OutboundQueue::new(3);
        q.push("c");
        q.push("d");
        q.restore(vec!["a", "b"]);
        assert_eq!(q.dropped(), 1);
        assert_eq!(q.drain(), vec!["b", "c", "d"]);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let mut q = OutboundQueue::new(0);
        q.push(1);
        assert_eq!(q.capacity(), 1);
        assert_eq!(q.len(), 1);
    }
}
