//! Bounded queues used by the node.
//!
//! - [`TxBacklog`]: frames waiting for the half-duplex radio, ordered by
//!   priority (ACK, then ROUTE_PROBE, then DATA) and FIFO within a priority.
//! - [`BoundedQueue`]: messages held while no route is known, and delivery
//!   results waiting for room in the event channel.
//!
//! Both give memory back after a burst: once enough consecutive removals
//! happen without an insertion (1/16 of the bound), the backing storage is
//! shrunk.

use alloc::collections::{BTreeMap, VecDeque};
use alloc::vec::Vec;

use crate::types::{Frame, NodeAddr, Priority};

/// Consecutive removals before shrinking (1/16 of the bound, minimum 1).
const fn shrink_threshold(bound: usize) -> u8 {
    let threshold = bound / 16;
    if threshold == 0 {
        1
    } else if threshold > u8::MAX as usize {
        u8::MAX
    } else {
        threshold as u8
    }
}

/// An encoded frame waiting for the radio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub next_hop: NodeAddr,
    pub frame: Frame,
    pub priority: Priority,
}

/// Outcome of [`TxBacklog::push`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BacklogPush {
    Queued,
    /// Queued after evicting this lower-priority frame.
    Evicted(Outbound),
    /// Backlog full of frames of equal or higher priority.
    Rejected,
}

/// Priority backlog of frames for the radio.
///
/// When full, a new frame evicts the newest frame of the lowest priority
/// present, unless the new frame is itself of that priority or lower, in
/// which case it is rejected.
#[derive(Debug)]
pub struct TxBacklog {
    items: BTreeMap<(Priority, u64), Outbound>,
    next_seq: u64,
    max_len: usize,
}

impl TxBacklog {
    pub fn new(max_len: usize) -> Self {
        Self {
            items: BTreeMap::new(),
            next_seq: 0,
            max_len,
        }
    }

    pub fn push(&mut self, item: Outbound) -> BacklogPush {
        let mut evicted = None;
        if self.items.len() >= self.max_len {
            match self.items.last_key_value() {
                Some((&(lowest, _), _)) if item.priority < lowest => {
                    evicted = self.items.pop_last().map(|(_, v)| v);
                }
                _ => return BacklogPush::Rejected,
            }
        }

        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        self.items.insert((item.priority, seq), item);

        match evicted {
            Some(old) => BacklogPush::Evicted(old),
            None => BacklogPush::Queued,
        }
    }

    /// Frame `pop` would return, left in place.
    pub fn peek(&self) -> Option<&Outbound> {
        self.items.first_key_value().map(|(_, v)| v)
    }

    /// Highest-priority, oldest frame.
    pub fn pop(&mut self) -> Option<Outbound> {
        self.items.pop_first().map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// FIFO queue with a hard bound; pushing onto a full queue drops the oldest item.
#[derive(Debug)]
pub struct BoundedQueue<T> {
    inner: VecDeque<T>,
    max_len: usize,
    removals_since_add: u8,
    shrink_threshold: u8,
}

impl<T> BoundedQueue<T> {
    pub fn new(max_len: usize) -> Self {
        Self {
            inner: VecDeque::new(),
            max_len: max_len.max(1),
            removals_since_add: 0,
            shrink_threshold: shrink_threshold(max_len),
        }
    }

    /// Append; returns the item dropped to make room, if any.
    pub fn push(&mut self, value: T) -> Option<T> {
        self.removals_since_add = 0;
        let dropped = if self.inner.len() >= self.max_len {
            self.inner.pop_front()
        } else {
            None
        };
        self.inner.push_back(value);
        dropped
    }

    /// Oldest item.
    pub fn front(&self) -> Option<&T> {
        self.inner.front()
    }

    pub fn pop(&mut self) -> Option<T> {
        let item = self.inner.pop_front();
        if item.is_some() {
            self.note_removals(1);
        }
        item
    }

    /// Remove and return every item matching `pred`, in queue order.
    pub fn drain_matching<F>(&mut self, mut pred: F) -> Vec<T>
    where
        F: FnMut(&T) -> bool,
    {
        let mut taken = Vec::new();
        let mut kept = VecDeque::with_capacity(self.inner.len());
        while let Some(item) = self.inner.pop_front() {
            if pred(&item) {
                taken.push(item);
            } else {
                kept.push_back(item);
            }
        }
        self.inner = kept;
        self.note_removals(taken.len());
        taken
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.inner.iter()
    }

    fn note_removals(&mut self, removed: usize) {
        if removed == 0 {
            return;
        }
        let removed = removed.min(u8::MAX as usize) as u8;
        self.removals_since_add = self.removals_since_add.saturating_add(removed);
        if self.removals_since_add >= self.shrink_threshold {
            self.inner.shrink_to_fit();
            self.removals_since_add = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use alloc::vec;

    use super::*;

    fn outbound(next_hop: NodeAddr, priority: Priority) -> Outbound {
        Outbound {
            next_hop,
            frame: [0u8; crate::types::FRAME_LEN],
            priority,
        }
    }

    #[test]
    fn test_backlog_priority_order() {
        let mut backlog = TxBacklog::new(8);
        backlog.push(outbound(1, Priority::Data));
        backlog.push(outbound(2, Priority::Ack));
        backlog.push(outbound(3, Priority::Probe));
        backlog.push(outbound(4, Priority::Data));
        backlog.push(outbound(5, Priority::Ack));

        let order: Vec<NodeAddr> = core::iter::from_fn(|| backlog.pop())
            .map(|o| o.next_hop)
            .collect();
        assert_eq!(order, vec![2, 5, 3, 1, 4]);
    }

    #[test]
    fn test_backlog_full_evicts_lowest() {
        let mut backlog = TxBacklog::new(2);
        backlog.push(outbound(1, Priority::Data));
        backlog.push(outbound(2, Priority::Data));

        // Same priority as the lowest: rejected
        assert_eq!(backlog.push(outbound(3, Priority::Data)), BacklogPush::Rejected);

        // Higher priority: evicts the newest DATA
        match backlog.push(outbound(4, Priority::Ack)) {
            BacklogPush::Evicted(old) => assert_eq!(old.next_hop, 2),
            other => panic!("expected eviction, got {:?}", other),
        }
        assert_eq!(backlog.len(), 2);
        assert_eq!(backlog.pop().map(|o| o.next_hop), Some(4));
        assert_eq!(backlog.pop().map(|o| o.next_hop), Some(1));
        assert!(backlog.is_empty());
    }

    #[test]
    fn test_zero_sized_backlog_rejects() {
        let mut backlog = TxBacklog::new(0);
        assert_eq!(backlog.push(outbound(1, Priority::Ack)), BacklogPush::Rejected);
    }

    #[test]
    fn test_bounded_queue_drops_oldest() {
        let mut q = BoundedQueue::new(3);
        for i in 0..3 {
            assert_eq!(q.push(i), None);
        }
        assert_eq!(q.push(3), Some(0));
        assert_eq!(q.iter().copied().collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn test_bounded_queue_drain_matching_keeps_order() {
        let mut q = BoundedQueue::new(8);
        for i in 0..6 {
            q.push(i);
        }
        let even = q.drain_matching(|i| i % 2 == 0);
        assert_eq!(even, vec![0, 2, 4]);
        assert_eq!(q.pop(), Some(1));
        assert_eq!(q.pop(), Some(3));
        assert_eq!(q.pop(), Some(5));
        assert!(q.is_empty());
    }
}
