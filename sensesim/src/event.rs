//! Event types and priority queue for discrete event simulation.

use std::cmp::Ordering;

use sensenet::{NodeAddr, Timestamp};

/// Unique sequence number for deterministic event ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SequenceNumber(u64);

impl SequenceNumber {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

/// Scenario actions that can be scheduled during simulation.
#[derive(Debug, Clone, PartialEq)]
pub enum ScenarioAction {
    /// Partition the network into isolated groups.
    Partition { groups: Vec<Vec<NodeAddr>> },
    /// Heal all partitions (restore full connectivity).
    HealPartition,
    /// Disable a specific link.
    DisableLink { a: NodeAddr, b: NodeAddr },
    /// Enable a specific link.
    EnableLink { a: NodeAddr, b: NodeAddr },
    /// Set loss rate on a link.
    SetLossRate { a: NodeAddr, b: NodeAddr, rate: f64 },
}

/// Events in the discrete event simulation.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// A frame reaches a node's antenna. The node decides from `link_dest`
    /// whether it is meant for it.
    FrameDelivery {
        to: NodeAddr,
        from: NodeAddr,
        link_dest: NodeAddr,
        data: Vec<u8>,
        rssi: Option<i16>,
    },
    /// The frame a node handed to its radio has left the air.
    SendDone { node: NodeAddr, success: bool },
    /// Wake a node to fire due timers.
    TimerFire { node: NodeAddr },
    /// The application on a sensor submits a reading.
    SubmitReading { node: NodeAddr, value: u16 },
    /// Execute a scenario action.
    ScenarioAction(ScenarioAction),
}

/// A scheduled event with timestamp and sequence number for ordering.
#[derive(Debug, Clone)]
pub struct ScheduledEvent {
    /// When the event should occur.
    pub time: Timestamp,
    /// Sequence number for deterministic ordering of same-time events.
    pub seq: SequenceNumber,
    /// The event to process.
    pub event: Event,
}

impl ScheduledEvent {
    pub fn new(time: Timestamp, seq: SequenceNumber, event: Event) -> Self {
        Self { time, seq, event }
    }
}

// Ordering for a min-heap (BinaryHeap is a max-heap, so reversed).
impl PartialEq for ScheduledEvent {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.seq == other.seq
    }
}

impl Eq for ScheduledEvent {}

impl PartialOrd for ScheduledEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .time
            .cmp(&self.time)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BinaryHeap;

    use super::*;

    fn timer(secs: u64, seq: u64) -> ScheduledEvent {
        ScheduledEvent::new(
            Timestamp::from_secs(secs),
            SequenceNumber::new(seq),
            Event::TimerFire { node: 1 },
        )
    }

    #[test]
    fn test_earlier_event_first() {
        // Earlier time is "greater" in min-heap terms
        assert!(timer(5, 2) > timer(10, 1));
    }

    #[test]
    fn test_same_time_sequence_ordering() {
        assert!(timer(10, 1) > timer(10, 2));
    }

    #[test]
    fn test_heap_pops_in_time_then_seq_order() {
        let mut heap = BinaryHeap::new();
        heap.push(timer(3, 0));
        heap.push(timer(1, 2));
        heap.push(timer(1, 1));
        heap.push(timer(2, 3));

        let order: Vec<(u64, u64)> = std::iter::from_fn(|| heap.pop())
            .map(|e| (e.time.as_secs(), e.seq.value()))
            .collect();
        assert_eq!(order, vec![(1, 1), (1, 2), (2, 3), (3, 0)]);
    }
}
