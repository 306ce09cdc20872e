//! Node-local timer table.
//!
//! The node owns all of its deadlines. The host (or `Node::run`) only needs
//! to wake the node at [`TimerTable::next_deadline`]; firing goes through
//! handles, and a handle that was cancelled or already fired is a no-op.

use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use hashbrown::HashMap;

use crate::time::Timestamp;
use crate::types::MsgId;

/// Opaque handle returned by [`TimerTable::schedule`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerHandle(u32);

impl TimerHandle {
    pub const fn raw(self) -> u32 {
        self.0
    }
}

/// What a timer is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Retransmission deadline of one outstanding reading.
    Retransmit(MsgId),
    /// Periodic ROUTE_PROBE broadcast.
    ProbeBroadcast,
    /// Periodic purge of expired routes.
    RouteMaintenance,
}

/// Pending timers ordered by deadline.
#[derive(Debug, Default)]
pub struct TimerTable {
    by_deadline: BTreeMap<(Timestamp, TimerHandle), TimerKind>,
    deadlines: HashMap<TimerHandle, Timestamp>,
    next_handle: u32,
}

impl TimerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, at: Timestamp, kind: TimerKind) -> TimerHandle {
        let handle = TimerHandle(self.next_handle);
        self.next_handle = self.next_handle.wrapping_add(1);
        self.by_deadline.insert((at, handle), kind);
        self.deadlines.insert(handle, at);
        handle
    }

    /// Remove a pending timer. Returns false if it was not pending.
    pub fn cancel(&mut self, handle: TimerHandle) -> bool {
        self.take(handle).is_some()
    }

    /// Remove a pending timer and return its kind; `None` if it was
    /// cancelled or has already fired.
    pub fn fire(&mut self, handle: TimerHandle) -> Option<TimerKind> {
        self.take(handle)
    }

    /// Earliest pending deadline.
    pub fn next_deadline(&self) -> Option<Timestamp> {
        self.by_deadline.keys().next().map(|&(at, _)| at)
    }

    /// Remove and return every timer due at or before `now`, earliest first.
    pub fn take_due(&mut self, now: Timestamp) -> Vec<(TimerHandle, TimerKind)> {
        let mut due = Vec::new();
        while let Some((&(at, handle), _)) = self.by_deadline.first_key_value() {
            if at > now {
                break;
            }
            if let Some(kind) = self.take(handle) {
                due.push((handle, kind));
            }
        }
        due
    }

    pub fn len(&self) -> usize {
        self.deadlines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }

    fn take(&mut self, handle: TimerHandle) -> Option<TimerKind> {
        let at = self.deadlines.remove(&handle)?;
        self.by_deadline.remove(&(at, handle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_deadline_is_earliest() {
        let mut timers = TimerTable::new();
        assert_eq!(timers.next_deadline(), None);

        timers.schedule(Timestamp::from_secs(5), TimerKind::ProbeBroadcast);
        timers.schedule(Timestamp::from_secs(2), TimerKind::Retransmit(1));
        timers.schedule(Timestamp::from_secs(9), TimerKind::RouteMaintenance);

        assert_eq!(timers.next_deadline(), Some(Timestamp::from_secs(2)));
        assert_eq!(timers.len(), 3);
    }

    #[test]
    fn test_take_due_in_order() {
        let mut timers = TimerTable::new();
        let late = timers.schedule(Timestamp::from_secs(3), TimerKind::Retransmit(2));
        let early = timers.schedule(Timestamp::from_secs(1), TimerKind::Retransmit(1));
        timers.schedule(Timestamp::from_secs(10), TimerKind::ProbeBroadcast);

        let due = timers.take_due(Timestamp::from_secs(3));
        assert_eq!(
            due,
            [
                (early, TimerKind::Retransmit(1)),
                (late, TimerKind::Retransmit(2))
            ]
        );
        assert_eq!(timers.len(), 1);
        assert!(timers.take_due(Timestamp::from_secs(3)).is_empty());
    }

    #[test]
    fn test_cancel_and_fire_are_one_shot() {
        let mut timers = TimerTable::new();
        let a = timers.schedule(Timestamp::from_secs(1), TimerKind::Retransmit(7));
        let b = timers.schedule(Timestamp::from_secs(1), TimerKind::Retransmit(8));

        assert!(timers.cancel(a));
        assert!(!timers.cancel(a));
        assert_eq!(timers.fire(a), None, "cancelled handle must not fire");

        assert_eq!(timers.fire(b), Some(TimerKind::Retransmit(8)));
        assert_eq!(timers.fire(b), None, "fired handle must not fire twice");
        assert!(timers.is_empty());
    }

    #[test]
    fn test_same_deadline_distinct_handles() {
        let mut timers = TimerTable::new();
        let t = Timestamp::from_millis(500);
        let a = timers.schedule(t, TimerKind::Retransmit(1));
        let b = timers.schedule(t, TimerKind::Retransmit(2));

        assert_ne!(a, b);
        assert_eq!(timers.take_due(t).len(), 2);
    }
}
