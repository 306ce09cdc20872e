//! History ledger: bounded record of recently seen or sent messages.
//!
//! The ledger is an arena of `capacity` preallocated slots addressed by
//! index, with a write cursor that wraps around. Insertion evicts the oldest
//! entry once the ring is full (strict FIFO), so duplicate detection has a
//! finite lookback window.
//!
//! Recording a key that is already present updates its slot in place
//! instead of inserting again: a burst of duplicate frames must not push
//! the first record out of the ring before its ACK arrives.
//!
//! Lookup is a linear scan, which is fine for the capacities used on
//! constrained nodes (at most a few hundred entries).

use alloc::vec::Vec;

use crate::time::Timestamp;
use crate::types::{HistoryEntry, MsgId, NodeAddr};

/// Result of [`HistoryLedger::record`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recorded {
    /// Slot now holding the entry.
    pub slot: usize,
    /// False if the key was already present and its slot was updated.
    pub is_new: bool,
    /// Entry pushed out of the ring to make room.
    pub evicted: Option<HistoryEntry>,
}

/// Fixed-capacity FIFO ring of [`HistoryEntry`] keyed by `(sender, msg_id)`.
#[derive(Debug, Clone)]
pub struct HistoryLedger {
    slots: Vec<Option<HistoryEntry>>,
    /// Next slot to write. Holds the oldest entry once the ring is full.
    cursor: usize,
    len: usize,
}

impl HistoryLedger {
    /// Create a ledger with all slots allocated up front. Capacity is at least 1.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let mut slots = Vec::with_capacity(capacity);
        slots.resize(capacity, None);
        Self {
            slots,
            cursor: 0,
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == self.capacity()
    }

    /// Slot index holding `(sender, msg_id)`, if present.
    pub fn position(&self, sender: NodeAddr, msg_id: MsgId) -> Option<usize> {
        self.slots.iter().position(|slot| {
            slot.as_ref()
                .is_some_and(|e| e.sender == sender && e.msg_id == msg_id)
        })
    }

    pub fn lookup(&self, sender: NodeAddr, msg_id: MsgId) -> Option<&HistoryEntry> {
        self.position(sender, msg_id)
            .and_then(|slot| self.slots[slot].as_ref())
    }

    pub fn get(&self, slot: usize) -> Option<&HistoryEntry> {
        self.slots.get(slot).and_then(Option::as_ref)
    }

    /// Record an entry, updating in place if its key is already present.
    ///
    /// An in-place update takes the new value and timestamp, keeps the old
    /// gateway when the new entry has none, and ORs both flags, so
    /// `ack_received` never goes back to false.
    pub fn record(&mut self, entry: HistoryEntry) -> Recorded {
        if let Some(slot) = self.position(entry.sender, entry.msg_id) {
            if let Some(existing) = self.slots[slot].as_mut() {
                existing.gateway = entry.gateway.or(existing.gateway);
                existing.value = entry.value;
                existing.last_handled = entry.last_handled;
                existing.ack_received |= entry.ack_received;
                existing.retransmitted |= entry.retransmitted;
            }
            return Recorded {
                slot,
                is_new: false,
                evicted: None,
            };
        }

        let slot = self.cursor;
        let evicted = self.slots[slot].replace(entry);
        if evicted.is_none() {
            self.len += 1;
        }
        self.cursor = (self.cursor + 1) % self.capacity();

        Recorded {
            slot,
            is_new: true,
            evicted,
        }
    }

    /// Flip `ack_received` to true. Returns true only on the first flip.
    pub fn mark_acked(&mut self, sender: NodeAddr, msg_id: MsgId) -> bool {
        match self.entry_mut(sender, msg_id) {
            Some(e) if !e.ack_received => {
                e.ack_received = true;
                true
            }
            _ => false,
        }
    }

    /// Flag a message as sent or forwarded again at `now`.
    pub fn mark_retransmitted(&mut self, sender: NodeAddr, msg_id: MsgId, now: Timestamp) -> bool {
        match self.entry_mut(sender, msg_id) {
            Some(e) => {
                e.retransmitted = true;
                e.last_handled = now;
                true
            }
            None => false,
        }
    }

    /// Update the relay recorded for a message.
    pub fn set_gateway(&mut self, sender: NodeAddr, msg_id: MsgId, gateway: NodeAddr) -> bool {
        match self.entry_mut(sender, msg_id) {
            Some(e) => {
                e.gateway = Some(gateway);
                true
            }
            None => false,
        }
    }

    /// Entries from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &HistoryEntry> + '_ {
        let cap = self.capacity();
        let start = if self.is_full() { self.cursor } else { 0 };
        (0..self.len).filter_map(move |i| self.slots[(start + i) % cap].as_ref())
    }

    pub fn clear(&mut self) {
        for slot in self.slots.iter_mut() {
            *slot = None;
        }
        self.cursor = 0;
        self.len = 0;
    }

    fn entry_mut(&mut self, sender: NodeAddr, msg_id: MsgId) -> Option<&mut HistoryEntry> {
        let slot = self.position(sender, msg_id)?;
        self.slots[slot].as_mut()
    }
}
