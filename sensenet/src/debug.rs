//! Debug events for protocol tracing.
//!
//! Enabled in test builds and with the `debug` feature. Events are pushed
//! into a bounded per-node channel; the simulator drains it after every
//! handler. When the channel is full, new events are dropped.

use embassy_sync::channel::Channel;

use crate::route::RouteUpdate;
use crate::time::Timestamp;
use crate::traits::ChannelMutex;
use crate::types::{MessageKind, MsgId, NodeAddr, Priority};

/// Queue size for the debug channel.
pub(crate) const DEBUG_QUEUE_SIZE: usize = 64;

/// Per-node debug event channel.
pub type DebugChannel = Channel<ChannelMutex, DebugEvent, DEBUG_QUEUE_SIZE>;

/// Push a debug event if tracing is compiled in.
///
/// The event expression is not evaluated otherwise.
#[cfg(any(test, feature = "debug"))]
macro_rules! emit_debug {
    ($node:expr, $event:expr) => {
        $node.push_debug($event)
    };
}

#[cfg(not(any(test, feature = "debug")))]
macro_rules! emit_debug {
    ($node:expr, $event:expr) => {};
}

/// Debug events emitted by the node for protocol tracing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DebugEvent {
    /// Frame failed to decode.
    FrameDecodeFailed {
        from: NodeAddr,
        len: usize,
        error: crate::wire::DecodeError,
    },
    /// Frame link-addressed to another node, or not meant for this role.
    FrameIgnored {
        from: NodeAddr,
        kind: Option<MessageKind>,
        reason: &'static str,
    },
    /// Frame below the radio's RSSI threshold.
    WeakSignal { from: NodeAddr, rssi: i16 },
    ReadingSubmitted {
        msg_id: MsgId,
        value: u16,
        next_hop: Option<NodeAddr>,
    },
    ReadingRejected {
        value: u16,
        error: crate::types::Error,
    },
    /// Gateway forwarded (or re-forwarded) DATA.
    DataForwarded {
        sender: NodeAddr,
        msg_id: MsgId,
        next_hop: NodeAddr,
        again: bool,
    },
    DuplicateDropped {
        kind: MessageKind,
        sender: NodeAddr,
        msg_id: MsgId,
        from: NodeAddr,
    },
    /// Gateway answered a duplicate of acknowledged DATA with an ACK.
    AckReplayed {
        sender: NodeAddr,
        msg_id: MsgId,
        to: NodeAddr,
    },
    /// Server acknowledged DATA.
    AckSent {
        sender: NodeAddr,
        msg_id: MsgId,
        to: NodeAddr,
        duplicate: bool,
    },
    AckRelayed {
        sensor: NodeAddr,
        msg_id: MsgId,
        next_hop: NodeAddr,
    },
    /// Sensor matched an ACK to an outstanding reading.
    AckMatched { msg_id: MsgId, attempts: u8 },
    /// ACK for a reading that is no longer outstanding.
    LateAckIgnored { msg_id: MsgId },
    RetransmitScheduled {
        msg_id: MsgId,
        attempt: u8,
        deadline: Timestamp,
    },
    DeliveryFailed { msg_id: MsgId, attempts: u8 },
    RouteUpdated {
        destination: NodeAddr,
        next_hop: NodeAddr,
        hop_count: u16,
        update: RouteUpdate,
    },
    RoutesPurged { count: usize },
    /// No route for a message; `queued` tells whether it was held.
    NoRoute {
        destination: NodeAddr,
        kind: MessageKind,
        msg_id: MsgId,
        queued: bool,
    },
    LedgerEvicted {
        sender: NodeAddr,
        msg_id: MsgId,
        acked: bool,
    },
    ProbeSent {
        destination: NodeAddr,
        hop_count: u16,
    },
    /// Radio busy; frame parked in the backlog.
    FrameBacklogged {
        next_hop: NodeAddr,
        priority: Priority,
        backlog_len: usize,
    },
    /// Frame lost to backlog overflow.
    FrameDropped {
        next_hop: NodeAddr,
        priority: Priority,
    },
    /// Timer fired for state that no longer exists.
    StaleTimer { handle: u32 },
}
