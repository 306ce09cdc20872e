//! Core types and constants for the sensenet protocol.

use core::fmt;

use crate::time::Timestamp;
use crate::wire::DecodeError;

/// Link-layer / protocol node address.
pub type NodeAddr = u16;

/// Per-sender message sequence number. Wraps modulo 2^16.
pub type MsgId = u16;

/// Link-layer broadcast address. Never assigned to a node.
pub const BROADCAST_ADDR: NodeAddr = 0xFFFF;

// Wire constants
pub const FRAME_LEN: usize = 9; // type(1) + msg_id/sender/destination/value (4 x 2)
pub const MSG_DATA: u8 = 0;
pub const MSG_ACK: u8 = 1;
pub const MSG_ROUTE_PROBE: u8 = 2;

/// One encoded message on the air.
pub type Frame = [u8; FRAME_LEN];

// Reference deployment
pub const SENSOR_LIST_SIZE: usize = 128;
pub const SERVER_LIST_SIZE: usize = 512;
pub const SENSOR_NODES: usize = 5;
pub const GATEWAY_NODES: usize = 2;
pub const SERVER_NODE: NodeAddr = 8;

// Protocol defaults
pub const DEFAULT_MAX_ATTEMPTS: u8 = 3;
pub const DEFAULT_RETRY_INTERVAL_MS: u64 = 1000;
pub const DEFAULT_JITTER_PERCENT: u8 = 10;
pub const DEFAULT_PROBE_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_ROUTE_STALE_SECS: u64 = 90;
pub const DEFAULT_RELAY_HOLDOFF_MS: u64 = 250;
pub const ROUTE_EXPIRY_FACTOR: u64 = 3; // purge after 3 x stale timeout
pub const MAINTENANCE_INTERVAL_SECS: u64 = 10;
pub const IDLE_WAKE_SECS: u64 = 60;

/// Message kind carried in the first byte of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Sensor reading travelling toward the sink.
    Data,
    /// Sink acknowledgement travelling back toward the sensor.
    Ack,
    /// Hop-count announcement for a sink.
    RouteProbe,
}

impl MessageKind {
    /// Wire tag for this kind.
    pub const fn tag(self) -> u8 {
        match self {
            MessageKind::Data => MSG_DATA,
            MessageKind::Ack => MSG_ACK,
            MessageKind::RouteProbe => MSG_ROUTE_PROBE,
        }
    }

    /// Parse a wire tag.
    pub const fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            MSG_DATA => Some(MessageKind::Data),
            MSG_ACK => Some(MessageKind::Ack),
            MSG_ROUTE_PROBE => Some(MessageKind::RouteProbe),
            _ => None,
        }
    }

    /// Transmit priority of frames of this kind.
    pub const fn priority(self) -> Priority {
        match self {
            MessageKind::Ack => Priority::Ack,
            MessageKind::RouteProbe => Priority::Probe,
            MessageKind::Data => Priority::Data,
        }
    }
}

/// A protocol message.
///
/// | kind        | sender             | destination        | value              |
/// |-------------|--------------------|--------------------|--------------------|
/// | DATA        | originating sensor | sink               | reading            |
/// | ACK         | accepting sink     | originating sensor | echoed reading     |
/// | ROUTE_PROBE | announcing node    | announced sink     | announcer hop count|
///
/// `destination` is always the ultimate address, never the next hop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Message {
    pub kind: MessageKind,
    pub msg_id: MsgId,
    pub sender: NodeAddr,
    pub destination: NodeAddr,
    pub value: u16,
}

impl Message {
    pub const fn data(msg_id: MsgId, sender: NodeAddr, sink: NodeAddr, value: u16) -> Self {
        Self {
            kind: MessageKind::Data,
            msg_id,
            sender,
            destination: sink,
            value,
        }
    }

    /// ACK issued by `sink` for a DATA message.
    pub const fn ack_for(data: &Message, sink: NodeAddr) -> Self {
        Self {
            kind: MessageKind::Ack,
            msg_id: data.msg_id,
            sender: sink,
            destination: data.sender,
            value: data.value,
        }
    }

    pub const fn probe(announcer: NodeAddr, sink: NodeAddr, hop_count: u16) -> Self {
        Self {
            kind: MessageKind::RouteProbe,
            msg_id: 0,
            sender: announcer,
            destination: sink,
            value: hop_count,
        }
    }

    /// Deduplication key: originating sensor and its sequence number.
    ///
    /// DATA originates at `sender`; an ACK is keyed by the sensor it is
    /// addressed to, so a DATA and its ACK share one key.
    pub const fn delivery_key(&self) -> (NodeAddr, MsgId) {
        match self.kind {
            MessageKind::Ack => (self.destination, self.msg_id),
            _ => (self.sender, self.msg_id),
        }
    }

    pub const fn priority(&self) -> Priority {
        self.kind.priority()
    }
}

/// Behavioral profile of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Originates readings, never relays.
    Sensor,
    /// Relays DATA/ACK and announces routes to the sink.
    Gateway,
    /// Terminal sink: deduplicates and acknowledges.
    Server,
}

/// Transmit priority. Lower value = sent first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    Ack = 0,
    Probe = 1,
    Data = 2,
}

/// One slot of a [`HistoryLedger`](crate::ledger::HistoryLedger).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub msg_id: MsgId,
    /// Originating sensor.
    pub sender: NodeAddr,
    /// Relay that last handled the message from this node's point of view.
    ///
    /// On a sensor: the next hop the DATA was sent through. On a gateway or
    /// server: the neighbor the DATA arrived from (reverse path for the ACK).
    pub gateway: Option<NodeAddr>,
    pub ack_received: bool,
    pub retransmitted: bool,
    /// Reading carried by the message.
    pub value: u16,
    /// When this node last recorded or forwarded the message.
    pub last_handled: Timestamp,
}

impl HistoryEntry {
    pub fn new(msg: &Message, gateway: Option<NodeAddr>, now: Timestamp) -> Self {
        let (sender, msg_id) = msg.delivery_key();
        Self {
            msg_id,
            sender,
            gateway,
            ack_received: false,
            retransmitted: false,
            value: msg.value,
            last_handled: now,
        }
    }

    pub fn key(&self) -> (NodeAddr, MsgId) {
        (self.sender, self.msg_id)
    }
}

/// Final outcome of one sensor submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// A matching ACK arrived after `attempts` transmissions.
    Delivered { attempts: u8 },
    /// Attempts were exhausted without an ACK.
    Failed { attempts: u8 },
}

impl DeliveryOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered { .. })
    }
}

/// Events emitted by the node for application handling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Sensor: a reading was accepted for delivery.
    ReadingAccepted { msg_id: MsgId, value: u16 },
    /// Sensor: exactly one per accepted reading.
    DeliveryResult {
        msg_id: MsgId,
        outcome: DeliveryOutcome,
    },
    /// Server: a reading reached the application (once per delivery key).
    DataReceived {
        sender: NodeAddr,
        value: u16,
        msg_id: MsgId,
    },
    /// Route toward `destination` was installed or changed.
    RouteChanged {
        destination: NodeAddr,
        next_hop: NodeAddr,
        hop_count: u16,
    },
}

/// Error type for node operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Frame failed to decode.
    MalformedMessage(DecodeError),
    /// No route toward the destination.
    NoRouteKnown,
    /// Retransmission table is full.
    TooManyPending,
    /// Operation not available for this node's role.
    WrongRole,
    /// Rejected configuration.
    InvalidConfig(&'static str),
}

impl From<DecodeError> for Error {
    fn from(e: DecodeError) -> Self {
        Error::MalformedMessage(e)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::MalformedMessage(e) => write!(f, "malformed message: {}", e),
            Error::NoRouteKnown => write!(f, "no route known"),
            Error::TooManyPending => write!(f, "too many pending retransmissions"),
            Error::WrongRole => write!(f, "operation not supported by this role"),
            Error::InvalidConfig(reason) => write!(f, "invalid configuration: {}", reason),
        }
    }
}

/// Frame and delivery counters for monitoring.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportMetrics {
    pub frames_sent: u64,
    pub frames_received: u64,
    /// Frames that never reached the radio (no route, backlog overflow).
    pub frames_dropped: u64,
    pub frames_malformed: u64,
    /// Sends the driver reported as failed.
    pub send_failures: u64,
    /// Frames parked because the radio was busy.
    pub busy_deferrals: u64,
    pub duplicates_suppressed: u64,
    pub relayed: u64,
    pub retransmissions: u64,
    pub acks_sent: u64,
    pub probes_sent: u64,
    pub delivered: u64,
    pub failed: u64,
}

impl TransportMetrics {
    pub fn new() -> Self {
        Self::default()
    }
}
