//! SimNode wrapper for simulated sensenet nodes.

use std::cell::Cell;
use std::future::{ready, Ready};

use embassy_sync::channel::Channel;
use sensenet::config::DefaultConfig;
use sensenet::debug::DebugEvent;
use sensenet::traits::RadioEventChannel;
use sensenet::{
    Clock, Duration, Error, Event, Frame, MsgId, Node, NodeAddr, NodeSettings, ProtocolParams,
    Radio, Random, Role, SendStatus, Timestamp,
};

/// Simulated half-duplex radio.
///
/// Accepted frames collect in an outbox the simulator drains after every
/// handler call and puts on the air.
pub struct SimRadio {
    outbox: Vec<(NodeAddr, Frame)>,
    min_rssi: Option<i16>,
    events: RadioEventChannel,
}

impl SimRadio {
    pub fn new() -> Self {
        Self {
            outbox: Vec::new(),
            min_rssi: None,
            events: Channel::new(),
        }
    }

    /// Treat frames weaker than `min_rssi` as noise.
    pub fn with_min_rssi(mut self, min_rssi: i16) -> Self {
        self.min_rssi = Some(min_rssi);
        self
    }

    /// Take all frames handed to the radio since the last call.
    pub fn take_sent(&mut self) -> Vec<(NodeAddr, Frame)> {
        std::mem::take(&mut self.outbox)
    }
}

impl Default for SimRadio {
    fn default() -> Self {
        Self::new()
    }
}

impl Radio for SimRadio {
    fn send(&mut self, next_hop: NodeAddr, frame: &Frame) -> SendStatus {
        self.outbox.push((next_hop, *frame));
        SendStatus::Accepted
    }

    fn events(&self) -> &RadioEventChannel {
        &self.events
    }

    fn is_acceptable_rssi(&self, rssi: Option<i16>) -> bool {
        match (self.min_rssi, rssi) {
            (Some(min), Some(rssi)) => rssi >= min,
            _ => true,
        }
    }
}

/// Mock clock for simulation.
///
/// Time is controlled externally by the simulator.
pub struct SimClock {
    current: Cell<Timestamp>,
}

impl SimClock {
    pub fn new() -> Self {
        Self::at(Timestamp::ZERO)
    }

    pub fn at(time: Timestamp) -> Self {
        Self {
            current: Cell::new(time),
        }
    }

    pub fn set(&self, time: Timestamp) {
        self.current.set(time);
    }

    pub fn advance(&self, duration: Duration) {
        self.current.set(self.current.get() + duration);
    }
}

impl Default for SimClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SimClock {
    type SleepFuture<'a> = Ready<()>;

    fn now(&self) -> Timestamp {
        self.current.get()
    }

    fn sleep_until(&self, _time: Timestamp) -> Self::SleepFuture<'_> {
        ready(())
    }
}

/// Deterministic random source for simulation (LCG).
pub struct SimRandom {
    state: u64,
}

impl SimRandom {
    pub fn new() -> Self {
        Self { state: 12345 }
    }

    pub fn with_seed(seed: u64) -> Self {
        Self { state: seed }
    }
}

impl Default for SimRandom {
    fn default() -> Self {
        Self::new()
    }
}

impl Random for SimRandom {
    fn gen_range(&mut self, min: u64, max: u64) -> u64 {
        self.state = self
            .state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        if max <= min {
            return min;
        }
        min + (self.state >> 33) % (max - min)
    }
}

/// Type alias for simulated nodes.
pub type SimNodeInner = Node<SimRadio, SimRandom, SimClock, DefaultConfig>;

/// Wrapper around a sensenet Node for simulation.
pub struct SimNode {
    /// The underlying sensenet node.
    inner: SimNodeInner,
    /// When the node was created.
    pub created_at: Timestamp,
}

impl SimNode {
    /// Create a node; `seed` drives its backoff jitter.
    pub fn new(
        settings: NodeSettings,
        params: ProtocolParams,
        seed: u64,
        created_at: Timestamp,
    ) -> Result<Self, Error> {
        let inner = Node::new(
            SimRadio::new(),
            SimRandom::with_seed(seed),
            SimClock::at(created_at),
            settings,
            params,
        )?;
        Ok(Self { inner, created_at })
    }

    pub fn addr(&self) -> NodeAddr {
        self.inner.addr()
    }

    pub fn role(&self) -> Role {
        self.inner.role()
    }

    /// Get a reference to the inner node.
    pub fn inner(&self) -> &SimNodeInner {
        &self.inner
    }

    /// Get a mutable reference to the inner node.
    pub fn inner_mut(&mut self) -> &mut SimNodeInner {
        &mut self.inner
    }

    pub fn initialize(&mut self, now: Timestamp) {
        self.inner.clock().set(now);
        self.inner.initialize(now);
    }

    /// Handle a frame heard on the air.
    pub fn handle_radio_rx(
        &mut self,
        data: &[u8],
        from: NodeAddr,
        link_dest: NodeAddr,
        rssi: Option<i16>,
        now: Timestamp,
    ) {
        // Keep clock.now() in step for anything reading it
        self.inner.clock().set(now);
        self.inner.handle_radio_rx(data, from, link_dest, rssi, now);
    }

    pub fn handle_send_done(&mut self, success: bool, now: Timestamp) {
        self.inner.clock().set(now);
        self.inner.handle_send_done(success, now);
    }

    pub fn handle_timer(&mut self, now: Timestamp) {
        self.inner.clock().set(now);
        self.inner.handle_timer(now);
    }

    pub fn submit_reading(&mut self, value: u16, now: Timestamp) -> Result<MsgId, Error> {
        self.inner.clock().set(now);
        self.inner.submit_reading(value, now)
    }

    pub fn next_deadline(&self) -> Option<Timestamp> {
        self.inner.next_deadline()
    }

    /// Take all frames the node put on its radio.
    pub fn take_outgoing(&mut self) -> Vec<(NodeAddr, Frame)> {
        self.inner.radio_mut().take_sent()
    }

    /// Take all protocol events, including delivery results that were
    /// waiting for room in the node's event channel.
    pub fn take_events(&mut self) -> Vec<Event> {
        let mut events = Vec::new();
        loop {
            while let Ok(event) = self.inner.events().try_receive() {
                events.push(event);
            }
            if self.inner.held_results() == 0 {
                break;
            }
            self.inner.flush_results();
        }
        events
    }

    /// Take all debug events from the node's debug channel.
    pub fn take_debug_events(&self) -> Vec<DebugEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.inner.debug_channel().try_receive() {
            events.push(event);
        }
        events
    }
}
