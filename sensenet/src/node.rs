//! Node implementation - the per-node protocol state machine.
//!
//! One `Node` type serves all three roles; [`NodeSettings::role`] selects
//! which handlers run. The node is fully event-driven:
//! - Received frames trigger role handling (`handle_radio_rx`)
//! - Send completions release the half-duplex radio (`handle_send_done`)
//! - Timers trigger retransmissions, probe broadcasts and route purges
//!   (`handle_timer` / `on_timer_fire`)
//! - Application readings are submitted with `submit_reading`
//!
//! A host can call these handlers directly (the simulator does), or let
//! [`Node::run`] drive them from the radio event channel, the readings
//! channel and the clock.
//!
//! # Usage
//!
//! ```ignore
//! let mut node = Node::<_, _, _, DefaultConfig>::new(
//!     radio,
//!     random,
//!     clock,
//!     NodeSettings::sensor(5, 8),
//!     ProtocolParams::default(),
//! )?;
//!
//! // Spawn the node's run loop
//! spawn(async move {
//!     node.run().await;
//! });
//!
//! // Submit readings
//! node.readings().send(42).await;
//!
//! // Learn the outcome
//! let event = node.events().receive().await;
//! ```

use core::marker::PhantomData;

use embassy_sync::channel::TrySendError;

use crate::collections::{BacklogPush, BoundedQueue, Outbound, TxBacklog};
use crate::config::{DefaultConfig, NoRoutePolicy, NodeConfig, NodeSettings, ProtocolParams};
use crate::ledger::{HistoryLedger, Recorded};
use crate::route::RouteTable;
use crate::scheduler::RetransmitScheduler;
use crate::time::{Duration, Timestamp};
use crate::timer::{TimerHandle, TimerKind, TimerTable};
use crate::traits::{
    Clock, EventChannel, Radio, RadioEvent, Random, ReadingChannel, SendStatus,
};
use crate::types::{
    Error, Event, HistoryEntry, Message, MessageKind, MsgId, NodeAddr, Role, TransportMetrics,
    BROADCAST_ADDR, IDLE_WAKE_SECS, MAINTENANCE_INTERVAL_SECS,
};
use crate::wire;

#[cfg(any(test, feature = "debug"))]
use crate::debug::{DebugChannel, DebugEvent};

/// The main protocol node.
///
/// Generic over:
/// - `Rd`: Radio driver
/// - `R`: Random number generator
/// - `Clk`: Clock
/// - `Cfg`: Memory bounds (defaults to [`DefaultConfig`])
pub struct Node<Rd, R, Clk, Cfg = DefaultConfig> {
    // Dependencies (injected)
    pub(crate) radio: Rd,
    pub(crate) random: R,
    pub(crate) clock: Clk,

    // Application-level channels
    readings: ReadingChannel,
    events: EventChannel,
    #[cfg(any(test, feature = "debug"))]
    debug: DebugChannel,

    // Identity and tuning
    pub(crate) settings: NodeSettings,
    pub(crate) params: ProtocolParams,

    // Protocol state
    pub(crate) ledger: HistoryLedger,
    pub(crate) routes: RouteTable,
    pub(crate) scheduler: RetransmitScheduler,
    pub(crate) timers: TimerTable,
    backlog: TxBacklog,
    no_route: BoundedQueue<Message>,
    /// Delivery results the event channel had no room for, oldest first.
    held_results: BoundedQueue<Event>,
    radio_busy: bool,
    pub(crate) next_msg_id: MsgId,
    started: bool,

    pub(crate) metrics: TransportMetrics,

    _config: PhantomData<Cfg>,
}

impl<Rd, R, Clk, Cfg> Node<Rd, R, Clk, Cfg>
where
    Rd: Radio,
    R: Random,
    Clk: Clock,
    Cfg: NodeConfig,
{
    /// Create a node. Fails if the settings or parameters are invalid.
    pub fn new(
        radio: Rd,
        random: R,
        clock: Clk,
        settings: NodeSettings,
        params: ProtocolParams,
    ) -> Result<Self, Error> {
        settings.validate()?;
        params.validate()?;

        let ledger_capacity = match settings.role {
            Role::Sensor => Cfg::SENSOR_LIST_SIZE,
            Role::Gateway | Role::Server => Cfg::SERVER_LIST_SIZE,
        };

        Ok(Self {
            radio,
            random,
            clock,
            readings: ReadingChannel::new(),
            events: EventChannel::new(),
            #[cfg(any(test, feature = "debug"))]
            debug: DebugChannel::new(),
            settings,
            params,
            ledger: HistoryLedger::with_capacity(ledger_capacity),
            routes: RouteTable::new(settings.addr, Cfg::MAX_ROUTES, params.route_stale_timeout),
            scheduler: RetransmitScheduler::new(
                Cfg::MAX_PENDING_RETRANSMITS,
                params.max_attempts,
                params.backoff,
            ),
            timers: TimerTable::new(),
            backlog: TxBacklog::new(Cfg::MAX_TX_BACKLOG),
            no_route: BoundedQueue::new(Cfg::MAX_QUEUED_FRAMES),
            held_results: BoundedQueue::new(Cfg::MAX_PENDING_RETRANSMITS),
            radio_busy: false,
            next_msg_id: 1,
            started: false,
            metrics: TransportMetrics::new(),
            _config: PhantomData,
        })
    }

    /// Start periodic work. Idempotent.
    ///
    /// The server announces itself immediately; gateways announce once they
    /// hold a route. Called by [`Node::run`]; hosts driving the handlers
    /// directly call it once at boot.
    pub fn initialize(&mut self, now: Timestamp) {
        if self.started {
            return;
        }
        self.started = true;

        match self.role() {
            Role::Server | Role::Gateway => {
                self.send_probe();
                self.timers
                    .schedule(now + self.params.probe_interval, TimerKind::ProbeBroadcast);
            }
            Role::Sensor => {}
        }
        if self.role() != Role::Server {
            self.timers.schedule(
                now + Duration::from_secs(MAINTENANCE_INTERVAL_SECS),
                TimerKind::RouteMaintenance,
            );
        }
    }

    /// Run the node's main loop.
    ///
    /// Fully event-driven; runs forever. Handles radio events, readings
    /// submitted through [`Node::readings`], and timer deadlines.
    pub async fn run(&mut self) -> ! {
        use embassy_futures::select::{select3, Either3};

        let now = self.clock.now();
        self.initialize(now);

        loop {
            self.flush_results();
            let wake = self
                .timers
                .next_deadline()
                .unwrap_or_else(|| self.clock.now() + Duration::from_secs(IDLE_WAKE_SECS));

            let result = select3(
                self.radio.events().receive(),
                self.readings.receive(),
                self.clock.sleep_until(wake),
            )
            .await;

            let now = self.clock.now();
            match result {
                Either3::First(RadioEvent::Received(rx)) => {
                    self.handle_radio_rx(&rx.data, rx.from, rx.to, rx.rssi, now);
                }
                Either3::First(RadioEvent::SendDone { success }) => {
                    self.handle_send_done(success, now);
                }
                Either3::Second(value) => {
                    // Rejections are traced and the reading is discarded.
                    let _ = self.submit_reading(value, now);
                }
                Either3::Third(()) => {
                    self.handle_timer(now);
                }
            }
        }
    }

    /// Handle one frame from the radio.
    ///
    /// `from`/`to` are the link-layer source and destination. Frames
    /// link-addressed to another node, weak frames and malformed frames are
    /// discarded without side effects beyond metrics and tracing.
    pub fn handle_radio_rx(
        &mut self,
        data: &[u8],
        from: NodeAddr,
        to: NodeAddr,
        rssi: Option<i16>,
        now: Timestamp,
    ) {
        self.flush_results();
        self.pump_backlog();
        self.metrics.frames_received += 1;

        if to != self.addr() && to != BROADCAST_ADDR {
            emit_debug!(
                self,
                DebugEvent::FrameIgnored {
                    from,
                    kind: None,
                    reason: "link destination",
                }
            );
            return;
        }
        if from == self.addr() {
            return;
        }
        if !self.radio.is_acceptable_rssi(rssi) {
            emit_debug!(
                self,
                DebugEvent::WeakSignal {
                    from,
                    rssi: rssi.unwrap_or(i16::MIN),
                }
            );
            return;
        }

        let msg = match wire::decode(data) {
            Ok(msg) => msg,
            Err(_error) => {
                self.metrics.frames_malformed += 1;
                emit_debug!(
                    self,
                    DebugEvent::FrameDecodeFailed {
                        from,
                        len: data.len(),
                        error: _error,
                    }
                );
                return;
            }
        };

        if msg.kind == MessageKind::RouteProbe {
            self.handle_probe(&msg, now);
            return;
        }
        match self.role() {
            Role::Sensor => self.handle_sensor_rx(&msg, from, now),
            Role::Gateway => self.handle_gateway_rx(&msg, from, now),
            Role::Server => self.handle_server_rx(&msg, from, now),
        }
    }

    /// The radio finished the frame in flight.
    pub fn handle_send_done(&mut self, success: bool, _now: Timestamp) {
        self.flush_results();
        self.radio_busy = false;
        if !success {
            self.metrics.send_failures += 1;
        }
        self.pump_backlog();
    }

    /// Fire every timer due at or before `now`.
    pub fn handle_timer(&mut self, now: Timestamp) {
        self.flush_results();
        self.pump_backlog();
        for (handle, kind) in self.timers.take_due(now) {
            self.dispatch_timer(handle, kind, now);
        }
    }

    /// Fire one timer by handle. Cancelled or already-fired handles are a no-op.
    pub fn on_timer_fire(&mut self, handle: TimerHandle, now: Timestamp) {
        self.flush_results();
        match self.timers.fire(handle) {
            Some(kind) => self.dispatch_timer(handle, kind, now),
            None => {
                emit_debug!(
                    self,
                    DebugEvent::StaleTimer {
                        handle: handle.raw()
                    }
                );
            }
        }
    }

    fn dispatch_timer(&mut self, handle: TimerHandle, kind: TimerKind, now: Timestamp) {
        match kind {
            TimerKind::Retransmit(_) => self.on_retransmit_timer(handle, now),
            TimerKind::ProbeBroadcast => {
                self.send_probe();
                self.timers
                    .schedule(now + self.params.probe_interval, TimerKind::ProbeBroadcast);
            }
            TimerKind::RouteMaintenance => {
                self.purge_routes(now);
                self.timers.schedule(
                    now + Duration::from_secs(MAINTENANCE_INTERVAL_SECS),
                    TimerKind::RouteMaintenance,
                );
            }
        }
    }

    /// Earliest pending timer deadline.
    pub fn next_deadline(&self) -> Option<Timestamp> {
        self.timers.next_deadline()
    }

    // --- Transmission ---

    /// Send a message to `next_hop`, or park it if the radio is occupied.
    pub(crate) fn transmit(&mut self, next_hop: NodeAddr, msg: &Message) {
        let item = Outbound {
            next_hop,
            frame: wire::encode(msg),
            priority: msg.priority(),
        };
        if msg.kind == MessageKind::Ack {
            self.metrics.acks_sent += 1;
        }

        // Anything already waiting goes first, by priority.
        if self.radio_busy || !self.backlog.is_empty() {
            self.enqueue(item);
            self.pump_backlog();
            return;
        }

        match self.radio.send(item.next_hop, &item.frame) {
            SendStatus::Accepted => {
                self.radio_busy = true;
                self.metrics.frames_sent += 1;
            }
            SendStatus::Busy => {
                self.metrics.busy_deferrals += 1;
                self.enqueue(item);
            }
        }
    }

    fn enqueue(&mut self, item: Outbound) {
        let next_hop = item.next_hop;
        let priority = item.priority;
        match self.backlog.push(item) {
            BacklogPush::Queued => {
                emit_debug!(
                    self,
                    DebugEvent::FrameBacklogged {
                        next_hop,
                        priority,
                        backlog_len: self.backlog.len(),
                    }
                );
            }
            BacklogPush::Evicted(_old) => {
                self.metrics.frames_dropped += 1;
                emit_debug!(
                    self,
                    DebugEvent::FrameDropped {
                        next_hop: _old.next_hop,
                        priority: _old.priority,
                    }
                );
            }
            BacklogPush::Rejected => {
                self.metrics.frames_dropped += 1;
                emit_debug!(self, DebugEvent::FrameDropped { next_hop, priority });
            }
        }
    }

    /// Hand backlogged frames to the radio while it is free.
    fn pump_backlog(&mut self) {
        while !self.radio_busy {
            let Some(item) = self.backlog.peek() else {
                break;
            };
            match self.radio.send(item.next_hop, &item.frame) {
                SendStatus::Accepted => {
                    self.backlog.pop();
                    self.radio_busy = true;
                    self.metrics.frames_sent += 1;
                }
                SendStatus::Busy => {
                    self.metrics.busy_deferrals += 1;
                    break;
                }
            }
        }
    }

    /// Route a message toward `msg.destination`, holding or dropping it
    /// per [`NoRoutePolicy`] if no route is known.
    pub(crate) fn send_toward(&mut self, msg: Message) -> Option<NodeAddr> {
        match self.routes.select_next_hop(msg.destination) {
            Ok(next_hop) => {
                self.transmit(next_hop, &msg);
                Some(next_hop)
            }
            Err(_) => {
                let queued = self.params.no_route == NoRoutePolicy::Queue;
                emit_debug!(
                    self,
                    DebugEvent::NoRoute {
                        destination: msg.destination,
                        kind: msg.kind,
                        msg_id: msg.msg_id,
                        queued,
                    }
                );
                if queued {
                    if self.no_route.push(msg).is_some() {
                        self.metrics.frames_dropped += 1;
                    }
                } else {
                    self.metrics.frames_dropped += 1;
                }
                None
            }
        }
    }

    /// Send everything held for `destination` now that a route exists.
    pub(crate) fn flush_no_route(&mut self, destination: NodeAddr) {
        let held = self
            .no_route
            .drain_matching(|msg| msg.destination == destination);
        for msg in held {
            if self.send_toward(msg).is_some() {
                self.metrics.relayed += 1;
            }
        }
    }

    /// Record in the ledger, tracing any eviction.
    pub(crate) fn record_history(&mut self, entry: HistoryEntry) -> Recorded {
        let recorded = self.ledger.record(entry);
        if let Some(_evicted) = &recorded.evicted {
            emit_debug!(
                self,
                DebugEvent::LedgerEvicted {
                    sender: _evicted.sender,
                    msg_id: _evicted.msg_id,
                    acked: _evicted.ack_received,
                }
            );
        }
        recorded
    }

    // --- Accessors ---

    pub fn addr(&self) -> NodeAddr {
        self.settings.addr
    }

    pub fn role(&self) -> Role {
        self.settings.role
    }

    pub fn sink(&self) -> NodeAddr {
        self.settings.sink
    }

    pub fn settings(&self) -> &NodeSettings {
        &self.settings
    }

    pub fn params(&self) -> &ProtocolParams {
        &self.params
    }

    pub fn ledger(&self) -> &HistoryLedger {
        &self.ledger
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    pub fn scheduler(&self) -> &RetransmitScheduler {
        &self.scheduler
    }

    pub fn timers(&self) -> &TimerTable {
        &self.timers
    }

    pub fn metrics(&self) -> &TransportMetrics {
        &self.metrics
    }

    pub fn radio(&self) -> &Rd {
        &self.radio
    }

    pub fn radio_mut(&mut self) -> &mut Rd {
        &mut self.radio
    }

    pub fn clock(&self) -> &Clk {
        &self.clock
    }

    /// Application readings channel, consumed by [`Node::run`] on sensors.
    pub fn readings(&self) -> &ReadingChannel {
        &self.readings
    }

    /// Protocol events for the application.
    pub fn events(&self) -> &EventChannel {
        &self.events
    }

    #[cfg(any(test, feature = "debug"))]
    pub fn debug_channel(&self) -> &DebugChannel {
        &self.debug
    }

    pub fn is_radio_busy(&self) -> bool {
        self.radio_busy
    }

    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }

    /// Messages held while no route is known.
    pub fn held_without_route(&self) -> usize {
        self.no_route.len()
    }

    /// Delivery results waiting for room in the event channel.
    pub fn held_results(&self) -> usize {
        self.held_results.len()
    }

    /// Push an event to the events channel. Dropped if the application
    /// does not keep up.
    pub(crate) fn push_event(&mut self, event: Event) {
        let _ = self.events.try_send(event);
    }

    /// Push a delivery result. Never dropped: if the channel is full it
    /// waits in `held_results` and goes out, in order, on a later call.
    ///
    /// Submission counts held results against `MAX_PENDING_RETRANSMITS`,
    /// so the held queue never overflows.
    pub(crate) fn push_result(&mut self, event: Event) {
        self.flush_results();
        if !self.held_results.is_empty() {
            self.held_results.push(event);
            return;
        }
        if let Err(TrySendError::Full(event)) = self.events.try_send(event) {
            self.held_results.push(event);
        }
    }

    /// Move held delivery results into the event channel while it has room.
    ///
    /// Every handler calls this first. Hosts that drain [`Node::events`]
    /// outside the handlers can call it to pick up the rest.
    pub fn flush_results(&mut self) {
        while let Some(event) = self.held_results.front() {
            if self.events.try_send(event.clone()).is_err() {
                break;
            }
            self.held_results.pop();
        }
    }

    #[cfg(any(test, feature = "debug"))]
    pub(crate) fn push_debug(&mut self, event: DebugEvent) {
        let _ = self.debug.try_send(event);
    }
}


#[cfg(test)]
mod tests {
    use alloc::vec;
    use alloc::vec::Vec;

    use super::testing::*;
    use super::*;
    use crate::traits::test_impls::{MockClock, MockRadio, MockRandom};

    #[test]
    fn test_invalid_settings_rejected() {
        let result: Result<TestNode, _> = Node::new(
            MockRadio::new(),
            MockRandom::new(),
            MockClock::new(),
            NodeSettings::sensor(5, 5),
            ProtocolParams::default(),
        );
        assert!(matches!(result, Err(Error::InvalidConfig(_))));

        let result: Result<TestNode, _> = Node::new(
            MockRadio::new(),
            MockRandom::new(),
            MockClock::new(),
            NodeSettings::sensor(5, 8),
            ProtocolParams::default().with_max_attempts(0),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_ledger_capacity_by_role() {
        assert_eq!(sensor(5, 8).ledger().capacity(), 128);
        assert_eq!(gateway(6, 8).ledger().capacity(), 512);
        assert_eq!(server(8).ledger().capacity(), 512);
    }

    #[test]
    fn test_server_announces_on_initialize() {
        let mut node = server(8);
        node.initialize(Timestamp::ZERO);
        node.initialize(Timestamp::ZERO);

        assert_eq!(
            sent(&mut node),
            vec![(BROADCAST_ADDR, Message::probe(8, 8, 0))]
        );
        assert_eq!(
            node.next_deadline(),
            Some(Timestamp::ZERO + node.params().probe_interval)
        );
    }

    #[test]
    fn test_gateway_without_route_stays_quiet() {
        let mut node = gateway(6, 8);
        node.initialize(Timestamp::ZERO);
        assert!(sent(&mut node).is_empty());
        // Probe timer plus route maintenance
        assert_eq!(node.timers().len(), 2);
    }

    #[test]
    fn test_frames_for_other_nodes_ignored() {
        let mut node = server(8);
        let data = Message::data(1, 5, 8, 42);
        deliver(&mut node, &data, 6, 7, Timestamp::ZERO);

        assert!(node.ledger().is_empty());
        assert!(sent(&mut node).is_empty());
        assert!(debug_events(&node)
            .iter()
            .any(|e| matches!(e, DebugEvent::FrameIgnored { .. })));
    }

    #[test]
    fn test_malformed_frame_counted_and_dropped() {
        let mut node = server(8);
        node.handle_radio_rx(&[0xFF; 9], 6, 8, None, Timestamp::ZERO);
        node.handle_radio_rx(&[0x00; 4], 6, 8, None, Timestamp::ZERO);

        assert_eq!(node.metrics().frames_malformed, 2);
        assert!(node.ledger().is_empty());
        assert!(events(&node).is_empty());
    }

    #[test]
    fn test_weak_signal_filtered() {
        let mut node: TestNode = Node::new(
            MockRadio::with_min_rssi(-90),
            MockRandom::new(),
            MockClock::new(),
            NodeSettings::server(8),
            ProtocolParams::default(),
        )
        .unwrap();
        let frame = wire::encode(&Message::data(1, 5, 8, 42));
        node.handle_radio_rx(&frame, 6, 8, Some(-100), Timestamp::ZERO);
        assert!(node.ledger().is_empty());

        node.handle_radio_rx(&frame, 6, 8, Some(-60), Timestamp::ZERO);
        assert_eq!(node.ledger().len(), 1);
    }

    #[test]
    fn test_half_duplex_backlog_priority() {
        let mut node = server(8);
        let probe = Message::probe(8, 8, 0);
        let data = Message::data(1, 5, 8, 1);
        let ack = Message::ack_for(&data, 8);

        node.transmit(BROADCAST_ADDR, &probe);
        assert!(node.is_radio_busy());

        // Radio occupied: these wait, ACK ahead of DATA
        node.transmit(6, &data);
        node.transmit(6, &ack);
        assert_eq!(node.backlog_len(), 2);

        let air: Vec<_> = sent(&mut node).into_iter().map(|(_, m)| m.kind).collect();
        assert_eq!(
            air,
            vec![MessageKind::RouteProbe, MessageKind::Ack, MessageKind::Data]
        );
        assert!(!node.is_radio_busy());
        assert_eq!(node.metrics().frames_sent, 3);
    }

    #[test]
    fn test_busy_driver_parks_frame() {
        let mut node = server(8);
        node.radio_mut().set_busy(true);
        node.transmit(BROADCAST_ADDR, &Message::probe(8, 8, 0));

        assert_eq!(node.backlog_len(), 1);
        assert_eq!(node.metrics().busy_deferrals, 1);
        assert!(node.radio_mut().take_sent().is_empty());

        // Any later event retries the backlog
        node.radio_mut().set_busy(false);
        node.handle_timer(Timestamp::ZERO);
        assert_eq!(node.backlog_len(), 0);
        assert_eq!(node.radio_mut().take_sent().len(), 1);
    }

    #[test]
    fn test_stale_timer_handle_is_noop() {
        let mut node = sensor(5, 8);
        let handle = node
            .timers
            .schedule(Timestamp::from_secs(1), TimerKind::Retransmit(77));
        node.timers.cancel(handle);

        node.on_timer_fire(handle, Timestamp::from_secs(1));
        assert!(events(&node).is_empty());
        assert!(debug_events(&node)
            .iter()
            .any(|e| matches!(e, DebugEvent::StaleTimer { .. })));
    }

    #[test]
    fn test_maintenance_reschedules() {
        let mut node = sensor(5, 8);
        node.initialize(Timestamp::ZERO);
        let first = node.next_deadline().unwrap();
        assert_eq!(first, Timestamp::from_secs(MAINTENANCE_INTERVAL_SECS));

        node.handle_timer(first);
        assert_eq!(
            node.next_deadline(),
            Some(first + Duration::from_secs(MAINTENANCE_INTERVAL_SECS))
        );
    }
}
