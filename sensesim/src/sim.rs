//! Discrete event simulator for sensenet networks.

use std::collections::BinaryHeap;

use hashbrown::HashMap;
use sensenet::{Duration, Error, Frame, NodeAddr, NodeSettings, ProtocolParams, Timestamp};

use crate::event::{Event, ScenarioAction, ScheduledEvent, SequenceNumber};
use crate::metrics::{SimMetrics, SimulationResult};
use crate::node::SimNode;
use crate::topology::Topology;

/// Default time a 9-byte frame occupies the air.
pub const DEFAULT_AIRTIME: Duration = Duration::from_millis(5);

/// Discrete event simulator for sensenet networks.
pub struct Simulator {
    /// All nodes in the simulation.
    nodes: HashMap<NodeAddr, SimNode>,
    /// Network topology.
    topology: Topology,
    /// Current simulation time.
    current_time: Timestamp,
    /// Priority queue of scheduled events.
    event_queue: BinaryHeap<ScheduledEvent>,
    /// Collected metrics.
    metrics: SimMetrics,
    /// Next sequence number for event ordering.
    next_seq: u64,
    /// Seed for per-node randomness.
    seed: u64,
    /// RNG state for link loss and duplication.
    rng_state: u64,
    /// Time between handing a frame to the radio and `SendDone`.
    airtime: Duration,
    /// Latest wake-up scheduled per node, so repeated deadlines are not
    /// queued twice.
    wake_at: HashMap<NodeAddr, Timestamp>,
}

impl Simulator {
    /// Create a new simulator with given RNG seed.
    pub fn new(seed: u64) -> Self {
        Self {
            nodes: HashMap::new(),
            topology: Topology::new(),
            current_time: Timestamp::ZERO,
            event_queue: BinaryHeap::new(),
            metrics: SimMetrics::new(),
            next_seq: 0,
            seed,
            rng_state: seed,
            airtime: DEFAULT_AIRTIME,
            wake_at: HashMap::new(),
        }
    }

    /// Set the network topology.
    pub fn with_topology(mut self, topology: Topology) -> Self {
        self.topology = topology;
        self
    }

    pub fn with_airtime(mut self, airtime: Duration) -> Self {
        self.airtime = airtime;
        self
    }

    /// Add a node and boot it at the current time.
    pub fn add_node(
        &mut self,
        settings: NodeSettings,
        params: ProtocolParams,
    ) -> Result<NodeAddr, Error> {
        let addr = settings.addr;
        if self.nodes.contains_key(&addr) {
            return Err(Error::InvalidConfig("duplicate node address"));
        }
        let node_seed = self.seed.wrapping_add(u64::from(addr) * 1000);
        let mut node = SimNode::new(settings, params, node_seed, self.current_time)?;
        node.initialize(self.current_time);
        self.nodes.insert(addr, node);

        // Route the initial probe, schedule the first wake-up
        self.after_handler(addr);
        Ok(addr)
    }

    pub fn node(&self, addr: NodeAddr) -> Option<&SimNode> {
        self.nodes.get(&addr)
    }

    pub fn node_mut(&mut self, addr: NodeAddr) -> Option<&mut SimNode> {
        self.nodes.get_mut(&addr)
    }

    /// All node addresses, ascending.
    pub fn node_addrs(&self) -> Vec<NodeAddr> {
        let mut addrs: Vec<NodeAddr> = self.nodes.keys().copied().collect();
        addrs.sort_unstable();
        addrs
    }

    pub fn current_time(&self) -> Timestamp {
        self.current_time
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn topology_mut(&mut self) -> &mut Topology {
        &mut self.topology
    }

    pub fn metrics(&self) -> &SimMetrics {
        &self.metrics
    }

    /// Schedule an event.
    pub fn schedule(&mut self, time: Timestamp, event: Event) {
        let seq = SequenceNumber::new(self.next_seq);
        self.next_seq += 1;
        self.event_queue.push(ScheduledEvent::new(time, seq, event));
    }

    pub fn schedule_action(&mut self, time: Timestamp, action: ScenarioAction) {
        self.schedule(time, Event::ScenarioAction(action));
    }

    /// Have the application on `node` submit `value` at `time`.
    pub fn schedule_reading(&mut self, time: Timestamp, node: NodeAddr, value: u16) {
        self.schedule(time, Event::SubmitReading { node, value });
    }

    /// Run simulation until specified time.
    pub fn run_until(&mut self, end_time: Timestamp) -> SimulationResult {
        while self
            .event_queue
            .peek()
            .is_some_and(|event| event.time <= end_time)
        {
            let Some(event) = self.event_queue.pop() else {
                break;
            };
            self.advance_time(event.time);
            self.process_event(event.event);
        }

        self.advance_time(end_time);
        self.result()
    }

    /// Run simulation for specified duration.
    pub fn run_for(&mut self, duration: Duration) -> SimulationResult {
        self.run_until(self.current_time + duration)
    }

    /// Process at most `max_events` events.
    pub fn run_events(&mut self, max_events: usize) -> SimulationResult {
        for _ in 0..max_events {
            let Some(event) = self.event_queue.pop() else {
                break;
            };
            self.advance_time(event.time);
            self.process_event(event.event);
        }
        self.result()
    }

    fn result(&self) -> SimulationResult {
        SimulationResult {
            end_time: self.current_time,
            metrics: self.metrics.clone(),
            queue_exhausted: self.event_queue.is_empty(),
        }
    }

    fn advance_time(&mut self, time: Timestamp) {
        if time > self.current_time {
            self.current_time = time;
        }
    }

    fn process_event(&mut self, event: Event) {
        let now = self.current_time;
        let node_addr = match event {
            Event::FrameDelivery {
                to,
                from,
                link_dest,
                data,
                rssi,
            } => {
                let Some(node) = self.nodes.get_mut(&to) else {
                    return;
                };
                node.handle_radio_rx(&data, from, link_dest, rssi, now);
                self.metrics.frames_delivered += 1;
                to
            }
            Event::SendDone { node, success } => {
                let Some(sim_node) = self.nodes.get_mut(&node) else {
                    return;
                };
                sim_node.handle_send_done(success, now);
                node
            }
            Event::TimerFire { node } => {
                if self.wake_at.get(&node) == Some(&now) {
                    self.wake_at.remove(&node);
                }
                let Some(sim_node) = self.nodes.get_mut(&node) else {
                    return;
                };
                sim_node.handle_timer(now);
                node
            }
            Event::SubmitReading { node, value } => {
                let Some(sim_node) = self.nodes.get_mut(&node) else {
                    return;
                };
                if sim_node.submit_reading(value, now).is_err() {
                    self.metrics.readings_rejected += 1;
                }
                node
            }
            Event::ScenarioAction(action) => {
                self.execute_action(action);
                return;
            }
        };
        self.after_handler(node_addr);
    }

    /// Put the node's outgoing frames on the air, collect its protocol
    /// events, and make sure it wakes for its next timer.
    fn after_handler(&mut self, addr: NodeAddr) {
        let now = self.current_time;
        let Some(node) = self.nodes.get_mut(&addr) else {
            return;
        };
        let outgoing = node.take_outgoing();
        let events = node.take_events();
        let deadline = node.next_deadline();

        for event in events {
            self.metrics.record_event(addr, now, event);
        }
        for (link_dest, frame) in outgoing {
            self.transmit(addr, link_dest, &frame);
            self.schedule(
                now + self.airtime,
                Event::SendDone {
                    node: addr,
                    success: true,
                },
            );
        }

        if let Some(deadline) = deadline {
            let wake = deadline.max(now);
            if self.wake_at.get(&addr) != Some(&wake) {
                self.wake_at.insert(addr, wake);
                self.schedule(wake, Event::TimerFire { node: addr });
            }
        }
    }

    /// Broadcast medium: every active neighbor hears the frame, subject to
    /// per-link loss and duplication.
    fn transmit(&mut self, sender: NodeAddr, link_dest: NodeAddr, frame: &Frame) {
        self.metrics.frames_sent += 1;
        let now = self.current_time;

        let mut deliveries = Vec::new();
        for neighbor in self.topology.neighbors(sender) {
            let Some(link) = self.topology.get_link(sender, neighbor) else {
                continue;
            };
            let (loss_rate, duplicate_rate, delay, rssi) =
                (link.loss_rate, link.duplicate_rate, link.delay, link.rssi);

            if loss_rate > 0.0 && self.random_f64() < loss_rate {
                self.metrics.frames_dropped += 1;
                continue;
            }
            deliveries.push((neighbor, delay, rssi));
            if duplicate_rate > 0.0 && self.random_f64() < duplicate_rate {
                self.metrics.frames_duplicated += 1;
                deliveries.push((neighbor, delay + self.airtime, rssi));
            }
        }

        for (neighbor, delay, rssi) in deliveries {
            self.schedule(
                now + delay,
                Event::FrameDelivery {
                    to: neighbor,
                    from: sender,
                    link_dest,
                    data: frame.to_vec(),
                    rssi: Some(rssi),
                },
            );
        }
    }

    fn execute_action(&mut self, action: ScenarioAction) {
        match action {
            ScenarioAction::Partition { groups } => {
                self.topology.partition(&groups);
            }
            ScenarioAction::HealPartition => {
                self.topology.heal();
            }
            ScenarioAction::DisableLink { a, b } => {
                if let Some(link) = self.topology.get_link_mut(a, b) {
                    link.active = false;
                }
            }
            ScenarioAction::EnableLink { a, b } => {
                if let Some(link) = self.topology.get_link_mut(a, b) {
                    link.active = true;
                }
            }
            ScenarioAction::SetLossRate { a, b, rate } => {
                if let Some(link) = self.topology.get_link_mut(a, b) {
                    link.loss_rate = rate.clamp(0.0, 1.0);
                }
            }
        }
    }

    /// Random f64 in [0, 1).
    fn random_f64(&mut self) -> f64 {
        self.rng_state = self
            .rng_state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        (self.rng_state >> 11) as f64 / (1u64 << 53) as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::Link;

    fn line() -> Simulator {
        let mut sim = Simulator::new(42).with_topology(Topology::chain(&[5, 2, 8]));
        sim.add_node(NodeSettings::server(8), ProtocolParams::default())
            .unwrap();
        sim.add_node(NodeSettings::gateway(2, 8), ProtocolParams::default())
            .unwrap();
        sim.add_node(NodeSettings::sensor(5, 8), ProtocolParams::default())
            .unwrap();
        sim
    }

    #[test]
    fn test_simulator_creation() {
        let sim = Simulator::new(42);
        assert_eq!(sim.current_time(), Timestamp::ZERO);
        assert!(sim.node_addrs().is_empty());
    }

    #[test]
    fn test_duplicate_address_rejected() {
        let mut sim = Simulator::new(42);
        sim.add_node(NodeSettings::server(8), ProtocolParams::default())
            .unwrap();
        assert!(sim
            .add_node(NodeSettings::server(8), ProtocolParams::default())
            .is_err());
        assert!(sim
            .add_node(NodeSettings::sensor(3, 3), ProtocolParams::default())
            .is_err());
        assert_eq!(sim.node_addrs(), vec![8]);
    }

    #[test]
    fn test_routes_converge_on_line() {
        let mut sim = line();
        sim.run_for(Duration::from_secs(1));

        let gateway = sim.node(2).unwrap().inner();
        assert_eq!(gateway.routes().hop_count(8), Some(1));
        let sensor = sim.node(5).unwrap().inner();
        assert_eq!(sensor.routes().hop_count(8), Some(2));
        assert_eq!(sensor.routes().route(8).map(|r| r.next_hop), Some(2));
    }

    #[test]
    fn test_reading_delivered_over_line() {
        let mut sim = line();
        sim.schedule_reading(Timestamp::from_secs(1), 5, 42);
        let result = sim.run_for(Duration::from_secs(5));

        assert_eq!(result.server_deliveries(5), vec![(1, 42)]);
        assert_eq!(
            result.outcomes_for(5),
            vec![(1, sensenet::DeliveryOutcome::Delivered { attempts: 1 })]
        );
        assert!(result.delivered_once());
        assert!(result.all_resolved());
    }

    #[test]
    fn test_lossy_link_drops_frames() {
        let mut topo = Topology::new();
        topo.add_link(8, 2, Link::new().with_loss_rate(1.0));
        let mut sim = Simulator::new(1).with_topology(topo);
        sim.add_node(NodeSettings::server(8), ProtocolParams::default())
            .unwrap();
        sim.add_node(NodeSettings::gateway(2, 8), ProtocolParams::default())
            .unwrap();
        let result = sim.run_for(Duration::from_secs(1));

        assert!(result.metrics.frames_dropped >= 1);
        assert_eq!(result.metrics.frames_delivered, 0);
        assert!(sim.node(2).unwrap().inner().routes().is_empty());
    }

    #[test]
    fn test_duplicating_link_delivers_twice() {
        let mut topo = Topology::new();
        topo.add_link(8, 2, Link::new().with_duplicate_rate(1.0));
        let mut sim = Simulator::new(1).with_topology(topo);
        sim.add_node(NodeSettings::gateway(2, 8), ProtocolParams::default())
            .unwrap();
        sim.add_node(NodeSettings::server(8), ProtocolParams::default())
            .unwrap();
        let result = sim.run_for(Duration::from_millis(10));

        // Server boot probe and the gateway's triggered probe, each heard twice
        assert_eq!(result.metrics.frames_sent, 2);
        assert_eq!(result.metrics.frames_duplicated, 2);
        assert_eq!(result.metrics.frames_delivered, 4);
        assert_eq!(sim.node(2).unwrap().inner().routes().hop_count(8), Some(1));
    }

    #[test]
    fn test_send_done_frees_radio() {
        let mut sim = line();
        sim.run_for(Duration::from_secs(1));
        for addr in sim.node_addrs() {
            let node = sim.node(addr).unwrap().inner();
            assert!(!node.is_radio_busy());
            assert_eq!(node.backlog_len(), 0);
        }
    }

    #[test]
    fn test_scheduled_link_failure() {
        let mut sim = line();
        sim.schedule_action(
            Timestamp::from_millis(500),
            ScenarioAction::DisableLink { a: 2, b: 8 },
        );
        sim.run_for(Duration::from_secs(1));
        assert!(!sim.topology().is_connected(2, 8));
        assert!(sim.topology().is_connected(5, 2));
    }
}
