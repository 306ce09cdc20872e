//! Metrics collection for simulation analysis.

use hashbrown::HashMap;
use sensenet::{DeliveryOutcome, Event, MsgId, NodeAddr, Timestamp};

/// A reading a sensor accepted for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedReading {
    pub time: Timestamp,
    pub sensor: NodeAddr,
    pub msg_id: MsgId,
    pub value: u16,
}

/// Final outcome reported by a sensor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadingOutcome {
    pub time: Timestamp,
    pub sensor: NodeAddr,
    pub msg_id: MsgId,
    pub outcome: DeliveryOutcome,
}

/// A reading handed to the application at a server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerDelivery {
    pub time: Timestamp,
    pub server: NodeAddr,
    pub sender: NodeAddr,
    pub msg_id: MsgId,
    pub value: u16,
}

/// Simulation metrics collected over time.
#[derive(Debug, Clone, Default)]
pub struct SimMetrics {
    /// Frames put on the air.
    pub frames_sent: u64,
    /// Frame copies lost to link loss.
    pub frames_dropped: u64,
    /// Extra copies created by link duplication.
    pub frames_duplicated: u64,
    /// Frame copies that reached a node's antenna.
    pub frames_delivered: u64,
    /// Readings the sensor refused (`submit_reading` returned an error).
    pub readings_rejected: u64,
    pub route_changes: u64,
    pub submitted: Vec<SubmittedReading>,
    pub outcomes: Vec<ReadingOutcome>,
    pub deliveries: Vec<ServerDelivery>,
}

impl SimMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one protocol event raised by `node`.
    pub fn record_event(&mut self, node: NodeAddr, time: Timestamp, event: Event) {
        match event {
            Event::ReadingAccepted { msg_id, value } => self.submitted.push(SubmittedReading {
                time,
                sensor: node,
                msg_id,
                value,
            }),
            Event::DeliveryResult { msg_id, outcome } => self.outcomes.push(ReadingOutcome {
                time,
                sensor: node,
                msg_id,
                outcome,
            }),
            Event::DataReceived {
                sender,
                value,
                msg_id,
            } => self.deliveries.push(ServerDelivery {
                time,
                server: node,
                sender,
                msg_id,
                value,
            }),
            Event::RouteChanged { .. } => self.route_changes += 1,
        }
    }

    /// Outcomes reported by `sensor`, in the order they were reported.
    pub fn outcomes_for(&self, sensor: NodeAddr) -> Vec<(MsgId, DeliveryOutcome)> {
        self.outcomes
            .iter()
            .filter(|o| o.sensor == sensor)
            .map(|o| (o.msg_id, o.outcome))
            .collect()
    }

    /// Readings from `sender` handed to a server application, as (msg_id, value).
    pub fn server_deliveries(&self, sender: NodeAddr) -> Vec<(MsgId, u16)> {
        self.deliveries
            .iter()
            .filter(|d| d.sender == sender)
            .map(|d| (d.msg_id, d.value))
            .collect()
    }

    /// Times the server application saw `(sender, msg_id)`.
    pub fn delivery_count(&self, sender: NodeAddr, msg_id: MsgId) -> usize {
        self.deliveries
            .iter()
            .filter(|d| d.sender == sender && d.msg_id == msg_id)
            .count()
    }

    /// Every accepted reading reached a server exactly once, carrying the
    /// submitted value, and nothing else was delivered.
    pub fn delivered_once(&self) -> bool {
        let mut seen: HashMap<(NodeAddr, MsgId), u16> = HashMap::new();
        for d in &self.deliveries {
            if seen.insert((d.sender, d.msg_id), d.value).is_some() {
                return false;
            }
        }
        self.submitted.len() == self.deliveries.len()
            && self
                .submitted
                .iter()
                .all(|r| seen.get(&(r.sensor, r.msg_id)) == Some(&r.value))
    }

    /// Every accepted reading got exactly one outcome.
    pub fn all_resolved(&self) -> bool {
        let mut counts: HashMap<(NodeAddr, MsgId), usize> = HashMap::new();
        for o in &self.outcomes {
            *counts.entry((o.sensor, o.msg_id)).or_insert(0) += 1;
        }
        counts.len() == self.submitted.len()
            && self
                .submitted
                .iter()
                .all(|r| counts.get(&(r.sensor, r.msg_id)) == Some(&1))
    }

    pub fn success_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.outcome.is_success())
            .count()
    }

    pub fn failure_count(&self) -> usize {
        self.outcomes.len() - self.success_count()
    }
}

/// Result of running a simulation.
#[derive(Debug, Clone)]
pub struct SimulationResult {
    /// Final simulation time.
    pub end_time: Timestamp,
    /// Collected metrics.
    pub metrics: SimMetrics,
    /// Whether simulation ended due to event queue exhaustion (vs time limit).
    pub queue_exhausted: bool,
}

impl SimulationResult {
    pub fn delivered_once(&self) -> bool {
        self.metrics.delivered_once()
    }

    pub fn all_resolved(&self) -> bool {
        self.metrics.all_resolved()
    }

    pub fn outcomes_for(&self, sensor: NodeAddr) -> Vec<(MsgId, DeliveryOutcome)> {
        self.metrics.outcomes_for(sensor)
    }

    pub fn server_deliveries(&self, sender: NodeAddr) -> Vec<(MsgId, u16)> {
        self.metrics.server_deliveries(sender)
    }
}
