//! Scenario builder for setting up and running simulations.

use sensenet::{
    Duration, Error, NodeAddr, NodeSettings, ProtocolParams, Timestamp, GATEWAY_NODES,
    SENSOR_NODES, SERVER_NODE,
};

use crate::event::ScenarioAction;
use crate::metrics::SimulationResult;
use crate::sim::{Simulator, DEFAULT_AIRTIME};
use crate::topology::{Link, Topology};

/// Type of topology to generate.
#[derive(Debug, Clone)]
enum TopologyType {
    /// Every node hears every other node.
    FullyConnected,
    /// Chain in the order nodes were added.
    Chain,
    /// Star with the first added node as hub.
    Star,
    /// Only the links given with [`ScenarioBuilder::link`].
    Links,
    /// Custom topology provided by user.
    Custom(Topology),
}

/// Builder for simulation scenarios.
pub struct ScenarioBuilder {
    /// RNG seed for determinism.
    seed: u64,
    /// Nodes in the order they boot.
    nodes: Vec<NodeSettings>,
    /// Protocol parameters shared by every node.
    params: ProtocolParams,
    topology_type: Option<TopologyType>,
    links: Vec<(NodeAddr, NodeAddr)>,
    loss_rate: f64,
    duplicate_rate: f64,
    delay: Option<Duration>,
    airtime: Duration,
    readings: Vec<(Timestamp, NodeAddr, u16)>,
    actions: Vec<(Timestamp, ScenarioAction)>,
}

impl Default for ScenarioBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ScenarioBuilder {
    pub fn new() -> Self {
        Self {
            seed: 42,
            nodes: Vec::new(),
            params: ProtocolParams::default(),
            topology_type: None,
            links: Vec::new(),
            loss_rate: 0.0,
            duplicate_rate: 0.0,
            delay: None,
            airtime: DEFAULT_AIRTIME,
            readings: Vec::new(),
            actions: Vec::new(),
        }
    }

    /// Set the RNG seed for deterministic simulation.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn sensor(mut self, addr: NodeAddr, sink: NodeAddr) -> Self {
        self.nodes.push(NodeSettings::sensor(addr, sink));
        self
    }

    pub fn gateway(mut self, addr: NodeAddr, sink: NodeAddr) -> Self {
        self.nodes.push(NodeSettings::gateway(addr, sink));
        self
    }

    pub fn server(mut self, addr: NodeAddr) -> Self {
        self.nodes.push(NodeSettings::server(addr));
        self
    }

    /// Protocol parameters for every node.
    pub fn with_params(mut self, params: ProtocolParams) -> Self {
        self.params = params;
        self
    }

    pub fn fully_connected(mut self) -> Self {
        self.topology_type = Some(TopologyType::FullyConnected);
        self
    }

    pub fn chain_topology(mut self) -> Self {
        self.topology_type = Some(TopologyType::Chain);
        self
    }

    pub fn star_topology(mut self) -> Self {
        self.topology_type = Some(TopologyType::Star);
        self
    }

    /// Set a custom network topology.
    pub fn topology(mut self, topo: Topology) -> Self {
        self.topology_type = Some(TopologyType::Custom(topo));
        self
    }

    /// Add a link between two nodes. Selects the explicit-links topology.
    pub fn link(mut self, a: NodeAddr, b: NodeAddr) -> Self {
        self.topology_type = Some(TopologyType::Links);
        self.links.push((a, b));
        self
    }

    /// Set global frame loss rate.
    pub fn with_loss_rate(mut self, rate: f64) -> Self {
        self.loss_rate = rate.clamp(0.0, 1.0);
        self
    }

    /// Set global frame duplication rate.
    pub fn with_duplicate_rate(mut self, rate: f64) -> Self {
        self.duplicate_rate = rate.clamp(0.0, 1.0);
        self
    }

    /// Set link delay.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_airtime(mut self, airtime: Duration) -> Self {
        self.airtime = airtime;
        self
    }

    /// Submit `value` on sensor `node` at `time`.
    pub fn reading_at(mut self, time: Timestamp, node: NodeAddr, value: u16) -> Self {
        self.readings.push((time, node, value));
        self
    }

    /// Submit `count` readings on `node`, `interval` apart, with values
    /// counting up from `first_value`.
    pub fn readings_every(
        mut self,
        node: NodeAddr,
        start: Timestamp,
        interval: Duration,
        count: u16,
        first_value: u16,
    ) -> Self {
        let mut time = start;
        for i in 0..count {
            self.readings.push((time, node, first_value.wrapping_add(i)));
            time += interval;
        }
        self
    }

    /// Schedule a network partition at the specified time.
    pub fn partition_at(mut self, time: Timestamp, groups: Vec<Vec<NodeAddr>>) -> Self {
        self.actions.push((time, ScenarioAction::Partition { groups }));
        self
    }

    /// Schedule partition healing at the specified time.
    pub fn heal_at(mut self, time: Timestamp) -> Self {
        self.actions.push((time, ScenarioAction::HealPartition));
        self
    }

    pub fn disable_link_at(mut self, time: Timestamp, a: NodeAddr, b: NodeAddr) -> Self {
        self.actions.push((time, ScenarioAction::DisableLink { a, b }));
        self
    }

    pub fn enable_link_at(mut self, time: Timestamp, a: NodeAddr, b: NodeAddr) -> Self {
        self.actions.push((time, ScenarioAction::EnableLink { a, b }));
        self
    }

    /// Build the simulator with all nodes booted at time zero.
    ///
    /// Fails if no topology was chosen or a node's settings are invalid.
    pub fn build(self) -> Result<(Simulator, Vec<NodeAddr>), Error> {
        let addrs: Vec<NodeAddr> = self.nodes.iter().map(|s| s.addr).collect();

        let mut topo = match self.topology_type {
            Some(TopologyType::FullyConnected) => Topology::fully_connected(&addrs),
            Some(TopologyType::Chain) => Topology::chain(&addrs),
            Some(TopologyType::Star) => Topology::star(&addrs),
            Some(TopologyType::Links) => {
                let mut topo = Topology::new();
                for &(a, b) in &self.links {
                    topo.add_link(a, b, Link::default());
                }
                topo
            }
            Some(TopologyType::Custom(t)) => t,
            None => return Err(Error::InvalidConfig("no topology selected")),
        };

        if self.loss_rate > 0.0 {
            topo.set_global_loss_rate(self.loss_rate);
        }
        if self.duplicate_rate > 0.0 {
            topo.set_global_duplicate_rate(self.duplicate_rate);
        }
        if let Some(delay) = self.delay {
            topo.set_global_delay(delay);
        }

        // Topology first, so boot probes see the links
        let mut sim = Simulator::new(self.seed)
            .with_topology(topo)
            .with_airtime(self.airtime);
        for settings in self.nodes {
            sim.add_node(settings, self.params)?;
        }

        for (time, node, value) in self.readings {
            sim.schedule_reading(time, node, value);
        }
        for (time, action) in self.actions {
            sim.schedule_action(time, action);
        }

        Ok((sim, addrs))
    }

    /// Build and run the simulation for the specified duration.
    pub fn run_for(self, duration: Duration) -> Result<SimulationResult, Error> {
        let (mut sim, _) = self.build()?;
        Ok(sim.run_for(duration))
    }

    /// Build and run until the specified time.
    pub fn run_until(self, time: Timestamp) -> Result<SimulationResult, Error> {
        let (mut sim, _) = self.build()?;
        Ok(sim.run_until(time))
    }
}

/// Sensor addresses of the reference deployment.
pub const DEPLOYMENT_SENSORS: [NodeAddr; SENSOR_NODES] = [1, 2, 3, 4, 5];
/// Gateway addresses of the reference deployment.
pub const DEPLOYMENT_GATEWAYS: [NodeAddr; GATEWAY_NODES] = [6, 7];

/// The reference deployment: sensors 1-5, gateways 6-7, server 8.
///
/// Every sensor hears both gateways, the gateways hear each other and the
/// server, and no sensor hears the server directly. Each sensor submits five
/// readings two seconds apart, starting one second in.
pub fn sensenet_scenario() -> ScenarioBuilder {
    let mut builder = ScenarioBuilder::new().server(SERVER_NODE);
    for gw in DEPLOYMENT_GATEWAYS {
        builder = builder.gateway(gw, SERVER_NODE).link(gw, SERVER_NODE);
    }
    builder = builder.link(DEPLOYMENT_GATEWAYS[0], DEPLOYMENT_GATEWAYS[1]);

    for sensor in DEPLOYMENT_SENSORS {
        builder = builder.sensor(sensor, SERVER_NODE);
        for gw in DEPLOYMENT_GATEWAYS {
            builder = builder.link(sensor, gw);
        }
        let start = Timestamp::from_millis(1000 + u64::from(sensor) * 100);
        builder = builder.readings_every(
            sensor,
            start,
            Duration::from_secs(2),
            5,
            sensor * 100,
        );
    }
    builder
}

/// Sensor, gateway and server in a line: 5 -> 2 -> 8.
pub fn line_scenario() -> ScenarioBuilder {
    ScenarioBuilder::new()
        .server(8)
        .gateway(2, 8)
        .sensor(5, 8)
        .link(5, 2)
        .link(2, 8)
}
