//! Network topology and link properties.

use hashbrown::HashMap;
use sensenet::{Duration, NodeAddr};

/// Properties of a radio link between two nodes.
#[derive(Debug, Clone, PartialEq)]
pub struct Link {
    /// Signal strength in dBm.
    pub rssi: i16,
    /// Frame loss rate (0.0 to 1.0).
    pub loss_rate: f64,
    /// Probability that a delivered frame arrives twice (0.0 to 1.0).
    pub duplicate_rate: f64,
    /// Propagation delay.
    pub delay: Duration,
    /// Whether the link is currently active.
    pub active: bool,
}

impl Default for Link {
    fn default() -> Self {
        Self {
            rssi: -70,
            loss_rate: 0.0,
            duplicate_rate: 0.0,
            delay: Duration::from_millis(1),
            active: true,
        }
    }
}

impl Link {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rssi(mut self, rssi: i16) -> Self {
        self.rssi = rssi;
        self
    }

    pub fn with_loss_rate(mut self, rate: f64) -> Self {
        self.loss_rate = rate.clamp(0.0, 1.0);
        self
    }

    pub fn with_duplicate_rate(mut self, rate: f64) -> Self {
        self.duplicate_rate = rate.clamp(0.0, 1.0);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }
}

/// Who hears whom. Links are bidirectional.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    links: HashMap<(NodeAddr, NodeAddr), Link>,
}

impl Topology {
    /// Create an empty topology.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every node hears every other node.
    pub fn fully_connected(nodes: &[NodeAddr]) -> Self {
        let mut topo = Self::new();
        for (i, &a) in nodes.iter().enumerate() {
            for &b in nodes.iter().skip(i + 1) {
                topo.add_link(a, b, Link::default());
            }
        }
        topo
    }

    /// Each node hears only its neighbors in the list.
    pub fn chain(nodes: &[NodeAddr]) -> Self {
        let mut topo = Self::new();
        for window in nodes.windows(2) {
            topo.add_link(window[0], window[1], Link::default());
        }
        topo
    }

    /// First node is the hub, connected to all others.
    pub fn star(nodes: &[NodeAddr]) -> Self {
        let mut topo = Self::new();
        let Some((&hub, spokes)) = nodes.split_first() else {
            return topo;
        };
        for &spoke in spokes {
            topo.add_link(hub, spoke, Link::default());
        }
        topo
    }

    /// Add (or replace) a bidirectional link.
    pub fn add_link(&mut self, a: NodeAddr, b: NodeAddr, link: Link) {
        self.links.insert(Self::canonical_pair(a, b), link);
    }

    pub fn get_link(&self, a: NodeAddr, b: NodeAddr) -> Option<&Link> {
        self.links.get(&Self::canonical_pair(a, b))
    }

    pub fn get_link_mut(&mut self, a: NodeAddr, b: NodeAddr) -> Option<&mut Link> {
        self.links.get_mut(&Self::canonical_pair(a, b))
    }

    /// Link exists and is active.
    pub fn is_connected(&self, a: NodeAddr, b: NodeAddr) -> bool {
        self.get_link(a, b).is_some_and(|link| link.active)
    }

    /// Nodes reachable from `node` over active links, in address order.
    pub fn neighbors(&self, node: NodeAddr) -> Vec<NodeAddr> {
        let mut result: Vec<NodeAddr> = self
            .links
            .iter()
            .filter(|(_, link)| link.active)
            .filter_map(|(&(a, b), _)| {
                if a == node {
                    Some(b)
                } else if b == node {
                    Some(a)
                } else {
                    None
                }
            })
            .collect();
        result.sort_unstable();
        result
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    /// Disable all links crossing between partition groups.
    pub fn partition(&mut self, groups: &[Vec<NodeAddr>]) {
        for (&(a, b), link) in self.links.iter_mut() {
            let a_group = groups.iter().position(|g| g.contains(&a));
            let b_group = groups.iter().position(|g| g.contains(&b));
            if a_group != b_group {
                link.active = false;
            }
        }
    }

    /// Re-enable all links.
    pub fn heal(&mut self) {
        for link in self.links.values_mut() {
            link.active = true;
        }
    }

    pub fn set_global_loss_rate(&mut self, rate: f64) {
        let rate = rate.clamp(0.0, 1.0);
        for link in self.links.values_mut() {
            link.loss_rate = rate;
        }
    }

    pub fn set_global_duplicate_rate(&mut self, rate: f64) {
        let rate = rate.clamp(0.0, 1.0);
        for link in self.links.values_mut() {
            link.duplicate_rate = rate;
        }
    }

    pub fn set_global_delay(&mut self, delay: Duration) {
        for link in self.links.values_mut() {
            link.delay = delay;
        }
    }

    fn canonical_pair(a: NodeAddr, b: NodeAddr) -> (NodeAddr, NodeAddr) {
        if a < b {
            (a, b)
        } else {
            (b, a)
        }
    }
}
