//! Hop-count route selection.
//!
//! Routes are learned from ROUTE_PROBE broadcasts. A probe from `P`
//! announcing hop count `h` for sink `D` is the candidate route `D via P`
//! with `h + 1` hops. The stored route is replaced only when the candidate is
//! strictly shorter, the stored route is stale, or the candidate comes from
//! the stored next hop (refresh). Equal-length candidates from other
//! neighbors are ignored so the route does not flap between them.
//!
//! Stale routes stay usable until they are purged at
//! `route_stale_timeout * ROUTE_EXPIRY_FACTOR`; staleness only lowers the
//! bar for replacement.

use hashbrown::HashMap;

use crate::config::NodeConfig;
use crate::node::Node;
use crate::time::{Duration, Timestamp};
use crate::traits::{Clock, Radio, Random};
use crate::types::{
    Error, Event, Message, MessageKind, NodeAddr, Role, BROADCAST_ADDR, ROUTE_EXPIRY_FACTOR,
};

/// Probes announcing more hops than this are ignored. Bounds count-to-infinity
/// when two relays end up routing through each other.
pub const MAX_HOP_COUNT: u16 = 16;

/// One known route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteEntry {
    pub destination: NodeAddr,
    pub next_hop: NodeAddr,
    pub hop_count: u16,
    pub confirmed_at: Timestamp,
    /// Statically installed; never stale, never replaced by probes.
    pub pinned: bool,
}

/// Effect of one probe on the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteUpdate {
    /// First route to the destination.
    Installed,
    /// Strictly shorter route via another neighbor.
    Improved,
    /// Stale route replaced by a route via another neighbor.
    Replaced,
    /// Same next hop, new hop count.
    Changed,
    /// Same next hop and hop count; only `confirmed_at` moved.
    Refreshed,
    Ignored,
}

impl RouteUpdate {
    /// True if next hop or hop count changed.
    pub fn changes_route(&self) -> bool {
        matches!(
            self,
            RouteUpdate::Installed
                | RouteUpdate::Improved
                | RouteUpdate::Replaced
                | RouteUpdate::Changed
        )
    }
}

/// Bounded destination -> next hop table.
#[derive(Debug)]
pub struct RouteTable {
    own_addr: NodeAddr,
    routes: HashMap<NodeAddr, RouteEntry>,
    max_routes: usize,
    stale_after: Duration,
}

impl RouteTable {
    pub fn new(own_addr: NodeAddr, max_routes: usize, stale_after: Duration) -> Self {
        Self {
            own_addr,
            routes: HashMap::new(),
            max_routes: max_routes.max(1),
            stale_after,
        }
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn route(&self, destination: NodeAddr) -> Option<&RouteEntry> {
        self.routes.get(&destination)
    }

    pub fn hop_count(&self, destination: NodeAddr) -> Option<u16> {
        self.routes.get(&destination).map(|r| r.hop_count)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RouteEntry> + '_ {
        self.routes.values()
    }

    pub fn select_next_hop(&self, destination: NodeAddr) -> Result<NodeAddr, Error> {
        self.routes
            .get(&destination)
            .map(|r| r.next_hop)
            .ok_or(Error::NoRouteKnown)
    }

    pub fn is_stale(&self, entry: &RouteEntry, now: Timestamp) -> bool {
        !entry.pinned && now.saturating_sub(entry.confirmed_at) > self.stale_after
    }

    /// Apply one ROUTE_PROBE.
    pub fn observe_probe(&mut self, probe: &Message, now: Timestamp) -> RouteUpdate {
        if probe.kind != MessageKind::RouteProbe {
            return RouteUpdate::Ignored;
        }
        let destination = probe.destination;
        let via = probe.sender;
        if destination == self.own_addr
            || via == self.own_addr
            || destination == BROADCAST_ADDR
            || via == BROADCAST_ADDR
            || probe.value >= MAX_HOP_COUNT
        {
            return RouteUpdate::Ignored;
        }
        let hop_count = probe.value + 1;

        let update = match self.routes.get(&destination) {
            None => RouteUpdate::Installed,
            Some(current) if current.pinned => RouteUpdate::Ignored,
            Some(current) if current.next_hop == via => {
                if current.hop_count == hop_count {
                    RouteUpdate::Refreshed
                } else {
                    RouteUpdate::Changed
                }
            }
            Some(current) if hop_count < current.hop_count => RouteUpdate::Improved,
            Some(current) if self.is_stale(current, now) => RouteUpdate::Replaced,
            Some(_) => RouteUpdate::Ignored,
        };

        if update == RouteUpdate::Ignored {
            return update;
        }
        if update == RouteUpdate::Installed && !self.make_room() {
            return RouteUpdate::Ignored;
        }

        self.routes.insert(
            destination,
            RouteEntry {
                destination,
                next_hop: via,
                hop_count,
                confirmed_at: now,
                pinned: false,
            },
        );
        update
    }

    /// Install a pinned static route.
    pub fn install(
        &mut self,
        destination: NodeAddr,
        next_hop: NodeAddr,
        hop_count: u16,
        now: Timestamp,
    ) -> Result<(), Error> {
        if destination == self.own_addr || next_hop == self.own_addr {
            return Err(Error::InvalidConfig("route through self"));
        }
        if destination == BROADCAST_ADDR || next_hop == BROADCAST_ADDR {
            return Err(Error::InvalidConfig("route through broadcast address"));
        }
        if !self.routes.contains_key(&destination) && !self.make_room() {
            return Err(Error::InvalidConfig("route table full of static routes"));
        }
        self.routes.insert(
            destination,
            RouteEntry {
                destination,
                next_hop,
                hop_count: hop_count.max(1),
                confirmed_at: now,
                pinned: true,
            },
        );
        Ok(())
    }

    /// Drop unpinned routes unconfirmed for `ROUTE_EXPIRY_FACTOR` stale periods.
    /// Returns how many were removed.
    pub fn purge_expired(&mut self, now: Timestamp) -> usize {
        let expiry = self.stale_after.saturating_mul(ROUTE_EXPIRY_FACTOR);
        let before = self.routes.len();
        self.routes
            .retain(|_, r| r.pinned || now.saturating_sub(r.confirmed_at) <= expiry);
        before - self.routes.len()
    }

    /// Evict the least recently confirmed unpinned route if full.
    fn make_room(&mut self) -> bool {
        if self.routes.len() < self.max_routes {
            return true;
        }
        let victim = self
            .routes
            .values()
            .filter(|r| !r.pinned)
            .min_by_key(|r| r.confirmed_at)
            .map(|r| r.destination);
        match victim {
            Some(destination) => {
                self.routes.remove(&destination);
                true
            }
            None => false,
        }
    }
}

impl<Rd, R, Clk, Cfg> Node<Rd, R, Clk, Cfg>
where
    Rd: Radio,
    R: Random,
    Clk: Clock,
    Cfg: NodeConfig,
{
    /// Handle a received ROUTE_PROBE.
    pub(crate) fn handle_probe(&mut self, msg: &Message, now: Timestamp) {
        // The sink originates routes; it never needs one.
        if self.role() == Role::Server {
            return;
        }

        let update = self.routes.observe_probe(msg, now);
        if !update.changes_route() {
            return;
        }
        let Some(route) = self.routes.route(msg.destination).copied() else {
            return;
        };

        emit_debug!(
            self,
            crate::debug::DebugEvent::RouteUpdated {
                destination: route.destination,
                next_hop: route.next_hop,
                hop_count: route.hop_count,
                update,
            }
        );
        self.push_event(Event::RouteChanged {
            destination: route.destination,
            next_hop: route.next_hop,
            hop_count: route.hop_count,
        });

        self.flush_no_route(route.destination);

        // Triggered update so relays further out learn the new hop count now
        // instead of at the next periodic probe.
        if self.role() == Role::Gateway && route.destination == self.sink() {
            self.send_probe();
        }
    }

    /// Broadcast this node's hop count to the sink.
    ///
    /// The server announces 0. A gateway announces only once it has a route.
    /// Sensors never announce.
    pub(crate) fn send_probe(&mut self) {
        let hop_count = match self.role() {
            Role::Server => 0,
            Role::Gateway => match self.routes.hop_count(self.sink()) {
                Some(h) => h,
                None => return,
            },
            Role::Sensor => return,
        };

        let probe = Message::probe(self.addr(), self.sink(), hop_count);
        emit_debug!(
            self,
            crate::debug::DebugEvent::ProbeSent {
                destination: probe.destination,
                hop_count,
            }
        );
        self.metrics.probes_sent += 1;
        self.transmit(BROADCAST_ADDR, &probe);
    }

    /// Periodic route maintenance.
    pub(crate) fn purge_routes(&mut self, now: Timestamp) {
        let removed = self.routes.purge_expired(now);
        if removed > 0 {
            emit_debug!(self, crate::debug::DebugEvent::RoutesPurged { count: removed });
        }
    }

    /// Add a pinned static route.
    pub fn install_route(
        &mut self,
        destination: NodeAddr,
        next_hop: NodeAddr,
        hop_count: u16,
        now: Timestamp,
    ) -> Result<(), Error> {
        self.routes.install(destination, next_hop, hop_count, now)?;
        self.push_event(Event::RouteChanged {
            destination,
            next_hop,
            hop_count: hop_count.max(1),
        });
        self.flush_no_route(destination);
        Ok(())
    }
}
