//! Node configuration.
//!
//! Two layers:
//!
//! - [`NodeConfig`]: compile-time memory bounds (ledger capacities, table
//!   sizes). Every bounded collection in a node is sized from these, so peak
//!   memory is fixed at construction.
//! - [`ProtocolParams`] and [`NodeSettings`]: runtime tuning and identity.
//!
//! # Example
//!
//! ```
//! use sensenet::{Duration, NodeSettings, ProtocolParams};
//! use sensenet::config::NoRoutePolicy;
//!
//! let params = ProtocolParams::default()
//!     .with_max_attempts(5)
//!     .with_retry_interval(Duration::from_millis(800))
//!     .with_no_route(NoRoutePolicy::Drop);
//! assert!(params.validate().is_ok());
//!
//! let settings = NodeSettings::sensor(5, 8);
//! assert!(settings.validate().is_ok());
//! ```

use crate::scheduler::BackoffPolicy;
use crate::time::Duration;
use crate::types::{
    Error, NodeAddr, Role, BROADCAST_ADDR, DEFAULT_JITTER_PERCENT, DEFAULT_MAX_ATTEMPTS,
    DEFAULT_PROBE_INTERVAL_SECS, DEFAULT_RELAY_HOLDOFF_MS, DEFAULT_RETRY_INTERVAL_MS,
    DEFAULT_ROUTE_STALE_SECS, SENSOR_LIST_SIZE, SERVER_LIST_SIZE,
};

/// Configuration trait for compile-time memory tuning.
///
/// All bounds must be non-zero.
pub trait NodeConfig {
    /// Sensor ledger capacity (transmitted messages awaiting ACK).
    const SENSOR_LIST_SIZE: usize;

    /// Gateway/server ledger capacity (received message identities).
    const SERVER_LIST_SIZE: usize;

    /// Maximum route table entries.
    const MAX_ROUTES: usize;

    /// Maximum outstanding unacknowledged readings on a sensor.
    const MAX_PENDING_RETRANSMITS: usize;

    /// Maximum messages held while no route is known.
    const MAX_QUEUED_FRAMES: usize;

    /// Maximum frames waiting for the radio.
    const MAX_TX_BACKLOG: usize;
}

/// Reference deployment bounds.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultConfig;

impl NodeConfig for DefaultConfig {
    const SENSOR_LIST_SIZE: usize = SENSOR_LIST_SIZE;
    const SERVER_LIST_SIZE: usize = SERVER_LIST_SIZE;
    const MAX_ROUTES: usize = 16;
    const MAX_PENDING_RETRANSMITS: usize = 32;
    const MAX_QUEUED_FRAMES: usize = 16;
    const MAX_TX_BACKLOG: usize = 16;
}

/// Bounds for very small MCUs (a few KB of RAM for protocol state).
#[derive(Debug, Clone, Copy, Default)]
pub struct SmallConfig;

impl NodeConfig for SmallConfig {
    const SENSOR_LIST_SIZE: usize = 16;
    const SERVER_LIST_SIZE: usize = 64;
    const MAX_ROUTES: usize = 4;
    const MAX_PENDING_RETRANSMITS: usize = 4;
    const MAX_QUEUED_FRAMES: usize = 4;
    const MAX_TX_BACKLOG: usize = 4;
}

/// What to do with a message when no route toward its destination is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NoRoutePolicy {
    /// Hold it (bounded) until a route appears.
    #[default]
    Queue,
    /// Drop it and report `NoRouteKnown`.
    Drop,
}

/// Runtime protocol parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolParams {
    /// Total transmissions of a reading, first send included.
    pub max_attempts: u8,
    pub backoff: BackoffPolicy,
    /// A route not confirmed for this long may be replaced by any candidate.
    pub route_stale_timeout: Duration,
    /// Period of ROUTE_PROBE broadcasts on gateways and servers.
    pub probe_interval: Duration,
    /// A gateway treats a second copy of unacknowledged DATA arriving within
    /// this window as a radio duplicate rather than a retransmission.
    pub relay_holdoff: Duration,
    pub no_route: NoRoutePolicy,
    /// Gateways answer duplicates of acknowledged DATA with a replayed ACK
    /// instead of dropping them.
    pub ack_replay: bool,
}

impl Default for ProtocolParams {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: BackoffPolicy::Fixed {
                interval: Duration::from_millis(DEFAULT_RETRY_INTERVAL_MS),
                jitter_percent: DEFAULT_JITTER_PERCENT,
            },
            route_stale_timeout: Duration::from_secs(DEFAULT_ROUTE_STALE_SECS),
            probe_interval: Duration::from_secs(DEFAULT_PROBE_INTERVAL_SECS),
            relay_holdoff: Duration::from_millis(DEFAULT_RELAY_HOLDOFF_MS),
            no_route: NoRoutePolicy::Queue,
            ack_replay: false,
        }
    }
}

impl ProtocolParams {
    pub fn with_max_attempts(mut self, max_attempts: u8) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Fixed retry interval, keeping the current jitter.
    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.backoff = BackoffPolicy::Fixed {
            interval,
            jitter_percent: self.backoff.jitter_percent(),
        };
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_route_stale_timeout(mut self, timeout: Duration) -> Self {
        self.route_stale_timeout = timeout;
        self
    }

    pub fn with_probe_interval(mut self, interval: Duration) -> Self {
        self.probe_interval = interval;
        self
    }

    pub fn with_relay_holdoff(mut self, holdoff: Duration) -> Self {
        self.relay_holdoff = holdoff;
        self
    }

    pub fn with_no_route(mut self, policy: NoRoutePolicy) -> Self {
        self.no_route = policy;
        self
    }

    pub fn with_ack_replay(mut self, enabled: bool) -> Self {
        self.ack_replay = enabled;
        self
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.max_attempts == 0 {
            return Err(Error::InvalidConfig("max_attempts must be at least 1"));
        }
        if self.backoff.base().is_zero() {
            return Err(Error::InvalidConfig("retry interval must be non-zero"));
        }
        if self.backoff.jitter_percent() >= 100 {
            return Err(Error::InvalidConfig("jitter must be below 100%"));
        }
        if self.probe_interval.is_zero() {
            return Err(Error::InvalidConfig("probe interval must be non-zero"));
        }
        if self.route_stale_timeout.is_zero() {
            return Err(Error::InvalidConfig("route stale timeout must be non-zero"));
        }
        Ok(())
    }
}

/// Identity of one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeSettings {
    pub addr: NodeAddr,
    pub role: Role,
    /// Server all DATA is addressed to. A server is its own sink.
    pub sink: NodeAddr,
}

impl NodeSettings {
    pub const fn sensor(addr: NodeAddr, sink: NodeAddr) -> Self {
        Self {
            addr,
            role: Role::Sensor,
            sink,
        }
    }

    pub const fn gateway(addr: NodeAddr, sink: NodeAddr) -> Self {
        Self {
            addr,
            role: Role::Gateway,
            sink,
        }
    }

    pub const fn server(addr: NodeAddr) -> Self {
        Self {
            addr,
            role: Role::Server,
            sink: addr,
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.addr == BROADCAST_ADDR {
            return Err(Error::InvalidConfig("broadcast address cannot be a node address"));
        }
        if self.sink == BROADCAST_ADDR {
            return Err(Error::InvalidConfig("broadcast address cannot be a sink"));
        }
        match self.role {
            Role::Server if self.sink != self.addr => {
                Err(Error::InvalidConfig("a server must be its own sink"))
            }
            Role::Sensor | Role::Gateway if self.sink == self.addr => {
                Err(Error::InvalidConfig("only a server can be the sink"))
            }
            _ => Ok(()),
        }
    }
}
