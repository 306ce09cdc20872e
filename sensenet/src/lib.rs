#![forbid(unsafe_code)]
//! sensenet - Reliable multi-hop sensor data collection over unreliable radios
//!
//! Sensors submit 16-bit readings that travel through one or more gateways to
//! a single server. Every reading is acknowledged end to end; sensors
//! retransmit until the ACK arrives or the attempt budget runs out, and every
//! node suppresses duplicates with a bounded history ledger.
//!
//! This crate is `no_std` but **requires the `alloc` crate**. Collections are
//! heap-allocated with bounds fixed by a [`NodeConfig`].
//!
//! # Key Properties
//!
//! - One fixed 9-byte frame format for DATA, ACK and ROUTE_PROBE
//! - At most one delivery per (sensor, msg_id) at the server
//! - Exactly one [`Event::DeliveryResult`] per accepted reading at the sensor
//! - Routes learned from periodic hop-count probes, or installed statically
//! - Half-duplex aware: frames wait in a priority backlog while the radio is busy
//! - No clock synchronization required
//!
//! # Example (wire format)
//!
//! ```
//! use sensenet::{decode, encode, Message, MessageKind, FRAME_LEN};
//!
//! let data = Message::data(1, 5, 8, 42);
//! let frame = encode(&data);
//! assert_eq!(frame.len(), FRAME_LEN);
//! assert_eq!(decode(&frame), Ok(data));
//!
//! // The server answers with an ACK carrying the same msg_id
//! let ack = Message::ack_for(&data, 8);
//! assert_eq!(ack.kind, MessageKind::Ack);
//! assert_eq!(ack.delivery_key(), data.delivery_key());
//! ```
//!
//! # Example (integration pattern)
//!
//! ```text
//! use sensenet::{Node, NodeSettings, ProtocolParams, Radio, Random, Clock};
//!
//! // Implement Radio, Random and Clock for your platform...
//!
//! // Create a sensor that reports to server 8
//! // let mut node = Node::new(radio, random, clock,
//! //     NodeSettings::sensor(5, 8), ProtocolParams::default())?;
//!
//! // Spawn the node's run loop
//! // spawn(async move {
//! //     node.run().await;
//! // });
//!
//! // Submit readings
//! // node.readings().send(42).await;
//!
//! // Learn what happened to them
//! // let event = node.events().receive().await;
//! ```
//!
//! # Module Structure
//!
//! - [`types`] - Core types (Message, HistoryEntry, Event, etc.)
//! - [`wire`] - Wire format serialization
//! - [`traits`] - Radio, Random, Clock traits
//! - [`node`] - Main Node struct and public API
//! - [`ledger`] - History ledger for duplicate suppression
//! - [`scheduler`] - Retransmission scheduling and backoff
//! - [`route`] - Route table and probe handling
//! - [`sensor`], [`gateway`], [`server`] - Role behavior
//! - [`timer`] - Timer table
//! - [`time`] - Timestamp and Duration types
//! - [`config`] - Memory bounds and protocol parameters

#![no_std]

// Prevent test/debug features from being used in release builds.
#[cfg(all(feature = "test-support", not(test), not(debug_assertions)))]
compile_error!(
    "The `test-support` feature must not be enabled in release builds. \
     It includes mock radio and randomness implementations meant only for tests."
);

#[cfg(all(feature = "debug", not(test), not(debug_assertions)))]
compile_error!(
    "The `debug` feature must not be enabled in release builds. \
     It adds protocol tracing overhead intended only for development and simulation."
);

extern crate alloc;

pub mod collections;
pub mod config;
#[macro_use]
pub mod debug;
pub mod gateway;
pub mod ledger;
pub mod node;
pub mod route;
pub mod scheduler;
pub mod sensor;
pub mod server;
pub mod time;
pub mod timer;
pub mod traits;
pub mod types;
pub mod wire;

// Re-export main types at crate root
pub use config::{DefaultConfig, NoRoutePolicy, NodeConfig, NodeSettings, ProtocolParams, SmallConfig};
pub use ledger::HistoryLedger;
pub use node::Node;
pub use route::RouteTable;
pub use scheduler::{BackoffPolicy, RetransmitScheduler};
pub use time::{Duration, Timestamp};
pub use timer::{TimerHandle, TimerKind, TimerTable};
pub use traits::{Clock, Radio, RadioEvent, Random, Received, SendStatus};
pub use types::{
    DeliveryOutcome, Error, Event, Frame, HistoryEntry, Message, MessageKind, MsgId, NodeAddr,
    Priority, Role, TransportMetrics,
};
pub use wire::{decode, encode, Decode, DecodeError, Encode};

// Re-export constants
pub use types::{
    BROADCAST_ADDR, FRAME_LEN, GATEWAY_NODES, MSG_ACK, MSG_DATA, MSG_ROUTE_PROBE, SENSOR_NODES,
    SERVER_NODE,
};

#[cfg(test)]
mod tests {
    use alloc::vec;
    use alloc::vec::Vec;

    use super::*;
    use crate::node::testing::*;

    /// Move everything `from` has on air to the nodes in `to`, completing
    /// each send. Frames are delivered to every listed node; link filtering
    /// decides who takes them.
    fn relay(from: &mut TestNode, to: &mut [&mut TestNode], now: Timestamp) -> usize {
        let addr = from.addr();
        let mut moved = 0;
        loop {
            let frames = from.radio_mut().take_sent();
            if frames.is_empty() {
                break;
            }
            for (next_hop, frame) in frames {
                for node in to.iter_mut() {
                    node.handle_radio_rx(&frame, addr, next_hop, None, now);
                }
                moved += 1;
            }
            from.handle_send_done(true, now);
        }
        moved
    }

    /// Sensor 5 -> Gateway 2 -> Server 8, routes learned from probes.
    fn line() -> (TestNode, TestNode, TestNode) {
        let mut s = sensor(5, 8);
        let mut g = gateway(2, 8);
        let mut srv = server(8);
        for node in [&mut s, &mut g, &mut srv] {
            node.initialize(Timestamp::ZERO);
        }

        // Server probe reaches only the gateway; the gateway's probes reach both.
        relay(&mut srv, &mut [&mut g], Timestamp::ZERO);
        relay(&mut g, &mut [&mut s, &mut srv], Timestamp::ZERO);
        for node in [&s, &g, &srv] {
            events(node);
        }
        (s, g, srv)
    }

    #[test]
    fn test_probes_build_routes() {
        let (s, g, srv) = line();
        assert_eq!(g.routes().hop_count(8), Some(1));
        assert_eq!(s.routes().hop_count(8), Some(2));
        assert_eq!(s.routes().route(8).map(|r| r.next_hop), Some(2));
        assert!(srv.routes().is_empty());
    }

    #[test]
    fn test_end_to_end_delivery() {
        let (mut s, mut g, mut srv) = line();
        let t = Timestamp::from_millis(100);

        assert_eq!(s.submit_reading(42, t), Ok(1));
        assert_eq!(relay(&mut s, &mut [&mut g], t), 1);
        assert_eq!(relay(&mut g, &mut [&mut s, &mut srv], t), 1);
        assert_eq!(
            events(&srv),
            vec![Event::DataReceived {
                sender: 5,
                value: 42,
                msg_id: 1
            }]
        );
        assert_eq!(relay(&mut srv, &mut [&mut g], t), 1);
        assert_eq!(relay(&mut g, &mut [&mut s, &mut srv], t), 1);

        let outcomes: Vec<_> = events(&s)
            .into_iter()
            .filter(|e| matches!(e, Event::DeliveryResult { .. }))
            .collect();
        assert_eq!(
            outcomes,
            vec![Event::DeliveryResult {
                msg_id: 1,
                outcome: DeliveryOutcome::Delivered { attempts: 1 }
            }]
        );

        // Both ends remember (5, 1), acked
        let entries: Vec<_> = s.ledger().iter().map(|e| (e.key(), e.ack_received)).collect();
        assert_eq!(entries, vec![((5, 1), true)]);
        let entries: Vec<_> = srv.ledger().iter().map(|e| (e.key(), e.ack_received)).collect();
        assert_eq!(entries, vec![((5, 1), true)]);

        // Nothing left to retransmit
        assert!(s.scheduler().is_empty());
    }

    #[test]
    fn test_lost_ack_retransmission_delivered_once() {
        let (mut s, mut g, mut srv) = line();
        let t0 = Timestamp::from_millis(100);
        s.submit_reading(7, t0).unwrap();
        relay(&mut s, &mut [&mut g], t0);
        relay(&mut g, &mut [&mut srv], t0);
        // The ACK is lost between server and gateway
        srv.radio_mut().take_sent();
        srv.handle_send_done(true, t0);

        // Sensor retransmits after its backoff
        let t1 = s.next_deadline().unwrap();
        s.handle_timer(t1);
        relay(&mut s, &mut [&mut g], t1);
        relay(&mut g, &mut [&mut srv], t1);
        relay(&mut srv, &mut [&mut g], t1);
        relay(&mut g, &mut [&mut s], t1);

        let received: Vec<_> = events(&srv)
            .into_iter()
            .filter(|e| matches!(e, Event::DataReceived { .. }))
            .collect();
        assert_eq!(received.len(), 1);
        assert_eq!(srv.metrics().acks_sent, 2);

        assert!(events(&s).contains(&Event::DeliveryResult {
            msg_id: 1,
            outcome: DeliveryOutcome::Delivered { attempts: 2 }
        }));
        assert!(s.ledger().lookup(5, 1).unwrap().retransmitted);
    }

    #[test]
    fn test_static_routes_without_probes() {
        let mut s = sensor(5, 8);
        let mut g = gateway(2, 8);
        let mut srv = server(8);
        s.install_route(8, 2, 2, Timestamp::ZERO).unwrap();
        g.install_route(8, 8, 1, Timestamp::ZERO).unwrap();

        let t = Timestamp::ZERO;
        s.submit_reading(42, t).unwrap();
        relay(&mut s, &mut [&mut g], t);
        relay(&mut g, &mut [&mut srv], t);
        relay(&mut srv, &mut [&mut g], t);
        relay(&mut g, &mut [&mut s], t);

        assert_eq!(s.metrics().delivered, 1);
        assert_eq!(srv.metrics().delivered, 1);
    }
}
