//! sensesim - Discrete event network simulator for sensenet protocol testing.
//!
//! This crate provides a deterministic, discrete-event simulator for running
//! whole sensenet deployments (sensors, gateways, a server) without real-time
//! delays.
//!
//! # Features
//!
//! - **Discrete event simulation**: No real-time delays, deterministic ordering
//! - **Multiple nodes in single process**: Simulate entire deployments
//! - **Broadcast medium**: Every active neighbor hears every frame; nodes
//!   filter by link-layer destination
//! - **Link properties**: RSSI, loss, duplication and delay per link
//! - **Scenario builder**: Roles, links, scheduled readings, partitions, link failures
//! - **Metrics collection**: Per-sensor outcomes, server deliveries, frame counts
//!
//! # Example
//!
//! ```
//! use sensesim::{line_scenario, Duration, Timestamp};
//!
//! // Sensor 5 -> gateway 2 -> server 8, one reading
//! let result = line_scenario()
//!     .reading_at(Timestamp::from_secs(1), 5, 42)
//!     .run_for(Duration::from_secs(5))
//!     .unwrap();
//!
//! assert_eq!(result.server_deliveries(5), vec![(1, 42)]);
//! assert!(result.delivered_once());
//! ```
//!
//! # Architecture
//!
//! The simulator uses a priority queue of events ordered by (time, sequence_number).
//! The main loop:
//! 1. Pop next event from queue
//! 2. Advance simulation time
//! 3. Process event (call node handlers)
//! 4. Put the node's outgoing frames on the air and schedule `SendDone`
//! 5. Collect protocol events and schedule the node's next timer wake-up
//!
//! Handlers are called directly (`handle_radio_rx`, `handle_send_done`,
//! `handle_timer`) instead of through the async `node.run()` method.

pub mod event;
pub mod metrics;
pub mod node;
pub mod scenario;
pub mod sim;
pub mod topology;

// Re-export main types
pub use event::{Event, ScenarioAction, ScheduledEvent};
pub use metrics::{ReadingOutcome, ServerDelivery, SimMetrics, SimulationResult, SubmittedReading};
pub use node::{SimClock, SimNode, SimRadio, SimRandom};
pub use scenario::{line_scenario, sensenet_scenario, ScenarioBuilder};
pub use sensenet::{DeliveryOutcome, Duration, NodeAddr, Timestamp};
pub use sim::Simulator;
pub use topology::{Link, Topology};

#[cfg(test)]
mod tests {
    use sensenet::ProtocolParams;

    use super::*;
    use crate::scenario::{DEPLOYMENT_GATEWAYS, DEPLOYMENT_SENSORS};

    /// Scenario: sensor 5 -> gateway 2 -> server 8, value 42.
    #[test]
    fn test_line_delivery() {
        let (mut sim, _) = line_scenario()
            .reading_at(Timestamp::from_secs(1), 5, 42)
            .build()
            .unwrap();
        let result = sim.run_for(Duration::from_secs(10));

        assert_eq!(
            result.outcomes_for(5),
            vec![(1, DeliveryOutcome::Delivered { attempts: 1 })]
        );
        assert_eq!(result.server_deliveries(5), vec![(1, 42)]);

        let sensor = sim.node(5).unwrap().inner();
        let entries: Vec<_> = sensor
            .ledger()
            .iter()
            .map(|e| (e.key(), e.ack_received))
            .collect();
        assert_eq!(entries, vec![((5, 1), true)]);

        let server = sim.node(8).unwrap().inner();
        let keys: Vec<_> = server.ledger().iter().map(|e| e.key()).collect();
        assert_eq!(keys, vec![(5, 1)]);
    }

    #[test]
    fn test_single_hop_delivery() {
        let result = ScenarioBuilder::new()
            .server(8)
            .sensor(1, 8)
            .link(1, 8)
            .reading_at(Timestamp::from_secs(1), 1, 7)
            .run_for(Duration::from_secs(5))
            .unwrap();

        assert_eq!(
            result.outcomes_for(1),
            vec![(1, DeliveryOutcome::Delivered { attempts: 1 })]
        );
        assert!(result.delivered_once());
    }

    #[test]
    fn test_unreachable_server_fails_once() {
        let (mut sim, _) = line_scenario()
            .disable_link_at(Timestamp::from_millis(500), 2, 8)
            .reading_at(Timestamp::from_secs(1), 5, 42)
            .build()
            .unwrap();
        let result = sim.run_for(Duration::from_secs(20));

        assert_eq!(
            result.outcomes_for(5),
            vec![(1, DeliveryOutcome::Failed { attempts: 3 })]
        );
        assert!(result.server_deliveries(5).is_empty());
        assert!(result.all_resolved());

        let sensor = sim.node(5).unwrap().inner();
        assert_eq!(sensor.pending_readings(), 0);
        assert_eq!(sensor.metrics().retransmissions, 2);
    }

    #[test]
    fn test_delivery_resumes_after_heal() {
        let result = line_scenario()
            .partition_at(Timestamp::from_millis(500), vec![vec![5, 2], vec![8]])
            .heal_at(Timestamp::from_secs(5))
            .reading_at(Timestamp::from_secs(1), 5, 1)
            .reading_at(Timestamp::from_secs(6), 5, 2)
            .run_for(Duration::from_secs(15))
            .unwrap();

        assert_eq!(
            result.outcomes_for(5),
            vec![
                (1, DeliveryOutcome::Failed { attempts: 3 }),
                (2, DeliveryOutcome::Delivered { attempts: 1 })
            ]
        );
        assert_eq!(result.server_deliveries(5), vec![(2, 2)]);
    }

    #[test]
    fn test_duplicating_links_deliver_once() {
        let result = line_scenario()
            .with_duplicate_rate(1.0)
            .readings_every(5, Timestamp::from_secs(1), Duration::from_secs(2), 4, 10)
            .run_for(Duration::from_secs(20))
            .unwrap();

        assert!(result.metrics.frames_duplicated > 0);
        assert!(result.delivered_once());
        assert!(result.all_resolved());
        assert_eq!(result.metrics.success_count(), 4);
        assert_eq!(
            result.server_deliveries(5),
            vec![(1, 10), (2, 11), (3, 12), (4, 13)]
        );
    }

    #[test]
    fn test_deployment_routes() {
        let (mut sim, _) = sensenet_scenario().build().unwrap();
        sim.run_for(Duration::from_millis(500));

        for gw in DEPLOYMENT_GATEWAYS {
            assert_eq!(sim.node(gw).unwrap().inner().routes().hop_count(8), Some(1));
        }
        for sensor in DEPLOYMENT_SENSORS {
            let routes = sim.node(sensor).unwrap().inner().routes();
            assert_eq!(routes.hop_count(8), Some(2));
            let via = routes.route(8).map(|r| r.next_hop);
            assert!(matches!(via, Some(6) | Some(7)));
        }
    }

    #[test]
    fn test_deployment_without_loss() {
        let result = sensenet_scenario()
            .run_for(Duration::from_secs(30))
            .unwrap();

        assert_eq!(result.metrics.submitted.len(), 25);
        assert!(result.delivered_once());
        assert!(result.all_resolved());
        assert_eq!(result.metrics.success_count(), 25);
        for sensor in DEPLOYMENT_SENSORS {
            let values: Vec<u16> = result
                .server_deliveries(sensor)
                .into_iter()
                .map(|(_, v)| v)
                .collect();
            let base = sensor * 100;
            assert_eq!(values, vec![base, base + 1, base + 2, base + 3, base + 4]);
        }
    }

    /// Lossy and duplicating links: every reading reaches the server
    /// application exactly once.
    #[test]
    fn test_deployment_with_loss_delivers_once() {
        let result = sensenet_scenario()
            .with_seed(7)
            .with_loss_rate(0.1)
            .with_duplicate_rate(0.05)
            .with_params(
                ProtocolParams::default()
                    .with_max_attempts(10)
                    .with_probe_interval(Duration::from_secs(2))
                    .with_ack_replay(true),
            )
            .run_for(Duration::from_secs(60))
            .unwrap();

        assert!(result.metrics.frames_dropped > 0);
        assert_eq!(result.metrics.submitted.len(), 25);
        assert!(result.delivered_once());
        assert!(result.all_resolved());
        assert_eq!(result.metrics.success_count(), 25);
    }

    /// Without ACK replay, a gateway drops retransmissions of readings it
    /// already saw acknowledged, so lost ACKs can end in failures, but the
    /// server still sees each reading at most once.
    #[test]
    fn test_deployment_with_loss_never_delivers_twice() {
        let result = sensenet_scenario()
            .with_seed(11)
            .with_loss_rate(0.15)
            .run_for(Duration::from_secs(60))
            .unwrap();

        assert!(result.all_resolved());
        for reading in &result.metrics.submitted {
            assert!(result.metrics.delivery_count(reading.sensor, reading.msg_id) <= 1);
        }
        // A success implies the server saw the reading
        for outcome in &result.metrics.outcomes {
            if outcome.outcome.is_success() {
                assert_eq!(
                    result.metrics.delivery_count(outcome.sensor, outcome.msg_id),
                    1
                );
            }
        }
    }
}
