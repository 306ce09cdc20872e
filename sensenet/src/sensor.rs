//! Sensor role: originate readings and retransmit them until acknowledged.
//!
//! Every accepted reading ends in exactly one [`Event::DeliveryResult`]:
//! `Delivered` when the first matching ACK arrives, `Failed` when the
//! retransmission timer fires with all attempts used. Late and duplicate
//! ACKs find no outstanding state and are ignored.
//!
//! A result that finds the event channel full is held on the node and goes
//! out on a later handler call; it is never dropped.

use crate::config::{NoRoutePolicy, NodeConfig};
use crate::node::Node;
use crate::scheduler::TimerOutcome;
use crate::time::Timestamp;
use crate::timer::TimerHandle;
use crate::traits::{Clock, Radio, Random};
use crate::types::{
    DeliveryOutcome, Error, Event, HistoryEntry, Message, MessageKind, MsgId, NodeAddr, Role,
};

impl<Rd, R, Clk, Cfg> Node<Rd, R, Clk, Cfg>
where
    Rd: Radio,
    R: Random,
    Clk: Clock,
    Cfg: NodeConfig,
{
    /// Submit one reading for reliable delivery to the sink.
    ///
    /// Returns the msg_id assigned to it. With no route known, the
    /// first attempt is skipped under [`NoRoutePolicy::Queue`] (the retry
    /// timer still runs) and the reading is rejected under
    /// [`NoRoutePolicy::Drop`].
    pub fn submit_reading(&mut self, value: u16, now: Timestamp) -> Result<MsgId, Error> {
        self.flush_results();
        let result = self.try_submit_reading(value, now);
        if let Err(_error) = result {
            emit_debug!(
                self,
                crate::debug::DebugEvent::ReadingRejected {
                    value,
                    error: _error,
                }
            );
        }
        result
    }

    fn try_submit_reading(&mut self, value: u16, now: Timestamp) -> Result<MsgId, Error> {
        if self.role() != Role::Sensor {
            return Err(Error::WrongRole);
        }
        // A held result still occupies its reading's slot.
        if !self.scheduler.has_capacity()
            || self.scheduler.len() + self.held_results() >= Cfg::MAX_PENDING_RETRANSMITS
        {
            return Err(Error::TooManyPending);
        }
        let next_hop = self.routes.select_next_hop(self.sink()).ok();
        if next_hop.is_none() && self.params.no_route == NoRoutePolicy::Drop {
            return Err(Error::NoRouteKnown);
        }

        let msg_id = self.allocate_msg_id();
        let msg = Message::data(msg_id, self.addr(), self.sink(), value);
        self.scheduler.submit(msg, now)?;
        self.record_history(HistoryEntry::new(&msg, next_hop, now));

        emit_debug!(
            self,
            crate::debug::DebugEvent::ReadingSubmitted {
                msg_id,
                value,
                next_hop,
            }
        );
        self.push_event(Event::ReadingAccepted { msg_id, value });
        self.send_attempt(msg_id, msg, now);
        Ok(msg_id)
    }

    /// Next free msg_id. Skips ids still awaiting an ACK after wraparound.
    fn allocate_msg_id(&mut self) -> MsgId {
        loop {
            let id = self.next_msg_id;
            self.next_msg_id = self.next_msg_id.wrapping_add(1);
            if !self.scheduler.contains(id) {
                return id;
            }
        }
    }

    /// One transmission slot: send via the current next hop (if any) and
    /// start the retry timer.
    fn send_attempt(&mut self, msg_id: MsgId, msg: Message, now: Timestamp) {
        let next_hop = self.routes.select_next_hop(self.sink()).ok();
        match next_hop {
            Some(hop) => {
                self.transmit(hop, &msg);
                self.ledger.set_gateway(self.addr(), msg_id, hop);
            }
            None => {
                emit_debug!(
                    self,
                    crate::debug::DebugEvent::NoRoute {
                        destination: msg.destination,
                        kind: msg.kind,
                        msg_id,
                        queued: false,
                    }
                );
            }
        }

        let armed =
            self.scheduler
                .mark_sent(msg_id, next_hop, now, &mut self.timers, &mut self.random);
        if let Some((_attempt, _deadline)) = armed {
            emit_debug!(
                self,
                crate::debug::DebugEvent::RetransmitScheduled {
                    msg_id,
                    attempt: _attempt,
                    deadline: _deadline,
                }
            );
        }
    }

    /// A retransmission timer fired.
    pub(crate) fn on_retransmit_timer(&mut self, handle: TimerHandle, now: Timestamp) {
        match self.scheduler.on_timer(handle) {
            TimerOutcome::Resend(msg) => {
                self.metrics.retransmissions += 1;
                self.ledger.mark_retransmitted(self.addr(), msg.msg_id, now);
                self.send_attempt(msg.msg_id, msg, now);
            }
            TimerOutcome::Failed(state) => {
                self.metrics.failed += 1;
                emit_debug!(
                    self,
                    crate::debug::DebugEvent::DeliveryFailed {
                        msg_id: state.msg_id,
                        attempts: state.attempts,
                    }
                );
                self.push_result(Event::DeliveryResult {
                    msg_id: state.msg_id,
                    outcome: DeliveryOutcome::Failed {
                        attempts: state.attempts,
                    },
                });
            }
            TimerOutcome::Stale => {
                emit_debug!(
                    self,
                    crate::debug::DebugEvent::StaleTimer {
                        handle: handle.raw()
                    }
                );
            }
        }
    }

    /// DATA/ACK received by a sensor. Sensors never relay.
    pub(crate) fn handle_sensor_rx(&mut self, msg: &Message, _from: NodeAddr, _now: Timestamp) {
        if msg.kind != MessageKind::Ack || msg.destination != self.addr() {
            emit_debug!(
                self,
                crate::debug::DebugEvent::FrameIgnored {
                    from: _from,
                    kind: Some(msg.kind),
                    reason: "sensors do not relay",
                }
            );
            return;
        }

        self.ledger.mark_acked(self.addr(), msg.msg_id);

        match self.scheduler.on_ack(msg.msg_id, &mut self.timers) {
            Some(state) => {
                self.metrics.delivered += 1;
                emit_debug!(
                    self,
                    crate::debug::DebugEvent::AckMatched {
                        msg_id: state.msg_id,
                        attempts: state.attempts,
                    }
                );
                self.push_result(Event::DeliveryResult {
                    msg_id: state.msg_id,
                    outcome: DeliveryOutcome::Delivered {
                        attempts: state.attempts,
                    },
                });
            }
            None => {
                self.metrics.duplicates_suppressed += 1;
                emit_debug!(
                    self,
                    crate::debug::DebugEvent::LateAckIgnored { msg_id: msg.msg_id }
                );
            }
        }
    }

    /// Readings submitted and not yet resolved.
    pub fn pending_readings(&self) -> usize {
        self.scheduler.len()
    }
}

#[cfg(test)]
mod tests {
    use alloc::vec;
    use alloc::vec::Vec;

    use crate::config::{NodeSettings, ProtocolParams};
    use crate::debug::DebugEvent;
    use crate::node::testing::*;
    use crate::time::Duration;
    use crate::types::BROADCAST_ADDR;

    use super::*;

    fn routed_sensor() -> TestNode {
        let mut node = sensor(5, 8);
        node.install_route(8, 2, 2, Timestamp::ZERO).unwrap();
        events(&node);
        node
    }

    fn results(node: &TestNode) -> Vec<(MsgId, DeliveryOutcome)> {
        events(node)
            .into_iter()
            .filter_map(|e| match e {
                Event::DeliveryResult { msg_id, outcome } => Some((msg_id, outcome)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_submit_sends_data_via_route() {
        let mut node = routed_sensor();
        let msg_id = node.submit_reading(42, Timestamp::ZERO).unwrap();

        assert_eq!(msg_id, 1);
        assert_eq!(sent(&mut node), vec![(2, Message::data(1, 5, 8, 42))]);
        assert_eq!(
            events(&node),
            vec![Event::ReadingAccepted {
                msg_id: 1,
                value: 42
            }]
        );

        let entry = node.ledger().lookup(5, 1).unwrap();
        assert_eq!(entry.gateway, Some(2));
        assert!(!entry.ack_received);
        assert_eq!(node.pending_readings(), 1);
    }

    #[test]
    fn test_msg_ids_increase() {
        let mut node = routed_sensor();
        let ids: Vec<MsgId> = (0..3)
            .map(|v| node.submit_reading(v, Timestamp::ZERO).unwrap())
            .collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_ack_reports_delivery_once() {
        let mut node = routed_sensor();
        let msg_id = node.submit_reading(42, Timestamp::ZERO).unwrap();
        sent(&mut node);
        events(&node);

        let ack = Message::ack_for(&Message::data(msg_id, 5, 8, 42), 8);
        deliver(&mut node, &ack, 2, 5, Timestamp::from_millis(100));
        deliver(&mut node, &ack, 2, 5, Timestamp::from_millis(120));

        assert_eq!(
            results(&node),
            vec![(msg_id, DeliveryOutcome::Delivered { attempts: 1 })]
        );
        assert!(node.ledger().lookup(5, msg_id).unwrap().ack_received);
        assert_eq!(node.pending_readings(), 0);
        assert!(node.timers().is_empty());
        assert_eq!(node.metrics().duplicates_suppressed, 1);
    }

    #[test]
    fn test_no_ack_fails_after_max_attempts() {
        let mut node = routed_sensor();
        let msg_id = node.submit_reading(7, Timestamp::ZERO).unwrap();
        events(&node);

        let mut transmissions = sent(&mut node).len();
        let mut now = Timestamp::ZERO;
        while let Some(deadline) = node.next_deadline() {
            now = deadline;
            node.handle_timer(now);
            transmissions += sent(&mut node).len();
        }

        assert_eq!(transmissions, 3);
        assert_eq!(
            results(&node),
            vec![(msg_id, DeliveryOutcome::Failed { attempts: 3 })]
        );
        assert!(node.scheduler().get(msg_id).is_none());
        assert!(node.ledger().lookup(5, msg_id).unwrap().retransmitted);

        // An ACK after the failure is late and changes nothing
        let ack = Message::ack_for(&Message::data(msg_id, 5, 8, 7), 8);
        deliver(&mut node, &ack, 2, 5, now + Duration::from_secs(1));
        assert!(results(&node).is_empty());
    }

    #[test]
    fn test_retransmission_keeps_msg_id() {
        let mut node = routed_sensor();
        node.submit_reading(9, Timestamp::ZERO).unwrap();
        let first = sent(&mut node);

        let deadline = node.next_deadline().unwrap();
        assert!(deadline >= Timestamp::from_millis(900));
        assert!(deadline <= Timestamp::from_millis(1100));
        node.handle_timer(deadline);
        let second = sent(&mut node);

        assert_eq!(first, second);
        assert_eq!(node.scheduler().get(1).unwrap().attempts, 2);
        assert_eq!(node.metrics().retransmissions, 1);
    }

    #[test]
    fn test_no_route_queue_policy_skips_attempt() {
        let mut node = sensor(5, 8);
        let msg_id = node.submit_reading(1, Timestamp::ZERO).unwrap();

        assert!(sent(&mut node).is_empty());
        assert_eq!(node.scheduler().get(msg_id).unwrap().attempts, 1);

        // Route shows up before the retry
        deliver(
            &mut node,
            &Message::probe(6, 8, 1),
            6,
            BROADCAST_ADDR,
            Timestamp::from_millis(500),
        );
        let deadline = node.next_deadline().unwrap();
        node.handle_timer(deadline);
        assert_eq!(sent(&mut node), vec![(6, Message::data(msg_id, 5, 8, 1))]);
    }

    #[test]
    fn test_no_route_drop_policy_rejects() {
        let mut node = node(
            NodeSettings::sensor(5, 8),
            ProtocolParams::default().with_no_route(crate::config::NoRoutePolicy::Drop),
        );
        assert_eq!(
            node.submit_reading(1, Timestamp::ZERO),
            Err(Error::NoRouteKnown)
        );
        assert!(events(&node).is_empty());
        assert_eq!(node.pending_readings(), 0);
        assert!(debug_events(&node)
            .iter()
            .any(|e| matches!(e, DebugEvent::ReadingRejected { .. })));

        // The rejected reading did not consume an id
        node.install_route(8, 2, 1, Timestamp::ZERO).unwrap();
        assert_eq!(node.submit_reading(1, Timestamp::ZERO), Ok(1));
    }

    #[test]
    fn test_too_many_pending() {
        let mut node = node(
            NodeSettings::sensor(5, 8),
            ProtocolParams::default(),
        );
        node.install_route(8, 2, 1, Timestamp::ZERO).unwrap();
        for v in 0..32 {
            node.submit_reading(v, Timestamp::ZERO).unwrap();
        }
        assert_eq!(
            node.submit_reading(99, Timestamp::ZERO),
            Err(Error::TooManyPending)
        );
    }

    #[test]
    fn test_result_waits_for_full_event_channel() {
        let mut node = routed_sensor();
        // 32 ReadingAccepted events fill the channel
        for v in 0..32 {
            node.submit_reading(v, Timestamp::ZERO).unwrap();
        }
        sent(&mut node);

        let ack = Message::ack_for(&Message::data(1, 5, 8, 0), 8);
        deliver(&mut node, &ack, 2, 5, Timestamp::from_millis(100));
        assert_eq!(node.pending_readings(), 31);
        assert_eq!(node.held_results(), 1);

        // The held result still counts against the pending bound
        assert_eq!(
            node.submit_reading(99, Timestamp::from_millis(100)),
            Err(Error::TooManyPending)
        );

        // Application drains; the result goes out on the next handler call
        assert!(results(&node).is_empty());
        node.handle_timer(Timestamp::from_millis(200));
        assert_eq!(node.held_results(), 0);
        assert_eq!(
            results(&node),
            vec![(1, DeliveryOutcome::Delivered { attempts: 1 })]
        );
        assert!(node.submit_reading(99, Timestamp::from_millis(200)).is_ok());
    }

    #[test]
    fn test_held_results_keep_order() {
        let mut node = routed_sensor();
        for v in 0..32 {
            node.submit_reading(v, Timestamp::ZERO).unwrap();
        }
        sent(&mut node);

        for msg_id in [3, 1] {
            let ack = Message::ack_for(&Message::data(msg_id, 5, 8, 0), 8);
            deliver(&mut node, &ack, 2, 5, Timestamp::from_millis(100));
        }
        assert_eq!(node.held_results(), 2);

        events(&node);
        node.flush_results();
        assert_eq!(
            results(&node),
            vec![
                (3, DeliveryOutcome::Delivered { attempts: 1 }),
                (1, DeliveryOutcome::Delivered { attempts: 1 })
            ]
        );
    }

    #[test]
    fn test_wrong_role() {
        let mut gw = gateway(6, 8);
        assert_eq!(gw.submit_reading(1, Timestamp::ZERO), Err(Error::WrongRole));
        let mut srv = server(8);
        assert_eq!(srv.submit_reading(1, Timestamp::ZERO), Err(Error::WrongRole));
    }

    #[test]
    fn test_sensor_never_relays() {
        let mut node = routed_sensor();
        let foreign = Message::data(3, 4, 8, 10);
        deliver(&mut node, &foreign, 4, 5, Timestamp::ZERO);

        let other_ack = Message::ack_for(&Message::data(3, 4, 8, 10), 8);
        deliver(&mut node, &other_ack, 2, 5, Timestamp::ZERO);

        assert!(sent(&mut node).is_empty());
        assert!(node.ledger().is_empty());
    }

    #[test]
    fn test_msg_id_skips_pending_after_wrap() {
        let mut node = routed_sensor();
        node.next_msg_id = u16::MAX;
        assert_eq!(node.submit_reading(0, Timestamp::ZERO), Ok(u16::MAX));
        assert_eq!(node.submit_reading(0, Timestamp::ZERO), Ok(0));
        assert_eq!(node.submit_reading(0, Timestamp::ZERO), Ok(1));

        // Wrap back onto an id that is still outstanding
        node.next_msg_id = u16::MAX;
        assert_eq!(node.submit_reading(0, Timestamp::ZERO), Ok(2));
    }
}
