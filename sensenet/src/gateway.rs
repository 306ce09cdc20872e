//! Gateway role: relay DATA toward the sink and ACKs back toward sensors.
//!
//! The gateway ledger is keyed by delivery key, so a DATA and its ACK share
//! one entry. The entry's `gateway` field holds the neighbor the DATA came
//! from, which is where the ACK goes back to.
//!
//! DATA handling:
//!
//! | ledger state               | action                                        |
//! |----------------------------|-----------------------------------------------|
//! | unknown                    | record, forward                               |
//! | not acked, within holdoff  | radio duplicate: drop                         |
//! | not acked, after holdoff   | sender retransmitted: forward again           |
//! | acked                      | drop, or replay the ACK with `ack_replay`     |

use crate::config::NodeConfig;
use crate::node::Node;
use crate::time::Timestamp;
use crate::traits::{Clock, Radio, Random};
use crate::types::{HistoryEntry, Message, MessageKind, NodeAddr};

impl<Rd, R, Clk, Cfg> Node<Rd, R, Clk, Cfg>
where
    Rd: Radio,
    R: Random,
    Clk: Clock,
    Cfg: NodeConfig,
{
    pub(crate) fn handle_gateway_rx(&mut self, msg: &Message, from: NodeAddr, now: Timestamp) {
        match msg.kind {
            MessageKind::Data => self.relay_data(msg, from, now),
            MessageKind::Ack => self.relay_ack(msg, from, now),
            MessageKind::RouteProbe => {}
        }
    }

    fn relay_data(&mut self, msg: &Message, from: NodeAddr, now: Timestamp) {
        let (sender, msg_id) = msg.delivery_key();

        let known = self
            .ledger
            .lookup(sender, msg_id)
            .map(|e| (e.ack_received, e.last_handled));

        match known {
            None => {
                self.record_history(HistoryEntry::new(msg, Some(from), now));
                self.forward_data(msg, false);
            }
            Some((true, _)) => {
                if self.params.ack_replay {
                    let ack = Message::ack_for(msg, msg.destination);
                    emit_debug!(
                        self,
                        crate::debug::DebugEvent::AckReplayed {
                            sender,
                            msg_id,
                            to: from,
                        }
                    );
                    self.transmit(from, &ack);
                } else {
                    self.drop_duplicate(msg, from);
                }
            }
            Some((false, last_handled)) => {
                if now.saturating_sub(last_handled) < self.params.relay_holdoff {
                    self.drop_duplicate(msg, from);
                    return;
                }
                self.ledger.mark_retransmitted(sender, msg_id, now);
                self.ledger.set_gateway(sender, msg_id, from);
                self.forward_data(msg, true);
            }
        }
    }

    fn forward_data(&mut self, msg: &Message, _again: bool) {
        if let Some(_next_hop) = self.send_toward(*msg) {
            self.metrics.relayed += 1;
            emit_debug!(
                self,
                crate::debug::DebugEvent::DataForwarded {
                    sender: msg.sender,
                    msg_id: msg.msg_id,
                    next_hop: _next_hop,
                    again: _again,
                }
            );
        }
    }

    fn relay_ack(&mut self, msg: &Message, from: NodeAddr, now: Timestamp) {
        let (sensor, msg_id) = msg.delivery_key();

        let reverse_hop = match self.ledger.lookup(sensor, msg_id) {
            Some(entry) if entry.ack_received => {
                self.drop_duplicate(msg, from);
                return;
            }
            Some(entry) => entry.gateway,
            None => {
                // Relayed DATA already left the ring, or never passed here.
                let mut entry = HistoryEntry::new(msg, None, now);
                entry.ack_received = true;
                self.record_history(entry);
                None
            }
        };
        self.ledger.mark_acked(sensor, msg_id);

        let next_hop = match reverse_hop {
            Some(hop) => {
                self.transmit(hop, msg);
                Some(hop)
            }
            None => self.send_toward(*msg),
        };
        if let Some(_hop) = next_hop {
            self.metrics.relayed += 1;
            emit_debug!(
                self,
                crate::debug::DebugEvent::AckRelayed {
                    sensor,
                    msg_id,
                    next_hop: _hop,
                }
            );
        }
    }

    fn drop_duplicate(&mut self, msg: &Message, _from: NodeAddr) {
        self.metrics.duplicates_suppressed += 1;
        let (_sender, _msg_id) = msg.delivery_key();
        emit_debug!(
            self,
            crate::debug::DebugEvent::DuplicateDropped {
                kind: msg.kind,
                sender: _sender,
                msg_id: _msg_id,
                from: _from,
            }
        );
    }
}
