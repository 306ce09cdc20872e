//! Server role: terminal sink.
//!
//! Every DATA addressed to the server is recorded and acknowledged, but a
//! reading reaches the application only the first time its delivery key is
//! seen. Later copies (radio duplicates, or retransmissions after an ACK was
//! lost) are answered with a fresh ACK so the sensor can stop retrying.

use crate::config::NodeConfig;
use crate::node::Node;
use crate::time::Timestamp;
use crate::traits::{Clock, Radio, Random};
use crate::types::{Event, HistoryEntry, Message, MessageKind, NodeAddr};

impl<Rd, R, Clk, Cfg> Node<Rd, R, Clk, Cfg>
where
    Rd: Radio,
    R: Random,
    Clk: Clock,
    Cfg: NodeConfig,
{
    pub(crate) fn handle_server_rx(&mut self, msg: &Message, from: NodeAddr, now: Timestamp) {
        if msg.kind != MessageKind::Data || msg.destination != self.addr() {
            emit_debug!(
                self,
                crate::debug::DebugEvent::FrameIgnored {
                    from,
                    kind: Some(msg.kind),
                    reason: "not data for this sink",
                }
            );
            return;
        }

        let recorded = self.record_history(HistoryEntry::new(msg, Some(from), now));
        if recorded.is_new {
            self.metrics.delivered += 1;
            self.push_event(Event::DataReceived {
                sender: msg.sender,
                value: msg.value,
                msg_id: msg.msg_id,
            });
        } else {
            self.metrics.duplicates_suppressed += 1;
        }

        // Back over the link the DATA arrived on.
        let ack = Message::ack_for(msg, self.addr());
        self.transmit(from, &ack);
        self.ledger.mark_acked(msg.sender, msg.msg_id);
        emit_debug!(
            self,
            crate::debug::DebugEvent::AckSent {
                sender: msg.sender,
                msg_id: msg.msg_id,
                to: from,
                duplicate: !recorded.is_new,
            }
        );
    }
}
