//! Main OpenLCB message dispatcher (§4.7): a single-threaded cooperative
//! state machine that pops one reassembled message at a time from the
//! OpenLCB FIFO, walks the node pool, addressability-filters per node,
//! and dispatches by MTI.
//!
//! One [`Dispatcher::step`] call performs one bounded unit of work,
//! mirroring the one-tick-per-call shape `login::can::step` and
//! `login::openlcb::step` already use: draining one queued outgoing CAN
//! frame, re-invoking a handler that asked to see the same (node,
//! message) pair again, or advancing to the next node and dispatching
//! once. Fragmentation of a queued outgoing [`Message`] is driven here
//! rather than handed back to the caller in one shot, so a momentarily
//! full CAN TX FIFO only costs a `RetryLater`, never a stall of the
//! whole dispatcher.

use openlcb_core::{DatagramError, EventId, Mti, NodeFlags};

use crate::buffer::{BasicBuffer, Fifo, Handle, Message};
use crate::config_memory::AddressSpaceTable;
use crate::datagram;
use crate::events;
use crate::fragmentation::{CanEmit, Fragments};
use crate::handlers::OptionalHandlers;
use crate::message_network;
use crate::node_pool::{AnnounceStage, Node, NodePool};
use crate::result::StepResult;

/// Error code for a synthesized Optional-Interaction-Rejected reply
/// (§4.7 step 6, §6 `0x0068`). Payload carries this code followed by the
/// offending MTI, both big-endian — the same two-field shape
/// Datagram-Rejected uses for its error code (§4.8).
const OPTIONAL_INTERACTION_REJECTED: u16 = 0x1043;

/// The node-pool cursor key the dispatcher owns (§4.6: "the main
/// dispatcher a third" cursor, after the two login state machines, which
/// step a `&mut Node` directly rather than walking the pool themselves).
pub const NODE_CURSOR: usize = 0;

struct Outgoing {
    message: Message,
    offset: usize,
    emitted_any: bool,
}

struct Current {
    message: Message,
    reenumerate: bool,
}

/// Single-threaded cooperative message dispatcher (§4.7).
pub struct Dispatcher {
    outgoing: Option<Outgoing>,
    current: Option<Current>,
    released: Option<Handle>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub const fn new() -> Self {
        Self {
            outgoing: None,
            current: None,
            released: None,
        }
    }

    fn queue_outgoing(&mut self, message: Message) {
        self.outgoing = Some(Outgoing {
            message,
            offset: 0,
            emitted_any: false,
        });
    }

    /// A buffer handle this node was holding against an outstanding
    /// datagram acknowledgement (§4.8 sender role) that the last `step`
    /// released, if any. The caller frees it from its `BufferStore`.
    pub fn take_released_datagram(&mut self) -> Option<Handle> {
        self.released.take()
    }

    /// Drive one bounded step. `try_submit` is offered at most one CAN
    /// frame and returns whether its TX path accepted it — the
    /// `is_tx_buffer_clear` gate of §4.5. `handlers` is the Train
    /// Control/Train Search-style extension point, consulted only for
    /// an addressed MTI the built-in dispatch table declines; pass
    /// `&mut ()` for a node with no such extension.
    pub fn step<const PRODUCERS: usize, const CONSUMERS: usize, const CAP: usize, const CURSORS: usize, const FIFO_N: usize, X>(
        &mut self,
        fifo: &mut Fifo<Message, FIFO_N>,
        nodes: &mut NodePool<CAP, PRODUCERS, CONSUMERS, CURSORS, X>,
        table: &mut AddressSpaceTable,
        handlers: &mut impl OptionalHandlers<PRODUCERS, CONSUMERS, X>,
        mut try_submit: impl FnMut(CanEmit) -> bool,
    ) -> StepResult {
        // Step 1: drain a queued outgoing message one CAN frame at a time.
        if let Some(outgoing) = self.outgoing.as_mut() {
            let mut fragments = Fragments::resume(&outgoing.message, outgoing.offset, outgoing.emitted_any);
            return match fragments.next() {
                Some(frame) => {
                    if try_submit(frame) {
                        let (offset, emitted_any) = fragments.state();
                        outgoing.offset = offset;
                        outgoing.emitted_any = emitted_any;
                        StepResult::Progressed
                    } else {
                        StepResult::RetryLater
                    }
                }
                None => {
                    self.outgoing = None;
                    StepResult::Progressed
                }
            };
        }

        // Step 2: a handler asked to be re-invoked against the same
        // (node, message) pair (datagram second pass, event re-announce).
        if let Some(current) = self.current.as_mut() {
            if current.reenumerate {
                let Some(node_index) = nodes.cursor(NODE_CURSOR) else {
                    current.reenumerate = false;
                    self.current = None;
                    return StepResult::Progressed;
                };
                let Some(node) = nodes.get_mut(node_index) else {
                    current.reenumerate = false;
                    self.current = None;
                    return StepResult::Progressed;
                };
                let (more, reply, released) = redispatch(node, &current.message, table);
                current.reenumerate = more;
                if released.is_some() {
                    self.released = released;
                }
                if let Some(reply) = reply {
                    self.queue_outgoing(reply);
                }
                return StepResult::Progressed;
            }
        }

        // Step 3/4: pop the next message, or advance the node cursor for
        // the one already in flight.
        if self.current.is_none() {
            let Some(message) = fifo.pop() else {
                return StepResult::Idle;
            };
            self.current = Some(Current { message, reenumerate: false });
            nodes.get_first(NODE_CURSOR);
        } else if nodes.get_next(NODE_CURSOR).is_none() {
            // Cursor ran off the end: the message has been offered to
            // every node. Release it; the next step pops a fresh one.
            self.current = None;
            return StepResult::Progressed;
        }

        let Some(current) = self.current.as_mut() else {
            return StepResult::Progressed;
        };
        let Some(node_index) = nodes.cursor(NODE_CURSOR) else {
            self.current = None;
            return StepResult::Progressed;
        };
        let Some(node) = nodes.get_mut(node_index) else {
            return StepResult::Progressed;
        };

        // Step 5: addressability filter.
        if !addressed_to(node, &current.message) {
            return StepResult::Progressed;
        }

        // Step 6: dispatch on MTI.
        let (more, reply, released) = dispatch(node, &current.message, table, handlers);
        current.reenumerate = more;
        if released.is_some() {
            self.released = released;
        }
        if let Some(reply) = reply {
            self.queue_outgoing(reply);
        }
        StepResult::Progressed
    }
}

fn addressed_to<const P: usize, const C: usize, X>(node: &Node<'_, P, C, X>, message: &Message) -> bool {
    message.mti().is_global() || message.dest_alias() == node.alias
}

fn decoded_event(message: &Message) -> Option<EventId> {
    let payload = message.payload();
    if payload.len() < 8 {
        return None;
    }
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&payload[..8]);
    Some(EventId::from_raw(u64::from_be_bytes(bytes)))
}

fn error_code_from_payload(payload: &[u8]) -> Option<u16> {
    if payload.len() < 2 {
        return None;
    }
    Some(u16::from_be_bytes([payload[0], payload[1]]))
}

/// (re-invoke flag, reply message, sender-role buffer handle released)
type Outcome = (bool, Option<Message>, Option<Handle>);

fn dispatch_datagram<const P: usize, const C: usize, X>(node: &mut Node<'_, P, C, X>, message: &Message, table: &mut AddressSpaceTable) -> Outcome {
    if node.flags.contains(NodeFlags::DATAGRAM_ACK_SENT) {
        execute_datagram(node, message, table)
    } else {
        let ack = datagram::acknowledge(table, message.payload());
        node.flags.insert(NodeFlags::DATAGRAM_ACK_SENT);
        let reply = datagram::reply_message(&ack, node.alias, message.source_alias());
        (true, Some(reply), None)
    }
}

fn execute_datagram<const P: usize, const C: usize, X>(node: &mut Node<'_, P, C, X>, message: &Message, table: &mut AddressSpaceTable) -> Outcome {
    node.flags.remove(NodeFlags::DATAGRAM_ACK_SENT);
    let reply = match datagram::execute(table, message.payload()) {
        Ok(Some(payload)) => Some(datagram::reply_datagram_message(&payload, node.alias, message.source_alias())),
        Ok(None) => None,
        Err(err) => Some(datagram::reply_message(&datagram::Reply::rejected(err), node.alias, message.source_alias())),
    };
    (false, reply, None)
}

fn continue_announce<const P: usize, const C: usize, X>(node: &mut Node<'_, P, C, X>) -> Outcome {
    let reply = events::step(node);
    (!matches!(node.announce_stage, AnnounceStage::Idle), reply, None)
}

fn redispatch<const P: usize, const C: usize, X>(node: &mut Node<'_, P, C, X>, message: &Message, table: &mut AddressSpaceTable) -> Outcome {
    if node.flags.contains(NodeFlags::DATAGRAM_ACK_SENT) {
        execute_datagram(node, message, table)
    } else {
        continue_announce(node)
    }
}

fn optional_interaction_rejected<const P: usize, const C: usize, X>(node: &Node<'_, P, C, X>, inbound: &Message) -> Message {
    let mut buf = BasicBuffer::default();
    buf.source_alias = node.alias;
    buf.source_id = node.id;
    buf.dest_alias = inbound.source_alias();
    buf.dest_id = inbound.source_id();
    buf.mti = Mti::OptionalInteractionRejected;
    let code = OPTIONAL_INTERACTION_REJECTED.to_be_bytes();
    let offending = inbound.mti().value().to_be_bytes();
    buf.set_payload(&[code[0], code[1], offending[0], offending[1]]);
    Message::Basic(buf)
}

fn dispatch<const P: usize, const C: usize, X>(
    node: &mut Node<'_, P, C, X>,
    message: &Message,
    table: &mut AddressSpaceTable,
    handlers: &mut impl OptionalHandlers<P, C, X>,
) -> Outcome {
    match message.mti() {
        Mti::Datagram => dispatch_datagram(node, message, table),
        Mti::DatagramReceivedOk | Mti::DatagramRejected => {
            let code = error_code_from_payload(message.payload());
            let released = datagram::on_acknowledgement(node, message.mti(), code);
            (false, None, released)
        }
        Mti::IdentifyEventsGlobal | Mti::IdentifyEventsAddressed => {
            events::arm_announce(node);
            continue_announce(node)
        }
        Mti::IdentifyProducer => (false, decoded_event(message).and_then(|e| events::identify_producer(node, e)), None),
        Mti::IdentifyConsumer => (false, decoded_event(message).and_then(|e| events::identify_consumer(node, e)), None),
        Mti::PcEventReport | Mti::PcEventReportWithPayload => {
            decoded_event(message).and_then(|e| events::report(node, e));
            (false, None, None)
        }
        Mti::Other(_) => match handlers.handle(node, message) {
            Some(reply) => (false, reply, None),
            None if message.mti().is_addressed() => (false, Some(optional_interaction_rejected(node, message)), None),
            None => (false, None, None),
        },
        _ => (false, message_network::handle(node.alias, node.id, node.parameters, message, table), None),
    }
}
