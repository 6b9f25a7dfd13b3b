//! Producer/Consumer identification and PC Event Report handling (§4.10).
//!
//! Identify-Producer/Consumer and Identify-Events-Global/Addressed walk
//! a per-node ordered producer/consumer sequence with an enumeration
//! cursor — the same shape `login::openlcb` already walks once at
//! login — so this module reuses that shape rather than inventing a
//! second one. `step` re-arms `node.announce_stage` on an
//! Identify-Events message and is called once per dispatcher iteration
//! until it returns `None`, exactly as `login::openlcb::step` is for
//! the one-time login announcement.

use openlcb_core::{Alias, EventId, EventState, Mti, NodeId};

use crate::buffer::{BasicBuffer, Message};
use crate::node_pool::{AnnounceStage, EventEntry, Node};

fn producer_mti(state: EventState) -> Mti {
    match state {
        EventState::Valid => Mti::ProducerIdentifiedValid,
        EventState::Invalid => Mti::ProducerIdentifiedInvalid,
        EventState::Unknown => Mti::ProducerIdentifiedUnknown,
    }
}

fn consumer_mti(state: EventState) -> Mti {
    match state {
        EventState::Valid => Mti::ConsumerIdentifiedValid,
        EventState::Invalid => Mti::ConsumerIdentifiedInvalid,
        EventState::Unknown => Mti::ConsumerIdentifiedUnknown,
    }
}

fn build_global<const P: usize, const C: usize, X>(node: &Node<'_, P, C, X>, mti: Mti, payload: &[u8]) -> Message {
    let mut buf = BasicBuffer::default();
    buf.source_alias = node.alias;
    buf.source_id = node.id;
    buf.dest_alias = Alias::NONE;
    buf.dest_id = NodeId::from_raw(0);
    buf.mti = mti;
    buf.set_payload(payload);
    Message::Basic(buf)
}

fn event_message<const P: usize, const C: usize, X>(node: &Node<'_, P, C, X>, mti_for: fn(EventState) -> Mti, entry: &EventEntry) -> Message {
    build_global(node, mti_for(entry.state), &entry.id.to_bytes())
}

/// Identify-Producer (§6 `0x0914`): if `event` is in this node's producer
/// list, announce its state. No reply if the node does not produce it.
pub fn identify_producer<const P: usize, const C: usize, X>(node: &Node<'_, P, C, X>, event: EventId) -> Option<Message> {
    node.producers.iter().find(|e| e.id == event).map(|entry| event_message(node, producer_mti, entry))
}

/// Identify-Consumer (§6 `0x08F4`): the consumer-side analog of
/// [`identify_producer`].
pub fn identify_consumer<const P: usize, const C: usize, X>(node: &Node<'_, P, C, X>, event: EventId) -> Option<Message> {
    node.consumers.iter().find(|e| e.id == event).map(|entry| event_message(node, consumer_mti, entry))
}

/// Identify-Events-Global/Addressed (§6 `0x0970`/`0x0968`) arms the full
/// re-announcement; the dispatcher then calls [`step`] once per
/// iteration until it returns `None`.
pub fn arm_announce<const P: usize, const C: usize, X>(node: &mut Node<'_, P, C, X>) {
    node.producers.reset_cursor();
    node.announce_stage = if node.producers.is_empty() {
        AnnounceStage::Consumers
    } else {
        AnnounceStage::Producers
    };
    if matches!(node.announce_stage, AnnounceStage::Consumers) {
        node.consumers.reset_cursor();
    }
}

/// Advance one step of a re-announcement armed by [`arm_announce`].
/// Returns `None` once every producer and consumer entry has been
/// announced, at which point `node.announce_stage` is back to `Idle`.
pub fn step<const P: usize, const C: usize, X>(node: &mut Node<'_, P, C, X>) -> Option<Message> {
    match node.announce_stage {
        AnnounceStage::Idle => None,
        AnnounceStage::Producers => {
            let Some(entry) = node.producers.current().copied() else {
                node.consumers.reset_cursor();
                node.announce_stage = AnnounceStage::Consumers;
                return step(node);
            };
            let msg = event_message(node, producer_mti, &entry);
            if node.producers.advance_cursor().is_none() {
                node.announce_stage = if node.consumers.is_empty() {
                    AnnounceStage::Idle
                } else {
                    AnnounceStage::Consumers
                };
            }
            Some(msg)
        }
        AnnounceStage::Consumers => {
            let Some(entry) = node.consumers.current().copied() else {
                node.announce_stage = AnnounceStage::Idle;
                return None;
            };
            let msg = event_message(node, consumer_mti, &entry);
            if node.consumers.advance_cursor().is_none() {
                node.announce_stage = AnnounceStage::Idle;
            }
            Some(msg)
        }
    }
}

/// PC Event Report, with or without payload (§6 `0x05B4`/`0x05F4`): the
/// application-level meaning of an event is out of scope here, so this
/// only recognizes whether the reported event is one this node
/// consumes. Returns the matched consumer entry, if any, for the caller
/// to act on.
pub fn report<'n, const P: usize, const C: usize, X>(node: &'n Node<'_, P, C, X>, event: EventId) -> Option<&'n EventEntry> {
    node.consumers.iter().find(|e| e.id == event)
}
