//! Post-alias OpenLCB login (§2 "Login SM (OpenLCB)", §4.3's
//! `LoadInitComplete` onward): Initialization-Complete, then enumerated
//! Producer-Identified and Consumer-Identified announcements.

use openlcb_core::{Alias, EventState, Mti, NodeId, RunState};

use crate::buffer::BasicBuffer;
use crate::node_pool::{EventEntry, Node};
use crate::result::StepResult;

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

fn build_global<const P: usize, const C: usize, X>(node: &Node<'_, P, C, X>, mti: Mti, payload: &[u8]) -> BasicBuffer {
    let mut buf = BasicBuffer::default();
    buf.source_alias = node.alias;
    buf.source_id = node.id;
    buf.dest_alias = Alias::NONE;
    buf.dest_id = NodeId::from_raw(0);
    buf.mti = mti;
    buf.set_payload(payload);
    buf
}

fn event_message<const P: usize, const C: usize, X>(
    node: &Node<'_, P, C, X>,
    mti_for: fn(EventState) -> Mti,
    entry: &EventEntry,
) -> BasicBuffer {
    build_global(node, mti_for(entry.state), &entry.id.to_bytes())
}

/// Advance `node`'s post-alias login by one step.
pub fn step<const P: usize, const C: usize, X>(node: &mut Node<'_, P, C, X>) -> (StepResult, Option<BasicBuffer>) {
    match node.run_state {
        RunState::LoadInitComplete => {
            let msg = build_global(node, Mti::InitializationComplete, node.id.as_bytes());
            node.flags.insert(openlcb_core::NodeFlags::INITIALIZED);
            node.run_state = RunState::LoadProducerEvents;
            (StepResult::Progressed, Some(msg))
        }
        RunState::LoadProducerEvents => {
            let Some(entry) = node.producers.current().copied() else {
                node.consumers.reset_cursor();
                node.run_state = RunState::LoadConsumerEvents;
                return (StepResult::Progressed, None);
            };
            let msg = event_message(node, producer_mti, &entry);
            if node.producers.advance_cursor().is_none() {
                node.consumers.reset_cursor();
                node.run_state = RunState::LoadConsumerEvents;
            }
            (StepResult::Progressed, Some(msg))
        }
        RunState::LoadConsumerEvents => {
            let Some(entry) = node.consumers.current().copied() else {
                node.run_state = RunState::LoginComplete;
                return (StepResult::Progressed, None);
            };
            let msg = event_message(node, consumer_mti, &entry);
            if node.consumers.advance_cursor().is_none() {
                node.run_state = RunState::LoginComplete;
            }
            (StepResult::Progressed, Some(msg))
        }
        RunState::LoginComplete => {
            node.run_state = RunState::Run;
            (StepResult::Progressed, None)
        }
        _ => (StepResult::Idle, None),
    }
}
