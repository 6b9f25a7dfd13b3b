//! Message-Network protocol and Simple Node Information Protocol (SNIP)
//! handlers (§4.10).
//!
//! Each function here answers one inbound MTI with the reply [`Message`]
//! it produces, or `None` when the MTI calls for no reply. The dispatcher
//! (§4.7) is the only caller: it already filtered addressed messages not
//! meant for this node (step 5) before reaching this module.

use heapless::Vec;

use openlcb_core::{Alias, Mti, NodeId};

use crate::buffer::{BasicBuffer, Message, SnipBuffer};
use crate::config_memory::AddressSpaceTable;
use openlcb_persistence::NodeParameters;

/// Build the Initialization-Complete message this node emits once OpenLCB
/// login finishes (§4.3, §4.10 "ours").
pub fn initialization_complete(source_alias: Alias, node_id: NodeId, simple: bool) -> Message {
    let mut buf = BasicBuffer::default();
    buf.source_alias = source_alias;
    buf.source_id = node_id;
    buf.mti = if simple {
        Mti::InitializationCompleteSimple
    } else {
        Mti::InitializationComplete
    };
    buf.set_payload(node_id.as_bytes());
    Message::Basic(buf)
}

fn verified_node_id(source_alias: Alias, node_id: NodeId) -> Message {
    let mut buf = BasicBuffer::default();
    buf.source_alias = source_alias;
    buf.source_id = node_id;
    buf.mti = Mti::VerifiedNodeId;
    buf.set_payload(node_id.as_bytes());
    Message::Basic(buf)
}

/// A Verify-Node-ID request (global or addressed) names us either by
/// carrying no id at all (a roll call) or by carrying our own id exactly
/// (§4.10).
fn targets_us(payload: &[u8], node_id: NodeId) -> bool {
    payload.is_empty() || payload == node_id.as_bytes()
}

fn protocol_support_reply(source_alias: Alias, dest_alias: Alias, node_id: NodeId, dest_id: NodeId, protocol_support: u64) -> Message {
    let mut buf = BasicBuffer::default();
    buf.source_alias = source_alias;
    buf.source_id = node_id;
    buf.dest_alias = dest_alias;
    buf.dest_id = dest_id;
    buf.mti = Mti::ProtocolSupportReply;
    let bytes = protocol_support.to_be_bytes();
    // `protocol_support` is defined over the low 48 bits (§4.9); take the
    // low 6 bytes of the big-endian u64 representation.
    buf.set_payload(&bytes[2..8]);
    Message::Basic(buf)
}

fn push_nul_terminated(out: &mut Vec<u8, { crate::buffer::SNIP_PAYLOAD_LEN }>, field: &[u8]) {
    // §4.10: a field that would overflow the reply is truncated, but the
    // fixed NUL-terminator count must survive — always end on a NUL even
    // if that means dropping the field's last content byte.
    let budget = out.capacity() - out.len();
    if field.len() <= budget {
        out.extend_from_slice(field).ok();
    } else if budget > 0 {
        out.extend_from_slice(&field[..budget - 1]).ok();
        out.push(0).ok();
    }
}

/// Build the Simple-Node-Info-Reply payload (§4.10): a version byte, the
/// four NUL-terminated manufacturer strings, a second version byte, then
/// the two NUL-terminated user strings.
pub fn simple_node_info_payload(parameters: &NodeParameters) -> Vec<u8, { crate::buffer::SNIP_PAYLOAD_LEN }> {
    let mut out = Vec::new();
    out.push(parameters.snip.version_mfg).ok();
    push_nul_terminated(&mut out, parameters.snip.manufacturer);
    push_nul_terminated(&mut out, parameters.snip.model);
    push_nul_terminated(&mut out, parameters.snip.hardware_version);
    push_nul_terminated(&mut out, parameters.snip.software_version);
    out.push(parameters.snip.version_user).ok();
    push_nul_terminated(&mut out, parameters.snip.user_name);
    push_nul_terminated(&mut out, parameters.snip.user_description);
    out
}

fn simple_node_info_reply(source_alias: Alias, node_id: NodeId, dest_alias: Alias, dest_id: NodeId, parameters: &NodeParameters) -> Message {
    let mut buf = SnipBuffer::default();
    buf.source_alias = source_alias;
    buf.source_id = node_id;
    buf.dest_alias = dest_alias;
    buf.dest_id = dest_id;
    buf.mti = Mti::SimpleNodeInfoReply;
    buf.set_payload(&simple_node_info_payload(parameters));
    Message::Snip(buf)
}

/// Answer one inbound message-network MTI, given the identity and
/// declared parameters of the node it arrived at. Returns `None` for
/// MTIs this module does not reply to (including datagram MTIs, handled
/// entirely by [`crate::datagram`]).
pub fn handle(source_alias: Alias, node_id: NodeId, parameters: &NodeParameters, inbound: &Message, _table: &mut AddressSpaceTable) -> Option<Message> {
    match inbound.mti() {
        Mti::VerifyNodeIdGlobal | Mti::VerifyNodeIdAddressed => {
            if targets_us(inbound.payload(), node_id) {
                Some(verified_node_id(source_alias, node_id))
            } else {
                None
            }
        }
        Mti::ProtocolSupportInquiry => Some(protocol_support_reply(
            source_alias,
            inbound.source_alias(),
            node_id,
            inbound.source_id(),
            parameters.protocol_support,
        )),
        Mti::SimpleNodeInfoRequest => Some(simple_node_info_reply(
            source_alias,
            node_id,
            inbound.source_alias(),
            inbound.source_id(),
            parameters,
        )),
        Mti::InitializationComplete
        | Mti::InitializationCompleteSimple
        | Mti::VerifiedNodeId
        | Mti::VerifiedNodeIdSimple
        | Mti::ProtocolSupportReply
        | Mti::SimpleNodeInfoReply
        | Mti::OptionalInteractionRejected
        | Mti::TerminateDueToError => None,
        _ => None,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use openlcb_persistence::Snip;

    const SNIP: Snip = Snip {
        version_mfg: 4,
        manufacturer: b"Acme\0",
        model: b"Widget\0",
        hardware_version: b"1.0\0",
        software_version: b"1.2.3\0",
        version_user: 2,
        user_name: b"engine7\0",
        user_description: b"\0",
    };
    const PARAMS: NodeParameters = NodeParameters {
        snip: SNIP,
        cdi_xml: None,
        protocol_support: 0x0000_FFFF_FFFF,
        declared_spaces: &[],
    };

    #[test]
    fn verify_node_id_global_replies_verified_node_id() {
        let node_id = NodeId::from_raw(0x0102_0304_0506);
        let mut buf = BasicBuffer::default();
        buf.source_alias = Alias::new(0x222);
        buf.mti = Mti::VerifyNodeIdGlobal;
        let inbound = Message::Basic(buf);

        let mut table = AddressSpaceTable::new();
        let reply = handle(Alias::new(0x111), node_id, &PARAMS, &inbound, &mut table).unwrap();
        assert_eq!(reply.mti(), Mti::VerifiedNodeId);
        assert_eq!(reply.payload(), node_id.as_bytes());
    }

    #[test]
    fn verify_node_id_with_mismatched_payload_gets_no_reply() {
        let node_id = NodeId::from_raw(1);
        let mut buf = BasicBuffer::default();
        buf.mti = Mti::VerifyNodeIdGlobal;
        buf.set_payload(&[0, 0, 0, 0, 0, 2]);
        let inbound = Message::Basic(buf);

        let mut table = AddressSpaceTable::new();
        assert!(handle(Alias::new(0x111), node_id, &PARAMS, &inbound, &mut table).is_none());
    }

    #[test]
    fn protocol_support_inquiry_replies_with_six_byte_bitmask() {
        let node_id = NodeId::from_raw(1);
        let mut buf = BasicBuffer::default();
        buf.mti = Mti::ProtocolSupportInquiry;
        buf.source_alias = Alias::new(0x222);
        let inbound = Message::Basic(buf);

        let mut table = AddressSpaceTable::new();
        let reply = handle(Alias::new(0x111), node_id, &PARAMS, &inbound, &mut table).unwrap();
        assert_eq!(reply.mti(), Mti::ProtocolSupportReply);
        assert_eq!(reply.payload(), &[0, 0, 0xFF, 0xFF, 0xFF, 0xFF]);
    }

    #[test]
    fn simple_node_info_reply_concatenates_mfg_and_user_groups() {
        let payload = simple_node_info_payload(&PARAMS);
        assert_eq!(payload[0], 4);
        assert!(payload.windows(5).any(|w| w == b"Acme\0"));
        let user_version_index = 1 + "Acme\0Widget\01.0\01.2.3\0".len();
        assert_eq!(payload[user_version_index], 2);
        assert!(payload.ends_with(b"\0"));
    }

    #[test]
    fn snip_truncation_still_ends_on_a_nul() {
        let mut out: Vec<u8, 6> = Vec::new();
        push_nul_terminated(&mut out, b"too-long-to-fit\0");
        assert_eq!(out.last(), Some(&0u8));
    }
}
