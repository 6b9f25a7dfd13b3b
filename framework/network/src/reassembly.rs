//! CAN RX classification and reassembly (§4.4).
//!
//! [`classify`] turns one raw CAN frame into a [`Classified`] value
//! without touching any shared state. [`ReassemblyList`] then stitches
//! First/Middle/Last sequences (keyed per §4.4 point 3 by `(source_alias,
//! dest_alias, mti)`) into a completed [`crate::buffer::Message`];
//! control frames (CID/RID/AMD/AMR/AME) and already-complete Single
//! frames are returned to the caller immediately since they never touch
//! the reassembly list.

use heapless::Vec;

use openlcb_core::{Alias, Mti, NodeId};

use crate::buffer::{BasicBuffer, DatagramBuffer, Message, SnipBuffer, DATAGRAM_PAYLOAD_LEN, SNIP_PAYLOAD_LEN};
use crate::wire::addressed::{self, SequenceFlag};
use crate::wire::can::{CanId, Frame, FrameType};

/// One of the four CID frames, carrying a 12-bit slice of a candidate
/// Node ID (§4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CidStep {
    Cid7,
    Cid6,
    Cid5,
    Cid4,
}

/// A frame this module recognized but that carries no reassembled
/// message — alias-claim control traffic (§4.3, §4.4 point 6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Control {
    Cid {
        step: CidStep,
        alias: Alias,
        node_id_bits: u16,
    },
    Rid {
        alias: Alias,
    },
    /// Alias Map Definition: `alias` claims `node_id`. Always updates the
    /// alias map; a collision with a permitted local alias is reported
    /// via [`Classified::AliasCollision`] instead of this variant.
    Amd {
        alias: Alias,
        node_id: NodeId,
    },
    Amr {
        alias: Alias,
        node_id: Option<NodeId>,
    },
    Ame {
        alias: Alias,
        node_id: Option<NodeId>,
    },
    ErrorInformationReport {
        alias: Alias,
    },
}

/// The outcome of classifying and (if applicable) reassembling one
/// inbound CAN frame.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Classified {
    /// Alias-claim control traffic; no message to push to the OpenLCB
    /// FIFO.
    Control(Control),
    /// A foreign frame's source alias collides with an alias a local
    /// node already holds as permitted (§4.2, §4.4 point "Alias-collision
    /// detection runs on every received frame"). The caller should set
    /// `has_duplicate_alias` on the alias map.
    AliasCollision { alias: Alias },
    /// A complete OpenLCB message is ready to push onto the OpenLCB
    /// FIFO.
    Message(Message),
    /// A Middle/Last frame arrived with no matching First (the First was
    /// presumably lost or evicted); the frame is dropped (§4.4 point 4).
    Dropped,
    /// A frame this stack does not assign meaning to.
    Unknown,
}

fn basic_message(id: CanId, payload: &[u8]) -> Message {
    let mti = Mti::from(id.variable_field);
    let mut buf = BasicBuffer::default();
    buf.source_alias = id.source_alias;
    buf.mti = mti;
    if mti.is_addressed() && payload.len() >= 2 {
        let (_, dest) = addressed::unpack([payload[0], payload[1]]);
        buf.dest_alias = dest;
        buf.set_payload(&payload[2..]);
    } else {
        buf.set_payload(payload);
    }
    Message::Basic(buf)
}

fn datagram_message(source_alias: Alias, dest_alias: Alias, payload: &[u8]) -> Message {
    let mut buf = DatagramBuffer::default();
    buf.source_alias = source_alias;
    buf.dest_alias = dest_alias;
    buf.mti = Mti::Datagram;
    buf.set_payload(payload);
    Message::Datagram(buf)
}

/// Classify one raw CAN frame (§4.4). Performs no alias-map or
/// reassembly-list bookkeeping; callers drive [`ReassemblyList`] with the
/// `Message{First,Middle,Last}` shape this function reports internally
/// via [`ReassemblyList::accept`] instead of through this enum — this
/// function alone already resolves every Single-frame case.
pub fn classify(frame: &Frame<&[u8]>) -> Classified {
    let id = frame.id();
    let payload = frame.payload();

    match id.frame_type {
        FrameType::Cid7 => Classified::Control(Control::Cid {
            step: CidStep::Cid7,
            alias: id.source_alias,
            node_id_bits: id.variable_field,
        }),
        FrameType::Cid6 => Classified::Control(Control::Cid {
            step: CidStep::Cid6,
            alias: id.source_alias,
            node_id_bits: id.variable_field,
        }),
        FrameType::Cid5 => Classified::Control(Control::Cid {
            step: CidStep::Cid5,
            alias: id.source_alias,
            node_id_bits: id.variable_field,
        }),
        FrameType::Cid4 => Classified::Control(Control::Cid {
            step: CidStep::Cid4,
            alias: id.source_alias,
            node_id_bits: id.variable_field,
        }),
        FrameType::Rid => Classified::Control(Control::Rid {
            alias: id.source_alias,
        }),
        FrameType::Amd => {
            if payload.len() < 6 {
                return Classified::Unknown;
            }
            let mut bytes = [0u8; 6];
            bytes.copy_from_slice(&payload[..6]);
            Classified::Control(Control::Amd {
                alias: id.source_alias,
                node_id: NodeId::from_bytes(bytes),
            })
        }
        FrameType::Amr => Classified::Control(Control::Amr {
            alias: id.source_alias,
            node_id: node_id_from_optional_payload(payload),
        }),
        FrameType::Ame => Classified::Control(Control::Ame {
            alias: id.source_alias,
            node_id: node_id_from_optional_payload(payload),
        }),
        FrameType::ErrorInformationReport => Classified::Control(Control::ErrorInformationReport {
            alias: id.source_alias,
        }),
        FrameType::Message => {
            let mti = Mti::from(id.variable_field);
            if mti.is_global() {
                return Classified::Message(basic_message(id, payload));
            }
            if payload.len() < 2 {
                return Classified::Unknown;
            }
            let (flag, _dest) = addressed::unpack([payload[0], payload[1]]);
            match flag {
                SequenceFlag::Only => Classified::Message(basic_message(id, payload)),
                // First/Middle/Last need the reassembly list's state;
                // `reassemble` handles those shapes itself and only
                // falls back to this function for the cases above.
                SequenceFlag::First | SequenceFlag::Middle | SequenceFlag::Last => Classified::Unknown,
            }
        }
        FrameType::DatagramOnlyFrame => Classified::Message(datagram_message(
            id.source_alias,
            Alias::new(id.variable_field),
            payload,
        )),
        FrameType::DatagramFirstFrame
        | FrameType::DatagramMiddleFrame
        | FrameType::DatagramLastFrame => Classified::Unknown,
        FrameType::Unknown(_) => Classified::Unknown,
    }
}

fn node_id_from_optional_payload(payload: &[u8]) -> Option<NodeId> {
    if payload.len() < 6 {
        return None;
    }
    let mut bytes = [0u8; 6];
    bytes.copy_from_slice(&payload[..6]);
    Some(NodeId::from_bytes(bytes))
}

/// One pending multi-frame reassembly context (§4.4 point 3's key).
struct Context<const N: usize> {
    source_alias: Alias,
    dest_alias: Alias,
    mti: Mti,
    data: Vec<u8, N>,
}

/// Fixed-capacity list of in-flight reassembly contexts, keyed by
/// `(source_alias, dest_alias, mti)` (§4.4). `N` is the per-context byte
/// capacity (253 for the Message class covering SNIP-sized replies, 72
/// for the Datagram class); `CAP` is how many concurrent reassemblies
/// this stack tracks — interleaved multi-frame messages from different
/// sources are allowed up to that limit (§5 ordering guarantees).
pub struct ReassemblyList<const CAP: usize, const N: usize> {
    contexts: [Option<Context<N>>; CAP],
}

impl<const CAP: usize, const N: usize> Default for ReassemblyList<CAP, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const CAP: usize, const N: usize> ReassemblyList<CAP, N> {
    pub const fn new() -> Self {
        Self {
            contexts: [const { None }; CAP],
        }
    }

    fn find(&self, source_alias: Alias, dest_alias: Alias, mti: Mti) -> Option<usize> {
        self.contexts.iter().position(|c| {
            matches!(c, Some(ctx) if ctx.source_alias == source_alias && ctx.dest_alias == dest_alias && ctx.mti == mti)
        })
    }

    /// Begin a new reassembly. Fails with `None` (frame dropped, §4.4)
    /// when the list has no free slot (§7 resource exhaustion policy).
    pub fn begin(&mut self, source_alias: Alias, dest_alias: Alias, mti: Mti, body: &[u8]) -> bool {
        let Some(slot) = self.contexts.iter().position(|c| c.is_none()) else {
            return false;
        };
        let mut data = Vec::new();
        data.extend_from_slice(body).ok();
        self.contexts[slot] = Some(Context {
            source_alias,
            dest_alias,
            mti,
            data,
        });
        true
    }

    /// Append to an in-flight reassembly. Returns `false` (frame dropped)
    /// if no matching context exists.
    pub fn append(&mut self, source_alias: Alias, dest_alias: Alias, mti: Mti, body: &[u8]) -> bool {
        let Some(index) = self.find(source_alias, dest_alias, mti) else {
            return false;
        };
        let ctx = self.contexts[index].as_mut().unwrap();
        ctx.data.extend_from_slice(body).is_ok()
    }

    /// Append the final chunk and remove the context, returning the
    /// concatenated bytes. Returns `None` (frame dropped) if no matching
    /// context exists.
    pub fn finish(&mut self, source_alias: Alias, dest_alias: Alias, mti: Mti, body: &[u8]) -> Option<(Alias, Alias, Mti, Vec<u8, N>)> {
        let index = self.find(source_alias, dest_alias, mti)?;
        let mut ctx = self.contexts[index].take().unwrap();
        ctx.data.extend_from_slice(body).ok();
        Some((ctx.source_alias, ctx.dest_alias, ctx.mti, ctx.data))
    }
}

/// The two concrete reassembly lists this stack needs (§4.4 point 3):
/// one for Message-class First/Middle/Last (sized for a SNIP reply, the
/// largest non-datagram multi-frame message), one for Datagram-class.
pub type MessageReassembly<const CAP: usize> = ReassemblyList<CAP, SNIP_PAYLOAD_LEN>;
pub type DatagramReassembly<const CAP: usize> = ReassemblyList<CAP, DATAGRAM_PAYLOAD_LEN>;

/// Drive both reassembly lists with one classified frame, producing a
/// completed [`Message`] (or dropping/continuing as appropriate). This
/// is the function RX context calls for every frame `classify` alone
/// didn't already resolve to a [`Classified::Message`] or
/// [`Classified::Control`].
pub fn reassemble<const MCAP: usize, const DCAP: usize>(
    frame: &Frame<&[u8]>,
    messages: &mut MessageReassembly<MCAP>,
    datagrams: &mut DatagramReassembly<DCAP>,
) -> Classified {
    let id = frame.id();
    let payload = frame.payload();

    match id.frame_type {
        FrameType::Message => {
            let mti = Mti::from(id.variable_field);
            if mti.is_global() || payload.len() < 2 {
                return classify(frame);
            }
            let (flag, dest) = addressed::unpack([payload[0], payload[1]]);
            let body = &payload[2..];
            match flag {
                SequenceFlag::Only => classify(frame),
                SequenceFlag::First => {
                    messages.begin(id.source_alias, dest, mti, body);
                    Classified::Dropped
                }
                SequenceFlag::Middle => {
                    messages.append(id.source_alias, dest, mti, body);
                    Classified::Dropped
                }
                SequenceFlag::Last => match messages.finish(id.source_alias, dest, mti, body) {
                    Some((source_alias, dest_alias, mti, data)) => {
                        let mut buf = SnipBuffer::default();
                        buf.source_alias = source_alias;
                        buf.dest_alias = dest_alias;
                        buf.mti = mti;
                        buf.set_payload(&data);
                        Classified::Message(Message::Snip(buf))
                    }
                    None => Classified::Dropped,
                },
            }
        }
        FrameType::DatagramOnlyFrame => classify(frame),
        FrameType::DatagramFirstFrame => {
            let dest = Alias::new(id.variable_field);
            datagrams.begin(id.source_alias, dest, Mti::Datagram, payload);
            Classified::Dropped
        }
        FrameType::DatagramMiddleFrame => {
            let dest = Alias::new(id.variable_field);
            datagrams.append(id.source_alias, dest, Mti::Datagram, payload);
            Classified::Dropped
        }
        FrameType::DatagramLastFrame => {
            let dest = Alias::new(id.variable_field);
            match datagrams.finish(id.source_alias, dest, Mti::Datagram, payload) {
                Some((source_alias, dest_alias, _, data)) => {
                    Classified::Message(datagram_message(source_alias, dest_alias, &data))
                }
                None => Classified::Dropped,
            }
        }
        _ => classify(frame),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::wire::can::Frame as CanFrame;

    fn frame_bytes(id: CanId, payload: &[u8]) -> heapless::Vec<u8, 12> {
        let mut buf: heapless::Vec<u8, 12> = heapless::Vec::new();
        buf.resize_default(4 + payload.len()).ok();
        let mut f = CanFrame::new_unchecked(&mut buf[..]);
        f.set_id(id);
        f.payload_mut().copy_from_slice(payload);
        buf
    }

    #[test]
    fn single_frame_global_message_is_immediate() {
        let id = CanId {
            frame_type: FrameType::Message,
            variable_field: Mti::VerifyNodeIdGlobal.value(),
            source_alias: Alias::new(0xABC),
        };
        let buf = frame_bytes(id, &[]);
        let frame = CanFrame::new_checked(&buf[..]).unwrap();
        match classify(&frame) {
            Classified::Message(Message::Basic(m)) => {
                assert_eq!(m.mti, Mti::VerifyNodeIdGlobal);
                assert_eq!(m.source_alias, Alias::new(0xABC));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn addressed_only_frame_splits_header_and_body() {
        let id = CanId {
            frame_type: FrameType::Message,
            variable_field: Mti::VerifyNodeIdAddressed.value(),
            source_alias: Alias::new(0x123),
        };
        let mut payload = heapless::Vec::<u8, 8>::new();
        payload.extend_from_slice(&addressed::pack(SequenceFlag::Only, Alias::new(0x456))).ok();
        payload.extend_from_slice(&[1, 2, 3]).ok();
        let buf = frame_bytes(id, &payload);
        let frame = CanFrame::new_checked(&buf[..]).unwrap();
        match classify(&frame) {
            Classified::Message(Message::Basic(m)) => {
                assert_eq!(m.dest_alias, Alias::new(0x456));
                assert_eq!(m.payload(), &[1, 2, 3]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn reassembles_interleaved_first_middle_last_from_two_sources() {
        let mut messages: MessageReassembly<4> = ReassemblyList::new();
        let mut datagrams: DatagramReassembly<2> = ReassemblyList::new();

        let mti = Mti::SimpleNodeInfoReply;
        let a = Alias::new(0x100);
        let b = Alias::new(0x200);
        let dest = Alias::new(0x300);

        let first_a = frame_of(FrameType::Message, mti.value(), a, SequenceFlag::First, dest, b"AAAAAA");
        let first_b = frame_of(FrameType::Message, mti.value(), b, SequenceFlag::First, dest, b"BBBBBB");
        let last_a = frame_of(FrameType::Message, mti.value(), a, SequenceFlag::Last, dest, b"11");
        let last_b = frame_of(FrameType::Message, mti.value(), b, SequenceFlag::Last, dest, b"22");

        assert!(matches!(
            reassemble(&CanFrame::new_checked(&first_a[..]).unwrap(), &mut messages, &mut datagrams),
            Classified::Dropped
        ));
        assert!(matches!(
            reassemble(&CanFrame::new_checked(&first_b[..]).unwrap(), &mut messages, &mut datagrams),
            Classified::Dropped
        ));

        let msg_a = reassemble(&CanFrame::new_checked(&last_a[..]).unwrap(), &mut messages, &mut datagrams);
        let msg_b = reassemble(&CanFrame::new_checked(&last_b[..]).unwrap(), &mut messages, &mut datagrams);

        match msg_a {
            Classified::Message(Message::Snip(m)) => assert_eq!(m.payload(), b"AAAAAA11"),
            other => panic!("unexpected {:?}", other),
        }
        match msg_b {
            Classified::Message(Message::Snip(m)) => assert_eq!(m.payload(), b"BBBBBB22"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn middle_frame_with_no_first_is_dropped() {
        let mut messages: MessageReassembly<2> = ReassemblyList::new();
        let mut datagrams: DatagramReassembly<2> = ReassemblyList::new();
        let frame_bytes = frame_of(
            FrameType::Message,
            Mti::SimpleNodeInfoReply.value(),
            Alias::new(0x1),
            SequenceFlag::Middle,
            Alias::new(0x2),
            b"xxxxxx",
        );
        let result = reassemble(&CanFrame::new_checked(&frame_bytes[..]).unwrap(), &mut messages, &mut datagrams);
        assert!(matches!(result, Classified::Dropped));
    }

    #[test]
    fn datagram_reassembly_round_trip() {
        let mut messages: MessageReassembly<2> = ReassemblyList::new();
        let mut datagrams: DatagramReassembly<2> = ReassemblyList::new();
        let source = Alias::new(0xABC);
        let dest = Alias::new(0x321);

        let first = frame_bytes(
            CanId {
                frame_type: FrameType::DatagramFirstFrame,
                variable_field: dest.value(),
                source_alias: source,
            },
            b"12345678",
        );
        let last = frame_bytes(
            CanId {
                frame_type: FrameType::DatagramLastFrame,
                variable_field: dest.value(),
                source_alias: source,
            },
            b"90",
        );

        assert!(matches!(
            reassemble(&CanFrame::new_checked(&first[..]).unwrap(), &mut messages, &mut datagrams),
            Classified::Dropped
        ));
        match reassemble(&CanFrame::new_checked(&last[..]).unwrap(), &mut messages, &mut datagrams) {
            Classified::Message(Message::Datagram(m)) => {
                assert_eq!(m.payload(), b"1234567890");
                assert_eq!(m.source_alias, source);
                assert_eq!(m.dest_alias, dest);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn amd_control_frame_carries_full_node_id() {
        let id = CanId {
            frame_type: FrameType::Amd,
            variable_field: crate::wire::can::AMD_VARIABLE_FIELD,
            source_alias: Alias::new(0x555),
        };
        let buf = frame_bytes(id, &[0x01, 0x02, 0x03, 0x04, 0x05, 0x06]);
        let frame = CanFrame::new_checked(&buf[..]).unwrap();
        match classify(&frame) {
            Classified::Control(Control::Amd { alias, node_id }) => {
                assert_eq!(alias, Alias::new(0x555));
                assert_eq!(node_id, NodeId::from_raw(0x0102_0304_0506));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    fn frame_of(
        frame_type: FrameType,
        mti: u16,
        source: Alias,
        flag: SequenceFlag,
        dest: Alias,
        body: &[u8],
    ) -> heapless::Vec<u8, 12> {
        let id = CanId {
            frame_type,
            variable_field: mti,
            source_alias: source,
        };
        let mut payload: heapless::Vec<u8, 8> = heapless::Vec::new();
        payload.extend_from_slice(&addressed::pack(flag, dest)).ok();
        payload.extend_from_slice(body).ok();
        frame_bytes(id, &payload)
    }
}
