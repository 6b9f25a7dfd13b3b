//! CAN TX fragmentation (§4.5): splits one outbound OpenLCB message into
//! the CAN frames that carry it.
//!
//! [`Fragments`] is the mirror image of [`crate::reassembly`]: an
//! iterator rather than a one-shot function, so a caller whose CAN TX
//! FIFO is momentarily full can hold the iterator and resume from where
//! it left off instead of recomputing the split (§4.5 `is_tx_buffer_clear`
//! gating, driven by `dispatcher`).

use heapless::Vec;

use openlcb_core::{Alias, Mti};

use crate::buffer::Message;
use crate::wire::addressed::{self, SequenceFlag};
use crate::wire::can::{CanId, FrameType};

/// Bytes of message body carried per frame once a header occupies the
/// first two payload bytes (addressed Message-class First/Middle/Last).
pub const MESSAGE_BODY_CHUNK: usize = 6;
/// Bytes of datagram body carried per frame (no in-frame header; the
/// destination alias lives in the identifier).
pub const DATAGRAM_BODY_CHUNK: usize = 8;

/// A frame fragmentation wants transmitted.
#[derive(Debug, Clone)]
pub struct CanEmit {
    pub id: CanId,
    pub payload: Vec<u8, 8>,
}

/// Lazily splits one [`Message`] into the CAN frames that carry it.
/// Exhausted once `next()` returns `None`.
pub struct Fragments<'a> {
    message: &'a Message,
    offset: usize,
    emitted_any: bool,
}

impl<'a> Fragments<'a> {
    pub fn new(message: &'a Message) -> Self {
        Self {
            message,
            offset: 0,
            emitted_any: false,
        }
    }

    /// Rebuild an iterator picking up after `offset`/`emitted_any` bytes
    /// and frames have already gone out (`dispatcher` holds only the
    /// `Message` itself between steps, not a live iterator borrowing it,
    /// so it persists this pair and resumes from it on the next step).
    pub(crate) fn resume(message: &'a Message, offset: usize, emitted_any: bool) -> Self {
        Self { message, offset, emitted_any }
    }

    /// The `(offset, emitted_any)` pair needed to [`resume`](Self::resume)
    /// this iterator later.
    pub(crate) fn state(&self) -> (usize, bool) {
        (self.offset, self.emitted_any)
    }

    fn single(mti: Mti, source_alias: Alias, payload: &[u8]) -> CanEmit {
        let mut out = Vec::new();
        out.extend_from_slice(payload).ok();
        CanEmit {
            id: CanId {
                frame_type: FrameType::Message,
                variable_field: mti.value(),
                source_alias,
            },
            payload: out,
        }
    }

    fn next_message_frame(&mut self, payload: &[u8], mti: Mti, source_alias: Alias, dest_alias: Alias) -> Option<CanEmit> {
        if payload.len() <= MESSAGE_BODY_CHUNK {
            if self.emitted_any {
                return None;
            }
            self.emitted_any = true;
            let mut out = Vec::new();
            out.extend_from_slice(&addressed::pack(SequenceFlag::Only, dest_alias)).ok();
            out.extend_from_slice(payload).ok();
            return Some(CanEmit {
                id: CanId {
                    frame_type: FrameType::Message,
                    variable_field: mti.value(),
                    source_alias,
                },
                payload: out,
            });
        }

        if self.offset >= payload.len() {
            return None;
        }

        let remaining = payload.len() - self.offset;
        let chunk_len = remaining.min(MESSAGE_BODY_CHUNK);
        let is_first = self.offset == 0;
        let is_last = remaining <= MESSAGE_BODY_CHUNK;
        let flag = if is_first {
            SequenceFlag::First
        } else if is_last {
            SequenceFlag::Last
        } else {
            SequenceFlag::Middle
        };

        let mut out = Vec::new();
        out.extend_from_slice(&addressed::pack(flag, dest_alias)).ok();
        out.extend_from_slice(&payload[self.offset..self.offset + chunk_len]).ok();
        self.offset += chunk_len;
        self.emitted_any = true;

        Some(CanEmit {
            id: CanId {
                frame_type: FrameType::Message,
                variable_field: mti.value(),
                source_alias,
            },
            payload: out,
        })
    }

    fn next_datagram_frame(&mut self, payload: &[u8], source_alias: Alias, dest_alias: Alias) -> Option<CanEmit> {
        if payload.len() <= DATAGRAM_BODY_CHUNK {
            if self.emitted_any {
                return None;
            }
            self.emitted_any = true;
            let mut out = Vec::new();
            out.extend_from_slice(payload).ok();
            return Some(CanEmit {
                id: CanId {
                    frame_type: FrameType::DatagramOnlyFrame,
                    variable_field: dest_alias.value(),
                    source_alias,
                },
                payload: out,
            });
        }

        if self.offset >= payload.len() {
            return None;
        }

        let remaining = payload.len() - self.offset;
        let chunk_len = remaining.min(DATAGRAM_BODY_CHUNK);
        let is_first = self.offset == 0;
        let is_last = remaining <= DATAGRAM_BODY_CHUNK;
        let frame_type = if is_first {
            FrameType::DatagramFirstFrame
        } else if is_last {
            FrameType::DatagramLastFrame
        } else {
            FrameType::DatagramMiddleFrame
        };

        let mut out = Vec::new();
        out.extend_from_slice(&payload[self.offset..self.offset + chunk_len]).ok();
        self.offset += chunk_len;
        self.emitted_any = true;

        Some(CanEmit {
            id: CanId {
                frame_type,
                variable_field: dest_alias.value(),
                source_alias,
            },
            payload: out,
        })
    }
}

impl<'a> Iterator for Fragments<'a> {
    type Item = CanEmit;

    fn next(&mut self) -> Option<CanEmit> {
        let payload = self.message.payload();
        let mti = self.message.mti();
        let source_alias = self.message.source_alias();
        let dest_alias = self.message.dest_alias();

        if self.message.is_datagram() {
            return self.next_datagram_frame(payload, source_alias, dest_alias);
        }

        if !mti.is_addressed() {
            if self.emitted_any {
                return None;
            }
            self.emitted_any = true;
            return Some(Self::single(mti, source_alias, payload));
        }

        self.next_message_frame(payload, mti, source_alias, dest_alias)
    }
}

/// Split `message` into the CAN frames that carry it (§4.5).
pub fn fragment(message: &Message) -> Fragments<'_> {
    Fragments::new(message)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::buffer::{BasicBuffer, DatagramBuffer, SnipBuffer};
    use crate::reassembly::{self, DatagramReassembly, MessageReassembly};
    use crate::wire::can::Frame as CanFrame;

    fn frame_bytes(emit: &CanEmit) -> heapless::Vec<u8, 12> {
        let mut buf: heapless::Vec<u8, 12> = heapless::Vec::new();
        buf.resize_default(4 + emit.payload.len()).ok();
        let mut f = CanFrame::new_unchecked(&mut buf[..]);
        f.set_id(emit.id);
        f.payload_mut().copy_from_slice(&emit.payload);
        buf
    }

    #[test]
    fn global_message_is_a_single_frame() {
        let mut buf = BasicBuffer::default();
        buf.source_alias = Alias::new(0x123);
        buf.mti = Mti::VerifyNodeIdGlobal;
        let message = Message::Basic(buf);

        let frames: heapless::Vec<CanEmit, 4> = fragment(&message).collect();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].id.frame_type, FrameType::Message);
        assert!(frames[0].payload.is_empty());
    }

    #[test]
    fn short_addressed_message_is_one_only_frame() {
        let mut buf = BasicBuffer::default();
        buf.source_alias = Alias::new(0x100);
        buf.dest_alias = Alias::new(0x200);
        buf.mti = Mti::VerifyNodeIdAddressed;
        buf.set_payload(&[1, 2, 3]);
        let message = Message::Basic(buf);

        let frames: heapless::Vec<CanEmit, 4> = fragment(&message).collect();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload.len(), 5);
    }

    #[test]
    fn long_addressed_message_round_trips_through_reassembly() {
        let mut buf = SnipBuffer::default();
        buf.source_alias = Alias::new(0x321);
        buf.dest_alias = Alias::new(0x456);
        buf.mti = Mti::SimpleNodeInfoReply;
        let body: heapless::Vec<u8, 20> = (0..20u8).collect();
        buf.set_payload(&body);
        let message = Message::Snip(buf);

        let mut messages: MessageReassembly<2> = MessageReassembly::new();
        let mut datagrams: DatagramReassembly<2> = DatagramReassembly::new();

        let emits: heapless::Vec<CanEmit, 8> = fragment(&message).collect();
        assert!(emits.len() > 1, "a 20-byte body must not fit in one frame");

        let mut delivered = None;
        for emit in &emits {
            let bytes = frame_bytes(emit);
            let frame = CanFrame::new_checked(&bytes[..]).unwrap();
            let result = reassembly::reassemble(&frame, &mut messages, &mut datagrams);
            if let reassembly::Classified::Message(m) = result {
                delivered = Some(m);
            }
        }

        let delivered = delivered.expect("last frame must deliver the reassembled message");
        assert_eq!(delivered.payload(), &body[..]);
        assert_eq!(delivered.source_alias(), Alias::new(0x321));
        assert_eq!(delivered.dest_alias(), Alias::new(0x456));
    }

    #[test]
    fn datagram_longer_than_one_frame_splits_first_middle_last() {
        let mut buf = DatagramBuffer::default();
        buf.source_alias = Alias::new(0xAAA);
        buf.dest_alias = Alias::new(0xBBB);
        buf.mti = Mti::Datagram;
        let body: heapless::Vec<u8, 20> = (0..20u8).collect();
        buf.set_payload(&body);
        let message = Message::Datagram(buf);

        let frames: heapless::Vec<CanEmit, 4> = fragment(&message).collect();
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].id.frame_type, FrameType::DatagramFirstFrame);
        assert_eq!(frames[1].id.frame_type, FrameType::DatagramMiddleFrame);
        assert_eq!(frames[2].id.frame_type, FrameType::DatagramLastFrame);
        assert_eq!(frames[0].id.variable_field, 0xBBB);
    }

    #[test]
    fn short_datagram_is_one_only_frame() {
        let mut buf = DatagramBuffer::default();
        buf.source_alias = Alias::new(0x1);
        buf.dest_alias = Alias::new(0x2);
        buf.mti = Mti::Datagram;
        buf.set_payload(&[1, 2, 3, 4]);
        let message = Message::Datagram(buf);

        let frames: heapless::Vec<CanEmit, 4> = fragment(&message).collect();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].id.frame_type, FrameType::DatagramOnlyFrame);
    }
}
