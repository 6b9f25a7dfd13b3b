//! 64-bit publish/subscribe event identifiers (§3, GLOSSARY).

use byteorder::{BigEndian, ByteOrder};
use core::fmt;

use crate::node_id::NodeId;

/// A 64-bit Event ID. The top 48 bits are conventionally the Node ID of
/// the node that first minted the event, but the type makes no attempt to
/// enforce that — it is a convention, not a wire invariant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EventId(u64);

impl EventId {
    pub const fn from_raw(value: u64) -> Self {
        Self(value)
    }

    pub fn from_bytes(bytes: [u8; 8]) -> Self {
        Self(BigEndian::read_u64(&bytes))
    }

    pub fn as_raw(&self) -> u64 {
        self.0
    }

    pub fn to_bytes(self) -> [u8; 8] {
        let mut buf = [0u8; 8];
        BigEndian::write_u64(&mut buf, self.0);
        buf
    }

    /// Construct an event whose top 48 bits are `node_id` and whose low 16
    /// bits are a node-local event number — the conventional layout used
    /// by auto-created events.
    pub fn from_node_and_number(node_id: NodeId, number: u16) -> Self {
        Self((node_id.as_raw() << 16) | number as u64)
    }

    pub fn node_id(&self) -> NodeId {
        NodeId::from_raw(self.0 >> 16)
    }
}

impl From<u64> for EventId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<EventId> for u64 {
    fn from(value: EventId) -> Self {
        value.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016X}", self.0)
    }
}

/// Per-event state tracked by a node's producer or consumer list (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EventState {
    Valid,
    Invalid,
    Unknown,
}

impl Default for EventState {
    fn default() -> Self {
        Self::Unknown
    }
}
