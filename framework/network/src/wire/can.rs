//! The 29-bit extended CAN identifier format carrying OpenLCB traffic
//! (§4, §6), and a read/write wrapper around a raw CAN frame buffer.
//!
//! Every OpenLCB CAN identifier sets bit 28; bits 27-24 are a frame-type
//! nibble (`FrameType`) and bits 11-0 are always the sender's source
//! alias. The meaning of bits 23-12 (the "variable field") and of the
//! 0-8 byte data payload both depend on the frame type (§6): a CID frame
//! packs one 12-bit chunk of a candidate Node ID into the variable field
//! and carries no payload at all; an AMD frame carries the full Node ID
//! in its payload instead; a Datagram frame (one of the four types `0xA`
//! through `0xD`, matching only/first/middle/last) carries the
//! destination alias in the variable field and up to eight bytes of
//! datagram body as payload; an ordinary message frame (`0x9`, global or
//! addressed) carries the 16-bit MTI directly in the variable field
//! (every defined MTI other than the `Datagram` tag itself fits in
//! twelve bits), with an addressed message's destination alias carried
//! in the first two payload bytes instead (`reassembly`/`fragmentation`
//! interpret the payload this way; this module only moves bytes).
//!
//! RID, AMD, AME and AMR share frame-type nibble `0x0`: they are all
//! "CAN control frame, no OpenLCB message" and carry no MTI, so the
//! variable field doubles as their discriminator (`0x700`-`0x703`)
//! instead of an MTI or Node ID fragment.

use byteorder::{BigEndian, ByteOrder};
use core::fmt;

use openlcb_core::Alias;

use super::{Error, Result};

mod field {
    pub type Field = core::ops::Range<usize>;
}

/// Bit 28 of the 29-bit identifier, set on every OpenLCB CAN frame.
pub const FORMAT_BIT: u32 = 0x1000_0000;
const FRAME_TYPE_SHIFT: u32 = 24;
const FRAME_TYPE_MASK: u32 = 0xF << FRAME_TYPE_SHIFT;
const VARIABLE_FIELD_SHIFT: u32 = 12;
const VARIABLE_FIELD_MASK: u32 = 0xFFF << VARIABLE_FIELD_SHIFT;
const ALIAS_MASK: u32 = 0xFFF;

/// Variable-field discriminators for the four frame types sharing
/// nibble `0x0` (§6).
pub const RID_VARIABLE_FIELD: u16 = 0x700;
pub const AMD_VARIABLE_FIELD: u16 = 0x701;
pub const AME_VARIABLE_FIELD: u16 = 0x702;
pub const AMR_VARIABLE_FIELD: u16 = 0x703;

/// The sixteen-slot frame-type nibble occupying bits 27-24 of the
/// identifier (§4.3, §4.4, §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FrameType {
    Rid,
    Amd,
    Amr,
    Ame,
    Cid4,
    Cid5,
    Cid6,
    Cid7,
    ErrorInformationReport,
    Message,
    DatagramOnlyFrame,
    DatagramFirstFrame,
    DatagramMiddleFrame,
    DatagramLastFrame,
    /// A nibble value this stack does not assign a meaning to.
    Unknown(u8),
}

impl FrameType {
    pub const fn nibble(self) -> u8 {
        match self {
            FrameType::Rid | FrameType::Amd | FrameType::Amr | FrameType::Ame => 0x0,
            FrameType::Cid4 => 0x4,
            FrameType::Cid5 => 0x5,
            FrameType::Cid6 => 0x6,
            FrameType::Cid7 => 0x7,
            FrameType::ErrorInformationReport => 0x8,
            FrameType::Message => 0x9,
            FrameType::DatagramOnlyFrame => 0xA,
            FrameType::DatagramFirstFrame => 0xB,
            FrameType::DatagramMiddleFrame => 0xC,
            FrameType::DatagramLastFrame => 0xD,
            FrameType::Unknown(n) => n,
        }
    }

    /// Resolves a decoded `(nibble, variable_field)` pair to a frame
    /// type. Nibble `0x0` is shared by RID/AMD/AME/AMR, so unlike every
    /// other nibble it needs the variable field to disambiguate.
    const fn from_nibble(nibble: u8, variable_field: u16) -> Self {
        match nibble {
            0x0 => match variable_field {
                RID_VARIABLE_FIELD => FrameType::Rid,
                AMD_VARIABLE_FIELD => FrameType::Amd,
                AME_VARIABLE_FIELD => FrameType::Ame,
                AMR_VARIABLE_FIELD => FrameType::Amr,
                _ => FrameType::Unknown(0x0),
            },
            0x4 => FrameType::Cid4,
            0x5 => FrameType::Cid5,
            0x6 => FrameType::Cid6,
            0x7 => FrameType::Cid7,
            0x8 => FrameType::ErrorInformationReport,
            0x9 => FrameType::Message,
            0xA => FrameType::DatagramOnlyFrame,
            0xB => FrameType::DatagramFirstFrame,
            0xC => FrameType::DatagramMiddleFrame,
            0xD => FrameType::DatagramLastFrame,
            other => FrameType::Unknown(other),
        }
    }

    pub const fn is_datagram(self) -> bool {
        matches!(
            self,
            FrameType::DatagramOnlyFrame
                | FrameType::DatagramFirstFrame
                | FrameType::DatagramMiddleFrame
                | FrameType::DatagramLastFrame
        )
    }

    pub const fn is_cid(self) -> bool {
        matches!(
            self,
            FrameType::Cid4 | FrameType::Cid5 | FrameType::Cid6 | FrameType::Cid7
        )
    }
}

impl fmt::Display for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}(0x{:X})", self, self.nibble())
    }
}

/// A decomposed 29-bit OpenLCB CAN identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CanId {
    pub frame_type: FrameType,
    pub variable_field: u16,
    pub source_alias: Alias,
}

impl CanId {
    pub fn from_raw(raw: u32) -> Self {
        let nibble = ((raw & FRAME_TYPE_MASK) >> FRAME_TYPE_SHIFT) as u8;
        let variable_field = ((raw & VARIABLE_FIELD_MASK) >> VARIABLE_FIELD_SHIFT) as u16;
        let frame_type = FrameType::from_nibble(nibble, variable_field);
        let source_alias = Alias::new((raw & ALIAS_MASK) as u16);
        Self {
            frame_type,
            variable_field,
            source_alias,
        }
    }

    pub fn as_raw(&self) -> u32 {
        FORMAT_BIT
            | ((self.frame_type.nibble() as u32) << FRAME_TYPE_SHIFT)
            | ((self.variable_field as u32) << VARIABLE_FIELD_SHIFT)
            | (u16::from(self.source_alias) as u32)
    }
}

impl fmt::Display for CanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} var=0x{:03X} src={}",
            self.frame_type, self.variable_field, self.source_alias
        )
    }
}

/// A read/write wrapper around a CAN frame buffer: 4 bytes of identifier
/// (only the low 29 bits are meaningful) followed by 0-8 bytes of
/// payload.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Frame<T: AsRef<[u8]>> {
    buffer: T,
}

mod frame_field {
    use super::field::Field;
    pub const ID: Field = 0..4;
    pub const PAYLOAD_START: usize = 4;
}

pub const HEADER_LEN: usize = frame_field::PAYLOAD_START;
pub const MAX_PAYLOAD_LEN: usize = 8;

impl<T: AsRef<[u8]>> Frame<T> {
    pub const fn new_unchecked(buffer: T) -> Frame<T> {
        Frame { buffer }
    }

    pub fn new_checked(buffer: T) -> Result<Frame<T>> {
        let frame = Self::new_unchecked(buffer);
        frame.check_len()?;
        Ok(frame)
    }

    pub fn check_len(&self) -> Result<()> {
        let len = self.buffer.as_ref().len();
        if len < HEADER_LEN || len - HEADER_LEN > MAX_PAYLOAD_LEN {
            Err(Error)
        } else {
            Ok(())
        }
    }

    pub fn into_inner(self) -> T {
        self.buffer
    }

    pub const fn buffer_len(payload_len: usize) -> usize {
        HEADER_LEN + payload_len
    }

    pub fn id(&self) -> CanId {
        CanId::from_raw(BigEndian::read_u32(&self.buffer.as_ref()[frame_field::ID]))
    }
}

impl<'a, T: AsRef<[u8]> + ?Sized> Frame<&'a T> {
    pub fn payload(&self) -> &'a [u8] {
        &self.buffer.as_ref()[frame_field::PAYLOAD_START..]
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> Frame<T> {
    pub fn set_id(&mut self, id: CanId) {
        BigEndian::write_u32(&mut self.buffer.as_mut()[frame_field::ID], id.as_raw());
    }

    pub fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.buffer.as_mut()[frame_field::PAYLOAD_START..]
    }
}

impl<T: AsRef<[u8]>> AsRef<[u8]> for Frame<T> {
    fn as_ref(&self) -> &[u8] {
        self.buffer.as_ref()
    }
}

impl<T: AsRef<[u8]>> fmt::Display for Frame<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CAN id={}", self.id())
    }
}
