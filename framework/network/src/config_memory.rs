//! Configuration-memory command decode and address-space dispatch (§4.9).
//!
//! Sits beneath [`crate::datagram`]: given the byte-for-byte payload of
//! an inbound Memory-Configuration datagram, decides which declared
//! [`AddressSpaceHandler`] to call and builds the reply payload. Bound
//! checking against `info().highest_address` happens here, once, so
//! every `AddressSpaceHandler` implementation only has to move bytes
//! (§4.9's redesign note).

use heapless::Vec;

use openlcb_core::DatagramError;
use openlcb_persistence::{AddressSpaceHandler, AddressSpaceId, AddressSpaceInfo, MemoryError};

use crate::buffer::DATAGRAM_PAYLOAD_LEN;

/// First payload byte of every Memory-Configuration datagram (§6, §8 S3).
pub const PROTOCOL_MEMORY_CONFIGURATION: u8 = 0x20;

pub const CMD_READ_BASE: u8 = 0x40;
pub const CMD_WRITE_BASE: u8 = 0x44;
pub const CMD_WRITE_UNDER_MASK: u8 = 0x48;
pub const CMD_READ_REPLY_OK_BASE: u8 = 0x50;
pub const REPLY_FAIL_BIT: u8 = 0x08;
pub const CMD_GET_ADDRESS_SPACE_INFO: u8 = 0x84;
pub const CMD_RESERVE_LOCK: u8 = 0x88;
pub const CMD_FREEZE: u8 = 0xA0;
pub const CMD_UNFREEZE: u8 = 0xA1;
pub const CMD_UPDATE_COMPLETE: u8 = 0xA8;
pub const CMD_RESET_REBOOT: u8 = 0xA9;
pub const CMD_FACTORY_RESET: u8 = 0xAA;

/// The decoded second payload byte (the actual memory-configuration
/// command, distinct from the `0x20` protocol-select byte in front of
/// it).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Read { nibble: u8 },
    Write { nibble: u8 },
    WriteUnderMask,
    GetAddressSpaceInfo,
    ReserveLock,
    Freeze,
    Unfreeze,
    UpdateComplete,
    ResetReboot,
    FactoryReset,
    Unknown(u8),
}

impl Command {
    pub fn decode(byte: u8) -> Command {
        if (CMD_READ_BASE..CMD_READ_BASE + 4).contains(&byte) {
            Command::Read { nibble: byte - CMD_READ_BASE }
        } else if (CMD_WRITE_BASE..CMD_WRITE_BASE + 4).contains(&byte) {
            Command::Write { nibble: byte - CMD_WRITE_BASE }
        } else if byte == CMD_WRITE_UNDER_MASK {
            Command::WriteUnderMask
        } else if byte == CMD_GET_ADDRESS_SPACE_INFO {
            Command::GetAddressSpaceInfo
        } else if byte == CMD_RESERVE_LOCK {
            Command::ReserveLock
        } else if byte == CMD_FREEZE {
            Command::Freeze
        } else if byte == CMD_UNFREEZE {
            Command::Unfreeze
        } else if byte == CMD_UPDATE_COMPLETE {
            Command::UpdateComplete
        } else if byte == CMD_RESET_REBOOT {
            Command::ResetReboot
        } else if byte == CMD_FACTORY_RESET {
            Command::FactoryReset
        } else {
            Command::Unknown(byte)
        }
    }
}

/// Up to eight declared address spaces, each backed by a caller-supplied
/// [`AddressSpaceHandler`] value held in a fixed-size mapping keyed by
/// space id.
pub struct AddressSpaceTable<'a> {
    handlers: [Option<(AddressSpaceId, &'a mut dyn AddressSpaceHandler)>; 8],
}

impl<'a> AddressSpaceTable<'a> {
    pub fn new() -> Self {
        Self {
            handlers: core::array::from_fn(|_| None),
        }
    }

    /// Declare `handler` as backing `id`. Fails if every slot is already
    /// taken.
    pub fn register(&mut self, id: AddressSpaceId, handler: &'a mut dyn AddressSpaceHandler) -> bool {
        match self.handlers.iter_mut().find(|slot| slot.is_none()) {
            Some(slot) => {
                *slot = Some((id, handler));
                true
            }
            None => false,
        }
    }

    pub fn get_mut(&mut self, id: AddressSpaceId) -> Option<&mut dyn AddressSpaceHandler> {
        self.handlers.iter_mut().find_map(|slot| match slot {
            Some((sid, handler)) if *sid == id => Some(&mut **handler),
            _ => None,
        })
    }
}

impl<'a> Default for AddressSpaceTable<'a> {
    fn default() -> Self {
        Self::new()
    }
}

fn translate_memory_error(err: MemoryError) -> DatagramError {
    match err {
        MemoryError::OutOfBounds => DatagramError::PermanentOutOfBounds,
        MemoryError::ReadOnly => DatagramError::PermanentWriteToReadOnly,
        MemoryError::ShortTransfer => DatagramError::TemporaryTransferError,
    }
}

fn resolve_space(nibble: u8, payload: &[u8]) -> Option<AddressSpaceId> {
    if nibble == 0 {
        payload.get(6).copied().and_then(AddressSpaceId::from_byte)
    } else {
        AddressSpaceId::from_well_known_nibble(nibble)
    }
}

fn body_offset(nibble: u8) -> usize {
    if nibble == 0 {
        7
    } else {
        6
    }
}

fn address(payload: &[u8]) -> Option<u32> {
    if payload.len() < 6 {
        return None;
    }
    Some(u32::from_be_bytes([payload[2], payload[3], payload[4], payload[5]]))
}

/// Reply-payload buffer type: one datagram's worth of bytes.
pub type ReplyPayload = Vec<u8, DATAGRAM_PAYLOAD_LEN>;

/// Execute a Read command (§4.9, §8 S3/S4), appending the Read-Reply-OK
/// payload to `out` on success.
pub fn process_read(table: &mut AddressSpaceTable, nibble: u8, payload: &[u8], out: &mut ReplyPayload) -> Result<(), DatagramError> {
    let space = resolve_space(nibble, payload).ok_or(DatagramError::PermanentAddressSpaceUnknown)?;
    let addr = address(payload).ok_or(DatagramError::PermanentInvalidArguments)?;
    let offset = body_offset(nibble);
    let count = *payload.get(offset).ok_or(DatagramError::PermanentInvalidArguments)? as usize;
    if count == 0 {
        // §8 S4: count 0 is rejected as a permanent invalid-arguments error.
        return Err(DatagramError::PermanentInvalidArguments);
    }

    let handler = table.get_mut(space).ok_or(DatagramError::PermanentAddressSpaceUnknown)?;
    let info = handler.info();
    if !info.present {
        return Err(DatagramError::PermanentAddressSpaceUnknown);
    }
    if addr > info.highest_address {
        return Err(DatagramError::PermanentOutOfBounds);
    }
    let clamped = count.min((info.highest_address - addr + 1) as usize).min(64);

    let mut buf = [0u8; 64];
    let read = handler.read(addr, &mut buf[..clamped]).map_err(translate_memory_error)?;
    if read < clamped {
        return Err(DatagramError::TemporaryTransferError);
    }

    out.push(PROTOCOL_MEMORY_CONFIGURATION).ok();
    out.push(CMD_READ_REPLY_OK_BASE + nibble).ok();
    out.extend_from_slice(&addr.to_be_bytes()).ok();
    if nibble == 0 {
        out.push(space.byte()).ok();
    }
    out.push(read as u8).ok();
    out.extend_from_slice(&buf[..read]).ok();
    Ok(())
}

/// Execute a Write command (§4.9). No reply payload: success is conveyed
/// by the datagram layer's own OK acknowledgement.
pub fn process_write(table: &mut AddressSpaceTable, nibble: u8, payload: &[u8]) -> Result<(), DatagramError> {
    let space = resolve_space(nibble, payload).ok_or(DatagramError::PermanentAddressSpaceUnknown)?;
    let addr = address(payload).ok_or(DatagramError::PermanentInvalidArguments)?;
    let offset = body_offset(nibble);
    let data = payload.get(offset..).ok_or(DatagramError::PermanentInvalidArguments)?;
    if data.is_empty() {
        return Err(DatagramError::PermanentInvalidArguments);
    }

    let handler = table.get_mut(space).ok_or(DatagramError::PermanentAddressSpaceUnknown)?;
    let info = handler.info();
    if !info.present {
        return Err(DatagramError::PermanentAddressSpaceUnknown);
    }
    if info.read_only {
        return Err(DatagramError::PermanentWriteToReadOnly);
    }
    let last = addr as u64 + data.len() as u64 - 1;
    if last > info.highest_address as u64 {
        return Err(DatagramError::PermanentOutOfBounds);
    }

    let written = handler.write(addr, data).map_err(translate_memory_error)?;
    if written < data.len() {
        return Err(DatagramError::TemporaryTransferError);
    }
    Ok(())
}

/// Execute a Write-Under-Mask command (§4.9): the trailing bytes split
/// evenly into a data half and a same-length mask half.
pub fn process_write_under_mask(table: &mut AddressSpaceTable, payload: &[u8]) -> Result<(), DatagramError> {
    let space = payload
        .get(6)
        .copied()
        .and_then(AddressSpaceId::from_byte)
        .ok_or(DatagramError::PermanentAddressSpaceUnknown)?;
    let addr = address(payload).ok_or(DatagramError::PermanentInvalidArguments)?;
    let rest = payload.get(7..).ok_or(DatagramError::PermanentInvalidArguments)?;
    if rest.is_empty() || rest.len() % 2 != 0 {
        return Err(DatagramError::PermanentInvalidArguments);
    }
    let half = rest.len() / 2;
    let (data, mask) = rest.split_at(half);

    let handler = table.get_mut(space).ok_or(DatagramError::PermanentAddressSpaceUnknown)?;
    let info = handler.info();
    if !info.present {
        return Err(DatagramError::PermanentAddressSpaceUnknown);
    }
    if info.read_only {
        return Err(DatagramError::PermanentWriteToReadOnly);
    }
    let last = addr as u64 + half as u64 - 1;
    if last > info.highest_address as u64 {
        return Err(DatagramError::PermanentOutOfBounds);
    }

    let written = handler.write_under_mask(addr, data, mask).map_err(translate_memory_error)?;
    if written < half {
        return Err(DatagramError::TemporaryTransferError);
    }
    Ok(())
}

/// Execute a Get-Address-Space-Info command (§4.9): `payload[2]` names
/// the space byte directly (this command is never nibble-encoded).
pub fn process_get_address_space_info(table: &mut AddressSpaceTable, payload: &[u8], out: &mut ReplyPayload) -> Result<(), DatagramError> {
    let space_byte = *payload.get(2).ok_or(DatagramError::PermanentInvalidArguments)?;
    let space = AddressSpaceId::from_byte(space_byte).ok_or(DatagramError::PermanentAddressSpaceUnknown)?;
    let info = table
        .get_mut(space)
        .map(|handler| handler.info())
        .unwrap_or_else(AddressSpaceInfo::absent);

    out.push(PROTOCOL_MEMORY_CONFIGURATION).ok();
    out.push(CMD_GET_ADDRESS_SPACE_INFO + 2).ok();
    out.push(space_byte).ok();
    out.extend_from_slice(&info.highest_address.to_be_bytes()).ok();
    out.push(u8::from(!info.present)).ok();
    out.push(u8::from(info.read_only)).ok();
    Ok(())
}

/// Reset-reboot and factory-reset dispatch to a caller-supplied hook;
/// `None` answers with `permanent-not-implemented` (§4.9).
pub fn process_reset_hook(hook: Option<impl FnOnce()>) -> Result<(), DatagramError> {
    match hook {
        Some(f) => {
            f();
            Ok(())
        }
        None => Err(DatagramError::PermanentNotImplemented),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    struct Ram {
        data: [u8; 64],
        read_only: bool,
    }

    impl AddressSpaceHandler for Ram {
        fn info(&self) -> AddressSpaceInfo {
            AddressSpaceInfo {
                present: true,
                read_only: self.read_only,
                low_address: 0,
                highest_address: 63,
            }
        }

        fn read(&mut self, address: u32, buf: &mut [u8]) -> Result<usize, MemoryError> {
            let start = address as usize;
            let n = buf.len().min(self.data.len().saturating_sub(start));
            buf[..n].copy_from_slice(&self.data[start..start + n]);
            Ok(n)
        }

        fn write(&mut self, address: u32, data: &[u8]) -> Result<usize, MemoryError> {
            if self.read_only {
                return Err(MemoryError::ReadOnly);
            }
            let start = address as usize;
            let n = data.len().min(self.data.len().saturating_sub(start));
            self.data[start..start + n].copy_from_slice(&data[..n]);
            Ok(n)
        }
    }

    #[test]
    fn read_four_bytes_of_config_space() {
        let mut ram = Ram {
            data: [0u8; 64],
            read_only: false,
        };
        ram.data[0x10..0x14].copy_from_slice(&[0xAA, 0xBB, 0xCC, 0xDD]);
        let mut table = AddressSpaceTable::new();
        table.register(AddressSpaceId::Config, &mut ram);

        let payload = [0x20u8, 0x43, 0x00, 0x00, 0x00, 0x10, 0x04];
        assert_eq!(Command::decode(payload[1]), Command::Read { nibble: 3 });
        assert_eq!(resolve_space(3, &payload), Some(AddressSpaceId::Config));

        let mut out: ReplyPayload = Vec::new();
        process_read(&mut table, 3, &payload, &mut out).unwrap();
        assert_eq!(&out[..], &[0x20, 0x53, 0x00, 0x00, 0x00, 0x10, 0x04, 0xAA, 0xBB, 0xCC, 0xDD]);
    }

    #[test]
    fn zero_count_read_is_rejected_as_invalid_arguments() {
        let mut ram = Ram {
            data: [0u8; 64],
            read_only: false,
        };
        let mut table = AddressSpaceTable::new();
        table.register(AddressSpaceId::Config, &mut ram);

        let payload = [0x20u8, 0x43, 0x00, 0x00, 0x00, 0x10, 0x00];
        let mut out: ReplyPayload = Vec::new();
        let err = process_read(&mut table, 3, &payload, &mut out).unwrap_err();
        assert_eq!(err, DatagramError::PermanentInvalidArguments);
        assert_eq!(err.code(), 0x1080);
    }

    #[test]
    fn write_to_read_only_space_is_rejected() {
        let mut ram = Ram {
            data: [0u8; 64],
            read_only: true,
        };
        let mut table = AddressSpaceTable::new();
        table.register(AddressSpaceId::Cdi, &mut ram);

        let payload = [0x20u8, 0x42, 0x00, 0x00, 0x00, 0x00, 0xAA];
        let err = process_write(&mut table, 2, &payload).unwrap_err();
        assert_eq!(err, DatagramError::PermanentWriteToReadOnly);
    }

    #[test]
    fn out_of_bounds_read_is_rejected() {
        let mut ram = Ram {
            data: [0u8; 64],
            read_only: false,
        };
        let mut table = AddressSpaceTable::new();
        table.register(AddressSpaceId::Config, &mut ram);

        let payload = [0x20u8, 0x43, 0x00, 0x00, 0x00, 0xFF, 0x04];
        let mut out: ReplyPayload = Vec::new();
        let err = process_read(&mut table, 3, &payload, &mut out).unwrap_err();
        assert_eq!(err, DatagramError::PermanentOutOfBounds);
    }

    #[test]
    fn unknown_space_byte_reports_address_space_unknown() {
        let table_payload = [0x20u8, 0x40, 0, 0, 0, 0, 0x01, 0xDD];
        let mut table = AddressSpaceTable::new();
        let mut out: ReplyPayload = Vec::new();
        let err = process_read(&mut table, 0, &table_payload, &mut out).unwrap_err();
        assert_eq!(err, DatagramError::PermanentAddressSpaceUnknown);
    }
}
