//! The eight named configuration-memory address spaces and the
//! capability a caller implements for each (§4.9, §6).

use core::fmt;

/// The well-known and numbered address spaces a compliant node may
/// declare (§1, §4.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AddressSpaceId {
    /// `0xFF` — the CDI XML blob.
    Cdi,
    /// `0xFE` — pseudo-space addressing every other space's bytes as one
    /// contiguous range.
    All,
    /// `0xFD` — the node's writable configuration memory.
    Config,
    /// `0xFC` — fixed-layout manufacturer-supplied ACDI fields.
    AcdiMfg,
    /// `0xFB` — fixed-layout user-editable ACDI fields (name/description).
    AcdiUser,
    /// `0xFA` — Function Definition Info, for train nodes.
    Fdi,
    /// `0xF9` — per-function configuration memory, for train nodes.
    TrainFunctionConfig,
    /// `0xEF` — firmware image space, written during a firmware upgrade.
    Firmware,
}

impl AddressSpaceId {
    pub const fn byte(self) -> u8 {
        match self {
            AddressSpaceId::Cdi => 0xFF,
            AddressSpaceId::All => 0xFE,
            AddressSpaceId::Config => 0xFD,
            AddressSpaceId::AcdiMfg => 0xFC,
            AddressSpaceId::AcdiUser => 0xFB,
            AddressSpaceId::Fdi => 0xFA,
            AddressSpaceId::TrainFunctionConfig => 0xF9,
            AddressSpaceId::Firmware => 0xEF,
        }
    }

    pub const fn from_byte(byte: u8) -> Option<Self> {
        Some(match byte {
            0xFF => AddressSpaceId::Cdi,
            0xFE => AddressSpaceId::All,
            0xFD => AddressSpaceId::Config,
            0xFC => AddressSpaceId::AcdiMfg,
            0xFB => AddressSpaceId::AcdiUser,
            0xFA => AddressSpaceId::Fdi,
            0xF9 => AddressSpaceId::TrainFunctionConfig,
            0xEF => AddressSpaceId::Firmware,
            _ => return None,
        })
    }

    /// The three spaces with a dedicated low nibble in the datagram
    /// sub-command byte itself, rather than an explicit byte at payload
    /// offset 6 (§6): `0xFE` (1), `0xFF` (2), `0xFD` (3) — nibble 0 and
    /// `0xFC`..`0xF9`/`0xEF` always use the explicit-byte form. (Nibble
    /// 3 → Config, e.g. sub-command `0x43` against space `0xFD`.)
    pub const fn well_known_nibble(self) -> Option<u8> {
        match self {
            AddressSpaceId::All => Some(1),
            AddressSpaceId::Cdi => Some(2),
            AddressSpaceId::Config => Some(3),
            _ => None,
        }
    }

    pub const fn from_well_known_nibble(nibble: u8) -> Option<Self> {
        Some(match nibble {
            1 => AddressSpaceId::All,
            2 => AddressSpaceId::Cdi,
            3 => AddressSpaceId::Config,
            _ => return None,
        })
    }
}

impl fmt::Display for AddressSpaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}(0x{:02X})", self, self.byte())
    }
}

/// Reply payload for Get-Address-Space-Info (§4.9): whether the space is
/// present at all, read-only, and its address bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AddressSpaceInfo {
    pub present: bool,
    pub read_only: bool,
    pub low_address: u32,
    pub highest_address: u32,
}

impl AddressSpaceInfo {
    pub const fn absent() -> Self {
        Self {
            present: false,
            read_only: true,
            low_address: 0,
            highest_address: 0,
        }
    }
}

/// The abstract error kinds a configuration-memory access can fail with
/// (§4.8, §6). The datagram layer translates these into the matching
/// `DatagramError` permanent/temporary code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MemoryError {
    OutOfBounds,
    ReadOnly,
    /// The caller's storage callback returned fewer bytes than requested
    /// (§4.9 "a short-read or short-write translates to a temporary
    /// transfer error reply").
    ShortTransfer,
}

/// One address space's read/write/write-under-mask/info capability
/// (§4.9). A caller implements this once per space it
/// declares present and registers it in the fixed-size map the dispatcher
/// (`openlcb-network::config_memory`) looks the space up in by id.
///
/// Implementations must clamp reads to `info().highest_address` and
/// reject writes past it or to a read-only space — the network-side
/// dispatcher enforces this generically from `info()` before ever
/// calling `read`/`write`, so implementations only need to move bytes.
pub trait AddressSpaceHandler {
    fn info(&self) -> AddressSpaceInfo;

    /// Read `buf.len()` bytes starting at `address` into `buf`, returning
    /// the number of bytes actually read. A short read (less than
    /// `buf.len()`) is reported to the peer as `MemoryError::ShortTransfer`
    /// by the caller of this trait.
    fn read(&mut self, address: u32, buf: &mut [u8]) -> Result<usize, MemoryError>;

    /// Write `data` starting at `address`, returning the number of bytes
    /// actually written.
    fn write(&mut self, address: u32, data: &[u8]) -> Result<usize, MemoryError>;

    /// Write `data` to `address` under the accompanying same-length
    /// `mask`: only bits set in `mask` are modified at the destination.
    /// The default implementation does a read-modify-write using
    /// [`AddressSpaceHandler::read`] and [`AddressSpaceHandler::write`],
    /// which is correct for any space but not necessarily atomic;
    /// implementations backed by true masked-write hardware should
    /// override it.
    fn write_under_mask(
        &mut self,
        address: u32,
        data: &[u8],
        mask: &[u8],
    ) -> Result<usize, MemoryError> {
        debug_assert_eq!(data.len(), mask.len());
        let mut current = [0u8; 64];
        let len = data.len().min(current.len());
        let read = self.read(address, &mut current[..len])?;
        if read < len {
            return Err(MemoryError::ShortTransfer);
        }
        let mut merged = [0u8; 64];
        for i in 0..len {
            merged[i] = (current[i] & !mask[i]) | (data[i] & mask[i]);
        }
        self.write(address, &merged[..len])
    }
}
