//! Error taxonomy surfaced by the core (§7).
//!
//! Resource exhaustion is never a panic: RX drops the frame, TX drops or
//! defers the reply, allocation returns `None`. [`Error`] is the shared
//! enum for that family. [`DatagramError`] is the wire-visible 16-bit
//! error code carried by a Datagram-Rejected or Optional-Interaction-
//! Rejected reply (§4.8, §6); its high nibble separates temporary
//! (retryable) from permanent errors.

use core::fmt;

/// Resource-exhaustion and protocol-bookkeeping failures internal to the
/// core. None of these reach the wire directly — callers translate them
/// into a dropped frame, a deferred reply, or (for alias allocation) a
/// halted login per §4.3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// No free slot in the requested buffer pool (§4.1).
    PoolExhausted,
    /// No conflict-free alias was found within the configured LFSR retry
    /// limit (§4.3).
    AliasPoolExhausted,
    /// The alias map has no free slot for a new entry (§4.2).
    AliasMapExhausted,
    /// No free reassembly-context slot for a new First frame (§4.4).
    ReassemblyExhausted,
    /// The outgoing CAN TX FIFO is full; the caller should retry later
    /// (§4.5, §5 "no operation in the core blocks").
    TxFifoFull,
    /// The node pool has no free slot for a new node record (§4.6).
    NodePoolExhausted,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Error::PoolExhausted => "buffer pool exhausted",
            Error::AliasPoolExhausted => "no conflict-free alias found within retry limit",
            Error::AliasMapExhausted => "alias map full",
            Error::ReassemblyExhausted => "reassembly context list full",
            Error::TxFifoFull => "CAN transmit FIFO full",
            Error::NodePoolExhausted => "node pool full",
        };
        f.write_str(msg)
    }
}

/// A 16-bit Datagram-Rejected / Optional-Interaction-Rejected error code
/// (§4.8, §6). Bit `0x8000` marks a temporary (retryable) condition, bit
/// `0x1000` a permanent one; exactly one of the two is set by every
/// variant below.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DatagramError {
    PermanentUnknownCommand,
    PermanentUnknownSubCommand,
    PermanentAddressSpaceUnknown,
    PermanentWriteToReadOnly,
    PermanentOutOfBounds,
    PermanentInvalidArguments,
    PermanentNotImplemented,
    TemporaryBufferUnavailable,
    TemporaryTransferError,
}

impl DatagramError {
    pub const TEMPORARY_BIT: u16 = 0x8000;
    pub const PERMANENT_BIT: u16 = 0x1000;

    /// The 16-bit code placed in the reply payload (§4.8, §6), e.g.
    /// `0x1080` for "permanent invalid arguments".
    pub const fn code(self) -> u16 {
        match self {
            DatagramError::PermanentNotImplemented => 0x1000,
            DatagramError::PermanentUnknownCommand => 0x1001,
            DatagramError::PermanentUnknownSubCommand => 0x1002,
            DatagramError::PermanentAddressSpaceUnknown => 0x1006,
            DatagramError::PermanentWriteToReadOnly => 0x1008,
            DatagramError::PermanentOutOfBounds => 0x1010,
            DatagramError::PermanentInvalidArguments => 0x1080,
            DatagramError::TemporaryBufferUnavailable => 0x8020,
            DatagramError::TemporaryTransferError => 0x8040,
        }
    }

    pub const fn is_temporary(self) -> bool {
        self.code() & Self::TEMPORARY_BIT != 0
    }

    pub const fn is_permanent(self) -> bool {
        self.code() & Self::PERMANENT_BIT != 0
    }

    /// Classify a raw 16-bit error code observed in an inbound
    /// Datagram-Rejected reply (§4.8 sender role) purely by its high
    /// nibble, since the peer's exact taxonomy is not ours to decode.
    pub const fn raw_is_temporary(code: u16) -> bool {
        code & Self::TEMPORARY_BIT != 0
    }

    pub const fn raw_is_permanent(code: u16) -> bool {
        code & Self::PERMANENT_BIT != 0
    }
}

impl fmt::Display for DatagramError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "datagram error 0x{:04X}", self.code())
    }
}

/// Error code carried by an Optional Interaction Rejected reply for an
/// unhandled MTI (§4.7 step 6, §6).
pub const OPTIONAL_INTERACTION_REJECTED_UNKNOWN_MTI: u16 = 0x1043;

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn s4_invalid_arguments_code() {
        assert_eq!(DatagramError::PermanentInvalidArguments.code(), 0x1080);
        assert!(DatagramError::PermanentInvalidArguments.is_permanent());
        assert!(!DatagramError::PermanentInvalidArguments.is_temporary());
    }

    #[test]
    fn temporary_errors_carry_the_temporary_bit() {
        assert!(DatagramError::TemporaryBufferUnavailable.is_temporary());
        assert!(DatagramError::TemporaryTransferError.is_temporary());
    }
}
