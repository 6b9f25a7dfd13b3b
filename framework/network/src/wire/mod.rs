//! Wire formats: the 29-bit CAN identifier layout (§4, §6) and the
//! GridConnect ASCII framing used by USB/TCP CAN gateways.

use core::fmt;

pub mod can;
pub mod gridconnect;

pub use self::can::{CanId, Frame as CanFrame, FrameType, HEADER_LEN as CAN_HEADER_LEN};

/// Parsing or constructing a frame failed because the buffer was too
/// short, too long, or otherwise malformed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Error;

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "wire::Error")
    }
}

pub type Result<T> = core::result::Result<T, Error>;
