//! Hardware-agnostic CAN device interface: a `Device` produces `RxToken`
//! / `TxToken` pairs that own exactly one frame's worth of bytes, so a
//! caller can move frames in and out of a driver without allocating.

#[cfg(feature = "medium-can")]
pub mod can;

/// A description of device capabilities. OpenLCB only ever speaks CAN
/// here, but the trait keeps the shape a non-CAN medium would need.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[non_exhaustive]
pub struct DeviceCapabilities {
    pub medium: Medium,
}

#[derive(Debug, Eq, PartialEq, Copy, Clone, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Medium {
    #[default]
    Can,
}

/// Interface for sending and receiving raw CAN frames.
///
/// This interface revolves around _tokens_: `receive` and `transmit`
/// focus on token construction, while the actual I/O happens when the
/// tokens are consumed. Producing a transmit token alongside every
/// receive token lets a caller answer a received frame (e.g. an AMD
/// reply to an AME enquiry) without needing to allocate a reply buffer.
pub trait Device {
    type RxToken<'a>: RxToken
    where
        Self: 'a;
    type TxToken<'a>: TxToken
    where
        Self: 'a;

    fn receive(&mut self) -> Option<(Self::RxToken<'_>, Self::TxToken<'_>)>;
    fn transmit(&mut self) -> Option<Self::TxToken<'_>>;
    fn capabilities(&self) -> DeviceCapabilities;
}

/// A token to receive a single CAN frame.
pub trait RxToken {
    /// Consume the token, handing the raw frame bytes (4-byte identifier
    /// followed by 0-8 payload bytes, per `wire::can`) to `f`.
    fn consume<R, F>(self, f: F) -> R
    where
        F: FnOnce(&mut [u8]) -> R;
}

/// A token to transmit a single CAN frame.
pub trait TxToken: Clone {
    /// Consume the token: `f` is called with a `len`-byte buffer to fill
    /// with a frame (identifier + payload) before it is dispatched.
    fn consume<R, F>(self, len: usize, f: F) -> R
    where
        F: FnOnce(&mut [u8]) -> R;
}
