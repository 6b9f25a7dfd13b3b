#![cfg_attr(not(any(test, feature = "std")), no_std)]
#![deny(unsafe_code)]

//! Address-space declarations and the configuration-memory storage
//! contract for an OpenLCB node (§4.9).
//!
//! This crate owns none of the bytes it describes. `NodeParameters`
//! points at caller-owned, immutable SNIP/CDI data and a fixed table of
//! declared address spaces; [`AddressSpaceHandler`] is the capability a
//! caller implements per address space: one implementation per space,
//! held in a fixed-size map keyed by space id, rather than a big switch
//! inside the datagram handler. `openlcb-network::config_memory` only
//! ever calls through this trait.

#[cfg(test)]
extern crate alloc;

pub mod address_space;
pub mod parameters;

pub use address_space::{AddressSpaceHandler, AddressSpaceId, AddressSpaceInfo, MemoryError};
pub use parameters::{NodeParameters, Snip};
