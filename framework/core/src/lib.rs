#![cfg_attr(not(any(test, feature = "std")), no_std)]
#![deny(unsafe_code)]

//! Shared, hardware-agnostic types for an OpenLCB (LCC, NMRA S-9.7) node
//! stack: node and event identifiers, the transient CAN alias, the
//! per-segment alias map, MTI classification, node run/flag state, the
//! alias-allocation LFSR, and the error taxonomy shared by every layer
//! above this crate.
//!
//! This crate never touches a CAN frame or a byte buffer — that begins in
//! `openlcb-network`. Everything here is a value type a `no_std`, no-alloc
//! caller can hold inline.

#[cfg(test)]
extern crate alloc;

pub mod alias;
pub mod alias_map;
pub mod error;
pub mod event;
pub mod flags;
pub mod lfsr;
pub mod mti;
pub mod node_id;

pub use alias::Alias;
pub use alias_map::{AliasMap, AliasMapEntry};
pub use error::{DatagramError, Error};
pub use event::{EventId, EventState};
pub use flags::{NodeFlags, RunState};
pub use mti::Mti;
pub use node_id::NodeId;
