#![cfg_attr(not(any(test, feature = "std")), no_std)]
#![deny(unsafe_code)]

#[cfg(any(test, feature = "alloc"))]
extern crate alloc;

#[macro_use]
mod macros;

pub mod config {
    // TODO: make this configurable
    #![allow(unused)]
    pub const CAN_RESERVE_DELAY_MS: u64 = 100;
    pub const CAN_DEFAULT_PRIORITY: u8 = 0xB;
    pub const LONG_MESSAGE_DEFAULT_DELAY: u16 = 20;
    pub const LONG_MESSAGE_RECEIVE_TIMEOUT: u16 = 5000;
}

pub mod phy;
pub mod wire;

pub mod alias_map;
pub mod buffer;
pub mod node_pool;
pub mod login;
pub mod result;
pub mod reassembly;
pub mod fragmentation;
pub mod datagram;
pub mod config_memory;
pub mod message_network;
pub mod events;
pub mod handlers;
pub mod dispatcher;