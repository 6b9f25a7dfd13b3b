//! The two login state machines a node walks through before reaching
//! steady-state operation (§4.3, §2's "Login SM (CAN)" / "Login SM
//! (OpenLCB)" rows): alias claim over CAN, then OpenLCB-level
//! initialization and event enumeration.

pub mod can;
pub mod openlcb;
