//! CAN alias to Node ID mapping (§4.2).
//!
//! The map itself lives in `openlcb-core` since both the login state
//! machine and the main dispatcher need it without depending on the
//! rest of this crate; this module just re-exports it under the name
//! the rest of this crate expects to find it under.

pub use openlcb_core::{AliasMap, AliasMapEntry};
