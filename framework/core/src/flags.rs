//! Per-node run state and status flags (§3).

use bitflags::bitflags;
use core::fmt;

bitflags! {
    /// Status bits tracked per node, independent of `run_state` (§3).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    pub struct NodeFlags: u8 {
        /// Alias claim complete (AMD emitted, unchallenged).
        const PERMITTED              = 0b0000_0001;
        /// Initialization-Complete has been sent.
        const INITIALIZED            = 0b0000_0010;
        const DUPLICATE_ID_DETECTED  = 0b0000_0100;
        const FIRMWARE_UPGRADE_ACTIVE = 0b0000_1000;
        /// Set by the datagram sender role on a temporary rejection; the
        /// retained buffer should be resent (§4.8).
        const RESEND_DATAGRAM        = 0b0001_0000;
        /// Set by the datagram receiver role between the OK reply and the
        /// command-execution pass (§4.8); serializes datagrams per node.
        const DATAGRAM_ACK_SENT      = 0b0010_0000;
    }
}

impl Default for NodeFlags {
    fn default() -> Self {
        Self::empty()
    }
}

/// The ten-step (plus idle/run) CAN login sequence a node walks through
/// while claiming its alias and completing OpenLCB-level login (§3, §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RunState {
    Init,
    GenerateSeed,
    GenerateAlias,
    LoadCid7,
    LoadCid6,
    LoadCid5,
    LoadCid4,
    /// The 200 ms quiet window following CID4 (§4.3).
    WaitQuietWindow,
    LoadRid,
    LoadAmd,
    LoadInitComplete,
    LoadProducerEvents,
    LoadConsumerEvents,
    LoginComplete,
    Run,
}

impl RunState {
    /// True once alias claim and OpenLCB login have both finished and the
    /// node is in steady-state operation.
    pub const fn is_running(self) -> bool {
        matches!(self, RunState::Run)
    }

    /// True while the node is still inside the CID/RID/AMD alias-claim
    /// sequence, i.e. before `permitted` is set (§4.3).
    pub const fn is_claiming_alias(self) -> bool {
        matches!(
            self,
            RunState::Init
                | RunState::GenerateSeed
                | RunState::GenerateAlias
                | RunState::LoadCid7
                | RunState::LoadCid6
                | RunState::LoadCid5
                | RunState::LoadCid4
                | RunState::WaitQuietWindow
                | RunState::LoadRid
        )
    }
}

impl Default for RunState {
    fn default() -> Self {
        RunState::Init
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
