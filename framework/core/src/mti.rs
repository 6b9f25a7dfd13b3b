//! OpenLCB Message Type Indicator (§3, §6).
//!
//! `Mti` is a closed enumeration over every MTI this core names, per the
//! re-architecture guidance in §9 ("replace the `uint16_t mti` ... with
//! closed enumerations over exactly the documented states/MTIs"). Unknown
//! values remain representable via [`Mti::Other`] so the Optional
//! Interaction Rejected path (§4.7 step 6) can still report the offending
//! value.

use core::fmt;

/// Bit 3 (`0x0008`) of every MTI in this table marks "carries a
/// destination alias" (an addressed message) versus a global/broadcast
/// one — observable directly from the paired values in §6 (e.g.
/// `0x0488` addressed vs. `0x0490` global Verify-Node-ID). The
/// addressability filter (§4.7 step 5) and TX fragmentation (§4.5) both
/// key off this bit rather than a hand enumerated list.
const ADDRESSED_BIT: u16 = 0x0008;

macro_rules! mti_table {
    ($($variant:ident = $value:expr),+ $(,)?) => {
        /// A 16-bit OpenLCB Message Type Indicator.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[cfg_attr(feature = "defmt", derive(defmt::Format))]
        pub enum Mti {
            $($variant,)+
            /// An MTI this core does not recognize; preserved verbatim so
            /// it can still be echoed back in an Optional Interaction
            /// Rejected reply (§4.7 step 6).
            Other(u16),
        }

        impl Mti {
            pub const fn value(self) -> u16 {
                match self {
                    $(Mti::$variant => $value,)+
                    Mti::Other(v) => v,
                }
            }
        }

        impl From<u16> for Mti {
            fn from(value: u16) -> Self {
                match value {
                    $($value => Mti::$variant,)+
                    other => Mti::Other(other),
                }
            }
        }
    };
}

mti_table! {
    InitializationComplete = 0x0100,
    InitializationCompleteSimple = 0x0101,
    VerifiedNodeId = 0x0170,
    VerifiedNodeIdSimple = 0x0171,
    VerifyNodeIdAddressed = 0x0488,
    VerifyNodeIdGlobal = 0x0490,
    ProtocolSupportReply = 0x0668,
    ProtocolSupportInquiry = 0x0828,
    SimpleNodeInfoReply = 0x0A08,
    SimpleNodeInfoRequest = 0x0DE8,
    ConsumerRangeIdentified = 0x04A4,
    ConsumerIdentifiedValid = 0x04C4,
    ConsumerIdentifiedInvalid = 0x04C5,
    ConsumerIdentifiedUnknown = 0x04C7,
    ProducerRangeIdentified = 0x0524,
    ProducerIdentifiedValid = 0x0544,
    ProducerIdentifiedInvalid = 0x0545,
    ProducerIdentifiedUnknown = 0x0547,
    IdentifyProducer = 0x0914,
    IdentifyConsumer = 0x08F4,
    IdentifyEventsGlobal = 0x0970,
    IdentifyEventsAddressed = 0x0968,
    PcEventReport = 0x05B4,
    PcEventReportWithPayload = 0x05F4,
    Datagram = 0x1C48,
    DatagramReceivedOk = 0x0A28,
    DatagramRejected = 0x0A48,
    OptionalInteractionRejected = 0x0068,
    TerminateDueToError = 0x00A8,
}

impl Mti {
    /// True for MTIs that carry a destination alias (§4.7 step 5, §4.5).
    pub const fn is_addressed(self) -> bool {
        self.value() & ADDRESSED_BIT != 0
    }

    pub const fn is_global(self) -> bool {
        !self.is_addressed()
    }
}

impl Default for Mti {
    fn default() -> Self {
        Mti::Other(0)
    }
}

impl fmt::Display for Mti {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mti::Other(v) => write!(f, "MTI(0x{:04X})", v),
            known => write!(f, "{:?}(0x{:04X})", known, known.value()),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn round_trips_known_values() {
        assert_eq!(Mti::from(0x0490u16), Mti::VerifyNodeIdGlobal);
        assert_eq!(Mti::VerifyNodeIdGlobal.value(), 0x0490);
    }

    #[test]
    fn unknown_values_preserved() {
        assert_eq!(Mti::from(0xBEEFu16), Mti::Other(0xBEEF));
    }

    #[test]
    fn addressability_matches_spec_pairs() {
        assert!(Mti::VerifyNodeIdAddressed.is_addressed());
        assert!(Mti::VerifyNodeIdGlobal.is_global());
        assert!(Mti::IdentifyEventsAddressed.is_addressed());
        assert!(Mti::IdentifyEventsGlobal.is_global());
        assert!(Mti::Datagram.is_addressed());
        assert!(Mti::PcEventReport.is_global());
        assert!(Mti::ProducerIdentifiedValid.is_global());
    }
}
