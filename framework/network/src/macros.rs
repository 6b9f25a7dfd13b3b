//! Logging macros gated by the `defmt` feature, so call sites don't
//! need to `cfg` out every log statement by hand.

macro_rules! net_trace {
    ($($arg:tt)*) => {
        #[cfg(feature = "defmt")]
        defmt::trace!($($arg)*);
    };
}

macro_rules! net_debug {
    ($($arg:tt)*) => {
        #[cfg(feature = "defmt")]
        defmt::debug!($($arg)*);
    };
}

#[allow(unused_imports)]
pub(crate) use net_debug;
#[allow(unused_imports)]
pub(crate) use net_trace;
