//! The discriminated result every cooperative state-machine step returns,
//! replacing a plain boolean so the outer scheduler can tell "nothing to
//! do" apart from "blocked, try again soon".

/// Outcome of one step of a cooperative state machine (login, dispatcher).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StepResult {
    /// Nothing to do; the caller may sleep until the next external event.
    Idle,
    /// Made forward progress; call again promptly.
    Progressed,
    /// Blocked on a resource (a full TX FIFO, an exhausted pool); call
    /// again after some delay, no state was corrupted by the attempt.
    RetryLater,
}

impl StepResult {
    pub const fn is_idle(self) -> bool {
        matches!(self, StepResult::Idle)
    }
}
