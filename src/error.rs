//! Scheduler error types
//!
//! Every failure the scheduling core reports to the kernel is recoverable:
//! the request is refused and no scheduler state is changed. Broken internal
//! invariants are not errors; they panic.

use core::fmt;

use crate::scheduler::ArenaError;

/// Errors returned by scheduler entry points
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedError {
    /// Constraint estimate was negative
    NegativeEstimate,
    /// Asked to end a constraint while none is active
    NoActiveConstraint,
    /// Task handle does not name the innermost active constraint
    InvalidTask,
    /// Thread handle is stale or was never created
    UnknownThread,
    /// Activity handle is stale or was never created
    UnknownActivity,
    /// Reservation pool has no free entries
    PoolExhausted,
    /// Thread or activity table is full
    TableFull,
    /// Operation not allowed in the thread's current state
    InvalidState,
    /// Thread already has a constraint waiting for its next wake-up
    DelayedConstraintPending,
    /// CPU index outside the configured processor count
    InvalidCpu,
    /// Configuration value out of range
    InvalidConfig,
}

impl SchedError {
    pub const fn as_str(self) -> &'static str {
        match self {
            SchedError::NegativeEstimate => "negative constraint estimate",
            SchedError::NoActiveConstraint => "no active constraint",
            SchedError::InvalidTask => "invalid task handle",
            SchedError::UnknownThread => "unknown thread",
            SchedError::UnknownActivity => "unknown activity",
            SchedError::PoolExhausted => "reservation pool exhausted",
            SchedError::TableFull => "scheduler table full",
            SchedError::InvalidState => "invalid thread state",
            SchedError::DelayedConstraintPending => "delayed constraint already pending",
            SchedError::InvalidCpu => "invalid cpu index",
            SchedError::InvalidConfig => "invalid scheduler configuration",
        }
    }
}

impl fmt::Display for SchedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<ArenaError> for SchedError {
    fn from(e: ArenaError) -> Self {
        match e {
            ArenaError::Full => SchedError::TableFull,
        }
    }
}
