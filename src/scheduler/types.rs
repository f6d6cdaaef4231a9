//! Scheduler type definitions
//!
//! Handles, states and request/report types shared by the scheduler
//! submodules and exported to the kernel.

use core::fmt;

use super::arena::{ArenaId, Key};
use super::heap::HeapHandle;
use crate::time::{deadline_after, Time};

/// Highest CPU count a [`CpuMask`] can describe
pub const MAX_CPUS: usize = 256;

// ============================================================================
// Handles
// ============================================================================

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(Key);

        impl ArenaId for $name {
            #[inline]
            fn from_key(key: Key) -> Self {
                $name(key)
            }

            #[inline]
            fn key(self) -> Key {
                self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{:?}"), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Debug::fmt(self, f)
            }
        }
    };
}

define_id!(
    /// Scheduler handle for an execution context
    ThreadId,
    "T"
);
define_id!(
    /// Handle for a resource container
    ActivityId,
    "A"
);
define_id!(
    /// Handle for an admitted (or pending) time constraint
    ReservationId,
    "R"
);

impl HeapHandle for ReservationId {
    #[inline]
    fn slot(self) -> usize {
        self.0.index()
    }
}

/// Handle returned by `begin_constraint`, passed back to `end_constraint`
pub type TaskHandle = ReservationId;

// ============================================================================
// States
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThreadState {
    /// Created, not yet started
    Unstarted,
    /// On its activity's runnable ring
    Runnable,
    /// Executing on a processor
    Running,
    /// Blocked, optionally with a wake-up time
    Waiting,
    /// Held back until its innermost constraint's start time
    Deferred,
    /// Cleaned up while still running; reclaimed when descheduled
    Stopped,
}

impl ThreadState {
    pub const fn as_str(self) -> &'static str {
        match self {
            ThreadState::Unstarted => "Unstarted",
            ThreadState::Runnable => "Runnable",
            ThreadState::Running => "Running",
            ThreadState::Waiting => "Waiting",
            ThreadState::Deferred => "Deferred",
            ThreadState::Stopped => "Stopped",
        }
    }
}

/// Which reservation queue, if any, holds a reservation
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueueTag {
    None,
    /// Eligible now; in the laxity heap while it has a runnable beneficiary
    Guaranteed,
    /// Start time not reached yet
    Idle,
}

impl QueueTag {
    pub const fn as_str(self) -> &'static str {
        match self {
            QueueTag::None => "none",
            QueueTag::Guaranteed => "guaranteed",
            QueueTag::Idle => "idle",
        }
    }
}

/// Who benefits from a reservation's time
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Owner {
    /// The thread that began the constraint
    Thread(ThreadId),
    /// Handed to the thread's activity; any runnable member benefits
    Activity(ActivityId),
    /// Not owned (free, or cached for reuse)
    Detached,
}

// ============================================================================
// Requests
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Deadline {
    Absolute(Time),
    /// Measured from the moment the constraint is admitted
    Relative(Time),
}

impl Deadline {
    pub const fn resolve(self, now: Time) -> Time {
        match self {
            Deadline::Absolute(at) => at,
            Deadline::Relative(after) => deadline_after(now, after),
        }
    }
}

/// Arguments of `begin_constraint`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConstraintRequest {
    /// Earliest start; `None` means now
    pub start: Option<Time>,
    /// CPU time requested
    pub estimate: Time,
    pub deadline: Deadline,
    /// Constraint to end atomically before this one begins
    pub end_previous: Option<TaskHandle>,
}

impl ConstraintRequest {
    pub const fn new(estimate: Time, deadline: Deadline) -> Self {
        Self {
            start: None,
            estimate,
            deadline,
            end_previous: None,
        }
    }

    pub const fn starting_at(mut self, start: Time) -> Self {
        self.start = Some(start);
        self
    }

    pub const fn ending_previous(mut self, task: TaskHandle) -> Self {
        self.end_previous = Some(task);
        self
    }
}

/// Result of `end_constraint`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConstraintEnd {
    /// Ended after its deadline
    pub late: bool,
    /// Estimate left over and folded into the enclosing constraint
    pub unused: Time,
}

/// Decision handed back to the interrupt path
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NextThread {
    /// Switch to (or keep running) this thread
    Run(ThreadId),
    /// Nothing to run: halt until the timer fires at `wake_at`
    /// ([`TIME_INFINITE`](crate::time::TIME_INFINITE) if no timer was set)
    Halt { wake_at: Time },
}

impl NextThread {
    pub const fn thread(self) -> Option<ThreadId> {
        match self {
            NextThread::Run(thread) => Some(thread),
            NextThread::Halt { .. } => None,
        }
    }

    pub const fn is_halt(self) -> bool {
        matches!(self, NextThread::Halt { .. })
    }
}

// ============================================================================
// Reference counting
// ============================================================================

/// Strong-holder count with checked arithmetic.
///
/// Dropping below zero means a holder released twice; that is a scheduler
/// bug, so it panics instead of wrapping.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RefCount(u32);

impl RefCount {
    pub const fn new(count: u32) -> Self {
        Self(count)
    }

    #[inline]
    pub const fn get(self) -> u32 {
        self.0
    }

    #[inline]
    pub fn increment(&mut self) {
        self.0 = match self.0.checked_add(1) {
            Some(count) => count,
            None => panic!("reference count overflow"),
        };
    }

    /// Drop one holder; returns `true` when the last one is gone.
    #[inline]
    pub fn decrement(&mut self) -> bool {
        self.0 = match self.0.checked_sub(1) {
            Some(count) => count,
            None => panic!("reference count underflow"),
        };
        self.0 == 0
    }
}

// ============================================================================
// CPU masks
// ============================================================================

/// Set of processors, up to [`MAX_CPUS`]
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct CpuMask {
    bits: [u64; MAX_CPUS / 64],
}

impl CpuMask {
    pub const fn empty() -> Self {
        Self {
            bits: [0; MAX_CPUS / 64],
        }
    }

    /// The first `count` processors
    pub fn all(count: usize) -> Self {
        let mut mask = Self::empty();
        for cpu in 0..count.min(MAX_CPUS) {
            mask.set(cpu);
        }
        mask
    }

    #[inline]
    pub fn set(&mut self, cpu: usize) {
        if cpu < MAX_CPUS {
            self.bits[cpu / 64] |= 1 << (cpu % 64);
        }
    }

    #[inline]
    pub fn clear(&mut self, cpu: usize) {
        if cpu < MAX_CPUS {
            self.bits[cpu / 64] &= !(1 << (cpu % 64));
        }
    }

    #[inline]
    pub fn is_set(&self, cpu: usize) -> bool {
        cpu < MAX_CPUS && self.bits[cpu / 64] & (1 << (cpu % 64)) != 0
    }

    pub fn count(&self) -> usize {
        self.bits.iter().map(|word| word.count_ones() as usize).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.iter().all(|&word| word == 0)
    }

    pub fn iter_set(&self) -> impl Iterator<Item = usize> + '_ {
        (0..MAX_CPUS).filter(move |&cpu| self.is_set(cpu))
    }
}

impl fmt::Debug for CpuMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter_set()).finish()
    }
}

// ============================================================================
// Query results
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReservationInfo {
    pub start: Time,
    pub deadline: Time,
    /// Estimate not yet consumed
    pub remaining: Time,
    pub laxity: Time,
    pub tag: QueueTag,
    pub owner: Owner,
    /// Deadline passed with estimate left
    pub missed: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ActivityInfo {
    pub threads: usize,
    pub runnable: usize,
    /// Reservations handed over by departed threads
    pub reservations: usize,
    pub refs: u32,
    pub execution_time: Time,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpumask_basic() {
        let mut mask = CpuMask::empty();
        assert!(mask.is_empty());
        mask.set(0);
        mask.set(65);
        mask.set(255);
        mask.set(400);
        assert_eq!(mask.count(), 3);
        assert!(mask.is_set(65));
        assert_eq!(mask.iter_set().next(), Some(0));
        mask.clear(0);
        assert_eq!(mask.iter_set().collect::<alloc::vec::Vec<_>>(), vec![65, 255]);
        assert_eq!(CpuMask::all(3).iter_set().collect::<alloc::vec::Vec<_>>(), vec![0, 1, 2]);
    }

    #[test]
    #[should_panic(expected = "reference count underflow")]
    fn test_refcount_underflow_panics() {
        let mut refs = RefCount::new(1);
        assert!(refs.decrement());
        refs.decrement();
    }

    #[test]
    fn test_relative_deadline_resolves_from_now() {
        assert_eq!(Deadline::Relative(5).resolve(100), 105);
        assert_eq!(Deadline::Absolute(7).resolve(100), 7);
    }
}
