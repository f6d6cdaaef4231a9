//! Per-CPU scheduler state
//!
//! Each processor has two pieces of state:
//!
//! - [`CpuDispatch`]: the dispatch context (current activity, remaining
//!   round-robin slice, running thread, reservation being charged). It lives
//!   inside the global scheduler lock because other processors read and
//!   update it during admission and wake-up.
//! - [`PerCpuSched`]: flags and counters read without the lock. Other
//!   processors set `need_resched` here to make this one re-run its
//!   decision at its next interrupt boundary.

use core::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};

use super::types::{ActivityId, ReservationId, ThreadId};
use crate::time::{Time, TIME_INFINITE};

// ============================================================================
// Locked dispatch context
// ============================================================================

#[derive(Clone, Copy, Debug)]
pub struct CpuDispatch {
    pub current_activity: Option<ActivityId>,
    /// Round-robin time left for `current_activity`
    pub slice_left: Time,
    pub running: Option<ThreadId>,
    /// Reservation charged for the running thread, if any
    pub current_reservation: Option<ReservationId>,
    /// When the running thread was last charged
    pub sched_clock: Time,
    /// Timer deadline programmed by the last decision
    pub next_timer: Time,
    pub idle: bool,
    pub idle_since: Time,
}

impl CpuDispatch {
    pub const fn new() -> Self {
        Self {
            current_activity: None,
            slice_left: 0,
            running: None,
            current_reservation: None,
            sched_clock: 0,
            next_timer: TIME_INFINITE,
            idle: false,
            idle_since: 0,
        }
    }
}

// ============================================================================
// Lock-free flags and counters
// ============================================================================

/// Snapshot of one processor's counters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PerCpuStats {
    pub context_switches: u64,
    pub dispatches: u64,
    pub idle_entries: u64,
    /// Nanoseconds spent halted
    pub idle_time: u64,
    pub interrupts: u64,
}

/// Cache line aligned so neighbouring processors do not false-share.
#[repr(C, align(64))]
pub struct PerCpuSched {
    need_resched: AtomicBool,
    idle: AtomicBool,
    parked: AtomicBool,
    next_timer: AtomicI64,
    context_switches: AtomicU64,
    dispatches: AtomicU64,
    idle_entries: AtomicU64,
    idle_time: AtomicU64,
    interrupts: AtomicU64,
}

impl PerCpuSched {
    pub const fn new() -> Self {
        Self {
            need_resched: AtomicBool::new(false),
            idle: AtomicBool::new(false),
            parked: AtomicBool::new(false),
            next_timer: AtomicI64::new(TIME_INFINITE),
            context_switches: AtomicU64::new(0),
            dispatches: AtomicU64::new(0),
            idle_entries: AtomicU64::new(0),
            idle_time: AtomicU64::new(0),
            interrupts: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn set_need_resched(&self) {
        self.need_resched.store(true, Ordering::Release);
    }

    #[inline]
    pub fn need_resched(&self) -> bool {
        self.need_resched.load(Ordering::Acquire)
    }

    /// Check and clear the reschedule request
    #[inline]
    pub fn check_need_resched(&self) -> bool {
        self.need_resched.swap(false, Ordering::AcqRel)
    }

    #[inline]
    pub fn is_idle(&self) -> bool {
        self.idle.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_parked(&self) -> bool {
        self.parked.load(Ordering::Acquire)
    }

    #[inline]
    pub(super) fn set_parked(&self, parked: bool) {
        self.parked.store(parked, Ordering::Release);
    }

    #[inline]
    pub fn next_timer(&self) -> Time {
        self.next_timer.load(Ordering::Acquire)
    }

    #[inline]
    pub(super) fn record_interrupt(&self) {
        self.interrupts.fetch_add(1, Ordering::Relaxed);
    }

    /// Publish the outcome of a reschedule on this processor
    pub(super) fn record_decision(
        &self,
        idle: bool,
        entered_idle: bool,
        switched: bool,
        next_timer: Time,
        idle_ns: Time,
    ) {
        self.idle.store(idle, Ordering::Release);
        self.next_timer.store(next_timer, Ordering::Release);
        if !idle {
            self.dispatches.fetch_add(1, Ordering::Relaxed);
        }
        if entered_idle {
            self.idle_entries.fetch_add(1, Ordering::Relaxed);
        }
        if switched {
            self.context_switches.fetch_add(1, Ordering::Relaxed);
        }
        if idle_ns > 0 {
            self.idle_time.fetch_add(idle_ns as u64, Ordering::Relaxed);
        }
    }

    pub fn stats(&self) -> PerCpuStats {
        PerCpuStats {
            context_switches: self.context_switches.load(Ordering::Relaxed),
            dispatches: self.dispatches.load(Ordering::Relaxed),
            idle_entries: self.idle_entries.load(Ordering::Relaxed),
            idle_time: self.idle_time.load(Ordering::Relaxed),
            interrupts: self.interrupts.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_need_resched_is_consumed_once() {
        let cpu = PerCpuSched::new();
        assert!(!cpu.check_need_resched());
        cpu.set_need_resched();
        assert!(cpu.need_resched());
        assert!(cpu.check_need_resched());
        assert!(!cpu.check_need_resched());
    }

    #[test]
    fn test_percpu_is_cache_aligned() {
        assert_eq!(core::mem::align_of::<PerCpuSched>(), 64);
    }

    #[test]
    fn test_record_decision_counters() {
        let cpu = PerCpuSched::new();
        cpu.record_decision(false, false, true, 100, 0);
        cpu.record_decision(true, true, false, 500, 0);
        cpu.record_decision(true, false, false, 700, 0);
        cpu.record_decision(false, false, true, 900, 400);
        let stats = cpu.stats();
        assert_eq!(stats.dispatches, 2);
        assert_eq!(stats.idle_entries, 1);
        assert_eq!(stats.context_switches, 2);
        assert_eq!(stats.idle_time, 400);
        assert_eq!(cpu.next_timer(), 900);
        assert!(!cpu.is_idle());
    }
}
