//! Scheduler statistics and debugging functions
//!
//! Global counters live in the locked state; per-CPU counters are atomics
//! in [`PerCpuSched`](super::percpu::PerCpuSched) and can be read without
//! the lock. The `list_*` dumps go to the kernel log at INFO.

use alloc::vec::Vec;

use super::core::Scheduler;
use super::percpu::PerCpuStats;
use super::policy::SchedPolicy;
use super::types::{
    ActivityId, ActivityInfo, ReservationInfo, TaskHandle, ThreadId, ThreadState,
};
use crate::error::SchedError;
use crate::hal::Platform;
use crate::time::{ns_to_us, Time};

/// Global scheduler counters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub admissions: u64,
    pub rejections: u64,
    pub deadline_misses: u64,
    /// Constraints ended after their deadline
    pub late_completions: u64,
    pub reservation_dispatches: u64,
    pub robin_dispatches: u64,
    pub idle_entries: u64,
    /// Decisions re-run because the timer deadline had already passed
    pub timer_retries: u64,
    pub wakeups: u64,
    pub context_switches: u64,
}

impl SchedulerStats {
    pub const fn new() -> Self {
        Self {
            admissions: 0,
            rejections: 0,
            deadline_misses: 0,
            late_completions: 0,
            reservation_dispatches: 0,
            robin_dispatches: 0,
            idle_entries: 0,
            timer_retries: 0,
            wakeups: 0,
            context_switches: 0,
        }
    }
}

impl<P: SchedPolicy, H: Platform> Scheduler<P, H> {
    /// Get scheduler statistics
    pub fn get_stats(&self) -> SchedulerStats {
        self.state.lock().stats
    }

    pub fn get_percpu_stats(&self, cpu: usize) -> Result<PerCpuStats, SchedError> {
        self.check_cpu(cpu)?;
        Ok(self.percpu[cpu].stats())
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn thread_state(&self, thread: ThreadId) -> Option<ThreadState> {
        self.state.lock().threads.get(thread).map(|t| t.state)
    }

    /// CPU time charged to `thread` so far
    pub fn thread_execution_time(&self, thread: ThreadId) -> Option<Time> {
        self.state.lock().threads.get(thread).map(|t| t.execution_time)
    }

    pub fn current_thread(&self, cpu: usize) -> Result<Option<ThreadId>, SchedError> {
        self.check_cpu(cpu)?;
        Ok(self.state.lock().cpus[cpu].running)
    }

    pub fn is_idle(&self, cpu: usize) -> Result<bool, SchedError> {
        self.check_cpu(cpu)?;
        Ok(self.percpu[cpu].is_idle())
    }

    /// Number of constraints on the thread's stack
    pub fn constraint_depth(&self, thread: ThreadId) -> Option<usize> {
        self.state.lock().threads.get(thread).map(|t| t.depth)
    }

    /// Innermost constraint of `thread`
    pub fn current_task(&self, thread: ThreadId) -> Option<TaskHandle> {
        self.state.lock().threads.get(thread).and_then(|t| t.constraint)
    }

    /// `None` once the reservation has been recycled
    pub fn reservation_info(&self, task: TaskHandle) -> Option<ReservationInfo> {
        let state = self.state.lock();
        let reservation = state.reservations.get(task)?;
        Some(ReservationInfo {
            start: reservation.start,
            deadline: reservation.deadline,
            remaining: reservation.estimate,
            laxity: reservation.laxity(),
            tag: reservation.tag,
            owner: reservation.owner,
            missed: reservation.missed,
        })
    }

    pub fn activity_info(&self, activity: ActivityId) -> Option<ActivityInfo> {
        let state = self.state.lock();
        let entry = state.activities.get(activity)?;
        Some(ActivityInfo {
            threads: entry.threads,
            runnable: entry.runnable.len(),
            reservations: entry.reservations.len(),
            refs: entry.refs.get(),
            execution_time: entry.execution_time,
        })
    }

    /// Reservations in the Guaranteed heap, lowest laxity first
    pub fn guaranteed_queue(&self) -> Vec<TaskHandle> {
        let state = self.state.lock();
        let mut entries: Vec<_> = state.guaranteed.iter().collect();
        entries.sort_by_key(|&(_, key)| key);
        entries.into_iter().map(|(id, _)| id).collect()
    }

    // ========================================================================
    // Debug dumps
    // ========================================================================

    /// List all threads for debugging
    pub fn list_threads(&self) {
        let state = self.state.lock();
        crate::kinfo!("=== {} Thread List ===", P::NAME);
        crate::kinfo!(
            "{:<10} {:<10} {:<10} {:<5} {:<6} {:<12} {:<10}",
            "TID", "Activity", "State", "CPU", "Depth", "ExecTime", "Task"
        );

        for (id, thread) in state.threads.iter() {
            crate::kinfo!(
                "{:<10} {:<10} {:<10} {:<5} {:<6} {:<12} {:<10}",
                id,
                OptionDisplay(thread.activity),
                thread.state.as_str(),
                OptionDisplay(thread.active_processor),
                thread.depth,
                ns_to_us(thread.execution_time),
                OptionDisplay(thread.constraint)
            );
        }

        let stats = state.stats;
        crate::kinfo!("=== Scheduler Statistics ===");
        crate::kinfo!("Admissions: {} (rejected {})", stats.admissions, stats.rejections);
        crate::kinfo!(
            "Deadline misses: {}, late completions: {}",
            stats.deadline_misses,
            stats.late_completions
        );
        crate::kinfo!(
            "Dispatches: {} reserved, {} round-robin",
            stats.reservation_dispatches,
            stats.robin_dispatches
        );
        crate::kinfo!("Context switches: {}", stats.context_switches);
    }

    /// List all live reservations for debugging
    pub fn list_reservations(&self) {
        let state = self.state.lock();
        crate::kinfo!("=== Reservation List ===");
        crate::kinfo!(
            "{:<10} {:<12} {:<12} {:<12} {:<12} {:<11} {:<6}",
            "Task", "Start", "Deadline", "Remaining", "Laxity", "Queue", "Missed"
        );

        for (id, reservation) in state.reservations.iter() {
            if !reservation.valid {
                continue;
            }
            crate::kinfo!(
                "{:<10} {:<12} {:<12} {:<12} {:<12} {:<11} {:<6}",
                id,
                reservation.start,
                reservation.deadline,
                ns_to_us(reservation.estimate),
                ns_to_us(reservation.laxity()),
                reservation.tag.as_str(),
                reservation.missed
            );
        }
    }
}

/// Prints `-` for `None`
struct OptionDisplay<T>(Option<T>);

impl<T: core::fmt::Display> core::fmt::Display for OptionDisplay<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match &self.0 {
            Some(value) => value.fmt(f),
            None => f.pad("-"),
        }
    }
}
