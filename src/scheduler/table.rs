//! Global scheduler state
//!
//! Everything shared between processors lives in one [`SchedState`], which
//! the [`Scheduler`](super::Scheduler) keeps behind its interrupt-masking
//! spinlock. Code in this module and its siblings therefore runs with the
//! lock held and interrupts masked.

use alloc::vec::Vec;
use core::marker::PhantomData;

use super::activity::{ActivityTable, RingLink};
use super::heap::LaxityHeap;
use super::percpu::CpuDispatch;
use super::policy::SchedPolicy;
use super::queue::List;
use super::reservation::{IdleLink, ReservationTable};
use super::sleep::SleepQueue;
use super::stats::SchedulerStats;
use super::thread::ThreadTable;
use super::types::{CpuMask, ReservationId, ThreadId};
use crate::config::SchedConfig;

pub struct SchedState<P> {
    pub config: SchedConfig,
    pub threads: ThreadTable,
    pub activities: ActivityTable,
    /// Doubles as the reservation pool
    pub reservations: ReservationTable,
    /// Round-robin ring; its head is the cursor
    pub ring: List<RingLink>,
    pub guaranteed: LaxityHeap<ReservationId>,
    /// Not-yet-started reservations, by start time
    pub idle: List<IdleLink>,
    pub sleep: SleepQueue,
    pub cpus: Vec<CpuDispatch>,
    pub next_sequence: u64,
    pub stats: SchedulerStats,
    /// Processors to flag for rescheduling once the lock is dropped
    pub kick: CpuMask,
    /// Reservation going back on the queue after its own slice; it takes
    /// no turn away from round-robin work
    pub requeuing: Option<ReservationId>,
    _policy: PhantomData<fn() -> P>,
}

impl<P: SchedPolicy> SchedState<P> {
    pub fn new(config: SchedConfig, num_cpus: usize) -> Self {
        let mut cpus = Vec::with_capacity(num_cpus);
        cpus.resize(num_cpus, CpuDispatch::new());

        Self {
            config,
            threads: ThreadTable::with_capacity(config.max_threads),
            activities: ActivityTable::with_capacity(config.max_activities),
            reservations: ReservationTable::with_capacity(config.reservation_pool),
            ring: List::new(),
            guaranteed: LaxityHeap::with_capacity(config.reservation_pool),
            idle: List::new(),
            sleep: SleepQueue::new(),
            cpus,
            next_sequence: 0,
            stats: SchedulerStats::new(),
            kick: CpuMask::empty(),
            requeuing: None,
            _policy: PhantomData,
        }
    }

    #[inline]
    pub fn num_cpus(&self) -> usize {
        self.cpus.len()
    }

    #[inline]
    pub(super) fn kick(&mut self, cpu: usize) {
        self.kick.set(cpu);
    }

    pub(super) fn kick_all(&mut self) {
        self.kick = CpuMask::all(self.cpus.len());
    }

    /// Kick the processor `thread` is running on, if any
    pub(super) fn kick_thread(&mut self, thread: ThreadId) {
        if let Some(cpu) = self.threads.get(thread).and_then(|t| t.active_processor) {
            self.kick(cpu);
        }
    }

    /// End every processor's round-robin turn early
    pub(super) fn forfeit_robin_slices(&mut self) {
        for dispatch in self.cpus.iter_mut() {
            dispatch.slice_left = 0;
        }
        self.kick_all();
    }
}
