//! Core scheduling algorithm
//!
//! Every reschedule on a processor runs the same sequence under the global
//! lock:
//!
//! 1. Detach the running thread and charge the time it used, either to the
//!    reservation it ran under or to its activity's round-robin slice.
//! 2. Wake expired sleepers and move reservations whose start time has
//!    arrived from the idle list to the Guaranteed queue.
//! 3. Select: the current activity while its slice lasts, else the policy's
//!    reserved pick, else the next activity on the round-robin ring.
//! 4. Program the one-shot timer for the end of the grant (bounded by the
//!    next wake-up). If the platform reports that time as already passed,
//!    go back to step 2 with a fresh clock.
//!
//! With nothing to run the processor halts until the earliest sleeper or
//! idle-reservation start.
//!
//! Cross-processor effects (new runnable work, a constraint admitted for a
//! thread running elsewhere) are collected in `SchedState::kick` while the
//! lock is held and delivered after it is dropped: the target's
//! `need_resched` is raised and halted processors get an IPI.

use alloc::boxed::Box;
use alloc::vec::Vec;
#[cfg(feature = "smp")]
use core::sync::atomic::AtomicBool;

use super::percpu::PerCpuSched;
use super::policy::{LaxityPolicy, RoundRobinPolicy, SchedPolicy};
use super::table::SchedState;
use super::types::{
    ActivityId, CpuMask, NextThread, QueueTag, ReservationId, ThreadId, ThreadState, MAX_CPUS,
};
use crate::config::SchedConfig;
use crate::error::SchedError;
use crate::hal::Platform;
use crate::sync::{irq, IrqSpinLock};
use crate::time::{deadline_after, is_infinite, ns_to_us, Time, NS_PER_MS};

/// Scheduling core for one machine
pub struct Scheduler<P: SchedPolicy, H: Platform> {
    pub(super) platform: H,
    pub(super) config: SchedConfig,
    pub(super) state: IrqSpinLock<SchedState<P>>,
    pub(super) percpu: Box<[PerCpuSched]>,
    #[cfg(feature = "smp")]
    pub(super) freeze: AtomicBool,
}

/// Earliest-laxity-first scheduler
pub type LaxityScheduler<H> = Scheduler<LaxityPolicy, H>;

/// Round-robin-only scheduler
pub type RoundRobinScheduler<H> = Scheduler<RoundRobinPolicy, H>;

impl<P: SchedPolicy, H: Platform> Scheduler<P, H> {
    pub fn new(platform: H, config: SchedConfig, num_cpus: usize) -> Result<Self, SchedError> {
        config.validate()?;
        if num_cpus == 0 || num_cpus > MAX_CPUS {
            return Err(SchedError::InvalidCpu);
        }
        #[cfg(not(feature = "smp"))]
        if num_cpus != 1 {
            return Err(SchedError::InvalidCpu);
        }

        let percpu: Vec<PerCpuSched> = (0..num_cpus).map(|_| PerCpuSched::new()).collect();

        crate::kinfo!(
            "{} scheduler initialized ({} cpus, {}ms robin slice, {} reservations)",
            P::NAME,
            num_cpus,
            config.robin_slice / NS_PER_MS,
            config.reservation_pool
        );

        Ok(Self {
            platform,
            config,
            state: IrqSpinLock::new(SchedState::new(config, num_cpus)),
            percpu: percpu.into_boxed_slice(),
            #[cfg(feature = "smp")]
            freeze: AtomicBool::new(false),
        })
    }

    #[inline]
    pub fn platform(&self) -> &H {
        &self.platform
    }

    #[inline]
    pub fn config(&self) -> &SchedConfig {
        &self.config
    }

    #[inline]
    pub fn num_cpus(&self) -> usize {
        self.percpu.len()
    }

    #[inline]
    pub(super) fn check_cpu(&self, cpu: usize) -> Result<(), SchedError> {
        if cpu < self.percpu.len() {
            Ok(())
        } else {
            Err(SchedError::InvalidCpu)
        }
    }

    /// Run `f` on the global state with the lock held, then deliver the
    /// reschedule requests it produced
    pub(super) fn with_state<R>(&self, f: impl FnOnce(&mut SchedState<P>, Time) -> R) -> R {
        let (result, kicks) = {
            let mut state = self.state.lock();
            debug_assert!(irq::are_masked(), "scheduler state touched with interrupts on");
            let now = self.platform.kernel_time();
            let result = f(&mut state, now);
            (result, core::mem::replace(&mut state.kick, CpuMask::empty()))
        };
        self.deliver_kicks(&kicks);
        result
    }

    fn deliver_kicks(&self, kicks: &CpuMask) {
        if kicks.is_empty() {
            return;
        }
        #[cfg(feature = "smp")]
        let mut halted = CpuMask::empty();
        for cpu in kicks.iter_set() {
            let Some(percpu) = self.percpu.get(cpu) else {
                continue;
            };
            percpu.set_need_resched();
            #[cfg(feature = "smp")]
            if percpu.is_idle() {
                halted.set(cpu);
            }
        }
        #[cfg(feature = "smp")]
        if !halted.is_empty() {
            crate::ktrace!("sched: signalling halted cpus {:?}", halted);
            self.platform.signal_processors(&halted);
        }
    }

    /// Re-run the decision for `cpu`
    fn reschedule(&self, cpu: usize) -> NextThread {
        let percpu = &self.percpu[cpu];
        percpu.check_need_resched();

        let (next, kicks) = {
            let mut state = self.state.lock();
            debug_assert!(irq::are_masked(), "reschedule with interrupts on");
            let now = self.platform.kernel_time();
            let decision = state.reschedule(&self.platform, cpu, now);
            percpu.record_decision(
                decision.next.is_halt(),
                decision.entered_idle,
                decision.switched,
                decision.timer,
                decision.idle_ns,
            );
            let mut kicks = core::mem::replace(&mut state.kick, CpuMask::empty());
            kicks.clear(cpu);
            (decision.next, kicks)
        };
        self.deliver_kicks(&kicks);
        next
    }

    // ========================================================================
    // Interrupt-path entry points
    // ========================================================================

    /// `NextThread`: decide what `cpu` runs now
    pub fn next_thread(&self, cpu: usize) -> Result<NextThread, SchedError> {
        self.check_cpu(cpu)?;
        Ok(self.reschedule(cpu))
    }

    /// `ShouldReschedule`: another processor asked for a new decision, or
    /// the current grant has run out
    pub fn should_reschedule(&self, cpu: usize) -> bool {
        let Some(percpu) = self.percpu.get(cpu) else {
            return false;
        };
        percpu.need_resched() || self.platform.kernel_time() >= percpu.next_timer()
    }

    /// `OnTimerInterrupt`: returns the new decision, or `None` if the
    /// current one stands (spurious or early interrupt)
    pub fn on_timer_interrupt(&self, cpu: usize) -> Result<Option<NextThread>, SchedError> {
        self.check_cpu(cpu)?;
        self.percpu[cpu].record_interrupt();
        if !self.should_reschedule(cpu) {
            return Ok(None);
        }
        Ok(Some(self.reschedule(cpu)))
    }

    /// `OnIoInterrupt`: a device handler may have woken threads; act on it
    /// only if that produced a reschedule request for this processor
    pub fn on_io_interrupt(&self, cpu: usize) -> Result<Option<NextThread>, SchedError> {
        self.check_cpu(cpu)?;
        self.percpu[cpu].record_interrupt();
        if !self.percpu[cpu].need_resched() {
            return Ok(None);
        }
        Ok(Some(self.reschedule(cpu)))
    }

    /// Give up the rest of the current round-robin slice
    pub fn yield_now(&self, cpu: usize) -> Result<NextThread, SchedError> {
        self.check_cpu(cpu)?;
        self.with_state(|state, _| state.cpus[cpu].slice_left = 0);
        Ok(self.reschedule(cpu))
    }
}

// ============================================================================
// Decision
// ============================================================================

/// Outcome of one reschedule, published to the processor's counters
pub(super) struct Decision {
    pub next: NextThread,
    pub switched: bool,
    pub entered_idle: bool,
    /// Halted time that ended with this decision
    pub idle_ns: Time,
    /// Programmed timer, or `TIME_INFINITE`
    pub timer: Time,
}

#[derive(Clone, Copy, Debug)]
enum Selection {
    /// Current activity, slice not used up
    Continue(ActivityId, ThreadId),
    /// Reservation picked by the policy
    Reserved(ReservationId, ThreadId),
    /// Next activity on the ring, fresh slice
    Fresh(ActivityId, ThreadId),
}

impl Selection {
    fn thread(self) -> ThreadId {
        match self {
            Selection::Continue(_, thread)
            | Selection::Reserved(_, thread)
            | Selection::Fresh(_, thread) => thread,
        }
    }
}

impl<P: SchedPolicy> SchedState<P> {
    pub(super) fn reschedule<H: Platform>(&mut self, platform: &H, cpu: usize, now: Time) -> Decision {
        let previous = self.detach_running(cpu, now);
        let mut now = now;

        loop {
            self.wake_sleepers(now);
            self.promote_idle(now);
            let next_wake = self.sleep.timeout().min(self.idle_head_start());

            let Some(selection) = self.select(cpu, now) else {
                if !is_infinite(next_wake) && !platform.set_next_interrupt(cpu, next_wake) {
                    self.stats.timer_retries += 1;
                    now = platform.kernel_time().max(now);
                    continue;
                }
                return self.enter_idle(cpu, now, next_wake);
            };

            let until = self.grant_end(cpu, selection, now).min(next_wake);
            if !platform.set_next_interrupt(cpu, until) {
                self.stats.timer_retries += 1;
                crate::ktrace!("sched: cpu{} timer {} already passed, retrying", cpu, until);
                now = platform.kernel_time().max(now);
                continue;
            }
            return self.commit(cpu, selection, now, until, previous);
        }
    }

    /// Take the running thread off `cpu`, charge it and put it where its
    /// state says it belongs
    fn detach_running(&mut self, cpu: usize, now: Time) -> Option<ThreadId> {
        let dispatch = &mut self.cpus[cpu];
        let previous = dispatch.running.take()?;
        let elapsed = now.saturating_sub(dispatch.sched_clock).max(0);
        dispatch.sched_clock = now;

        match dispatch.current_reservation.take() {
            Some(reservation) => {
                self.charge_reservation(reservation, elapsed, now);
                self.requeuing = Some(reservation);
                if self
                    .reservations
                    .get(reservation)
                    .map_or(false, |r| r.tag == QueueTag::Guaranteed)
                {
                    P::enqueue_guaranteed(self, reservation);
                }
            }
            None => dispatch.slice_left = dispatch.slice_left.saturating_sub(elapsed).max(0),
        }
        self.charge_thread(previous, elapsed);

        let entry = &mut self.threads[previous];
        entry.active_processor = None;
        let (state, wake_time) = (entry.state, entry.wake_time);
        match state {
            ThreadState::Running => self.make_runnable(previous, false),
            ThreadState::Waiting => {
                if !is_infinite(wake_time) {
                    self.sleep.insert(&mut self.threads, previous);
                }
            }
            ThreadState::Stopped => {
                self.threads.remove(previous);
                crate::ktrace!("sched: reclaimed stopped thread {}", previous);
            }
            // Back on the ring when its constraint starts.
            ThreadState::Deferred => {}
            state => panic!("thread {} was running in state {}", previous, state.as_str()),
        }
        self.requeuing = None;
        Some(previous)
    }

    fn select(&mut self, cpu: usize, now: Time) -> Option<Selection> {
        let dispatch = self.cpus[cpu];
        if dispatch.slice_left > 0 {
            if let Some(activity) = dispatch.current_activity {
                if let Some(thread) = self.activities.get(activity).and_then(|a| a.runnable.head()) {
                    return Some(Selection::Continue(activity, thread));
                }
            }
        }

        if let Some((reservation, thread)) = P::pick_reserved(self, now) {
            return Some(Selection::Reserved(reservation, thread));
        }

        let mut cursor = self.ring.head();
        for _ in 0..self.ring.len() {
            let activity = cursor?;
            if let Some(thread) = self.activities[activity].runnable.head() {
                return Some(Selection::Fresh(activity, thread));
            }
            cursor = Some(self.ring.next(&self.activities, activity));
        }
        None
    }

    /// When the grant for `selection` should end, before the next-wake bound
    fn grant_end(&self, cpu: usize, selection: Selection, now: Time) -> Time {
        let (slice, limit) = match selection {
            Selection::Continue(..) => (self.cpus[cpu].slice_left, Time::MAX),
            Selection::Fresh(..) => (self.config.robin_slice, Time::MAX),
            Selection::Reserved(reservation, _) => {
                let reservation = &self.reservations[reservation];
                (reservation.estimate, reservation.deadline)
            }
        };
        deadline_after(now, slice.max(self.config.min_slice)).min(limit)
    }

    fn commit(
        &mut self,
        cpu: usize,
        selection: Selection,
        now: Time,
        until: Time,
        previous: Option<ThreadId>,
    ) -> Decision {
        let thread = selection.thread();
        self.dequeue_run_thread(thread);

        match selection {
            Selection::Continue(..) => self.stats.robin_dispatches += 1,
            Selection::Reserved(reservation, _) => {
                self.guaranteed.remove(reservation);
                self.reservations[reservation].active = Some(cpu);
                self.cpus[cpu].current_reservation = Some(reservation);
                self.stats.reservation_dispatches += 1;
            }
            Selection::Fresh(activity, _) => {
                let next = self.ring.next(&self.activities, activity);
                self.ring.set_head(next);
                let dispatch = &mut self.cpus[cpu];
                dispatch.current_activity = Some(activity);
                dispatch.slice_left = self.config.robin_slice;
                self.stats.robin_dispatches += 1;
            }
        }

        let entry = &mut self.threads[thread];
        entry.state = ThreadState::Running;
        entry.active_processor = Some(cpu);

        let dispatch = &mut self.cpus[cpu];
        let idle_ns = if dispatch.idle {
            dispatch.idle = false;
            now.saturating_sub(dispatch.idle_since).max(0)
        } else {
            0
        };
        dispatch.running = Some(thread);
        dispatch.sched_clock = now;
        dispatch.next_timer = until;

        let switched = previous != Some(thread);
        if switched {
            self.stats.context_switches += 1;
        }
        crate::ktrace!(
            "sched: cpu{} -> {} ({:?}) for {}us",
            cpu,
            thread,
            selection,
            ns_to_us(until - now)
        );

        Decision {
            next: NextThread::Run(thread),
            switched,
            entered_idle: false,
            idle_ns,
            timer: until,
        }
    }

    fn enter_idle(&mut self, cpu: usize, now: Time, wake_at: Time) -> Decision {
        let dispatch = &mut self.cpus[cpu];
        let entered_idle = !dispatch.idle;
        if entered_idle {
            dispatch.idle = true;
            dispatch.idle_since = now;
            self.stats.idle_entries += 1;
        }
        dispatch.sched_clock = now;
        dispatch.next_timer = wake_at;
        crate::ktrace!("sched: cpu{} halting until {}", cpu, wake_at);

        Decision {
            next: NextThread::Halt { wake_at },
            switched: false,
            entered_idle,
            idle_ns: 0,
            timer: wake_at,
        }
    }
}
