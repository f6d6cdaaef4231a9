//! Freeze/thaw across processors
//!
//! A freeze stops every processor at its next interrupt boundary, e.g. for
//! a debugger stop or before suspend. Processors notice the request when
//! they reschedule and call [`Scheduler::park_point`], the single place
//! where a processor waits for another one. Scheduling state is untouched
//! while frozen; timers that fire during the freeze are handled by the
//! reschedule that follows the thaw.

use core::sync::atomic::Ordering;

use super::core::Scheduler;
use super::policy::SchedPolicy;
use super::types::CpuMask;
use crate::error::SchedError;
use crate::hal::Platform;

impl<P: SchedPolicy, H: Platform> Scheduler<P, H> {
    /// Ask every processor to park. Halted processors are signalled so they
    /// notice without waiting for their timer.
    pub fn request_freeze(&self) {
        if self.freeze.swap(true, Ordering::AcqRel) {
            return;
        }
        let all = CpuMask::all(self.num_cpus());
        for percpu in self.percpu.iter() {
            percpu.set_need_resched();
        }
        crate::kinfo!("sched: freeze requested on {} cpus", self.num_cpus());
        self.platform.signal_processors(&all);
    }

    /// Release parked processors
    pub fn thaw(&self) {
        if self.freeze.swap(false, Ordering::AcqRel) {
            crate::kinfo!("sched: thawed");
        }
    }

    #[inline]
    pub fn freeze_requested(&self) -> bool {
        self.freeze.load(Ordering::Acquire)
    }

    /// Every processor has parked
    pub fn is_frozen(&self) -> bool {
        self.freeze_requested() && self.percpu.iter().all(|percpu| percpu.is_parked())
    }

    pub fn parked_cpus(&self) -> CpuMask {
        let mut mask = CpuMask::empty();
        for (cpu, percpu) in self.percpu.iter().enumerate() {
            if percpu.is_parked() {
                mask.set(cpu);
            }
        }
        mask
    }

    /// Park `cpu` while a freeze is in effect. Returns `true` if it parked;
    /// the caller should then ask for a fresh decision with
    /// [`next_thread`](Self::next_thread).
    ///
    /// Must be called with the scheduler lock released.
    pub fn park_point(&self, cpu: usize) -> Result<bool, SchedError> {
        self.check_cpu(cpu)?;
        if !self.freeze_requested() {
            return Ok(false);
        }

        let percpu = &self.percpu[cpu];
        percpu.set_parked(true);
        crate::kdebug!("sched: cpu{} parked", cpu);
        while self.freeze_requested() {
            core::hint::spin_loop();
        }
        percpu.set_parked(false);
        percpu.set_need_resched();
        crate::kdebug!("sched: cpu{} resumed", cpu);
        Ok(true)
    }
}
