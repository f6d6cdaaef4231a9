//! Mock platform for testing
//!
//! Simulates the clock, the per-CPU one-shot timers and the reschedule IPI
//! without actual hardware.

use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Mutex;

use nexa_sched::time::{Time, TIME_INFINITE};
use nexa_sched::{CpuMask, Platform};

pub struct MockPlatform {
    clock: AtomicI64,
    timers: Mutex<Vec<Time>>,
    /// Number of upcoming `set_next_interrupt` calls to fail
    failures: AtomicUsize,
    /// Clock advance applied on each injected failure
    failure_step: AtomicI64,
    signals: Mutex<Vec<CpuMask>>,
}

impl MockPlatform {
    pub fn new(num_cpus: usize) -> Self {
        Self {
            clock: AtomicI64::new(0),
            timers: Mutex::new(vec![TIME_INFINITE; num_cpus]),
            failures: AtomicUsize::new(0),
            failure_step: AtomicI64::new(0),
            signals: Mutex::new(Vec::new()),
        }
    }

    pub fn now(&self) -> Time {
        self.clock.load(Ordering::SeqCst)
    }

    pub fn set_time(&self, now: Time) {
        self.clock.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, delta: Time) -> Time {
        self.clock.fetch_add(delta, Ordering::SeqCst) + delta
    }

    /// Last timer programmed on `cpu`
    pub fn timer(&self, cpu: usize) -> Time {
        self.timers.lock().unwrap()[cpu]
    }

    /// Make the next `count` timer programming attempts report that the
    /// deadline already passed, moving the clock by `step` each time
    pub fn fail_timers(&self, count: usize, step: Time) {
        self.failure_step.store(step, Ordering::SeqCst);
        self.failures.store(count, Ordering::SeqCst);
    }

    pub fn take_signals(&self) -> Vec<CpuMask> {
        std::mem::take(&mut *self.signals.lock().unwrap())
    }
}

impl Platform for MockPlatform {
    fn kernel_time(&self) -> Time {
        self.now()
    }

    fn set_next_interrupt(&self, cpu: usize, at: Time) -> bool {
        let pending = self.failures.load(Ordering::SeqCst);
        if pending > 0 {
            self.failures.store(pending - 1, Ordering::SeqCst);
            self.advance(self.failure_step.load(Ordering::SeqCst));
            return false;
        }
        if at <= self.now() {
            return false;
        }
        self.timers.lock().unwrap()[cpu] = at;
        true
    }

    fn signal_processors(&self, targets: &CpuMask) {
        self.signals.lock().unwrap().push(*targets);
    }
}
