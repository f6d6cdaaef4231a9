//! Hardware services consumed by the scheduler
//!
//! The scheduling core never touches hardware. The kernel supplies one
//! [`Platform`] implementation (LAPIC timer, TSC clock, IPIs on x86_64; a
//! mock in host tests) and performs the actual context switch itself once
//! the scheduler hands back a thread.

use crate::scheduler::CpuMask;
use crate::time::Time;

pub trait Platform: Send + Sync {
    /// Monotonic kernel time in nanoseconds
    fn kernel_time(&self) -> Time;

    /// Program `cpu`'s one-shot timer to fire at `at`.
    ///
    /// Returns `false` if `at` has already passed; the scheduler then
    /// re-evaluates its decision with a fresh clock reading.
    fn set_next_interrupt(&self, cpu: usize, at: Time) -> bool;

    /// Wake the listed processors out of halt (reschedule IPI)
    fn signal_processors(&self, targets: &CpuMask);
}

impl<T: Platform + ?Sized> Platform for &T {
    fn kernel_time(&self) -> Time {
        (**self).kernel_time()
    }

    fn set_next_interrupt(&self, cpu: usize, at: Time) -> bool {
        (**self).set_next_interrupt(cpu, at)
    }

    fn signal_processors(&self, targets: &CpuMask) {
        (**self).signal_processors(targets)
    }
}

impl<T: Platform + ?Sized> Platform for alloc::sync::Arc<T> {
    fn kernel_time(&self) -> Time {
        (**self).kernel_time()
    }

    fn set_next_interrupt(&self, cpu: usize, at: Time) -> bool {
        (**self).set_next_interrupt(cpu, at)
    }

    fn signal_processors(&self, targets: &CpuMask) {
        (**self).signal_processors(targets)
    }
}
