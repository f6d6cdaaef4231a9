//! Interrupt-masking spinlock
//!
//! Scheduler state is shared by every processor and touched from interrupt
//! context, so it is only ever accessed with local interrupts masked and the
//! global spinlock held. [`IrqSpinLock`] bundles both: locking saves and
//! disables the interrupt flag, and dropping the guard releases the lock and
//! then restores the flag.
//!
//! Without the `bare_metal` feature there is no interrupt flag to touch; the
//! lock is a plain `spin::Mutex` and the local processor is always treated as
//! masked.

use core::ops::{Deref, DerefMut};

use spin::{Mutex, MutexGuard};

pub mod irq {
    /// Interrupt flag as it was before masking
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct IrqState {
        pub(crate) were_enabled: bool,
    }

    #[cfg(all(feature = "bare_metal", target_arch = "x86_64"))]
    mod imp {
        use x86_64::instructions::interrupts;

        #[inline]
        pub fn are_enabled() -> bool {
            interrupts::are_enabled()
        }

        #[inline]
        pub fn disable() {
            interrupts::disable();
        }

        #[inline]
        pub fn enable() {
            interrupts::enable();
        }
    }

    #[cfg(not(all(feature = "bare_metal", target_arch = "x86_64")))]
    mod imp {
        // Hosted builds: nothing can interrupt us.
        #[inline]
        pub fn are_enabled() -> bool {
            false
        }

        #[inline]
        pub fn disable() {}

        #[inline]
        pub fn enable() {}
    }

    /// Mask local interrupts, returning the previous state
    #[inline]
    pub fn save_and_disable() -> IrqState {
        let were_enabled = imp::are_enabled();
        if were_enabled {
            imp::disable();
        }
        IrqState { were_enabled }
    }

    /// Restore the state captured by [`save_and_disable`]
    #[inline]
    pub fn restore(state: IrqState) {
        if state.were_enabled {
            imp::enable();
        }
    }

    /// Whether local interrupts are currently masked
    #[inline]
    pub fn are_masked() -> bool {
        !imp::are_enabled()
    }
}

use irq::IrqState;

pub struct IrqSpinLock<T> {
    inner: Mutex<T>,
}

impl<T> IrqSpinLock<T> {
    pub const fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
        }
    }

    /// Mask interrupts and acquire the lock
    pub fn lock(&self) -> IrqSpinLockGuard<'_, T> {
        let irq = irq::save_and_disable();
        let guard = self.inner.lock();
        IrqSpinLockGuard {
            guard: Some(guard),
            irq,
        }
    }

    pub fn into_inner(self) -> T {
        self.inner.into_inner()
    }
}

pub struct IrqSpinLockGuard<'a, T> {
    // Option so the lock can be released before interrupts are restored.
    guard: Option<MutexGuard<'a, T>>,
    irq: IrqState,
}

impl<T> Deref for IrqSpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        match self.guard.as_ref() {
            Some(guard) => guard,
            None => unreachable!("guard used after release"),
        }
    }
}

impl<T> DerefMut for IrqSpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        match self.guard.as_mut() {
            Some(guard) => guard,
            None => unreachable!("guard used after release"),
        }
    }
}

impl<T> Drop for IrqSpinLockGuard<'_, T> {
    fn drop(&mut self) {
        drop(self.guard.take());
        irq::restore(self.irq);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_masks_and_releases() {
        let lock = IrqSpinLock::new(5u32);
        {
            let mut guard = lock.lock();
            assert!(irq::are_masked());
            *guard += 1;
            assert!(lock.inner.is_locked());
        }
        assert_eq!(*lock.lock(), 6);
        assert_eq!(lock.into_inner(), 6);
    }
}
