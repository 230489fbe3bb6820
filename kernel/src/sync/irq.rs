//! Interrupt-disabled critical sections.
//!
//! On a single core with a non-preemptible kernel, "nobody else touches
//! this" only needs interrupts off. [`IrqGuard`] is that region as an RAII
//! value. [`IrqLock`] adds a held flag so that re-entering a region from an
//! interrupt handler is detected and refused instead of deadlocking.
//!
//! Neither type is a mutex. They give no protection against a second CPU.

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, Ordering};

use crate::arch_impl::CpuOps;

/// Interrupts stay disabled for the lifetime of the guard.
///
/// Dropping it restores the flag saved at creation, so nested guards
/// compose: only the outermost one re-enables.
pub struct IrqGuard<P: CpuOps> {
    cpu: P,
    was_enabled: bool,
}

impl<P: CpuOps> IrqGuard<P> {
    pub fn new(cpu: P) -> Self {
        let was_enabled = cpu.interrupts_disable();
        Self { cpu, was_enabled }
    }

    /// Interrupt state that will be restored on drop.
    pub fn was_enabled(&self) -> bool {
        self.was_enabled
    }
}

impl<P: CpuOps> Drop for IrqGuard<P> {
    fn drop(&mut self) {
        self.cpu.interrupts_restore(self.was_enabled);
    }
}

/// Non-reentrant critical-section cell.
///
/// Holding the lock means interrupts are off and the data is borrowed
/// exclusively. A nested attempt (an ISR firing inside the region cannot
/// happen, but an ISR that runs with the region already open can) gets
/// `None` from [`try_lock`](IrqLock::try_lock).
pub struct IrqLock<T, P: CpuOps> {
    cpu: P,
    held: AtomicBool,
    data: UnsafeCell<T>,
}

// SAFETY: access to `data` is serialized by `held` with interrupts off on a
// single core.
unsafe impl<T: Send, P: CpuOps + Sync> Sync for IrqLock<T, P> {}
unsafe impl<T: Send, P: CpuOps + Send> Send for IrqLock<T, P> {}

impl<T, P: CpuOps + Clone> IrqLock<T, P> {
    pub const fn new(cpu: P, data: T) -> Self {
        Self {
            cpu,
            held: AtomicBool::new(false),
            data: UnsafeCell::new(data),
        }
    }

    /// Enter the critical section, or `None` if it is already open.
    pub fn try_lock(&self) -> Option<IrqLockGuard<'_, T, P>> {
        let irq = IrqGuard::new(self.cpu.clone());
        if self
            .held
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            // `irq` drops here and restores the interrupt flag.
            return None;
        }
        Some(IrqLockGuard {
            lock: self,
            _irq: irq,
        })
    }

    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::Relaxed)
    }
}

/// Open critical section. Releases the held flag first, then restores
/// interrupts.
pub struct IrqLockGuard<'a, T, P: CpuOps + Clone> {
    lock: &'a IrqLock<T, P>,
    _irq: IrqGuard<P>,
}

impl<T, P: CpuOps + Clone> Deref for IrqLockGuard<'_, T, P> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the held flag grants exclusive access.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T, P: CpuOps + Clone> DerefMut for IrqLockGuard<'_, T, P> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: the held flag grants exclusive access.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T, P: CpuOps + Clone> Drop for IrqLockGuard<'_, T, P> {
    fn drop(&mut self) {
        self.lock.held.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch_impl::host::MockCpu;

    #[test]
    fn test_guard_restores_on_drop() {
        let cpu = MockCpu::new();
        {
            let guard = IrqGuard::new(cpu.clone());
            assert!(guard.was_enabled());
            assert!(!cpu.interrupts_enabled());
        }
        assert!(cpu.interrupts_enabled());
    }

    #[test]
    fn test_nested_guards_compose() {
        let cpu = MockCpu::new();
        let outer = IrqGuard::new(cpu.clone());
        {
            let inner = IrqGuard::new(cpu.clone());
            assert!(!inner.was_enabled());
        }
        assert!(
            !cpu.interrupts_enabled(),
            "dropping the inner guard must leave interrupts off"
        );
        drop(outer);
        assert!(cpu.interrupts_enabled());
    }

    #[test]
    fn test_lock_refuses_reentry() {
        let cpu = MockCpu::new();
        let lock = IrqLock::new(cpu.clone(), 5u32);

        let mut guard = lock.try_lock().expect("first entry succeeds");
        *guard += 1;
        assert!(lock.is_held());
        assert!(lock.try_lock().is_none(), "re-entry is refused");
        assert!(!cpu.interrupts_enabled(), "failed entry keeps outer state");

        drop(guard);
        assert!(!lock.is_held());
        assert!(cpu.interrupts_enabled());
        assert_eq!(*lock.try_lock().unwrap(), 6);
    }
}
