//! Host platform used by unit and scenario tests.
//!
//! `MockCpu` simulates the interrupt flag and counts every hardware request
//! the core makes. Clones share state, so a test can keep a handle while
//! the kernel owns another.

use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use super::traits::CpuOps;

/// Trampoline address reported to new processes on the host.
pub const MOCK_TRAMPOLINE: u64 = 0xFFFF_8000_0010_0000;

#[derive(Debug)]
struct MockState {
    enabled: AtomicBool,
    disables: AtomicUsize,
    restores: AtomicUsize,
    reschedules: AtomicUsize,
    halts: AtomicUsize,
    timer_masked: AtomicBool,
}

#[derive(Debug, Clone)]
pub struct MockCpu {
    state: Arc<MockState>,
}

impl MockCpu {
    /// Interrupts start enabled, timer unmasked.
    pub fn new() -> Self {
        Self {
            state: Arc::new(MockState {
                enabled: AtomicBool::new(true),
                disables: AtomicUsize::new(0),
                restores: AtomicUsize::new(0),
                reschedules: AtomicUsize::new(0),
                halts: AtomicUsize::new(0),
                timer_masked: AtomicBool::new(false),
            }),
        }
    }

    pub fn set_timer_masked(&self, masked: bool) {
        self.state.timer_masked.store(masked, Ordering::SeqCst);
    }

    pub fn disable_count(&self) -> usize {
        self.state.disables.load(Ordering::SeqCst)
    }

    pub fn restore_count(&self) -> usize {
        self.state.restores.load(Ordering::SeqCst)
    }

    pub fn reschedule_count(&self) -> usize {
        self.state.reschedules.load(Ordering::SeqCst)
    }

    pub fn halt_count(&self) -> usize {
        self.state.halts.load(Ordering::SeqCst)
    }
}

impl Default for MockCpu {
    fn default() -> Self {
        Self::new()
    }
}

impl CpuOps for MockCpu {
    fn interrupts_disable(&self) -> bool {
        self.state.disables.fetch_add(1, Ordering::SeqCst);
        self.state.enabled.swap(false, Ordering::SeqCst)
    }

    fn interrupts_restore(&self, was_enabled: bool) {
        self.state.restores.fetch_add(1, Ordering::SeqCst);
        if was_enabled {
            self.state.enabled.store(true, Ordering::SeqCst);
        }
    }

    fn interrupts_enabled(&self) -> bool {
        self.state.enabled.load(Ordering::SeqCst)
    }

    fn force_reschedule(&self) {
        self.state.reschedules.fetch_add(1, Ordering::SeqCst);
    }

    fn halt(&self) {
        self.state.halts.fetch_add(1, Ordering::SeqCst);
    }

    fn timer_masked(&self) -> bool {
        self.state.timer_masked.load(Ordering::SeqCst)
    }

    fn entry_trampoline(&self) -> u64 {
        MOCK_TRAMPOLINE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_disable_restores_outer_state() {
        let cpu = MockCpu::new();

        let outer = cpu.interrupts_disable();
        let inner = cpu.interrupts_disable();
        assert!(outer, "interrupts start enabled");
        assert!(!inner, "inner region sees them already off");

        cpu.interrupts_restore(inner);
        assert!(!cpu.interrupts_enabled(), "inner restore must not re-enable");
        cpu.interrupts_restore(outer);
        assert!(cpu.interrupts_enabled());
    }

    #[test]
    fn test_clones_share_counters() {
        let cpu = MockCpu::new();
        let handle = cpu.clone();
        cpu.force_reschedule();
        cpu.halt();
        assert_eq!(handle.reschedule_count(), 1);
        assert_eq!(handle.halt_count(), 1);
    }

    #[test]
    fn test_without_interrupts() {
        let cpu = MockCpu::new();
        let seen = cpu.without_interrupts(|| cpu.interrupts_enabled());
        assert!(!seen);
        assert!(cpu.interrupts_enabled());
        assert_eq!(cpu.disable_count(), 1);
        assert_eq!(cpu.restore_count(), 1);
    }
}
