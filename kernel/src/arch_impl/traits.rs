//! Architecture-agnostic traits for hardware abstraction.
//!
//! The kernel core is single-core. Its only concurrency control is
//! "interrupts off while shared state is mutated", so the interface here is
//! small: interrupt flag save/restore, a way to force the scheduler to run,
//! and halt.

/// Basic CPU control consumed by the scheduler core.
///
/// Methods take `&self` so a platform can carry state (the host mock
/// records every call). Real hardware implementations are zero-sized.
pub trait CpuOps {
    /// Disable interrupts and report whether they were enabled before.
    fn interrupts_disable(&self) -> bool;

    /// Restore the flag returned by a matching [`interrupts_disable`].
    ///
    /// Only re-enables if `was_enabled` is true, so nested regions compose.
    ///
    /// [`interrupts_disable`]: CpuOps::interrupts_disable
    fn interrupts_restore(&self, was_enabled: bool);

    fn interrupts_enabled(&self) -> bool;

    /// Trigger a synchronous scheduler tick.
    ///
    /// Must be called with no kernel lock held; the tick handler takes it.
    fn force_reschedule(&self);

    /// Wait for the next interrupt.
    fn halt(&self);

    /// True while the timer IRQ line is masked at the interrupt controller.
    fn timer_masked(&self) -> bool;

    /// Address every new process begins executing at.
    fn entry_trampoline(&self) -> u64;

    /// Run `f` with interrupts disabled, restoring the previous state.
    #[inline]
    fn without_interrupts<F, R>(&self, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let was_enabled = self.interrupts_disable();
        let result = f();
        self.interrupts_restore(was_enabled);
        result
    }
}
