//! x86_64 CPU operations.
//!
//! Implements interrupt control, halt and the forced scheduler tick on top
//! of the `x86_64` crate.

use x86_64::instructions::interrupts;
use x86_64::instructions::port::Port;

use crate::arch_impl::traits::CpuOps;

/// PIC1 interrupt mask register.
const PIC1_DATA: u16 = 0x21;

/// x86_64 CPU operations implementation.
#[derive(Debug, Clone, Copy, Default)]
pub struct X86Cpu;

impl CpuOps for X86Cpu {
    #[inline(always)]
    fn interrupts_disable(&self) -> bool {
        let was_enabled = interrupts::are_enabled();
        interrupts::disable();
        was_enabled
    }

    #[inline(always)]
    fn interrupts_restore(&self, was_enabled: bool) {
        if was_enabled {
            interrupts::enable();
        }
    }

    #[inline(always)]
    fn interrupts_enabled(&self) -> bool {
        interrupts::are_enabled()
    }

    fn force_reschedule(&self) {
        // Vector 0x20 is IRQ0 after the PIC remap; the handler runs the
        // scheduler exactly as a hardware tick would.
        unsafe {
            core::arch::asm!("int 0x20");
        }
    }

    #[inline(always)]
    fn halt(&self) {
        x86_64::instructions::hlt();
    }

    fn timer_masked(&self) -> bool {
        let mut mask: Port<u8> = Port::new(PIC1_DATA);
        // SAFETY: reading the PIC mask register has no side effects.
        let bits = unsafe { mask.read() };
        bits & 0x01 != 0
    }

    fn entry_trampoline(&self) -> u64 {
        crate::global::process_entry as usize as u64
    }
}
