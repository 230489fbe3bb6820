//! x86_64 implementation.
//!
//! `context` only computes stack layouts and builds everywhere. `cpu` talks
//! to the processor and the PIC.

pub mod context;
#[cfg(target_arch = "x86_64")]
pub mod cpu;

#[cfg(target_arch = "x86_64")]
pub use cpu::X86Cpu;
