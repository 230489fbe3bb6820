//! Architecture abstraction layer.
//!
//! The scheduler and the synchronization primitives reach hardware only
//! through [`CpuOps`]. On x86_64 that is [`x86_64::X86Cpu`]; host tests run
//! the same code against [`host::MockCpu`].

pub mod host;
pub mod traits;
pub mod x86_64;

pub use traits::CpuOps;
