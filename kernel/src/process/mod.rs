//! Process management
//!
//! The PCB and its table live here, along with the lifecycle operations on
//! [`Kernel`](crate::kernel::Kernel): create, exit, kill, wait, block and
//! the foreground and fd bookkeeping.

mod lifecycle;
pub mod process;
pub mod table;

pub use process::{
    ArgVector, EntryPoint, KernelStack, Pid, Process, ProcessInfo, ProcessState, WaitOutcome,
};
pub use table::ProcessTable;
