//! Quanta: the process and scheduling core of a small x86-64 kernel.
//!
//! Everything that decides which process runs lives in [`Kernel`]:
//! the process table, the priority scheduler, semaphores, pipes and the
//! sleep queue. Hardware is reached only through
//! [`CpuOps`](arch_impl::CpuOps), so the whole core runs in host unit
//! tests against a mock CPU. On x86_64 the [`global`] module holds the
//! single live instance and the ISR and process entry points.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod arch_impl;
pub mod collections;
pub mod config;
pub mod errno;
pub mod error;
pub mod ipc;
pub mod kernel;
pub mod logger;
pub mod memory;
pub mod process;
pub mod sync;
pub mod task;
pub mod time;

#[cfg(target_arch = "x86_64")]
pub mod global;
#[cfg(target_arch = "x86_64")]
pub mod serial;

pub use error::{KernelError, KernelResult};
pub use kernel::{InitReport, Kernel};
