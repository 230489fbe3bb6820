//! Synchronization for a single-core kernel.

pub mod irq;
pub mod semaphore;

pub use irq::{IrqGuard, IrqLock, IrqLockGuard};
pub use semaphore::{SemId, SemWait, Semaphore, SemaphoreRegistry};
