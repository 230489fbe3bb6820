//! POSIX errno values
//!
//! The subset of error codes the kernel core hands back to the syscall
//! layer. Callers return them negated.

/// Cannot allocate memory
pub const ENOMEM: i32 = 12;

/// Device or resource busy
pub const EBUSY: i32 = 16;

/// Invalid argument
pub const EINVAL: i32 = 22;
