//! Kernel error taxonomy.
//!
//! Every fallible core operation returns [`KernelResult`]. Nothing in the
//! core retries: an error is reported to the caller immediately and the
//! operation leaves no partial state behind.

use alloc::collections::TryReserveError;
use core::fmt;

use crate::errno::{EBUSY, EINVAL, ENOMEM};

/// Failure classes surfaced by the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// No free PID, no free pipe slot, or the allocator refused a request.
    ResourceExhausted,
    /// Unknown pid, fd out of range, priority out of range, empty buffer.
    InvalidArgument,
    /// The target exists but is in the wrong state for the request
    /// (unblocking a process that is not blocked, waiting on a non-child).
    StateConflict,
}

pub type KernelResult<T> = Result<T, KernelError>;

impl KernelError {
    /// POSIX errno for this error, as a positive value.
    pub fn errno(self) -> i32 {
        match self {
            KernelError::ResourceExhausted => ENOMEM,
            KernelError::InvalidArgument => EINVAL,
            KernelError::StateConflict => EBUSY,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            KernelError::ResourceExhausted => "resource exhausted",
            KernelError::InvalidArgument => "invalid argument",
            KernelError::StateConflict => "state conflict",
        }
    }
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<TryReserveError> for KernelError {
    fn from(_: TryReserveError) -> Self {
        KernelError::ResourceExhausted
    }
}

/// Collapse a result into the syscall convention: the value on success,
/// `-errno` on failure.
pub fn to_sentinel(result: KernelResult<i64>) -> i64 {
    match result {
        Ok(value) => value,
        Err(e) => -(e.errno() as i64),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;

    #[test]
    fn test_errno_mapping() {
        assert_eq!(KernelError::ResourceExhausted.errno(), ENOMEM);
        assert_eq!(KernelError::InvalidArgument.errno(), EINVAL);
        assert_eq!(KernelError::StateConflict.errno(), EBUSY);
    }

    #[test]
    fn test_sentinel_is_negative_errno() {
        assert_eq!(to_sentinel(Ok(7)), 7);
        assert_eq!(to_sentinel(Err(KernelError::InvalidArgument)), -22);
        assert_eq!(to_sentinel(Err(KernelError::ResourceExhausted)), -12);
    }

    #[test]
    fn test_try_reserve_failure_converts() {
        let mut v: Vec<u8> = Vec::new();
        let err = v.try_reserve(usize::MAX).unwrap_err();
        assert_eq!(KernelError::from(err), KernelError::ResourceExhausted);
    }
}
