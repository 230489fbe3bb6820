//! File descriptors
//!
//! Every process has exactly three descriptors, bound to pipes: 0 reads,
//! 1 and 2 write. Only the foreground process may read from the console's
//! stdin pipe.

use crate::arch_impl::CpuOps;
use crate::error::{KernelError, KernelResult};
use crate::kernel::Kernel;
use crate::process::Pid;

use super::pipe::{PipeId, PipeIo, STDIN};

/// Standard input file descriptor
pub const STDIN_FD: usize = 0;
/// Standard output file descriptor
pub const STDOUT_FD: usize = 1;
/// Standard error file descriptor
pub const STDERR_FD: usize = 2;
/// Descriptors per process
pub const MAX_FDS: usize = 3;

impl<P: CpuOps + Clone> Kernel<P> {
    /// Pipe bound to `fd` of `caller`.
    pub fn fd_target(&self, caller: Pid, fd: usize) -> KernelResult<PipeId> {
        let process = self.live(caller)?;
        if !process.fds_attached {
            return Err(KernelError::StateConflict);
        }
        process
            .fds
            .get(fd)
            .copied()
            .ok_or(KernelError::InvalidArgument)
    }

    pub fn read_fd(&mut self, caller: Pid, fd: usize, buf: &mut [u8]) -> KernelResult<PipeIo> {
        let target = self.fd_target(caller, fd)?;
        if target == STDIN && self.processes.foreground() != Some(caller) {
            log::warn!("fd: {} read stdin without the foreground", caller);
            return Err(KernelError::StateConflict);
        }
        self.read_pipe(caller, target, buf)
    }

    pub fn write_fd(&mut self, caller: Pid, fd: usize, data: &[u8]) -> KernelResult<PipeIo> {
        let target = self.fd_target(caller, fd)?;
        self.write_pipe(caller, target, data)
    }

    /// Keyboard path. Never blocks; a full stdin drops the byte and
    /// returns false.
    pub fn stdin_push(&mut self, byte: u8) -> KernelResult<bool> {
        let pushed = self.push_byte_nonblocking(STDIN, byte)?;
        if !pushed {
            log::trace!("fd: stdin full, dropped {:#04x}", byte);
        }
        Ok(pushed)
    }
}
