//! Pipes
//!
//! A pipe is a fixed-size circular byte buffer guarded by three private
//! semaphores: `mutex` serializes access to the buffer, `can_read` is
//! posted for every byte written and `can_write` for every byte read.
//! Readers and writers move one byte at a time and park on the
//! complementary semaphore when the buffer is empty or full.
//!
//! `attached` counts the fds bound to the pipe. A reader that is the only
//! attached party never waits for data, since nobody could supply it. The
//! three standard streams carry one extra reference held by the kernel
//! itself, so they survive every process detaching from them.

use alloc::boxed::Box;
use alloc::vec::Vec;

use crate::arch_impl::CpuOps;
use crate::config::PIPE_BUFFER_SIZE;
use crate::error::{KernelError, KernelResult};
use crate::kernel::Kernel;
use crate::process::{Pid, ProcessState};
use crate::sync::{SemId, SemWait, SemaphoreRegistry};

/// Pipe table index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipeId(usize);

impl PipeId {
    pub const fn new(id: usize) -> Self {
        Self(id)
    }

    pub const fn index(&self) -> usize {
        self.0
    }

    /// True for stdin, stdout and stderr.
    pub fn is_std(&self) -> bool {
        self.0 <= STDERR.0
    }
}

pub const STDIN: PipeId = PipeId(0);
pub const STDOUT: PipeId = PipeId(1);
pub const STDERR: PipeId = PipeId(2);

/// Result of a pipe transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeIo {
    /// Finished with this many bytes. May be short for a lone reader.
    Complete(usize),
    /// The caller is parked after moving `transferred` bytes. Retry with
    /// the rest of the buffer once it runs again.
    Blocked { transferred: usize },
}

pub struct Pipe {
    buffer: Box<[u8]>,
    read_idx: usize,
    write_idx: usize,
    data_count: usize,
    attached: usize,
    can_read: SemId,
    can_write: SemId,
    mutex: SemId,
}

impl Pipe {
    pub fn len(&self) -> usize {
        self.data_count
    }

    pub fn is_empty(&self) -> bool {
        self.data_count == 0
    }

    pub fn is_full(&self) -> bool {
        self.data_count == self.buffer.len()
    }

    pub fn attached(&self) -> usize {
        self.attached
    }

    /// Drop one attachment without taking the pipe mutex, for unwinding.
    pub(crate) fn detach(&mut self) {
        self.attached = self.attached.saturating_sub(1);
    }

    pub fn semaphores(&self) -> (SemId, SemId, SemId) {
        (self.can_read, self.can_write, self.mutex)
    }

    fn push_byte(&mut self, byte: u8) -> bool {
        if self.is_full() {
            return false;
        }
        self.buffer[self.write_idx] = byte;
        self.write_idx = (self.write_idx + 1) % self.buffer.len();
        self.data_count += 1;
        true
    }

    fn pop_byte(&mut self) -> Option<u8> {
        if self.is_empty() {
            return None;
        }
        let byte = self.buffer[self.read_idx];
        self.read_idx = (self.read_idx + 1) % self.buffer.len();
        self.data_count -= 1;
        Some(byte)
    }
}

/// `pipe_NNx`, where `x` is R, W or M.
fn sem_name(id: usize, kind: u8) -> [u8; 8] {
    let mut name = *b"pipe_00?";
    name[5] = b'0' + ((id / 10) % 10) as u8;
    name[6] = b'0' + (id % 10) as u8;
    name[7] = kind;
    name
}

fn create_sem(sems: &mut SemaphoreRegistry, id: usize, kind: u8, initial: u32) -> KernelResult<SemId> {
    let name = sem_name(id, kind);
    let name = core::str::from_utf8(&name).map_err(|_| KernelError::InvalidArgument)?;
    sems.create(name, initial)
}

/// Fixed table of pipe slots.
pub struct PipeTable {
    slots: Vec<Option<Pipe>>,
}

impl PipeTable {
    pub fn new(capacity: usize) -> KernelResult<Self> {
        let mut slots = Vec::new();
        slots.try_reserve_exact(capacity)?;
        slots.resize_with(capacity, || None);
        Ok(Self { slots })
    }

    /// Allocate the first free slot with an empty buffer and fresh
    /// semaphores. Nothing is left behind on failure.
    pub fn open(&mut self, sems: &mut SemaphoreRegistry) -> KernelResult<PipeId> {
        let index = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(KernelError::ResourceExhausted)?;

        let mut storage = Vec::new();
        storage.try_reserve_exact(PIPE_BUFFER_SIZE)?;
        storage.resize(PIPE_BUFFER_SIZE, 0);

        let can_read = create_sem(sems, index, b'R', 0)?;
        let can_write = match create_sem(sems, index, b'W', 0) {
            Ok(id) => id,
            Err(e) => {
                sems.remove(can_read);
                return Err(e);
            }
        };
        let mutex = match create_sem(sems, index, b'M', 1) {
            Ok(id) => id,
            Err(e) => {
                sems.remove(can_read);
                sems.remove(can_write);
                return Err(e);
            }
        };

        self.slots[index] = Some(Pipe {
            buffer: storage.into_boxed_slice(),
            read_idx: 0,
            write_idx: 0,
            data_count: 0,
            attached: 0,
            can_read,
            can_write,
            mutex,
        });
        Ok(PipeId(index))
    }

    /// Open stdin, stdout and stderr in an empty table, each holding the
    /// kernel's own reference.
    pub fn open_standard(&mut self, sems: &mut SemaphoreRegistry) -> KernelResult<()> {
        for expected in [STDIN, STDOUT, STDERR] {
            let id = self.open(sems)?;
            if id != expected {
                return Err(KernelError::StateConflict);
            }
            self.get_mut(id)?.attached = 1;
        }
        Ok(())
    }

    pub fn get(&self, id: PipeId) -> Option<&Pipe> {
        self.slots.get(id.0)?.as_ref()
    }

    pub fn get_mut(&mut self, id: PipeId) -> KernelResult<&mut Pipe> {
        self.slots
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .ok_or(KernelError::InvalidArgument)
    }

    fn take(&mut self, id: PipeId) -> Option<Pipe> {
        self.slots.get_mut(id.0)?.take()
    }

    pub fn contains(&self, id: PipeId) -> bool {
        self.get(id).is_some()
    }

    pub fn ids(&self) -> impl Iterator<Item = PipeId> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_some())
            .map(|(index, _)| PipeId(index))
    }

    pub fn len(&self) -> usize {
        self.ids().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<P: CpuOps + Clone> Kernel<P> {
    pub fn open_pipe(&mut self) -> KernelResult<PipeId> {
        let _irq = self.irq();
        let id = self.pipes.open(&mut self.semaphores)?;
        log::debug!("pipe: opened {}", id.0);
        Ok(id)
    }

    pub fn pipe(&self, id: PipeId) -> Option<&Pipe> {
        self.pipes.get(id)
    }

    /// Bind one more fd to `id`.
    pub fn attach_to_pipe(&mut self, id: PipeId) -> KernelResult<()> {
        let _irq = self.irq();
        let (_, _, mutex) = self.pipe_sems(id)?;
        self.lock_pipe(mutex)?;
        self.pipes.get_mut(id)?.attached += 1;
        self.unlock_pipe(mutex)
    }

    /// Drop one binding held by `pid`, including any wait it has queued on
    /// the pipe.
    pub fn unattach_from_pipe(&mut self, id: PipeId, pid: Pid) -> KernelResult<()> {
        let _irq = self.irq();
        let (can_read, can_write, mutex) = self.pipe_sems(id)?;
        self.semaphores.remove_waiter(can_read, pid)?;
        self.semaphores.remove_waiter(can_write, pid)?;

        self.lock_pipe(mutex)?;
        let pipe = self.pipes.get_mut(id)?;
        pipe.attached = pipe.attached.saturating_sub(1);
        self.unlock_pipe(mutex)
    }

    /// Release waiters and free the pipe once the attach count says it is
    /// no longer usable.
    ///
    /// For ordinary pipes, one or zero remaining attachments means a
    /// blocked peer can never be satisfied, so every waiter is woken to
    /// re-check. The pipe is freed at zero. Standard streams never release
    /// waiters and are freed once only the kernel's reference is left.
    pub fn close_pipe(&mut self, id: PipeId) -> KernelResult<()> {
        let _irq = self.irq();
        let (can_read, can_write, mutex) = self.pipe_sems(id)?;
        let is_std = id.is_std();

        self.lock_pipe(mutex)?;
        let attached = self.pipes.get_mut(id)?.attached;
        let release_waiters = !is_std && attached <= 1;
        let should_delete = attached == 0 || (is_std && attached == 1);
        let (readers, writers) = if release_waiters {
            (
                self.semaphores.waiting_count(can_read)?,
                self.semaphores.waiting_count(can_write)?,
            )
        } else {
            (0, 0)
        };
        self.unlock_pipe(mutex)?;

        for _ in 0..readers {
            self.sem_post(can_read)?;
        }
        for _ in 0..writers {
            self.sem_post(can_write)?;
        }
        if should_delete {
            self.destroy_pipe(id)?;
        }
        Ok(())
    }

    /// Tear down every live pipe.
    pub fn reset_pipes(&mut self) {
        let _irq = self.irq();
        let ids: Vec<PipeId> = self.pipes.ids().collect();
        for id in ids {
            if let Err(e) = self.destroy_pipe(id) {
                log::warn!("pipe: reset of {} failed: {}", id.0, e);
            }
        }
    }

    /// Read up to `buf.len()` bytes for `caller`.
    ///
    /// Keeps reading until the buffer is full. On an empty pipe it returns
    /// short if `caller` is alone on it, otherwise parks on `can_read`.
    pub fn read_pipe(&mut self, caller: Pid, id: PipeId, buf: &mut [u8]) -> KernelResult<PipeIo> {
        let _irq = self.irq();
        if buf.is_empty() {
            return Ok(PipeIo::Complete(0));
        }
        let (can_read, can_write, mutex) = self.pipe_sems(id)?;
        // Resuming after a hand-off: the unit was for the wait below.
        self.take_grant(caller, can_read);

        let mut read = 0;
        while read < buf.len() {
            self.lock_pipe(mutex)?;
            let pipe = self.pipes.get_mut(id)?;
            let Some(byte) = pipe.pop_byte() else {
                let alone = pipe.attached <= 1;
                self.unlock_pipe(mutex)?;
                if alone {
                    break;
                }
                match self.sem_wait(caller, can_read)? {
                    SemWait::Blocked => return Ok(PipeIo::Blocked { transferred: read }),
                    SemWait::Acquired => {
                        // Units posted while nobody was waiting are stale
                        // once the data they announced has been consumed.
                        if self.pipes.get(id).map_or(false, Pipe::is_empty) {
                            self.semaphores.drain(can_read)?;
                        }
                        continue;
                    }
                }
            };
            buf[read] = byte;
            self.unlock_pipe(mutex)?;
            self.sem_post(can_write)?;
            read += 1;
        }

        log::trace!("pipe: pid {} read {} bytes from {}", caller, read, id.0);
        Ok(PipeIo::Complete(read))
    }

    /// Write all of `data` for `caller`, parking on `can_write` whenever
    /// the buffer is full.
    ///
    /// If a byte lands while a reader is parked, the writer gives up the
    /// CPU at the end of the call so the reader sees it promptly.
    pub fn write_pipe(&mut self, caller: Pid, id: PipeId, data: &[u8]) -> KernelResult<PipeIo> {
        let _irq = self.irq();
        if data.is_empty() {
            return Ok(PipeIo::Complete(0));
        }
        let (can_read, can_write, mutex) = self.pipe_sems(id)?;
        self.take_grant(caller, can_write);

        let mut written = 0;
        let mut signaled_reader = false;
        while written < data.len() {
            self.lock_pipe(mutex)?;
            if !self.pipes.get_mut(id)?.push_byte(data[written]) {
                self.unlock_pipe(mutex)?;
                match self.sem_wait(caller, can_write)? {
                    SemWait::Blocked => return Ok(PipeIo::Blocked { transferred: written }),
                    SemWait::Acquired => {
                        if self.pipes.get(id).map_or(false, Pipe::is_full) {
                            self.semaphores.drain(can_write)?;
                        }
                        continue;
                    }
                }
            }
            if self.semaphores.waiting_count(can_read)? > 0 {
                signaled_reader = true;
            }
            self.unlock_pipe(mutex)?;
            self.sem_post(can_read)?;
            written += 1;
        }

        if signaled_reader {
            self.yield_to_reader(caller);
        }
        log::trace!("pipe: pid {} wrote {} bytes to {}", caller, written, id.0);
        Ok(PipeIo::Complete(written))
    }

    /// Pull pending stdout bytes for the console without blocking.
    pub fn console_drain(&mut self, buf: &mut [u8]) -> KernelResult<usize> {
        let _irq = self.irq();
        let (_, can_write, mutex) = self.pipe_sems(STDOUT)?;
        let mut drained = 0;
        while drained < buf.len() {
            self.lock_pipe(mutex)?;
            let byte = self.pipes.get_mut(STDOUT)?.pop_byte();
            self.unlock_pipe(mutex)?;
            let Some(byte) = byte else {
                break;
            };
            buf[drained] = byte;
            self.sem_post(can_write)?;
            drained += 1;
        }
        Ok(drained)
    }

    /// Non-blocking single byte write, for interrupt context. Returns
    /// false if the pipe is full and the byte was dropped.
    pub(crate) fn push_byte_nonblocking(&mut self, id: PipeId, byte: u8) -> KernelResult<bool> {
        let _irq = self.irq();
        let (can_read, _, mutex) = self.pipe_sems(id)?;
        self.lock_pipe(mutex)?;
        let pushed = self.pipes.get_mut(id)?.push_byte(byte);
        self.unlock_pipe(mutex)?;
        if pushed {
            self.sem_post(can_read)?;
        }
        Ok(pushed)
    }

    fn pipe_sems(&self, id: PipeId) -> KernelResult<(SemId, SemId, SemId)> {
        self.pipes
            .get(id)
            .map(Pipe::semaphores)
            .ok_or(KernelError::InvalidArgument)
    }

    fn lock_pipe(&mut self, mutex: SemId) -> KernelResult<()> {
        // Interrupts are off and no kernel path holds the mutex across a
        // return, so it is always free here.
        if self.semaphores.try_acquire(mutex)? {
            Ok(())
        } else {
            Err(KernelError::StateConflict)
        }
    }

    fn unlock_pipe(&mut self, mutex: SemId) -> KernelResult<()> {
        self.semaphores.increment(mutex)
    }

    fn destroy_pipe(&mut self, id: PipeId) -> KernelResult<()> {
        let pipe = self.pipes.take(id).ok_or(KernelError::InvalidArgument)?;
        self.sem_destroy(pipe.can_read)?;
        self.sem_destroy(pipe.can_write)?;
        self.sem_destroy(pipe.mutex)?;
        log::debug!("pipe: destroyed {}", id.0);
        Ok(())
    }

    fn yield_to_reader(&mut self, caller: Pid) {
        if self.processes.running() == Some(caller) {
            if let Some(process) = self.processes.get_mut(caller) {
                if process.state == ProcessState::Running {
                    process.state = ProcessState::Yield;
                }
            }
        }
        self.request_reschedule();
    }
}
