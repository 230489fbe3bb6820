//! Process control block.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;

use crate::collections::Queue;
use crate::config::{FIRST_PID, KERNEL_STACK_WORDS, MAX_NAME_LEN};
use crate::error::{KernelError, KernelResult};
use crate::ipc::PipeId;
use crate::sync::SemId;

/// Signature of a process body. The return value becomes the exit code.
pub type EntryPoint = extern "C" fn(argc: usize, argv: *const *const u8) -> i64;

/// Process ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pid(u32);

impl Pid {
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    pub const fn as_u32(&self) -> u32 {
        self.0
    }

    /// Process table slot for this pid, if it is in the valid range.
    pub fn slot(&self) -> Option<usize> {
        self.0.checked_sub(FIRST_PID).map(|offset| offset as usize)
    }

    pub fn from_slot(slot: usize) -> Self {
        Self(FIRST_PID + slot as u32)
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Process state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// In a ready queue, waiting for the CPU
    Ready,
    /// The single current process
    Running,
    /// Waiting on a semaphore, a pipe, a child or a timer
    Blocked,
    /// Gave up the CPU voluntarily; re-enqueued at the next tick
    Yield,
    /// Exited or killed, waiting to be reaped
    Terminated,
}

impl ProcessState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessState::Ready => "READY",
            ProcessState::Running => "RUNNING",
            ProcessState::Blocked => "BLOCKED",
            ProcessState::Yield => "YIELD",
            ProcessState::Terminated => "TERMINATED",
        }
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deep copy of a process's arguments in C layout.
///
/// Each argument is a NUL-terminated byte string. The pointer table holds
/// one address per argument followed by a null entry, and is what the
/// process receives as `argv`. Heap buffers do not move when the owning
/// PCB does, so the addresses stay valid for the PCB's lifetime.
pub struct ArgVector {
    strings: Vec<Box<[u8]>>,
    pointers: Vec<usize>,
}

impl ArgVector {
    pub fn copy_from(args: &[&str]) -> KernelResult<Self> {
        let mut strings: Vec<Box<[u8]>> = Vec::new();
        strings.try_reserve_exact(args.len())?;
        for arg in args {
            let mut bytes = Vec::new();
            bytes.try_reserve_exact(arg.len() + 1)?;
            bytes.extend_from_slice(arg.as_bytes());
            bytes.push(0);
            strings.push(bytes.into_boxed_slice());
        }

        let mut pointers = Vec::new();
        pointers.try_reserve_exact(strings.len() + 1)?;
        pointers.extend(strings.iter().map(|s| s.as_ptr() as usize));
        pointers.push(0);

        Ok(Self { strings, pointers })
    }

    pub fn argc(&self) -> usize {
        self.strings.len()
    }

    /// Address of the null-terminated pointer table.
    pub fn argv_ptr(&self) -> u64 {
        self.pointers.as_ptr() as u64
    }

    /// Argument `index` without its terminator.
    pub fn get(&self, index: usize) -> Option<&str> {
        let bytes = self.strings.get(index)?;
        core::str::from_utf8(&bytes[..bytes.len() - 1]).ok()
    }
}

/// Owned kernel stack.
pub struct KernelStack {
    words: Vec<u64>,
}

impl KernelStack {
    pub fn allocate() -> KernelResult<Self> {
        Self::with_words(KERNEL_STACK_WORDS)
    }

    pub fn with_words(words: usize) -> KernelResult<Self> {
        let mut stack = Vec::new();
        stack.try_reserve_exact(words)?;
        stack.resize(words, 0);
        Ok(Self { words: stack })
    }

    pub fn words_mut(&mut self) -> &mut [u64] {
        &mut self.words
    }

    pub fn base(&self) -> u64 {
        self.words.as_ptr() as u64
    }

    pub fn top(&self) -> u64 {
        self.base() + (self.words.len() * 8) as u64
    }
}

/// A process control block.
pub struct Process {
    pub pid: Pid,
    /// `None` for parentless processes (init, idle, orphans of init).
    pub ppid: Option<Pid>,
    pub name: String,
    pub args: ArgVector,

    pub state: ProcessState,
    /// Effective priority, lower value runs first.
    pub priority: u8,
    /// Priority pinned by `set_process_priority`.
    pub priority_requested: u8,
    pub priority_fixed: bool,
    pub remaining_quantum: u32,
    /// Ticks consumed since the last time the process was made ready.
    pub last_quantum_ticks: u32,
    pub ready_since_tick: u64,

    /// Saved stack pointer, valid while the process is not running.
    pub rsp: u64,
    pub stack: KernelStack,

    /// Children not yet reaped. Holds pids, not ownership.
    pub children: Queue<Pid>,
    /// Posted exactly once, on exit.
    pub exit_sem: SemId,
    pub exit_code: Option<i32>,

    /// Pipe targets for stdin, stdout and stderr.
    pub fds: [PipeId; 3],
    /// False once the fds have been detached.
    pub fds_attached: bool,

    /// Semaphore handed to this process by a post while it was blocked.
    pub granted: Option<SemId>,
    /// Child removed from `children` by a `wait_pid` that has not finished.
    pub pending_reap: Option<Pid>,
}

impl Process {
    /// Truncate a name to `MAX_NAME_LEN` bytes on a char boundary.
    pub fn derive_name(argv0: &str) -> KernelResult<String> {
        let mut end = argv0.len().min(MAX_NAME_LEN);
        while !argv0.is_char_boundary(end) {
            end -= 1;
        }
        let mut name = String::new();
        name.try_reserve_exact(end)?;
        name.push_str(&argv0[..end]);
        Ok(name)
    }

    pub fn is_terminated(&self) -> bool {
        self.state == ProcessState::Terminated
    }

    pub fn info(&self, foreground: bool) -> ProcessInfo {
        ProcessInfo {
            pid: self.pid,
            ppid: self.ppid,
            name: self.name.clone(),
            state: self.state,
            priority: self.priority,
            priority_fixed: self.priority_fixed,
            foreground,
            rsp: self.rsp,
            stack_base: self.stack.base(),
            exit_code: self.exit_code,
        }
    }
}

/// Snapshot row returned by `list_processes`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: Pid,
    pub ppid: Option<Pid>,
    pub name: String,
    pub state: ProcessState,
    pub priority: u8,
    pub priority_fixed: bool,
    pub foreground: bool,
    pub rsp: u64,
    pub stack_base: u64,
    pub exit_code: Option<i32>,
}

impl fmt::Display for ProcessInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ppid = self.ppid.map_or(0, |p| p.as_u32());
        write!(
            f,
            "{:>4} {:>4} {:<16} {:<10} {}{} {:#018x}{}",
            self.pid,
            ppid,
            self.name,
            self.state,
            self.priority,
            if self.priority_fixed { "*" } else { " " },
            self.rsp,
            if self.foreground { " fg" } else { "" },
        )
    }
}

/// Result of a `wait_pid` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The child was reaped; carries its exit code.
    Reaped(i32),
    /// The caller is parked on the child's exit semaphore. Call again once
    /// it runs.
    Blocked,
}
