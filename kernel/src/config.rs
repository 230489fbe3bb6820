//! Kernel-wide constants and boot-time configuration.

use log::LevelFilter;

use crate::process::EntryPoint;

// ============================================================================
// Process Table
// ============================================================================

/// Lowest PID handed out. Table slot `n` holds PID `FIRST_PID + n`.
pub const FIRST_PID: u32 = 1;

/// Capacity of the process table.
pub const MAX_PROCESSES: usize = 64;

/// Kernel stack size per process, in quad words (32 KiB).
pub const KERNEL_STACK_WORDS: usize = 4096;

/// Process names are argv[0] truncated to this many bytes.
pub const MAX_NAME_LEN: usize = 32;

/// Exit code recorded for a process terminated by `kill`.
pub const KILLED_EXIT_CODE: i32 = -1;

// ============================================================================
// Scheduler
// ============================================================================

/// Number of priority levels. Lower value means higher priority.
pub const PRIORITY_LEVELS: usize = 8;

pub const HIGHEST_PRIORITY: u8 = 0;
pub const LOWEST_PRIORITY: u8 = (PRIORITY_LEVELS - 1) as u8;
pub const DEFAULT_PRIORITY: u8 = 3;
pub const IDLE_PRIORITY: u8 = LOWEST_PRIORITY;

/// Best priority the shell can reach through decay or aging.
pub const SHELL_PRIORITY_FLOOR: u8 = 1;

/// Timer ticks a process may run before it is preempted.
pub const DEFAULT_QUANTUM: u32 = 4;

/// Ticks a READY process may wait before aging promotes it one level.
pub const AGING_THRESHOLD: u64 = 20;

pub const SHELL_NAME: &str = "shell";

/// PIT rate with the default divisor.
pub const TICKS_PER_SECOND: u64 = 18;

// ============================================================================
// Pipes
// ============================================================================

pub const MAX_PIPES: usize = 100;
pub const PIPE_BUFFER_SIZE: usize = 16 * 1024;

// ============================================================================
// Initial Context
// ============================================================================

/// Kernel code selector loaded into CS for new processes.
pub const KERNEL_CODE_SELECTOR: u64 = 0x08;

/// Kernel data selector loaded into SS for new processes.
pub const KERNEL_DATA_SELECTOR: u64 = 0x10;

/// RFLAGS for new processes: IF set plus the always-one bit 1.
pub const INITIAL_RFLAGS: u64 = 0x202;

/// Starvation protection for READY processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgingPolicy {
    /// Wait, in ticks, after which a process is promoted one level.
    pub threshold: u64,
}

impl Default for AgingPolicy {
    fn default() -> Self {
        Self {
            threshold: AGING_THRESHOLD,
        }
    }
}

/// Scheduler tuning knobs.
#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    pub quantum: u32,
    /// `None` disables aging and leaves pure usage decay.
    pub aging: Option<AgingPolicy>,
    /// Processes with this name get the shell priority clamp.
    pub shell_name: &'static str,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            quantum: DEFAULT_QUANTUM,
            aging: Some(AgingPolicy::default()),
            shell_name: SHELL_NAME,
        }
    }
}

/// Everything `Kernel::new` needs to bring the core up.
#[derive(Clone, Copy)]
pub struct KernelConfig {
    pub scheduler: SchedulerConfig,
    /// Body of pid 1.
    pub init_entry: EntryPoint,
    /// Body of the idle process.
    pub idle_entry: EntryPoint,
    /// Respawned by init whenever no shell is alive.
    pub shell_entry: Option<EntryPoint>,
    pub log_level: LevelFilter,
}

impl KernelConfig {
    pub fn new(init_entry: EntryPoint, idle_entry: EntryPoint) -> Self {
        Self {
            scheduler: SchedulerConfig::default(),
            init_entry,
            idle_entry,
            shell_entry: None,
            log_level: LevelFilter::Info,
        }
    }

    pub fn with_shell(mut self, entry: EntryPoint) -> Self {
        self.shell_entry = Some(entry);
        self
    }

    pub fn with_scheduler(mut self, scheduler: SchedulerConfig) -> Self {
        self.scheduler = scheduler;
        self
    }
}
