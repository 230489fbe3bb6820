//! Priority scheduler
//!
//! One ready list per priority level, all sharing a link arena indexed by
//! process table slot, so a process sits on at most one level and can be
//! pulled out of the middle in O(1) when it is killed or re-prioritized.
//!
//! Priority is recomputed from usage each time a process is made ready: a
//! process that burned its whole quantum sinks toward the lowest level, one
//! that yielded or blocked early rises. Aging lifts processes that have
//! waited too long so a stream of short high-priority work cannot starve
//! CPU-bound ones. The idle process is never queued; it runs only when
//! every level is empty.

use crate::collections::LinkedLists;
use crate::config::{
    SchedulerConfig, DEFAULT_PRIORITY, HIGHEST_PRIORITY, LOWEST_PRIORITY, MAX_PROCESSES,
    PRIORITY_LEVELS, SHELL_PRIORITY_FLOOR,
};
use crate::error::{KernelError, KernelResult};
use crate::process::{Pid, ProcessState, ProcessTable};

/// Cumulative counters, read-only outside the scheduler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerMetrics {
    pub total_ticks: u64,
    pub context_switches: u64,
}

pub fn is_valid_priority(priority: u8) -> bool {
    (HIGHEST_PRIORITY..=LOWEST_PRIORITY).contains(&priority)
}

pub fn clamp_priority(priority: u8) -> u8 {
    priority.clamp(HIGHEST_PRIORITY, LOWEST_PRIORITY)
}

/// Map ticks used in the last run linearly onto the level range.
///
/// Zero ticks maps to the highest level, a full quantum to the lowest.
pub fn priority_from_usage(ticks_used: u32, quantum: u32) -> u8 {
    if quantum == 0 {
        return LOWEST_PRIORITY;
    }
    let span = (LOWEST_PRIORITY - HIGHEST_PRIORITY) as u32;
    let used = ticks_used.min(quantum);
    clamp_priority(HIGHEST_PRIORITY + (used * span / quantum) as u8)
}

pub struct Scheduler {
    levels: LinkedLists,
    config: SchedulerConfig,
    metrics: SchedulerMetrics,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> KernelResult<Self> {
        Ok(Self {
            levels: LinkedLists::new(MAX_PROCESSES, PRIORITY_LEVELS)?,
            config,
            metrics: SchedulerMetrics::default(),
        })
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn metrics(&self) -> SchedulerMetrics {
        self.metrics
    }

    pub fn now(&self) -> u64 {
        self.metrics.total_ticks
    }

    pub(crate) fn record_tick(&mut self) -> u64 {
        self.metrics.total_ticks += 1;
        self.metrics.total_ticks
    }

    pub(crate) fn record_switch(&mut self) {
        self.metrics.context_switches += 1;
    }

    /// Keep the shell responsive without handing it the top level.
    fn clamp_for(&self, name: &str, priority: u8) -> u8 {
        if name == self.config.shell_name {
            priority.clamp(SHELL_PRIORITY_FLOOR, DEFAULT_PRIORITY)
        } else {
            clamp_priority(priority)
        }
    }

    /// Make `pid` READY and queue it at its recomputed priority.
    ///
    /// Any stale queue membership is dropped first. The idle process is
    /// marked READY but never queued.
    pub fn add_ready(&mut self, table: &mut ProcessTable, pid: Pid) -> KernelResult<()> {
        let slot = table.slot_of(pid).ok_or(KernelError::InvalidArgument)?;
        let is_idle = table.is_idle(pid);
        let now = self.metrics.total_ticks;
        let quantum = self.config.quantum;

        self.levels.remove(slot);

        let process = table.get_mut(pid).ok_or(KernelError::InvalidArgument)?;
        if process.is_terminated() {
            return Err(KernelError::StateConflict);
        }
        process.state = ProcessState::Ready;
        if is_idle {
            return Ok(());
        }

        let priority = if process.priority_fixed {
            process.priority_requested
        } else {
            self.clamp_for(
                &process.name,
                priority_from_usage(process.last_quantum_ticks, quantum),
            )
        };
        process.priority = priority;
        process.remaining_quantum = quantum;
        process.last_quantum_ticks = 0;
        process.ready_since_tick = now;

        self.levels.push_back(priority as usize, slot)
    }

    /// Drop `pid` from the ready levels. Returns whether it was queued.
    pub fn remove(&mut self, table: &ProcessTable, pid: Pid) -> bool {
        table
            .slot_of(pid)
            .map_or(false, |slot| self.levels.remove(slot))
    }

    /// Move a queued process to the tail of `priority`'s level.
    pub fn relocate(&mut self, table: &ProcessTable, pid: Pid, priority: u8) -> KernelResult<()> {
        let slot = table.slot_of(pid).ok_or(KernelError::InvalidArgument)?;
        if !self.levels.is_linked(slot) {
            return Err(KernelError::StateConflict);
        }
        self.levels.push_back(priority as usize, slot)
    }

    pub fn is_queued(&self, table: &ProcessTable, pid: Pid) -> bool {
        table
            .slot_of(pid)
            .map_or(false, |slot| self.levels.is_linked(slot))
    }

    /// Level `pid` is queued on, if any.
    pub fn queued_level(&self, table: &ProcessTable, pid: Pid) -> Option<u8> {
        let slot = table.slot_of(pid)?;
        self.levels.owner(slot).map(|level| level as u8)
    }

    /// Pids queued at `priority`, head first.
    pub fn ready_at(&self, priority: u8) -> impl Iterator<Item = Pid> + '_ {
        self.levels.iter(priority as usize).map(Pid::from_slot)
    }

    pub fn ready_count(&self) -> usize {
        (0..PRIORITY_LEVELS).map(|level| self.levels.len(level)).sum()
    }

    /// Promote every READY process that has waited past the threshold by
    /// one level. Returns how many moved.
    pub fn age(&mut self, table: &mut ProcessTable) -> usize {
        let Some(policy) = self.config.aging else {
            return 0;
        };
        let now = self.metrics.total_ticks;
        let mut promoted = 0;

        // Ascending, so a process promoted into an already scanned level is
        // not promoted twice in one pass.
        for level in (HIGHEST_PRIORITY + 1)..=LOWEST_PRIORITY {
            let mut cursor = self.levels.peek_front(level as usize);
            while let Some(slot) = cursor {
                cursor = self.levels.next_of(slot);

                let pid = Pid::from_slot(slot);
                let Some(process) = table.get_mut(pid) else {
                    continue;
                };
                if process.state != ProcessState::Ready
                    || now.saturating_sub(process.ready_since_tick) < policy.threshold
                {
                    continue;
                }
                let target = self.clamp_for(&process.name, level - 1);
                if target >= level {
                    continue;
                }
                process.priority = target;
                process.ready_since_tick = now;
                // Slot and level are both in range here.
                if self.levels.push_back(target as usize, slot).is_ok() {
                    promoted += 1;
                }
            }
        }

        if promoted > 0 {
            log::trace!("aging promoted {} processes at tick {}", promoted, now);
        }
        promoted
    }

    /// Pop the first still-READY process, highest level first.
    pub fn pick_next(&mut self, table: &ProcessTable) -> Option<Pid> {
        for level in 0..PRIORITY_LEVELS {
            while let Some(slot) = self.levels.pop_front(level) {
                let ready = table
                    .by_slot(slot)
                    .map_or(false, |p| p.state == ProcessState::Ready);
                if ready {
                    return Some(Pid::from_slot(slot));
                }
            }
        }
        None
    }
}
