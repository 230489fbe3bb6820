//! Sleeping processes.
//!
//! Entries are kept in insertion order. The timer tick drains every entry
//! whose deadline has passed, so a scan is linear in the number of
//! sleepers.

use crate::collections::Queue;
use crate::error::KernelResult;
use crate::process::Pid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sleeper {
    pub pid: Pid,
    pub wake_tick: u64,
}

pub struct SleepQueue {
    sleepers: Queue<Sleeper>,
}

impl SleepQueue {
    pub const fn new() -> Self {
        Self {
            sleepers: Queue::new(),
        }
    }

    /// Record `pid` to wake at `wake_tick`, replacing an earlier deadline.
    pub fn insert(&mut self, pid: Pid, wake_tick: u64) -> KernelResult<()> {
        self.remove(pid);
        self.sleepers.push(Sleeper { pid, wake_tick })
    }

    pub fn remove(&mut self, pid: Pid) -> bool {
        self.sleepers.remove_where(|s| s.pid == pid).is_some()
    }

    pub fn contains(&self, pid: Pid) -> bool {
        self.sleepers.iter().any(|s| s.pid == pid)
    }

    /// Take the oldest entry whose deadline is at or before `now`.
    pub fn pop_due(&mut self, now: u64) -> Option<Pid> {
        self.sleepers
            .remove_where(|s| s.wake_tick <= now)
            .map(|s| s.pid)
    }

    pub fn len(&self) -> usize {
        self.sleepers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sleepers.is_empty()
    }
}

impl Default for SleepQueue {
    fn default() -> Self {
        Self::new()
    }
}
