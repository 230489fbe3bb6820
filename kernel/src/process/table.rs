//! Process table.
//!
//! A fixed array of PCB slots indexed by `pid - FIRST_PID`. A PID is
//! allocated by taking the first empty slot, so PIDs are reused once their
//! process has been reaped.

use alloc::vec::Vec;

use super::process::{Pid, Process};
use crate::error::{KernelError, KernelResult};

pub struct ProcessTable {
    slots: Vec<Option<Process>>,
    running: Option<Pid>,
    foreground: Option<Pid>,
    init: Option<Pid>,
    idle: Option<Pid>,
}

impl ProcessTable {
    pub fn new(capacity: usize) -> KernelResult<Self> {
        let mut slots = Vec::new();
        slots.try_reserve_exact(capacity)?;
        slots.resize_with(capacity, || None);
        Ok(Self {
            slots,
            running: None,
            foreground: None,
            init: None,
            idle: None,
        })
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Slot for `pid`, if the pid is inside the table's range.
    pub fn slot_of(&self, pid: Pid) -> Option<usize> {
        pid.slot().filter(|&slot| slot < self.slots.len())
    }

    /// First PID whose slot is empty.
    pub fn allocate_pid(&self) -> KernelResult<Pid> {
        self.slots
            .iter()
            .position(Option::is_none)
            .map(Pid::from_slot)
            .ok_or(KernelError::ResourceExhausted)
    }

    /// Place `process` under its pid. Fails if the slot is taken.
    pub fn register(&mut self, process: Process) -> KernelResult<()> {
        let slot = self
            .slot_of(process.pid)
            .ok_or(KernelError::InvalidArgument)?;
        if self.slots[slot].is_some() {
            return Err(KernelError::StateConflict);
        }
        self.slots[slot] = Some(process);
        Ok(())
    }

    pub fn unregister(&mut self, pid: Pid) -> Option<Process> {
        let slot = self.slot_of(pid)?;
        let process = self.slots[slot].take()?;
        if self.running == Some(pid) {
            self.running = None;
        }
        if self.foreground == Some(pid) {
            self.foreground = None;
        }
        Some(process)
    }

    pub fn get(&self, pid: Pid) -> Option<&Process> {
        self.slots.get(self.slot_of(pid)?)?.as_ref()
    }

    pub fn get_mut(&mut self, pid: Pid) -> Option<&mut Process> {
        let slot = self.slot_of(pid)?;
        self.slots.get_mut(slot)?.as_mut()
    }

    pub fn by_slot(&self, slot: usize) -> Option<&Process> {
        self.slots.get(slot)?.as_ref()
    }

    pub fn contains(&self, pid: Pid) -> bool {
        self.get(pid).is_some()
    }

    /// Registered processes in pid order.
    pub fn iter(&self) -> impl Iterator<Item = &Process> {
        self.slots.iter().filter_map(Option::as_ref)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Process> {
        self.slots.iter_mut().filter_map(Option::as_mut)
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn running(&self) -> Option<Pid> {
        self.running
    }

    pub fn set_running(&mut self, pid: Option<Pid>) {
        self.running = pid;
    }

    pub fn foreground(&self) -> Option<Pid> {
        self.foreground
    }

    pub fn set_foreground(&mut self, pid: Option<Pid>) {
        self.foreground = pid;
    }

    pub fn init_pid(&self) -> Option<Pid> {
        self.init
    }

    pub fn set_init(&mut self, pid: Pid) {
        self.init = Some(pid);
    }

    pub fn idle_pid(&self) -> Option<Pid> {
        self.idle
    }

    pub fn set_idle(&mut self, pid: Pid) {
        self.idle = Some(pid);
    }

    pub fn is_idle(&self, pid: Pid) -> bool {
        self.idle == Some(pid)
    }

    pub fn is_init(&self, pid: Pid) -> bool {
        self.init == Some(pid)
    }
}
