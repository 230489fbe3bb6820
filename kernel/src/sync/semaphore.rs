//! Counting semaphores with a named registry.
//!
//! A semaphore's count and its FIFO of waiting pids are only touched with
//! interrupts disabled. `post` prefers handing the unit straight to the
//! oldest live waiter over incrementing the count, so a positive count
//! always means nobody is waiting.
//!
//! Blocking is split in two. `sem_wait` either acquires immediately or
//! parks the caller and reports [`SemWait::Blocked`]. When a later `post`
//! picks that caller it records a grant on the PCB and makes it ready; the
//! caller's next `sem_wait` on the same semaphore consumes the grant and
//! returns [`SemWait::Acquired`].

use alloc::string::String;
use alloc::vec::Vec;

use crate::arch_impl::CpuOps;
use crate::collections::Queue;
use crate::error::{KernelError, KernelResult};
use crate::kernel::Kernel;
use crate::process::{Pid, ProcessState};

/// Handle to a registered semaphore.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SemId(usize);

impl SemId {
    pub const fn index(&self) -> usize {
        self.0
    }
}

/// Outcome of [`Kernel::sem_wait`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SemWait {
    Acquired,
    /// The caller is queued and BLOCKED. Retry after it is scheduled again.
    Blocked,
}

#[derive(Debug)]
pub struct Semaphore {
    name: String,
    count: u32,
    waiters: Queue<Pid>,
}

impl Semaphore {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> u32 {
        self.count
    }

    pub fn waiting(&self) -> usize {
        self.waiters.len()
    }

    pub fn waiters(&self) -> impl Iterator<Item = Pid> + '_ {
        self.waiters.iter().copied()
    }
}

/// Storage for every semaphore plus the name lookup order.
///
/// Only the first semaphore registered under a name is reachable through
/// [`find`](SemaphoreRegistry::find); later ones with the same name are
/// still valid through their handle.
pub struct SemaphoreRegistry {
    slots: Vec<Option<Semaphore>>,
    order: Queue<SemId>,
}

impl SemaphoreRegistry {
    pub const fn new() -> Self {
        Self {
            slots: Vec::new(),
            order: Queue::new(),
        }
    }

    pub fn create(&mut self, name: &str, initial: u32) -> KernelResult<SemId> {
        let mut owned = String::new();
        owned.try_reserve_exact(name.len())?;
        owned.push_str(name);

        let index = match self.slots.iter().position(Option::is_none) {
            Some(index) => index,
            None => {
                self.slots.try_reserve(1)?;
                self.slots.push(None);
                self.slots.len() - 1
            }
        };
        let id = SemId(index);

        if self.find(name).is_none() {
            self.order.push(id)?;
        }

        self.slots[index] = Some(Semaphore {
            name: owned,
            count: initial,
            waiters: Queue::new(),
        });
        Ok(id)
    }

    /// Linear scan in registration order.
    pub fn find(&self, name: &str) -> Option<SemId> {
        self.order
            .iter()
            .copied()
            .find(|id| self.get(*id).map_or(false, |sem| sem.name == name))
    }

    pub fn get(&self, id: SemId) -> Option<&Semaphore> {
        self.slots.get(id.0)?.as_ref()
    }

    fn get_mut(&mut self, id: SemId) -> KernelResult<&mut Semaphore> {
        self.slots
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .ok_or(KernelError::InvalidArgument)
    }

    pub fn contains(&self, id: SemId) -> bool {
        self.get(id).is_some()
    }

    /// Deregister and hand back the semaphore, waiters included.
    pub fn remove(&mut self, id: SemId) -> Option<Semaphore> {
        let sem = self.slots.get_mut(id.0)?.take()?;
        self.order.remove(&id);
        Some(sem)
    }

    /// Decrement if positive. Never blocks.
    pub fn try_acquire(&mut self, id: SemId) -> KernelResult<bool> {
        let sem = self.get_mut(id)?;
        if sem.count > 0 {
            sem.count -= 1;
            return Ok(true);
        }
        Ok(false)
    }

    pub fn increment(&mut self, id: SemId) -> KernelResult<()> {
        let sem = self.get_mut(id)?;
        sem.count = sem.count.saturating_add(1);
        Ok(())
    }

    pub fn set_count(&mut self, id: SemId, count: u32) -> KernelResult<()> {
        self.get_mut(id)?.count = count;
        Ok(())
    }

    /// Zero the count, returning what was discarded.
    pub fn drain(&mut self, id: SemId) -> KernelResult<u32> {
        let sem = self.get_mut(id)?;
        Ok(core::mem::take(&mut sem.count))
    }

    pub fn enqueue(&mut self, id: SemId, pid: Pid) -> KernelResult<()> {
        self.get_mut(id)?.waiters.push(pid)
    }

    pub fn pop_waiter(&mut self, id: SemId) -> KernelResult<Option<Pid>> {
        Ok(self.get_mut(id)?.waiters.pop())
    }

    pub fn remove_waiter(&mut self, id: SemId, pid: Pid) -> KernelResult<bool> {
        Ok(self.get_mut(id)?.waiters.remove(&pid))
    }

    /// Drop `pid` from every wait queue.
    pub fn remove_waiter_everywhere(&mut self, pid: Pid) {
        for sem in self.slots.iter_mut().flatten() {
            sem.waiters.remove(&pid);
        }
    }

    pub fn is_waiting(&self, id: SemId, pid: Pid) -> bool {
        self.get(id).map_or(false, |sem| sem.waiters.contains(&pid))
    }

    pub fn waiting_count(&self, id: SemId) -> KernelResult<usize> {
        self.get(id)
            .map(Semaphore::waiting)
            .ok_or(KernelError::InvalidArgument)
    }

    pub fn len(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `count > 0` implies an empty wait queue, for every semaphore.
    pub fn invariant_holds(&self) -> bool {
        self.slots
            .iter()
            .flatten()
            .all(|sem| sem.count == 0 || sem.waiters.is_empty())
    }
}

impl Default for SemaphoreRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: CpuOps + Clone> Kernel<P> {
    /// Look up `name`, creating it with `initial` if allowed.
    pub fn sem_open(
        &mut self,
        name: &str,
        initial: u32,
        create_if_missing: bool,
    ) -> KernelResult<SemId> {
        let _irq = self.irq();
        if let Some(id) = self.semaphores.find(name) {
            return Ok(id);
        }
        if !create_if_missing {
            return Err(KernelError::InvalidArgument);
        }
        let id = self.semaphores.create(name, initial)?;
        log::debug!("sem: created '{}' = {}", name, initial);
        Ok(id)
    }

    pub fn sem_find(&self, name: &str) -> Option<SemId> {
        let _irq = self.irq();
        self.semaphores.find(name)
    }

    pub fn sem_value(&self, id: SemId) -> KernelResult<u32> {
        self.semaphores
            .get(id)
            .map(Semaphore::value)
            .ok_or(KernelError::InvalidArgument)
    }

    pub fn sem_waiting_count(&self, id: SemId) -> KernelResult<usize> {
        self.semaphores.waiting_count(id)
    }

    /// Acquire one unit for `caller`, or park it.
    pub fn sem_wait(&mut self, caller: Pid, id: SemId) -> KernelResult<SemWait> {
        let _irq = self.irq();
        if !self.semaphores.contains(id) {
            return Err(KernelError::InvalidArgument);
        }
        let process = self
            .processes
            .get_mut(caller)
            .ok_or(KernelError::InvalidArgument)?;
        if process.is_terminated() {
            return Err(KernelError::StateConflict);
        }
        if process.granted == Some(id) {
            process.granted = None;
            return Ok(SemWait::Acquired);
        }
        if self.semaphores.try_acquire(id)? {
            return Ok(SemWait::Acquired);
        }

        if !self.semaphores.is_waiting(id, caller) {
            self.semaphores.enqueue(id, caller)?;
        }
        self.park(caller)?;
        log::trace!("sem: pid {} blocked on {:?}", caller, id);
        Ok(SemWait::Blocked)
    }

    /// Release one unit, waking the oldest live waiter if there is one.
    pub fn sem_post(&mut self, id: SemId) -> KernelResult<()> {
        let _irq = self.irq();
        if self.hand_off(id)? {
            // A masked timer would leave the woken process waiting until
            // someone else yields.
            if self.cpu.timer_masked() {
                self.request_reschedule();
            }
        } else {
            self.semaphores.increment(id)?;
        }
        Ok(())
    }

    /// Overwrite the count. Waiters are served from `value` first.
    pub fn sem_set_value(&mut self, id: SemId, value: u32) -> KernelResult<()> {
        let _irq = self.irq();
        if !self.semaphores.contains(id) {
            return Err(KernelError::InvalidArgument);
        }
        let mut remaining = value;
        while remaining > 0 && self.hand_off(id)? {
            remaining -= 1;
        }
        self.semaphores.set_count(id, remaining)
    }

    pub fn sem_close(&mut self, id: SemId) -> KernelResult<()> {
        self.sem_destroy(id)
    }

    /// Deregister and free `id`. Every remaining waiter is made ready
    /// without a grant, and grants already handed out on `id` are dropped.
    pub fn sem_destroy(&mut self, id: SemId) -> KernelResult<()> {
        let _irq = self.irq();
        let mut sem = self
            .semaphores
            .remove(id)
            .ok_or(KernelError::InvalidArgument)?;
        let mut released = 0usize;
        sem.waiters.clear_with(|pid| {
            if self.release_waiter(pid, id) {
                released += 1;
            }
        });
        // A process handed a unit but not yet resumed is off the queue. Its
        // grant must not survive into a semaphore reusing this slot.
        for process in self.processes.iter_mut() {
            if process.granted == Some(id) {
                process.granted = None;
            }
        }
        if released > 0 {
            log::debug!("sem: '{}' destroyed, released {} waiters", sem.name, released);
        }
        Ok(())
    }

    /// Remove `pid` from the wait queue of `id`.
    pub fn sem_remove_process(&mut self, id: SemId, pid: Pid) -> KernelResult<bool> {
        let _irq = self.irq();
        self.semaphores.remove_waiter(id, pid)
    }

    /// Clear a grant `caller` holds on `id`. Returns whether there was one.
    pub(crate) fn take_grant(&mut self, caller: Pid, id: SemId) -> bool {
        match self.processes.get_mut(caller) {
            Some(process) if process.granted == Some(id) => {
                process.granted = None;
                true
            }
            _ => false,
        }
    }

    /// Pop waiters until a live one is found, grant it the unit and make
    /// it ready. Dead waiters are skipped.
    fn hand_off(&mut self, id: SemId) -> KernelResult<bool> {
        while let Some(pid) = self.semaphores.pop_waiter(id)? {
            let Some(process) = self.processes.get_mut(pid) else {
                continue;
            };
            if process.is_terminated() {
                continue;
            }
            process.granted = Some(id);
            if process.state == ProcessState::Blocked {
                self.scheduler.add_ready(&mut self.processes, pid)?;
            }
            log::trace!("sem: handed {:?} to pid {}", id, pid);
            return Ok(true);
        }
        Ok(false)
    }

    fn release_waiter(&mut self, pid: Pid, id: SemId) -> bool {
        let Some(process) = self.processes.get_mut(pid) else {
            return false;
        };
        if process.granted == Some(id) {
            process.granted = None;
        }
        if process.state != ProcessState::Blocked {
            return false;
        }
        self.scheduler.add_ready(&mut self.processes, pid).is_ok()
    }
}
