//! Timer-driven dispatch.
//!
//! `schedule_tick` is the only place the running process changes. The ISR
//! hands it the interrupted stack pointer and resumes whatever stack
//! pointer comes back.

use crate::arch_impl::CpuOps;
use crate::error::{KernelError, KernelResult};
use crate::kernel::Kernel;
use crate::process::{Pid, ProcessState};

use super::scheduler::is_valid_priority;

impl<P: CpuOps + Clone> Kernel<P> {
    /// Account one tick and decide who runs next. Returns the stack pointer
    /// to resume.
    ///
    /// A running process keeps the CPU until its quantum is used up. One
    /// that yielded is requeued; one that blocked or exited is dropped.
    /// The idle process is always replaced when anything is ready.
    pub fn schedule_tick(&mut self, rsp: u64) -> u64 {
        let _irq = self.irq();
        let now = self.scheduler.record_tick();
        self.wake_sleepers(now);

        let previous = self.processes.running();
        if let Some(current) = previous {
            if self.account(current, rsp) {
                self.take_reschedule_request();
                return rsp;
            }
        }

        self.scheduler.age(&mut self.processes);
        let next = self
            .scheduler
            .pick_next(&self.processes)
            .unwrap_or_else(|| self.idle_pid());
        if previous != Some(next) {
            self.scheduler.record_switch();
            log::trace!("sched: tick {} switch {:?} -> {}", now, previous, next);
        }

        self.take_reschedule_request();
        let Some(process) = self.processes.get_mut(next) else {
            return rsp;
        };
        process.state = ProcessState::Running;
        let resume = process.rsp;
        self.processes.set_running(Some(next));
        resume
    }

    /// Charge the tick to `current`. Returns true if it keeps the CPU.
    fn account(&mut self, current: Pid, rsp: u64) -> bool {
        let is_idle = self.processes.is_idle(current);
        let Some(process) = self.processes.get_mut(current) else {
            return false;
        };
        process.rsp = rsp;
        if is_idle {
            process.state = ProcessState::Ready;
            return false;
        }

        match process.state {
            ProcessState::Running => {
                process.last_quantum_ticks = process.last_quantum_ticks.saturating_add(1);
                process.remaining_quantum = process.remaining_quantum.saturating_sub(1);
                if process.remaining_quantum > 0 {
                    return true;
                }
            }
            ProcessState::Yield => {}
            // Blocked and terminated processes wait elsewhere. A ready one
            // was already requeued by whoever woke it.
            ProcessState::Blocked | ProcessState::Terminated | ProcessState::Ready => {
                return false
            }
        }

        if let Err(e) = self.scheduler.add_ready(&mut self.processes, current) {
            log::warn!("sched: could not requeue {}: {}", current, e);
        }
        false
    }

    fn wake_sleepers(&mut self, now: u64) {
        while let Some(pid) = self.sleepers.pop_due(now) {
            let blocked = self
                .processes
                .get(pid)
                .map_or(false, |p| p.state == ProcessState::Blocked);
            if blocked {
                if let Err(e) = self.scheduler.add_ready(&mut self.processes, pid) {
                    log::warn!("sched: could not wake {}: {}", pid, e);
                }
            }
        }
    }

    /// Pin `pid` at `priority`.
    ///
    /// A queued process moves to the tail of the new level immediately,
    /// unless it is already queued there. A blocked one is queued there
    /// when it is next made ready.
    pub fn set_process_priority(&mut self, pid: Pid, priority: u8) -> KernelResult<()> {
        let _irq = self.irq();
        if !is_valid_priority(priority) || self.processes.is_idle(pid) {
            return Err(KernelError::InvalidArgument);
        }
        let state = self.live(pid)?.state;
        let queued_at = self.scheduler.queued_level(&self.processes, pid);
        let quantum = self.scheduler.config().quantum;

        let process = self
            .processes
            .get_mut(pid)
            .ok_or(KernelError::InvalidArgument)?;
        process.priority = priority;
        process.priority_requested = priority;
        process.priority_fixed = true;
        if state == ProcessState::Running {
            process.remaining_quantum = quantum;
        }

        // Same level keeps its place in line.
        if queued_at.map_or(false, |level| level != priority) {
            self.scheduler.relocate(&self.processes, pid, priority)?;
        }
        log::debug!("sched: {} pinned at {}", pid, priority);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DEFAULT_QUANTUM, LOWEST_PRIORITY};
    use crate::kernel::testing::{boot, spawn_worker};

    // =========================================================================
    // Tick accounting
    // =========================================================================

    #[test]
    fn test_running_process_keeps_cpu_within_quantum() {
        let (mut k, _cpu) = boot();
        let init = k.init_pid();
        let first = k.process(init).unwrap().rsp;

        assert_eq!(k.schedule_tick(0x1111), first, "resumes init's prepared frame");
        assert_eq!(k.schedule_tick(0x2222), 0x2222, "no switch mid-quantum");
        assert_eq!(k.process(init).unwrap().rsp, 0x2222);
        assert_eq!(k.metrics().context_switches, 1);
        assert_eq!(k.metrics().total_ticks, 2);
    }

    #[test]
    fn test_quantum_expiry_rotates() {
        let (mut k, _cpu) = boot();
        k.block(k.init_pid()).unwrap();
        let a = spawn_worker(&mut k, "a");
        let b = spawn_worker(&mut k, "b");

        k.schedule_tick(0);
        assert_eq!(k.current_pid(), Some(a));
        for _ in 0..DEFAULT_QUANTUM - 1 {
            k.schedule_tick(0);
            assert_eq!(k.current_pid(), Some(a));
        }
        k.schedule_tick(0);
        assert_eq!(k.current_pid(), Some(b));

        let process = k.process(a).unwrap();
        assert_eq!(process.state, ProcessState::Ready);
        assert_eq!(process.priority, LOWEST_PRIORITY, "full quantum decays");
        assert!(k.is_ready_queued(a));
    }

    #[test]
    fn test_yield_requeues_and_switches() {
        let (mut k, _cpu) = boot();
        let init = k.init_pid();
        let a = spawn_worker(&mut k, "a");
        k.schedule_tick(0);
        assert_eq!(k.current_pid(), Some(init));

        k.yield_process(init).unwrap();
        k.schedule_tick(0);
        assert_eq!(k.current_pid(), Some(a));
        assert!(k.is_ready_queued(init));
        assert_eq!(k.process(init).unwrap().priority, 0, "early yield is rewarded");
    }

    #[test]
    fn test_idle_fallback_and_return() {
        let (mut k, _cpu) = boot();
        let init = k.init_pid();
        let idle = k.idle_pid();
        k.schedule_tick(0);
        k.block(init).unwrap();
        assert!(k.take_reschedule_request());

        k.schedule_tick(0x100);
        assert_eq!(k.current_pid(), Some(idle));
        assert_eq!(k.process(idle).unwrap().state, ProcessState::Running);
        assert!(!k.is_ready_queued(init), "blocked process is released");

        k.unblock(init).unwrap();
        assert_eq!(k.schedule_tick(0x200), 0x100, "init resumes where it stopped");
        assert_eq!(k.current_pid(), Some(init));
        assert!(!k.is_ready_queued(idle));
    }

    #[test]
    fn test_terminated_current_is_dropped() {
        let (mut k, _cpu) = boot();
        let a = spawn_worker(&mut k, "a");
        k.block(k.init_pid()).unwrap();
        k.schedule_tick(0);
        assert_eq!(k.current_pid(), Some(a));

        k.exit_process(a, 0).unwrap();
        k.schedule_tick(0);
        assert_eq!(k.current_pid(), Some(k.idle_pid()));
        assert_eq!(k.process(a).unwrap().state, ProcessState::Terminated);
    }

    #[test]
    fn test_sleeper_wakes_on_deadline() {
        let (mut k, _cpu) = boot();
        k.block(k.init_pid()).unwrap();
        let a = spawn_worker(&mut k, "a");
        k.sleep(a, 3).unwrap();

        k.schedule_tick(0);
        k.schedule_tick(0);
        assert_eq!(k.current_pid(), Some(k.idle_pid()));
        k.schedule_tick(0);
        assert_eq!(k.current_pid(), Some(a));
    }

    #[test]
    fn test_tick_clears_reschedule_request() {
        let (mut k, _cpu) = boot();
        k.request_reschedule();
        k.schedule_tick(0);
        assert!(!k.take_reschedule_request());
    }

    // =========================================================================
    // Priority changes
    // =========================================================================

    #[test]
    fn test_set_priority_validation() {
        let (mut k, _cpu) = boot();
        let a = spawn_worker(&mut k, "a");
        assert_eq!(
            k.set_process_priority(a, LOWEST_PRIORITY + 1),
            Err(KernelError::InvalidArgument)
        );
        assert_eq!(
            k.set_process_priority(k.idle_pid(), 1),
            Err(KernelError::InvalidArgument)
        );
        assert_eq!(
            k.set_process_priority(Pid::new(40), 1),
            Err(KernelError::InvalidArgument)
        );
        k.kill(a).unwrap();
        assert_eq!(k.set_process_priority(a, 1), Err(KernelError::StateConflict));
    }

    #[test]
    fn test_set_priority_moves_queued_process() {
        let (mut k, _cpu) = boot();
        let a = spawn_worker(&mut k, "a");
        k.set_process_priority(a, 5).unwrap();
        assert_eq!(k.scheduler.queued_level(&k.processes, a), Some(5));
        let process = k.process(a).unwrap();
        assert!(process.priority_fixed);
        assert_eq!(process.priority_requested, 5);
    }

    #[test]
    fn test_set_priority_to_current_level_keeps_place() {
        let (mut k, _cpu) = boot();
        let init = k.init_pid();
        let a = spawn_worker(&mut k, "a");
        let b = spawn_worker(&mut k, "b");
        assert_eq!(k.scheduler.ready_at(0).collect::<Vec<_>>(), [init, a, b]);

        k.set_process_priority(a, 0).unwrap();
        assert_eq!(
            k.scheduler.ready_at(0).collect::<Vec<_>>(),
            [init, a, b],
            "same level is not a move"
        );
        assert!(k.process(a).unwrap().priority_fixed);

        k.set_process_priority(init, 0).unwrap();
        k.schedule_tick(0);
        assert_eq!(k.current_pid(), Some(init));
    }

    #[test]
    fn test_set_priority_on_running_refreshes_quantum() {
        let (mut k, _cpu) = boot();
        let init = k.init_pid();
        k.schedule_tick(0);
        k.schedule_tick(0);
        assert_eq!(k.process(init).unwrap().remaining_quantum, DEFAULT_QUANTUM - 1);

        k.set_process_priority(init, 2).unwrap();
        assert_eq!(k.process(init).unwrap().remaining_quantum, DEFAULT_QUANTUM);
        assert!(!k.is_ready_queued(init));
    }
}
