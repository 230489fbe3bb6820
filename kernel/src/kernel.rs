//! The kernel context object.
//!
//! All scheduler, process table, semaphore and pipe state lives in one
//! [`Kernel`] value. Operations are methods on it, spread over the modules
//! that own each concern. On hardware a single instance sits behind the
//! global lock in `global`; tests build as many as they like on
//! [`MockCpu`](crate::arch_impl::host::MockCpu).
//!
//! Methods never switch stacks themselves. When an operation needs the
//! current process to give up the CPU it records a reschedule request,
//! which the caller turns into `force_reschedule` after releasing the
//! kernel.

use alloc::vec::Vec;

use crate::arch_impl::CpuOps;
use crate::config::{KernelConfig, IDLE_PRIORITY, MAX_PIPES, MAX_PROCESSES};
use crate::error::{KernelError, KernelResult};
use crate::ipc::{PipeId, PipeTable};
use crate::process::{Pid, Process, ProcessInfo, ProcessState, ProcessTable};
use crate::sync::{IrqGuard, SemaphoreRegistry};
use crate::task::{Scheduler, SchedulerMetrics};
use crate::time::SleepQueue;

pub struct Kernel<P: CpuOps + Clone> {
    pub(crate) cpu: P,
    pub(crate) config: KernelConfig,
    pub(crate) processes: ProcessTable,
    pub(crate) scheduler: Scheduler,
    pub(crate) semaphores: SemaphoreRegistry,
    pub(crate) pipes: PipeTable,
    pub(crate) sleepers: SleepQueue,
    init: Pid,
    idle: Pid,
    reschedule: bool,
}

/// What one pass of init's supervision loop did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InitReport {
    pub reaped: usize,
    pub shell_spawned: Option<Pid>,
}

impl<P: CpuOps + Clone> Kernel<P> {
    /// Bring the core up: standard pipes, then init (pid 1) holding the
    /// foreground, then idle.
    ///
    /// Nothing is running afterwards. The first `schedule_tick` picks init.
    pub fn new(cpu: P, config: KernelConfig) -> KernelResult<Self> {
        let mut pipes = PipeTable::new(MAX_PIPES)?;
        let mut semaphores = SemaphoreRegistry::new();
        pipes.open_standard(&mut semaphores)?;

        let mut kernel = Self {
            cpu,
            config,
            processes: ProcessTable::new(MAX_PROCESSES)?,
            scheduler: Scheduler::new(config.scheduler)?,
            semaphores,
            pipes,
            sleepers: SleepQueue::new(),
            init: Pid::new(0),
            idle: Pid::new(0),
            reschedule: false,
        };

        let init = kernel.create_process(&["init"], None, None, true, config.init_entry)?;
        kernel.processes.set_init(init);
        kernel.init = init;

        let idle = kernel.create_process(
            &["idle"],
            None,
            Some(IDLE_PRIORITY),
            false,
            config.idle_entry,
        )?;
        kernel.processes.set_idle(idle);
        kernel.idle = idle;

        kernel.scheduler.add_ready(&mut kernel.processes, init)?;
        log::info!("kernel: init is pid {}, idle is pid {}", init, idle);
        Ok(kernel)
    }

    pub(crate) fn irq(&self) -> IrqGuard<P> {
        IrqGuard::new(self.cpu.clone())
    }

    pub fn cpu(&self) -> &P {
        &self.cpu
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub(crate) fn request_reschedule(&mut self) {
        self.reschedule = true;
    }

    /// Return and clear the pending forced-reschedule request.
    pub fn take_reschedule_request(&mut self) -> bool {
        core::mem::take(&mut self.reschedule)
    }

    pub fn init_pid(&self) -> Pid {
        self.init
    }

    pub fn idle_pid(&self) -> Pid {
        self.idle
    }

    /// The process currently on the CPU.
    pub fn current_pid(&self) -> Option<Pid> {
        self.processes.running()
    }

    pub fn foreground_pid(&self) -> Option<Pid> {
        self.processes.foreground()
    }

    pub fn process(&self, pid: Pid) -> Option<&Process> {
        self.processes.get(pid)
    }

    pub fn process_count(&self) -> usize {
        self.processes.len()
    }

    pub fn metrics(&self) -> SchedulerMetrics {
        self.scheduler.metrics()
    }

    pub fn is_ready_queued(&self, pid: Pid) -> bool {
        self.scheduler.is_queued(&self.processes, pid)
    }

    /// Ready level `pid` is queued on, if it is queued.
    pub fn queued_priority(&self, pid: Pid) -> Option<u8> {
        self.scheduler.queued_level(&self.processes, pid)
    }

    /// No semaphore has both a positive count and waiters.
    pub fn semaphores_consistent(&self) -> bool {
        self.semaphores.invariant_holds()
    }

    /// Snapshot of every registered process, in pid order.
    pub fn list_processes(&self) -> KernelResult<Vec<ProcessInfo>> {
        let _irq = self.irq();
        let foreground = self.processes.foreground();
        let mut rows = Vec::new();
        rows.try_reserve_exact(self.processes.len())?;
        rows.extend(
            self.processes
                .iter()
                .map(|p| p.info(foreground == Some(p.pid))),
        );
        Ok(rows)
    }

    /// One pass of init's loop: reap whatever has terminated and respawn
    /// the shell if none is alive.
    pub fn init_step(&mut self) -> KernelResult<InitReport> {
        let init = self.init;
        let reaped = self.wait_children(init)?;

        let shell_name = self.scheduler.config().shell_name;
        let shell_alive = self
            .processes
            .iter()
            .any(|p| p.name == shell_name && !p.is_terminated());

        let mut shell_spawned = None;
        if let (false, Some(entry)) = (shell_alive, self.config.shell_entry) {
            let pid = self.spawn(&[shell_name], Some(init), None, true, entry)?;
            log::info!("init: spawned {} as pid {}", shell_name, pid);
            shell_spawned = Some(pid);
        }

        Ok(InitReport {
            reaped,
            shell_spawned,
        })
    }

    pub(crate) fn live(&self, pid: Pid) -> KernelResult<&Process> {
        let process = self.processes.get(pid).ok_or(KernelError::InvalidArgument)?;
        if process.state == ProcessState::Terminated {
            return Err(KernelError::StateConflict);
        }
        Ok(process)
    }

    pub fn pipe_ids(&self) -> impl Iterator<Item = PipeId> + '_ {
        self.pipes.ids()
    }
}
