//! Process lifecycle: creation, exit, reaping and the blocking transitions.
//!
//! Creation is transactional. Every step that leaves state outside the new
//! PCB behind is recorded, and a failure unwinds the record in reverse so
//! a failed create leaves no registered pid, pipe attachment or semaphore.

use alloc::format;

use crate::arch_impl::x86_64::context::{prepare_stack, EntryArgs};
use crate::arch_impl::CpuOps;
use crate::collections::Queue;
use crate::config::{DEFAULT_PRIORITY, KILLED_EXIT_CODE};
use crate::error::{KernelError, KernelResult};
use crate::ipc::{PipeId, STDERR, STDIN, STDOUT};
use crate::kernel::Kernel;
use crate::sync::{SemId, SemWait};
use crate::task::is_valid_priority;

use super::process::{
    ArgVector, EntryPoint, KernelStack, Pid, Process, ProcessState, WaitOutcome,
};

/// Side effect of a partially built process.
#[derive(Debug, Clone, Copy)]
enum Undo {
    ExitSem(SemId),
    Attach(PipeId),
    Register(Pid),
    ChildLink { parent: Pid, child: Pid },
}

/// Exit semaphore, three attaches, registration, child link.
const MAX_UNDO: usize = 6;

struct CreationLog {
    steps: [Option<Undo>; MAX_UNDO],
    len: usize,
}

impl CreationLog {
    fn new() -> Self {
        Self {
            steps: [None; MAX_UNDO],
            len: 0,
        }
    }

    fn record(&mut self, step: Undo) {
        if let Some(slot) = self.steps.get_mut(self.len) {
            *slot = Some(step);
            self.len += 1;
        }
    }

    fn pop(&mut self) -> Option<Undo> {
        if self.len == 0 {
            return None;
        }
        self.len -= 1;
        self.steps[self.len].take()
    }
}

impl<P: CpuOps + Clone> Kernel<P> {
    /// Build and register a process without making it ready.
    ///
    /// `args[0]` names the process. `priority` pins the process at that
    /// level; `None` leaves it to the usage policy. With `foreground` set
    /// the child takes the foreground if its parent holds it, or if nobody
    /// does.
    pub fn create_process(
        &mut self,
        args: &[&str],
        parent: Option<Pid>,
        priority: Option<u8>,
        foreground: bool,
        entry: EntryPoint,
    ) -> KernelResult<Pid> {
        let _irq = self.irq();
        let argv0 = args.first().ok_or(KernelError::InvalidArgument)?;
        if priority.map_or(false, |p| !is_valid_priority(p)) {
            return Err(KernelError::InvalidArgument);
        }
        let fds = match parent {
            Some(ppid) => self.live(ppid)?.fds,
            None => [STDIN, STDOUT, STDERR],
        };

        let pid = self.processes.allocate_pid()?;
        let name = Process::derive_name(argv0)?;
        let args = ArgVector::copy_from(args)?;
        let mut stack = KernelStack::allocate()?;
        let rsp = prepare_stack(
            stack.words_mut(),
            EntryArgs {
                trampoline: self.cpu.entry_trampoline(),
                entry: entry as usize as u64,
                argc: args.argc() as u64,
                argv: args.argv_ptr(),
            },
        )?;

        let mut journal = CreationLog::new();
        let result = self.install(pid, parent, fds, &mut journal, |exit_sem| {
            let (level, fixed) = match priority {
                Some(p) => (p, true),
                None => (DEFAULT_PRIORITY, false),
            };
            Process {
                pid,
                ppid: parent,
                name,
                args,
                state: ProcessState::Ready,
                priority: level,
                priority_requested: level,
                priority_fixed: fixed,
                remaining_quantum: 0,
                last_quantum_ticks: 0,
                ready_since_tick: 0,
                rsp,
                stack,
                children: Queue::new(),
                exit_sem,
                exit_code: None,
                fds,
                fds_attached: true,
                granted: None,
                pending_reap: None,
            }
        });

        if let Err(e) = result {
            log::warn!("process: create '{}' failed: {}", argv0, e);
            self.unwind(&mut journal);
            return Err(e);
        }

        if foreground {
            let holder = self.processes.foreground();
            if holder.is_none() || holder == parent {
                self.processes.set_foreground(Some(pid));
            }
        }
        log::info!("process: created {} '{}'", pid, argv0);
        Ok(pid)
    }

    /// The steps of creation that touch shared tables, in order.
    fn install<F>(
        &mut self,
        pid: Pid,
        parent: Option<Pid>,
        fds: [PipeId; 3],
        journal: &mut CreationLog,
        build: F,
    ) -> KernelResult<()>
    where
        F: FnOnce(SemId) -> Process,
    {
        let exit_sem = self.semaphores.create(&format!("exit_{}", pid), 0)?;
        journal.record(Undo::ExitSem(exit_sem));

        for fd in fds {
            self.attach_to_pipe(fd)?;
            journal.record(Undo::Attach(fd));
        }

        self.processes.register(build(exit_sem))?;
        journal.record(Undo::Register(pid));

        if let Some(parent) = parent {
            self.processes
                .get_mut(parent)
                .ok_or(KernelError::InvalidArgument)?
                .children
                .push(pid)?;
            journal.record(Undo::ChildLink { parent, child: pid });
        }
        Ok(())
    }

    fn unwind(&mut self, journal: &mut CreationLog) {
        while let Some(step) = journal.pop() {
            match step {
                Undo::ChildLink { parent, child } => {
                    if let Some(p) = self.processes.get_mut(parent) {
                        p.children.remove(&child);
                    }
                }
                Undo::Register(pid) => {
                    self.processes.unregister(pid);
                }
                Undo::Attach(fd) => {
                    if let Ok(pipe) = self.pipes.get_mut(fd) {
                        pipe.detach();
                    }
                }
                Undo::ExitSem(id) => {
                    self.semaphores.remove(id);
                }
            }
        }
    }

    /// Create a process and make it ready.
    pub fn spawn(
        &mut self,
        args: &[&str],
        parent: Option<Pid>,
        priority: Option<u8>,
        foreground: bool,
        entry: EntryPoint,
    ) -> KernelResult<Pid> {
        let _irq = self.irq();
        let pid = self.create_process(args, parent, priority, foreground, entry)?;
        if let Err(e) = self.scheduler.add_ready(&mut self.processes, pid) {
            // Leave a reapable zombie rather than an unschedulable process.
            let _ = self.exit_process(pid, KILLED_EXIT_CODE);
            return Err(e);
        }
        Ok(pid)
    }

    /// Terminate `pid` with `code`. Exiting twice is a no-op.
    ///
    /// The process leaves every queue, its children go to init, the
    /// foreground returns to its parent, its fds are detached and its exit
    /// semaphore is posted once. The PCB stays until it is reaped.
    pub fn exit_process(&mut self, pid: Pid, code: i32) -> KernelResult<()> {
        let _irq = self.irq();
        if self.processes.is_idle(pid) {
            return Err(KernelError::InvalidArgument);
        }
        let process = self.processes.get(pid).ok_or(KernelError::InvalidArgument)?;
        if process.is_terminated() {
            return Ok(());
        }
        let was_running = self.processes.running() == Some(pid);

        self.scheduler.remove(&self.processes, pid);
        self.sleepers.remove(pid);
        self.semaphores.remove_waiter_everywhere(pid);

        let process = self
            .processes
            .get_mut(pid)
            .ok_or(KernelError::InvalidArgument)?;
        process.state = ProcessState::Terminated;
        process.exit_code = Some(code);
        process.granted = None;
        let mut orphans = core::mem::take(&mut process.children);
        let pending = process.pending_reap.take();
        let ppid = process.ppid;
        let fds = process.fds;
        let fds_attached = core::mem::replace(&mut process.fds_attached, false);
        let exit_sem = process.exit_sem;

        self.adopt_orphans(pid, &mut orphans, pending);

        if self.processes.foreground() == Some(pid) {
            let heir = ppid
                .filter(|p| self.processes.get(*p).map_or(false, |p| !p.is_terminated()))
                .or_else(|| Some(self.init_pid()).filter(|init| *init != pid));
            self.processes.set_foreground(heir);
        }

        if fds_attached {
            for fd in fds {
                if !self.pipes.contains(fd) {
                    continue;
                }
                if let Err(e) = self
                    .unattach_from_pipe(fd, pid)
                    .and_then(|_| self.close_pipe(fd))
                {
                    log::warn!("process: {} detaching pipe {}: {}", pid, fd.index(), e);
                }
            }
        }

        self.sem_post(exit_sem)?;
        if was_running {
            self.request_reschedule();
        }
        log::info!("process: {} exited with {}", pid, code);
        Ok(())
    }

    /// Hand every child of `pid` to init, plus the child a pending
    /// `wait_pid` had already detached. Init's own orphans become
    /// parentless.
    fn adopt_orphans(&mut self, pid: Pid, orphans: &mut Queue<Pid>, pending: Option<Pid>) {
        if let Some(child) = pending {
            self.adopt(pid, child);
        }
        while let Some(child) = orphans.pop() {
            self.adopt(pid, child);
        }
    }

    fn adopt(&mut self, pid: Pid, child: Pid) {
        let init = self.init_pid();
        let Some(process) = self.processes.get_mut(child) else {
            return;
        };
        if pid == init {
            process.ppid = None;
            return;
        }
        process.ppid = Some(init);
        let adopted = self
            .processes
            .get_mut(init)
            .map(|init| init.children.push(child));
        if let Some(Err(e)) = adopted {
            log::warn!("process: init could not adopt {}: {}", child, e);
        }
    }

    /// Terminate `pid` from outside. Init and idle cannot be killed.
    pub fn kill(&mut self, pid: Pid) -> KernelResult<()> {
        if self.processes.is_idle(pid) || self.processes.is_init(pid) {
            return Err(KernelError::InvalidArgument);
        }
        self.exit_process(pid, KILLED_EXIT_CODE)
    }

    /// Wait for the child `target` of `caller` and reap it.
    ///
    /// The first call detaches the child from `caller`'s children. If the
    /// child is still alive `caller` parks on its exit semaphore and the
    /// call returns [`WaitOutcome::Blocked`]; the next call after the wake
    /// finishes the reap.
    pub fn wait_pid(&mut self, caller: Pid, target: Pid) -> KernelResult<WaitOutcome> {
        let _irq = self.irq();
        let pending = self.live(caller)?.pending_reap;
        match pending {
            Some(child) if child == target => {}
            Some(_) => return Err(KernelError::StateConflict),
            None => {
                let child = self
                    .processes
                    .get(target)
                    .ok_or(KernelError::InvalidArgument)?;
                if child.ppid != Some(caller) {
                    return Err(KernelError::StateConflict);
                }
                let parent = self
                    .processes
                    .get_mut(caller)
                    .ok_or(KernelError::InvalidArgument)?;
                if !parent.children.remove(&target) {
                    return Err(KernelError::StateConflict);
                }
                parent.pending_reap = Some(target);
            }
        }

        let exit_sem = self
            .processes
            .get(target)
            .ok_or(KernelError::InvalidArgument)?
            .exit_sem;
        match self.sem_wait(caller, exit_sem)? {
            SemWait::Blocked => Ok(WaitOutcome::Blocked),
            SemWait::Acquired => {
                if let Some(parent) = self.processes.get_mut(caller) {
                    parent.pending_reap = None;
                }
                let code = self.reap(target)?;
                Ok(WaitOutcome::Reaped(code))
            }
        }
    }

    /// One pass over `caller`'s children: reap the terminated ones and keep
    /// the rest. Never blocks.
    pub fn wait_children(&mut self, caller: Pid) -> KernelResult<usize> {
        let _irq = self.irq();
        let pending = self.live(caller)?.children.len();
        let mut reaped = 0;

        for _ in 0..pending {
            let Some(child) = self
                .processes
                .get_mut(caller)
                .and_then(|p| p.children.pop())
            else {
                break;
            };
            match self.processes.get(child).map(Process::is_terminated) {
                None => continue,
                Some(true) => {
                    let code = self.reap(child)?;
                    log::debug!("process: {} reaped {} ({})", caller, child, code);
                    reaped += 1;
                }
                Some(false) => {
                    if let Some(parent) = self.processes.get_mut(caller) {
                        parent.children.push(child)?;
                    }
                }
            }
        }
        Ok(reaped)
    }

    /// Free a terminated process and return its exit code.
    fn reap(&mut self, pid: Pid) -> KernelResult<i32> {
        if !self.processes.get(pid).map_or(false, Process::is_terminated) {
            return Err(KernelError::StateConflict);
        }
        let process = self
            .processes
            .unregister(pid)
            .ok_or(KernelError::InvalidArgument)?;
        self.sem_destroy(process.exit_sem)?;
        Ok(process.exit_code.unwrap_or(0))
    }

    /// Move `pid` to BLOCKED. Blocking a blocked process does nothing.
    pub fn block(&mut self, pid: Pid) -> KernelResult<()> {
        let _irq = self.irq();
        if self.processes.is_idle(pid) {
            return Err(KernelError::InvalidArgument);
        }
        if self.live(pid)?.state == ProcessState::Blocked {
            return Ok(());
        }
        self.park(pid)
    }

    /// Return a BLOCKED process to its ready level.
    pub fn unblock(&mut self, pid: Pid) -> KernelResult<()> {
        let _irq = self.irq();
        let process = self.processes.get(pid).ok_or(KernelError::InvalidArgument)?;
        if process.state != ProcessState::Blocked {
            return Err(KernelError::StateConflict);
        }
        self.sleepers.remove(pid);
        self.scheduler.add_ready(&mut self.processes, pid)
    }

    /// Mark `pid` BLOCKED and take it off the ready levels. The CPU is
    /// given up at the next reschedule if it was running.
    pub(crate) fn park(&mut self, pid: Pid) -> KernelResult<()> {
        self.scheduler.remove(&self.processes, pid);
        let process = self
            .processes
            .get_mut(pid)
            .ok_or(KernelError::InvalidArgument)?;
        process.state = ProcessState::Blocked;
        if self.processes.running() == Some(pid) {
            self.request_reschedule();
        }
        Ok(())
    }

    /// Give up the rest of the quantum. Only the running process can yield.
    pub fn yield_process(&mut self, caller: Pid) -> KernelResult<()> {
        let _irq = self.irq();
        if self.processes.running() != Some(caller) {
            return Err(KernelError::StateConflict);
        }
        let process = self
            .processes
            .get_mut(caller)
            .ok_or(KernelError::InvalidArgument)?;
        if process.state == ProcessState::Running {
            process.state = ProcessState::Yield;
        }
        self.request_reschedule();
        Ok(())
    }

    /// Park `caller` for `ticks` timer ticks. Zero ticks yields.
    pub fn sleep(&mut self, caller: Pid, ticks: u64) -> KernelResult<()> {
        let _irq = self.irq();
        if ticks == 0 {
            return self.yield_process(caller);
        }
        if self.processes.is_idle(caller) {
            return Err(KernelError::InvalidArgument);
        }
        self.live(caller)?;
        let wake_tick = self.scheduler.now().saturating_add(ticks);
        self.sleepers.insert(caller, wake_tick)?;
        self.park(caller)
    }

    /// Hand the foreground from `caller` to `target`.
    pub fn give_foreground(&mut self, caller: Pid, target: Pid) -> KernelResult<()> {
        let _irq = self.irq();
        if self.processes.foreground() != Some(caller) {
            return Err(KernelError::StateConflict);
        }
        self.live(target)?;
        self.processes.set_foreground(Some(target));
        log::debug!("process: foreground {} -> {}", caller, target);
        Ok(())
    }

    /// Rebind `caller`'s stdin, stdout and stderr.
    pub fn set_fd_targets(
        &mut self,
        caller: Pid,
        read: PipeId,
        write: PipeId,
        error: PipeId,
    ) -> KernelResult<()> {
        let _irq = self.irq();
        let old = self.live(caller)?.fds;
        let new = [read, write, error];

        for (done, fd) in new.iter().enumerate() {
            if let Err(e) = self.attach_to_pipe(*fd) {
                for attached in &new[..done] {
                    if let Ok(pipe) = self.pipes.get_mut(*attached) {
                        pipe.detach();
                    }
                }
                return Err(e);
            }
        }

        let process = self
            .processes
            .get_mut(caller)
            .ok_or(KernelError::InvalidArgument)?;
        process.fds = new;
        let was_attached = core::mem::replace(&mut process.fds_attached, true);

        if was_attached {
            for fd in old {
                if !self.pipes.contains(fd) {
                    continue;
                }
                self.unattach_from_pipe(fd, caller)?;
                self.close_pipe(fd)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{IDLE_PRIORITY, MAX_PROCESSES};
    use crate::kernel::testing::{boot, noop_entry, run_until, spawn_worker};

    // =========================================================================
    // Creation
    // =========================================================================

    #[test]
    fn test_create_inherits_parent_fds() {
        let (mut k, _cpu) = boot();
        let init = k.init_pid();
        let pipe = k.open_pipe().unwrap();
        let parent = spawn_worker(&mut k, "parent");
        k.set_fd_targets(parent, pipe, STDOUT, STDERR).unwrap();

        let child = k
            .create_process(&["child", "-v"], Some(parent), None, false, noop_entry)
            .unwrap();
        let process = k.process(child).unwrap();
        assert_eq!(process.fds, [pipe, STDOUT, STDERR]);
        assert_eq!(process.ppid, Some(parent));
        assert_eq!(process.args.get(1), Some("-v"));
        assert_eq!(k.pipe(pipe).unwrap().attached(), 2);
        assert!(!k.is_ready_queued(child), "create does not make it ready");
        assert!(k.process(parent).unwrap().children.contains(&child));
        assert!(!k.process(init).unwrap().children.contains(&child));
    }

    #[test]
    fn test_create_rejects_bad_arguments() {
        let (mut k, _cpu) = boot();
        assert_eq!(
            k.create_process(&[], None, None, false, noop_entry),
            Err(KernelError::InvalidArgument)
        );
        assert_eq!(
            k.create_process(&["x"], None, Some(IDLE_PRIORITY + 1), false, noop_entry),
            Err(KernelError::InvalidArgument)
        );
        assert_eq!(
            k.create_process(&["x"], Some(Pid::new(60)), None, false, noop_entry),
            Err(KernelError::InvalidArgument)
        );
    }

    #[test]
    fn test_create_rolls_back_on_attach_failure() {
        let (mut k, _cpu) = boot();
        let parent = spawn_worker(&mut k, "parent");
        let pipe = k.open_pipe().unwrap();
        k.set_fd_targets(parent, STDIN, pipe, STDERR).unwrap();
        // Pull the pipe out from under the parent's stdout.
        k.unattach_from_pipe(pipe, parent).unwrap();
        k.close_pipe(pipe).unwrap();
        assert!(k.pipe(pipe).is_none());

        let processes = k.process_count();
        let sems = k.semaphores.len();
        let stdin_refs = k.pipe(STDIN).unwrap().attached();

        let result = k.create_process(&["child"], Some(parent), None, false, noop_entry);
        assert_eq!(result, Err(KernelError::InvalidArgument));
        assert_eq!(k.process_count(), processes);
        assert_eq!(k.semaphores.len(), sems, "exit semaphore released");
        assert_eq!(k.pipe(STDIN).unwrap().attached(), stdin_refs, "stdin attach undone");
        assert!(k.process(parent).unwrap().children.is_empty());
    }

    #[test]
    fn test_pid_exhaustion() {
        let (mut k, _cpu) = boot();
        let mut last = None;
        for i in 0..MAX_PROCESSES - 2 {
            last = Some(spawn_worker(&mut k, &format!("w{}", i)));
        }
        assert_eq!(last, Some(Pid::new(MAX_PROCESSES as u32)));
        let init = k.init_pid();
        assert_eq!(
            k.spawn(&["one-more"], Some(init), None, false, noop_entry),
            Err(KernelError::ResourceExhausted)
        );
    }

    #[test]
    fn test_foreground_follows_parent() {
        let (mut k, _cpu) = boot();
        let init = k.init_pid();
        let shell = k.spawn(&["shell"], Some(init), None, true, noop_entry).unwrap();
        assert_eq!(k.foreground_pid(), Some(shell));

        // Init no longer holds it, so its next foreground child does not win.
        let other = k.spawn(&["other"], Some(init), None, true, noop_entry).unwrap();
        assert_eq!(k.foreground_pid(), Some(shell));

        let job = k.spawn(&["job"], Some(shell), None, true, noop_entry).unwrap();
        assert_eq!(k.foreground_pid(), Some(job));
        assert_ne!(other, job);
    }

    // =========================================================================
    // Exit and reaping
    // =========================================================================

    #[test]
    fn test_exit_is_idempotent() {
        let (mut k, _cpu) = boot();
        let a = spawn_worker(&mut k, "a");
        let exit_sem = k.process(a).unwrap().exit_sem;

        k.exit_process(a, 7).unwrap();
        k.exit_process(a, 9).unwrap();

        let process = k.process(a).unwrap();
        assert_eq!(process.state, ProcessState::Terminated);
        assert_eq!(process.exit_code, Some(7), "second exit changes nothing");
        assert_eq!(k.sem_value(exit_sem).unwrap(), 1, "exit semaphore posted once");
        assert!(!k.is_ready_queued(a));
    }

    #[test]
    fn test_exit_rejects_idle() {
        let (mut k, _cpu) = boot();
        let idle = k.idle_pid();
        assert_eq!(k.exit_process(idle, 0), Err(KernelError::InvalidArgument));
        assert_eq!(k.kill(idle), Err(KernelError::InvalidArgument));
        assert_eq!(k.kill(k.init_pid()), Err(KernelError::InvalidArgument));
    }

    #[test]
    fn test_orphans_go_to_init() {
        let (mut k, _cpu) = boot();
        let init = k.init_pid();
        let parent = spawn_worker(&mut k, "parent");
        let child = k
            .spawn(&["child"], Some(parent), None, false, noop_entry)
            .unwrap();

        k.kill(parent).unwrap();

        assert_eq!(k.process(child).unwrap().ppid, Some(init));
        let init_children = &k.process(init).unwrap().children;
        assert!(init_children.contains(&child));
        assert!(init_children.contains(&parent));
        assert_eq!(k.wait_children(init).unwrap(), 1, "only the dead parent");
        assert!(k.process(parent).is_none());
        assert!(k.process(child).is_some());
    }

    #[test]
    fn test_exit_detaches_fds() {
        let (mut k, _cpu) = boot();
        let a = spawn_worker(&mut k, "a");
        let before = k.pipe(STDOUT).unwrap().attached();
        k.kill(a).unwrap();
        assert_eq!(k.pipe(STDOUT).unwrap().attached(), before - 1);
        assert!(!k.process(a).unwrap().fds_attached);
    }

    #[test]
    fn test_exit_of_running_requests_reschedule() {
        let (mut k, _cpu) = boot();
        let a = spawn_worker(&mut k, "a");
        run_until(&mut k, a);
        k.take_reschedule_request();

        k.exit_process(a, 0).unwrap();
        assert!(k.take_reschedule_request());
    }

    #[test]
    fn test_wait_pid_after_exit() {
        let (mut k, _cpu) = boot();
        let parent = spawn_worker(&mut k, "parent");
        let child = k
            .spawn(&["child"], Some(parent), None, false, noop_entry)
            .unwrap();
        k.exit_process(child, 42).unwrap();

        assert_eq!(k.wait_pid(parent, child).unwrap(), WaitOutcome::Reaped(42));
        assert!(k.process(child).is_none());
        assert!(k.sem_find(&format!("exit_{}", child)).is_none());
    }

    #[test]
    fn test_wait_pid_blocks_until_exit() {
        let (mut k, _cpu) = boot();
        let parent = spawn_worker(&mut k, "parent");
        let child = k
            .spawn(&["child"], Some(parent), None, false, noop_entry)
            .unwrap();

        assert_eq!(k.wait_pid(parent, child).unwrap(), WaitOutcome::Blocked);
        assert_eq!(k.process(parent).unwrap().state, ProcessState::Blocked);
        assert_eq!(k.process(parent).unwrap().pending_reap, Some(child));

        k.kill(child).unwrap();
        assert_eq!(k.process(parent).unwrap().state, ProcessState::Ready);
        assert_eq!(
            k.wait_pid(parent, child).unwrap(),
            WaitOutcome::Reaped(KILLED_EXIT_CODE)
        );
        assert_eq!(k.process(parent).unwrap().pending_reap, None);
    }

    #[test]
    fn test_wait_pid_rejects_non_child() {
        let (mut k, _cpu) = boot();
        let a = spawn_worker(&mut k, "a");
        let b = spawn_worker(&mut k, "b");
        assert_eq!(k.wait_pid(a, b), Err(KernelError::StateConflict));
        assert_eq!(k.wait_pid(a, Pid::new(50)), Err(KernelError::InvalidArgument));
    }

    #[test]
    fn test_waiting_parent_exit_hands_child_to_init() {
        let (mut k, _cpu) = boot();
        let init = k.init_pid();
        let parent = spawn_worker(&mut k, "parent");
        let child = k
            .spawn(&["child"], Some(parent), None, false, noop_entry)
            .unwrap();
        k.wait_pid(parent, child).unwrap();

        k.kill(parent).unwrap();
        assert!(k.process(init).unwrap().children.contains(&child));
        assert_eq!(k.process(child).unwrap().ppid, Some(init));
        assert_eq!(k.sem_waiting_count(k.process(child).unwrap().exit_sem).unwrap(), 0);

        let dead = k.process(parent).unwrap();
        assert!(!dead.fds_attached, "exit ran to completion");
        assert_eq!(k.sem_value(dead.exit_sem).unwrap(), 1);
        assert_eq!(
            k.wait_pid(init, parent).unwrap(),
            WaitOutcome::Reaped(KILLED_EXIT_CODE)
        );
    }

    #[test]
    fn test_init_exit_leaves_children_parentless() {
        let (mut k, _cpu) = boot();
        let init = k.init_pid();
        let a = spawn_worker(&mut k, "a");
        let b = spawn_worker(&mut k, "b");
        let waited = spawn_worker(&mut k, "waited");
        assert_eq!(k.wait_pid(init, waited).unwrap(), WaitOutcome::Blocked);

        k.exit_process(init, 0).unwrap();

        for child in [a, b, waited] {
            assert_eq!(k.process(child).unwrap().ppid, None, "pid {}", child);
        }
        let init = k.process(init).unwrap();
        assert!(init.children.is_empty(), "init never adopts into itself");
        assert_eq!(init.pending_reap, None);
    }

    // =========================================================================
    // Blocking transitions
    // =========================================================================

    #[test]
    fn test_block_and_unblock() {
        let (mut k, _cpu) = boot();
        let a = spawn_worker(&mut k, "a");

        k.block(a).unwrap();
        assert_eq!(k.process(a).unwrap().state, ProcessState::Blocked);
        assert!(!k.is_ready_queued(a));
        k.block(a).unwrap();

        k.unblock(a).unwrap();
        assert!(k.is_ready_queued(a));
        assert_eq!(k.unblock(a), Err(KernelError::StateConflict));
        assert_eq!(k.block(k.idle_pid()), Err(KernelError::InvalidArgument));
    }

    #[test]
    fn test_block_terminated_conflicts() {
        let (mut k, _cpu) = boot();
        let a = spawn_worker(&mut k, "a");
        k.kill(a).unwrap();
        assert_eq!(k.block(a), Err(KernelError::StateConflict));
    }

    #[test]
    fn test_yield_requires_running() {
        let (mut k, _cpu) = boot();
        let a = spawn_worker(&mut k, "a");
        assert_eq!(k.yield_process(a), Err(KernelError::StateConflict));
        run_until(&mut k, a);
        k.yield_process(a).unwrap();
        assert_eq!(k.process(a).unwrap().state, ProcessState::Yield);
    }

    #[test]
    fn test_sleep_parks_caller() {
        let (mut k, _cpu) = boot();
        let a = spawn_worker(&mut k, "a");
        k.sleep(a, 3).unwrap();
        assert_eq!(k.process(a).unwrap().state, ProcessState::Blocked);
        assert!(k.sleepers.contains(a));

        k.unblock(a).unwrap();
        assert!(!k.sleepers.contains(a), "early unblock cancels the timer");
    }

    // =========================================================================
    // Foreground and fd targets
    // =========================================================================

    #[test]
    fn test_give_foreground() {
        let (mut k, _cpu) = boot();
        let init = k.init_pid();
        let a = spawn_worker(&mut k, "a");
        let b = spawn_worker(&mut k, "b");

        assert_eq!(k.give_foreground(a, b), Err(KernelError::StateConflict));
        k.give_foreground(init, a).unwrap();
        assert_eq!(k.foreground_pid(), Some(a));

        k.kill(a).unwrap();
        assert_eq!(k.foreground_pid(), Some(init), "returns to the parent");
    }

    #[test]
    fn test_set_fd_targets_rolls_back() {
        let (mut k, _cpu) = boot();
        let a = spawn_worker(&mut k, "a");
        let pipe = k.open_pipe().unwrap();
        let stdin_refs = k.pipe(STDIN).unwrap().attached();

        assert_eq!(
            k.set_fd_targets(a, pipe, STDOUT, PipeId::new(99)),
            Err(KernelError::InvalidArgument)
        );
        assert_eq!(k.pipe(pipe).unwrap().attached(), 0);
        assert_eq!(k.pipe(STDIN).unwrap().attached(), stdin_refs);
        assert_eq!(k.process(a).unwrap().fds, [STDIN, STDOUT, STDERR]);

        k.set_fd_targets(a, pipe, STDOUT, STDERR).unwrap();
        assert_eq!(k.pipe(pipe).unwrap().attached(), 1);
        assert_eq!(k.pipe(STDIN).unwrap().attached(), stdin_refs - 1);
    }
}
