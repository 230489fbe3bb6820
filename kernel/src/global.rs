//! The kernel instance and its hardware-facing entry points.
//!
//! One [`Kernel`] lives in `KERNEL`. Every caller on the CPU goes through
//! [`with_kernel`], which opens the critical section, runs the operation
//! and, once the lock is released, turns a pending reschedule request into
//! a forced tick. The blocking wrappers loop on `Blocked` results: each
//! turn parks the caller, the forced tick switches away, and the loop
//! resumes when the process is scheduled again.

use alloc::vec::Vec;

use crate::arch_impl::x86_64::X86Cpu;
use crate::arch_impl::CpuOps;
use crate::config::KernelConfig;
use crate::error::{KernelError, KernelResult};
use crate::ipc::{PipeId, PipeIo};
use crate::kernel::Kernel;
use crate::process::{EntryPoint, Pid, ProcessInfo, WaitOutcome};
use crate::sync::{IrqLock, SemId, SemWait};

static KERNEL: IrqLock<Option<Kernel<X86Cpu>>, X86Cpu> = IrqLock::new(X86Cpu, None);

/// Console bytes moved per drain.
const CONSOLE_CHUNK: usize = 64;

/// Build the kernel and install it. Fails if it is already installed.
pub fn init(config: KernelConfig) -> KernelResult<()> {
    let kernel = Kernel::new(X86Cpu, config)?;
    let mut slot = KERNEL.try_lock().ok_or(KernelError::StateConflict)?;
    if slot.is_some() {
        return Err(KernelError::StateConflict);
    }
    *slot = Some(kernel);
    Ok(())
}

/// Bring up serial, logging, the heap and the kernel, in that order.
///
/// # Safety
/// `heap_start..heap_start + heap_size` must be mapped, writable and owned
/// by the kernel from here on.
pub unsafe fn boot(
    heap_start: usize,
    heap_size: usize,
    shell: Option<EntryPoint>,
) -> KernelResult<()> {
    let mut config = KernelConfig::new(init_main, idle_main);
    if let Some(entry) = shell {
        config = config.with_shell(entry);
    }

    crate::serial::init();
    crate::logger::init(config.log_level);
    crate::logger::install_sink(crate::serial::log_sink);
    crate::memory::heap::init(heap_start, heap_size);
    init(config)?;
    log::info!("kernel: ready");
    Ok(())
}

/// Run `f` on the kernel with interrupts off.
pub fn with_kernel<F, R>(f: F) -> KernelResult<R>
where
    F: FnOnce(&mut Kernel<X86Cpu>) -> KernelResult<R>,
{
    let (result, reschedule) = {
        let mut guard = KERNEL.try_lock().ok_or(KernelError::StateConflict)?;
        let kernel = guard.as_mut().ok_or(KernelError::StateConflict)?;
        let result = f(kernel);
        (result, kernel.take_reschedule_request())
    };
    if reschedule {
        X86Cpu.force_reschedule();
    }
    result
}

fn current(kernel: &Kernel<X86Cpu>) -> KernelResult<Pid> {
    kernel.current_pid().ok_or(KernelError::StateConflict)
}

/// Timer ISR hook. Takes the interrupted RSP and returns the one to
/// resume. If the kernel is busy or not up yet, nothing changes.
#[no_mangle]
pub extern "C" fn schedule_tick(rsp: u64) -> u64 {
    let Some(mut guard) = KERNEL.try_lock() else {
        return rsp;
    };
    match guard.as_mut() {
        Some(kernel) => kernel.schedule_tick(rsp),
        None => rsp,
    }
}

/// First code every process runs. Calls the entry point, then exits with
/// its return value.
pub extern "C" fn process_entry(entry: EntryPoint, argc: usize, argv: *const *const u8) -> ! {
    let code = entry(argc, argv);
    if let Err(e) = exit(code as i32) {
        log::warn!("process: exit failed: {}", e);
    }
    loop {
        let _ = yield_now();
    }
}

/// Keyboard IRQ hook.
pub fn keyboard_byte(byte: u8) -> bool {
    with_kernel(|k| k.stdin_push(byte)).unwrap_or(false)
}

// ============================================================================
// Process operations for the running process
// ============================================================================

pub fn getpid() -> KernelResult<Pid> {
    with_kernel(|k| current(k))
}

pub fn spawn(
    args: &[&str],
    priority: Option<u8>,
    foreground: bool,
    entry: EntryPoint,
) -> KernelResult<Pid> {
    with_kernel(|k| {
        let parent = current(k)?;
        k.spawn(args, Some(parent), priority, foreground, entry)
    })
}

pub fn exit(code: i32) -> KernelResult<()> {
    with_kernel(|k| {
        let pid = current(k)?;
        k.exit_process(pid, code)
    })
}

pub fn kill(pid: Pid) -> KernelResult<()> {
    with_kernel(|k| k.kill(pid))
}

pub fn yield_now() -> KernelResult<()> {
    with_kernel(|k| {
        let pid = current(k)?;
        k.yield_process(pid)
    })
}

pub fn sleep_ticks(ticks: u64) -> KernelResult<()> {
    with_kernel(|k| {
        let pid = current(k)?;
        k.sleep(pid, ticks)
    })
}

pub fn sleep_millis(millis: u64) -> KernelResult<()> {
    sleep_ticks(crate::time::ticks_from_millis(millis))
}

/// Wait for a child and return its exit code.
pub fn wait_pid(target: Pid) -> KernelResult<i32> {
    loop {
        let outcome = with_kernel(|k| {
            let pid = current(k)?;
            k.wait_pid(pid, target)
        })?;
        if let WaitOutcome::Reaped(code) = outcome {
            return Ok(code);
        }
    }
}

pub fn set_priority(pid: Pid, priority: u8) -> KernelResult<()> {
    with_kernel(|k| k.set_process_priority(pid, priority))
}

pub fn give_foreground(target: Pid) -> KernelResult<()> {
    with_kernel(|k| {
        let pid = current(k)?;
        k.give_foreground(pid, target)
    })
}

pub fn list_processes() -> KernelResult<Vec<ProcessInfo>> {
    with_kernel(|k| k.list_processes())
}

// ============================================================================
// Semaphores
// ============================================================================

pub fn sem_open(name: &str, initial: u32, create_if_missing: bool) -> KernelResult<SemId> {
    with_kernel(|k| k.sem_open(name, initial, create_if_missing))
}

pub fn sem_wait(id: SemId) -> KernelResult<()> {
    loop {
        let result = with_kernel(|k| {
            let pid = current(k)?;
            k.sem_wait(pid, id)
        })?;
        if result == SemWait::Acquired {
            return Ok(());
        }
    }
}

pub fn sem_post(id: SemId) -> KernelResult<()> {
    with_kernel(|k| k.sem_post(id))
}

pub fn sem_close(id: SemId) -> KernelResult<()> {
    with_kernel(|k| k.sem_close(id))
}

// ============================================================================
// Pipes and descriptors
// ============================================================================

pub fn open_pipe() -> KernelResult<PipeId> {
    with_kernel(|k| k.open_pipe())
}

pub fn set_fd_targets(read: PipeId, write: PipeId, error: PipeId) -> KernelResult<()> {
    with_kernel(|k| {
        let pid = current(k)?;
        k.set_fd_targets(pid, read, write, error)
    })
}

/// Read from `fd` until `buf` is full or the pipe has no other party.
pub fn read(fd: usize, buf: &mut [u8]) -> KernelResult<usize> {
    let mut done = 0;
    loop {
        let io = with_kernel(|k| {
            let pid = current(k)?;
            k.read_fd(pid, fd, &mut buf[done..])
        })?;
        match io {
            PipeIo::Complete(n) => return Ok(done + n),
            PipeIo::Blocked { transferred } => done += transferred,
        }
    }
}

/// Write all of `data` to `fd`, then push console output to the serial
/// port.
pub fn write(fd: usize, data: &[u8]) -> KernelResult<usize> {
    let mut done = 0;
    let written = loop {
        let io = with_kernel(|k| {
            let pid = current(k)?;
            k.write_fd(pid, fd, &data[done..])
        })?;
        match io {
            PipeIo::Complete(n) => break done + n,
            PipeIo::Blocked { transferred } => done += transferred,
        }
    };
    flush_console()?;
    Ok(written)
}

/// Move pending stdout bytes to COM1.
pub fn flush_console() -> KernelResult<()> {
    let mut chunk = [0u8; CONSOLE_CHUNK];
    loop {
        let n = with_kernel(|k| k.console_drain(&mut chunk))?;
        if n == 0 {
            return Ok(());
        }
        crate::serial::write_bytes(&chunk[..n]);
    }
}

// ============================================================================
// Built-in processes
// ============================================================================

/// Pid 1: reap, keep a shell alive, yield. Never blocks.
extern "C" fn init_main(_argc: usize, _argv: *const *const u8) -> i64 {
    loop {
        match with_kernel(|k| k.init_step()) {
            Ok(report) if report.reaped > 0 => {
                log::debug!("init: reaped {}", report.reaped);
            }
            Ok(_) => {}
            Err(e) => log::warn!("init: {}", e),
        }
        let _ = flush_console();
        let _ = yield_now();
    }
}

extern "C" fn idle_main(_argc: usize, _argv: *const *const u8) -> i64 {
    loop {
        X86Cpu.halt();
    }
}
