//! Shared boot helpers for the scenario tests.
#![allow(dead_code)]

use quanta::arch_impl::host::MockCpu;
use quanta::config::{KernelConfig, SchedulerConfig};
use quanta::process::Pid;
use quanta::Kernel;

pub extern "C" fn noop_entry(_argc: usize, _argv: *const *const u8) -> i64 {
    0
}

pub fn boot() -> Kernel<MockCpu> {
    boot_with(SchedulerConfig::default())
}

pub fn boot_with(scheduler: SchedulerConfig) -> Kernel<MockCpu> {
    let config = KernelConfig::new(noop_entry, noop_entry).with_scheduler(scheduler);
    Kernel::new(MockCpu::new(), config).expect("kernel boots")
}

/// Boot and park init, so only the processes a test spawns compete.
pub fn boot_quiet(scheduler: SchedulerConfig) -> Kernel<MockCpu> {
    let mut kernel = boot_with(scheduler);
    let init = kernel.init_pid();
    kernel.block(init).expect("init can be parked");
    kernel
}

/// Ready child of init with a dynamic priority.
pub fn spawn(kernel: &mut Kernel<MockCpu>, name: &str) -> Pid {
    let init = kernel.init_pid();
    kernel
        .spawn(&[name], Some(init), None, false, noop_entry)
        .expect("spawn succeeds")
}

pub fn spawn_child(kernel: &mut Kernel<MockCpu>, parent: Pid, name: &str) -> Pid {
    kernel
        .spawn(&[name], Some(parent), None, false, noop_entry)
        .expect("spawn succeeds")
}

/// Tick until `pid` runs. Returns false if it never does within `limit`.
pub fn tick_until_running(kernel: &mut Kernel<MockCpu>, pid: Pid, limit: usize) -> bool {
    for _ in 0..limit {
        if kernel.current_pid() == Some(pid) {
            return true;
        }
        kernel.schedule_tick(0);
    }
    kernel.current_pid() == Some(pid)
}
