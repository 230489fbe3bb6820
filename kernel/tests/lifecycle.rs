//! Process lifecycle scenarios: waiting, orphans, exit and pid reuse.

mod common;

use common::{boot, boot_quiet, spawn, spawn_child};
use quanta::config::{SchedulerConfig, MAX_PROCESSES};
use quanta::ipc::STDOUT;
use quanta::process::{ProcessState, WaitOutcome};
use quanta::KernelError;

#[test]
fn test_parent_waits_for_child_across_ticks() {
    let mut k = boot_quiet(SchedulerConfig::default());
    let parent = spawn(&mut k, "parent");
    let child = spawn_child(&mut k, parent, "child");

    k.schedule_tick(0);
    assert_eq!(k.current_pid(), Some(parent));
    assert_eq!(k.wait_pid(parent, child).unwrap(), WaitOutcome::Blocked);
    assert_eq!(k.process(parent).unwrap().state, ProcessState::Blocked);

    k.schedule_tick(0);
    assert_eq!(k.current_pid(), Some(child));
    k.exit_process(child, 7).unwrap();
    assert_eq!(k.process(parent).unwrap().state, ProcessState::Ready);

    k.schedule_tick(0);
    assert_eq!(k.current_pid(), Some(parent));
    assert_eq!(k.wait_pid(parent, child).unwrap(), WaitOutcome::Reaped(7));
    assert!(k.process(child).is_none(), "reaped pcb is gone");
    assert!(k.semaphores_consistent());
}

#[test]
fn test_orphan_is_adopted_and_reaped_by_init() {
    let mut k = boot();
    let init = k.init_pid();
    let parent = spawn(&mut k, "parent");
    let child = spawn_child(&mut k, parent, "child");

    k.kill(parent).unwrap();
    assert_eq!(k.process(child).unwrap().ppid, Some(init));

    let report = k.init_step().unwrap();
    assert_eq!(report.reaped, 1);
    assert!(k.process(parent).is_none());
    assert!(k.process(child).is_some(), "live orphan is kept");

    k.kill(child).unwrap();
    assert_eq!(k.init_step().unwrap().reaped, 1);
    assert!(k.process(child).is_none());
}

#[test]
fn test_exit_takes_effect_once() {
    let mut k = boot();
    let init = k.init_pid();
    let pid = spawn(&mut k, "worker");
    let exit_sem = k.process(pid).unwrap().exit_sem;

    k.exit_process(pid, 5).unwrap();
    k.exit_process(pid, 9).unwrap();
    assert_eq!(k.sem_value(exit_sem).unwrap(), 1, "posted exactly once");
    assert_eq!(k.process(pid).unwrap().exit_code, Some(5));

    assert_eq!(k.wait_pid(init, pid).unwrap(), WaitOutcome::Reaped(5));
    assert!(k.sem_value(exit_sem).is_err(), "exit semaphore freed on reap");
}

#[test]
fn test_table_exhaustion_leaves_no_trace() {
    let mut k = boot();
    while k.process_count() < MAX_PROCESSES {
        spawn(&mut k, "filler");
    }
    let stdout_refs = k.pipe(STDOUT).unwrap().attached();
    let sem_probe = k.process(k.init_pid()).unwrap().exit_sem;

    let init = k.init_pid();
    let err = k
        .spawn(&["extra"], Some(init), None, false, common::noop_entry)
        .unwrap_err();
    assert_eq!(err, KernelError::ResourceExhausted);
    assert_eq!(k.process_count(), MAX_PROCESSES);
    assert_eq!(k.pipe(STDOUT).unwrap().attached(), stdout_refs);
    assert!(k.sem_value(sem_probe).is_ok());
    assert!(k.semaphores_consistent());
}

#[test]
fn test_freed_pid_is_reused() {
    let mut k = boot();
    let a = spawn(&mut k, "a");
    let _b = spawn(&mut k, "b");

    k.kill(a).unwrap();
    k.init_step().unwrap();
    assert!(k.process(a).is_none());

    let again = spawn(&mut k, "c");
    assert_eq!(again, a, "lowest free pid first");
}
