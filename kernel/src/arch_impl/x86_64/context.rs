//! Initial register frame for new processes.
//!
//! The timer ISR saves a process by pushing the general purpose registers
//! on top of the CPU's interrupt frame and handing the resulting RSP to
//! `schedule_tick`. It resumes one by loading the returned RSP, popping the
//! registers and executing `iretq`. A new process therefore starts life as
//! a stack that already looks like that: popping it lands in the entry
//! trampoline with `(entry, argc, argv)` in `rdi`, `rsi`, `rdx`.
//!
//! Layout from the returned RSP upward:
//!
//! ```text
//! r15 r14 r13 r12 r11 r10 r9 r8 rsi rdi rbp rdx rcx rbx rax | rip cs rflags rsp ss
//! ```

use crate::config::{INITIAL_RFLAGS, KERNEL_CODE_SELECTOR, KERNEL_DATA_SELECTOR};
use crate::error::{KernelError, KernelResult};

/// Quad words in the saved frame.
pub const FRAME_WORDS: usize = 20;

pub const RSI_SLOT: usize = 8;
pub const RDI_SLOT: usize = 9;
pub const RDX_SLOT: usize = 11;
pub const RIP_SLOT: usize = 15;
pub const CS_SLOT: usize = 16;
pub const RFLAGS_SLOT: usize = 17;
pub const RSP_SLOT: usize = 18;
pub const SS_SLOT: usize = 19;

/// Start-up arguments placed in the frame.
#[derive(Debug, Clone, Copy)]
pub struct EntryArgs {
    pub trampoline: u64,
    pub entry: u64,
    pub argc: u64,
    pub argv: u64,
}

/// Write the initial frame at the top of `stack` and return the RSP the
/// context-restore path must load.
///
/// The trampoline sees a 16-byte aligned stack minus the return slot, as if
/// it had been reached through `call`.
pub fn prepare_stack(stack: &mut [u64], args: EntryArgs) -> KernelResult<u64> {
    let base = stack.as_ptr() as u64;
    let end = base + (stack.len() * 8) as u64;
    let top = end & !0xF;
    let top_index = ((top - base) / 8) as usize;

    // One fake return address plus the frame itself.
    if top_index < FRAME_WORDS + 1 {
        return Err(KernelError::InvalidArgument);
    }

    let return_slot = top_index - 1;
    stack[return_slot] = 0;
    let entry_rsp = base + (return_slot * 8) as u64;

    let frame_start = return_slot - FRAME_WORDS;
    let frame = &mut stack[frame_start..return_slot];
    frame.fill(0);
    frame[RSI_SLOT] = args.argc;
    frame[RDI_SLOT] = args.entry;
    frame[RDX_SLOT] = args.argv;
    frame[RIP_SLOT] = args.trampoline;
    frame[CS_SLOT] = KERNEL_CODE_SELECTOR;
    frame[RFLAGS_SLOT] = INITIAL_RFLAGS;
    frame[RSP_SLOT] = entry_rsp;
    frame[SS_SLOT] = KERNEL_DATA_SELECTOR;

    Ok(base + (frame_start * 8) as u64)
}
