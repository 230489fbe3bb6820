//! Inter-Process Communication (IPC) module
//!
//! - Pipes (pipe.rs) - Bounded byte streams between processes
//! - File descriptors (fd.rs) - The three per-process pipe bindings

pub mod fd;
pub mod pipe;

pub use fd::{MAX_FDS, STDERR_FD, STDIN_FD, STDOUT_FD};
pub use pipe::{Pipe, PipeId, PipeIo, PipeTable, STDERR, STDIN, STDOUT};
