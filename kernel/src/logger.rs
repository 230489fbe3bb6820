//! Kernel logger.
//!
//! Messages are buffered until an output sink is installed, then flushed
//! to it in one go. On x86_64 the sink is the COM1 serial port; tests
//! install their own.

use conquer_once::spin::OnceCell;
use core::fmt::{self, Write};
use core::sync::atomic::{AtomicUsize, Ordering};
use log::{LevelFilter, Log, Metadata, Record};
use spin::Mutex;

const BUFFER_SIZE: usize = 8192;

/// Output function the logger forwards formatted lines to.
pub type Sink = fn(fmt::Arguments);

/// Buffer for storing log messages before a sink is installed
struct LogBuffer {
    buffer: [u8; BUFFER_SIZE],
    position: usize,
}

impl LogBuffer {
    const fn new() -> Self {
        Self {
            buffer: [0; BUFFER_SIZE],
            position: 0,
        }
    }

    fn contents(&self) -> &str {
        core::str::from_utf8(&self.buffer[..self.position]).unwrap_or("<invalid UTF-8>")
    }

    fn clear(&mut self) {
        self.position = 0;
    }
}

impl Write for LogBuffer {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let bytes = s.as_bytes();
        let remaining = BUFFER_SIZE - self.position;

        // Full: keep what is already there, drop the new text
        if bytes.len() > remaining {
            return Ok(());
        }

        self.buffer[self.position..self.position + bytes.len()].copy_from_slice(bytes);
        self.position += bytes.len();
        Ok(())
    }
}

pub struct KernelLogger {
    buffer: Mutex<LogBuffer>,
    sink: OnceCell<Sink>,
    level: AtomicUsize,
}

impl KernelLogger {
    pub const fn new() -> Self {
        KernelLogger {
            buffer: Mutex::new(LogBuffer::new()),
            sink: OnceCell::uninit(),
            level: AtomicUsize::new(LevelFilter::Info as usize),
        }
    }

    pub fn set_level(&self, level: LevelFilter) {
        self.level.store(level as usize, Ordering::Relaxed);
    }

    /// Start forwarding to `sink`, flushing anything buffered so far.
    /// Returns false if a sink was already installed.
    pub fn install_sink(&self, sink: Sink) -> bool {
        if self.sink.try_init_once(|| sink).is_err() {
            return false;
        }
        let mut buffer = self.buffer.lock();
        if buffer.position > 0 {
            sink(format_args!("{}", buffer.contents()));
            buffer.clear();
        }
        true
    }

    /// Bytes waiting for a sink.
    pub fn buffered(&self) -> usize {
        self.buffer.lock().position
    }
}

impl Default for KernelLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl Log for KernelLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() as usize <= self.level.load(Ordering::Relaxed)
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        if let Ok(sink) = self.sink.try_get() {
            sink(format_args!(
                "[{:>5}] {}: {}\n",
                record.level(),
                record.target(),
                record.args()
            ));
            return;
        }

        // try_lock: the holder may be the code this interrupt preempted
        if let Some(mut buffer) = self.buffer.try_lock() {
            let _ = write!(
                &mut *buffer,
                "[{:>5}] {}: {}\n",
                record.level(),
                record.target(),
                record.args()
            );
        }
    }

    fn flush(&self) {}
}

pub static LOGGER: KernelLogger = KernelLogger::new();

/// Register the kernel logger with the `log` facade. Safe to call twice.
pub fn init(level: LevelFilter) {
    LOGGER.set_level(level);
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(level);
    }
}

/// Route log output to `sink` from now on.
pub fn install_sink(sink: Sink) -> bool {
    LOGGER.install_sink(sink)
}
