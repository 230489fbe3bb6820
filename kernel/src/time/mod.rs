//! Timer-tick time keeping.
//!
//! The scheduler's tick counter is the only clock. [`SleepQueue`] holds
//! processes parked until a tick deadline.

pub mod sleep;

pub use sleep::{SleepQueue, Sleeper};

use crate::config::TICKS_PER_SECOND;

/// Convert milliseconds to whole timer ticks, rounding down.
pub fn ticks_from_millis(millis: u64) -> u64 {
    millis.saturating_mul(TICKS_PER_SECOND) / 1000
}
