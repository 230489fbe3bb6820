//! Scheduling
//!
//! [`scheduler`] owns the ready levels and the priority policy.
//! `dispatch` drives them from the timer tick.

mod dispatch;
pub mod scheduler;

pub use scheduler::{clamp_priority, is_valid_priority, priority_from_usage, Scheduler, SchedulerMetrics};
