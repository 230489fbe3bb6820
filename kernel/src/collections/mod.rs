//! Containers used by the scheduler and the synchronization primitives.

pub mod list;
pub mod queue;

pub use list::LinkedLists;
pub use queue::Queue;
