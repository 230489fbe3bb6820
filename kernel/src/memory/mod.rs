//! Memory management
//!
//! The core only needs a heap. Stacks, argv copies and queues all come
//! from it through fallible allocation.

pub mod heap;
