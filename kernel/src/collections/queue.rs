//! FIFO queue with removal by value.
//!
//! Backs semaphore wait lists, children lists, the semaphore registry and
//! the sleeping queue. Pushing is fallible so an allocation failure turns
//! into `ResourceExhausted` instead of an abort.

use alloc::collections::vec_deque::{self, VecDeque};

use crate::error::KernelResult;

#[derive(Debug)]
pub struct Queue<T> {
    items: VecDeque<T>,
}

impl<T> Queue<T> {
    pub const fn new() -> Self {
        Self {
            items: VecDeque::new(),
        }
    }

    /// Append to the tail.
    pub fn push(&mut self, item: T) -> KernelResult<()> {
        self.items.try_reserve(1)?;
        self.items.push_back(item);
        Ok(())
    }

    /// Take from the head.
    pub fn pop(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    pub fn peek(&self) -> Option<&T> {
        self.items.front()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Cursor over the queue, head first. Does not mutate.
    pub fn iter(&self) -> vec_deque::Iter<'_, T> {
        self.items.iter()
    }

    /// Remove and return the first element matching `pred`.
    pub fn remove_where<F>(&mut self, mut pred: F) -> Option<T>
    where
        F: FnMut(&T) -> bool,
    {
        let index = self.items.iter().position(|item| pred(item))?;
        self.items.remove(index)
    }

    /// Empty the queue, handing every element to `destructor` in order.
    pub fn clear_with<F>(&mut self, mut destructor: F)
    where
        F: FnMut(T),
    {
        while let Some(item) = self.items.pop_front() {
            destructor(item);
        }
    }
}

impl<T: PartialEq> Queue<T> {
    /// Remove the first element equal to `item`. Returns whether one was
    /// found.
    pub fn remove(&mut self, item: &T) -> bool {
        self.remove_where(|candidate| candidate == item).is_some()
    }

    pub fn contains(&self, item: &T) -> bool {
        self.items.contains(item)
    }
}

impl<T> Default for Queue<T> {
    fn default() -> Self {
        Self::new()
    }
}
