//! Index-based circular doubly-linked lists.
//!
//! A single arena holds one link per element slot plus one sentinel per
//! list. Elements are small integers (process table slots), so membership
//! lives beside the data instead of inside it, and an element can be
//! unlinked in O(1) without knowing which list it is on.
//!
//! Every linked element records its owning list. Pushing an element that is
//! already linked silently moves it, so an element is never on two lists.

use alloc::vec::Vec;

use crate::error::{KernelError, KernelResult};

#[derive(Debug, Clone, Copy)]
struct Link {
    prev: usize,
    next: usize,
    owner: Option<usize>,
}

impl Link {
    const fn detached(index: usize) -> Self {
        Self {
            prev: index,
            next: index,
            owner: None,
        }
    }
}

/// A fixed family of lists sharing one link arena.
pub struct LinkedLists {
    links: Vec<Link>,
    sizes: Vec<usize>,
    elements: usize,
}

impl LinkedLists {
    /// Create `lists` empty lists over element indices `0..elements`.
    pub fn new(elements: usize, lists: usize) -> KernelResult<Self> {
        let total = elements + lists;
        let mut links = Vec::new();
        links.try_reserve_exact(total)?;
        links.extend((0..total).map(Link::detached));

        let mut sizes = Vec::new();
        sizes.try_reserve_exact(lists)?;
        sizes.resize(lists, 0);

        Ok(Self {
            links,
            sizes,
            elements,
        })
    }

    pub fn list_count(&self) -> usize {
        self.sizes.len()
    }

    fn sentinel(&self, list: usize) -> usize {
        self.elements + list
    }

    fn check(&self, list: usize, element: usize) -> KernelResult<()> {
        if list >= self.sizes.len() || element >= self.elements {
            return Err(KernelError::InvalidArgument);
        }
        Ok(())
    }

    fn link_between(&mut self, node: usize, prev: usize, next: usize, list: usize) {
        self.links[node] = Link {
            prev,
            next,
            owner: Some(list),
        };
        self.links[prev].next = node;
        self.links[next].prev = node;
        self.sizes[list] += 1;
    }

    pub fn push_front(&mut self, list: usize, element: usize) -> KernelResult<()> {
        self.check(list, element)?;
        self.remove(element);
        let head = self.sentinel(list);
        let first = self.links[head].next;
        self.link_between(element, head, first, list);
        Ok(())
    }

    pub fn push_back(&mut self, list: usize, element: usize) -> KernelResult<()> {
        self.check(list, element)?;
        self.remove(element);
        let head = self.sentinel(list);
        let last = self.links[head].prev;
        self.link_between(element, last, head, list);
        Ok(())
    }

    /// Unlink `element` from whatever list holds it. Returns false if it
    /// was not linked.
    pub fn remove(&mut self, element: usize) -> bool {
        if element >= self.elements {
            return false;
        }
        let link = self.links[element];
        let Some(owner) = link.owner else {
            return false;
        };
        self.links[link.prev].next = link.next;
        self.links[link.next].prev = link.prev;
        self.links[element] = Link::detached(element);
        self.sizes[owner] -= 1;
        true
    }

    pub fn peek_front(&self, list: usize) -> Option<usize> {
        if list >= self.sizes.len() {
            return None;
        }
        let head = self.sentinel(list);
        let first = self.links[head].next;
        (first != head).then_some(first)
    }

    pub fn peek_back(&self, list: usize) -> Option<usize> {
        if list >= self.sizes.len() {
            return None;
        }
        let head = self.sentinel(list);
        let last = self.links[head].prev;
        (last != head).then_some(last)
    }

    pub fn pop_front(&mut self, list: usize) -> Option<usize> {
        let element = self.peek_front(list)?;
        self.remove(element);
        Some(element)
    }

    pub fn pop_back(&mut self, list: usize) -> Option<usize> {
        let element = self.peek_back(list)?;
        self.remove(element);
        Some(element)
    }

    /// The element after `element` on its list, if any.
    pub fn next_of(&self, element: usize) -> Option<usize> {
        if element >= self.elements {
            return None;
        }
        let link = self.links[element];
        let owner = link.owner?;
        (link.next != self.sentinel(owner)).then_some(link.next)
    }

    pub fn len(&self, list: usize) -> usize {
        self.sizes.get(list).copied().unwrap_or(0)
    }

    pub fn is_empty(&self, list: usize) -> bool {
        self.len(list) == 0
    }

    pub fn owner(&self, element: usize) -> Option<usize> {
        self.links.get(element).and_then(|link| link.owner)
    }

    pub fn is_linked(&self, element: usize) -> bool {
        element < self.elements && self.owner(element).is_some()
    }

    /// Walk `list` front to back without modifying it.
    pub fn iter(&self, list: usize) -> Iter<'_> {
        Iter {
            lists: self,
            cursor: self.peek_front(list),
        }
    }
}

pub struct Iter<'a> {
    lists: &'a LinkedLists,
    cursor: Option<usize>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        let current = self.cursor?;
        self.cursor = self.lists.next_of(current);
        Some(current)
    }
}
