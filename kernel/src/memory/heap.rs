//! Kernel heap.
//!
//! Bare-metal builds route every `alloc` allocation through a
//! `linked_list_allocator` heap over a region the boot code hands in. Host
//! builds keep the system allocator; the heap type still works there on a
//! caller-provided arena.

use linked_list_allocator::LockedHeap;

#[cfg_attr(target_os = "none", global_allocator)]
static ALLOCATOR: LockedHeap = LockedHeap::empty();

/// Hand `size` bytes at `start` to the kernel heap.
///
/// # Safety
/// The region must be mapped, writable, unused by anything else and must
/// stay valid for the life of the kernel. Call once.
pub unsafe fn init(start: usize, size: usize) {
    ALLOCATOR.lock().init(start as *mut u8, size);
    log::info!("heap: {} KiB at {:#x}", size / 1024, start);
}

/// Bytes still free in the kernel heap.
pub fn free_bytes() -> usize {
    ALLOCATOR.lock().free()
}

pub fn used_bytes() -> usize {
    ALLOCATOR.lock().used()
}

#[cfg(test)]
mod tests {
    use core::alloc::Layout;
    use linked_list_allocator::Heap;

    #[test]
    fn test_arena_alloc_and_free() {
        static mut ARENA: [u8; 4096] = [0; 4096];
        let mut heap = Heap::empty();
        unsafe { heap.init(core::ptr::addr_of_mut!(ARENA) as *mut u8, 4096) };

        let layout = Layout::from_size_align(256, 16).unwrap();
        let block = heap.allocate_first_fit(layout).expect("fits in the arena");
        assert!(heap.used() >= 256);

        unsafe { heap.deallocate(block, layout) };
        assert_eq!(heap.used(), 0);
        assert_eq!(heap.free(), heap.size());
    }
}
