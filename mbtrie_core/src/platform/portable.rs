//! Fallback for targets without a C heap binding: the Rust global allocator.

use std::alloc::Layout;

/// # Safety
/// `layout.size()` must be non-zero.
pub unsafe fn raw_alloc(layout: Layout) -> *mut u8 {
    std::alloc::alloc(layout)
}

/// # Safety
/// `ptr` must come from [`raw_alloc`] with the same `layout`.
pub unsafe fn raw_free(ptr: *mut u8, layout: Layout) {
    std::alloc::dealloc(ptr, layout)
}
