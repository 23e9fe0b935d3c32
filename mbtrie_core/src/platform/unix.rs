//! Unix-specific platform code for mbtrie

use std::alloc::Layout;

/// `posix_memalign` needs at least pointer alignment.
const MIN_ALIGN: usize = std::mem::size_of::<*mut libc::c_void>();

/// Allocate `layout` from the C heap. Returns null on failure.
///
/// # Safety
/// `layout.size()` must be non-zero.
pub unsafe fn raw_alloc(layout: Layout) -> *mut u8 {
    let mut out: *mut libc::c_void = std::ptr::null_mut();
    let align = layout.align().max(MIN_ALIGN);
    if libc::posix_memalign(&mut out, align, layout.size()) != 0 {
        return std::ptr::null_mut();
    }
    out as *mut u8
}

/// # Safety
/// `ptr` must come from [`raw_alloc`] and not have been freed.
pub unsafe fn raw_free(ptr: *mut u8, _layout: Layout) {
    libc::free(ptr as *mut libc::c_void);
}
