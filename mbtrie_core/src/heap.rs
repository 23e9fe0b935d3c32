//! Per-core allocation capability for tier tables.
//!
//! The trie never calls the allocator directly; every table goes through a
//! [`TierHeap`] together with the core id the trie was initialised with, so
//! callers can route cores to different (e.g. NUMA-local) heaps.

use crate::constants::PRIMARY_CORE;
use crate::platform;
use std::alloc::{handle_alloc_error, Layout};
use std::ptr::NonNull;

/// Logical CPU/core identity used to pick an allocator.
pub type CoreId = u8;

/// Allocate/free pair parameterised per call by core id.
///
/// # Safety
/// The crate writes values straight into the memory `allocate` returns, so
/// implementors must guarantee, as with [`std::alloc::GlobalAlloc`]:
/// - the pointer is valid for reads and writes of `layout.size()` bytes and
///   aligned to `layout.align()`;
/// - the block stays valid until it is passed to `deallocate`;
/// - out of memory aborts (e.g. via `handle_alloc_error`) instead of
///   returning; the trie has no recoverable OOM path.
///
/// A safe `impl` is rejected:
/// ```compile_fail
/// use mbtrie_core::{CoreId, TierHeap};
/// use std::{alloc::Layout, ptr::NonNull};
///
/// #[derive(Clone)]
/// struct Dangling;
///
/// impl TierHeap for Dangling {
///     fn allocate(&self, _: CoreId, _: Layout) -> NonNull<u8> {
///         NonNull::dangling()
///     }
///     unsafe fn deallocate(&self, _: CoreId, _: NonNull<u8>, _: Layout) {}
/// }
/// ```
pub unsafe trait TierHeap: Clone + Send + Sync {
    fn allocate(&self, core: CoreId, layout: Layout) -> NonNull<u8>;

    /// # Safety
    /// `ptr` must have been returned by `allocate` on this heap with the same
    /// `core` and `layout`, and must not be used afterwards.
    unsafe fn deallocate(&self, core: CoreId, ptr: NonNull<u8>, layout: Layout);
}

/// Default heap: the primary core uses the Rust global allocator, every
/// other core the platform C heap.
#[derive(Debug, Clone, Copy, Default)]
pub struct CoreHeap;

// SAFETY: both routes return blocks sized and aligned for `layout` and
// abort through `handle_alloc_error` on null.
unsafe impl TierHeap for CoreHeap {
    fn allocate(&self, core: CoreId, layout: Layout) -> NonNull<u8> {
        let raw = unsafe {
            if core == PRIMARY_CORE {
                std::alloc::alloc(layout)
            } else {
                platform::raw_alloc(layout)
            }
        };
        match NonNull::new(raw) {
            Some(p) => p,
            None => handle_alloc_error(layout),
        }
    }

    unsafe fn deallocate(&self, core: CoreId, ptr: NonNull<u8>, layout: Layout) {
        if core == PRIMARY_CORE {
            std::alloc::dealloc(ptr.as_ptr(), layout);
        } else {
            platform::raw_free(ptr.as_ptr(), layout);
        }
    }
}

/// Move `value` into memory from `heap`.
pub fn alloc_value<T, H: TierHeap>(heap: &H, core: CoreId, value: T) -> NonNull<T> {
    let layout = Layout::new::<T>();
    if layout.size() == 0 {
        // Zero-sized: nothing to allocate, but the value is still "moved in".
        std::mem::forget(value);
        return NonNull::dangling();
    }
    let ptr = heap.allocate(core, layout).cast::<T>();
    unsafe { ptr.as_ptr().write(value) };
    ptr
}

/// Drop and free a value created by [`alloc_value`].
///
/// # Safety
/// `ptr` must come from [`alloc_value`] on the same heap and core, and no
/// reader may still reach it.
pub unsafe fn free_value<T, H: TierHeap>(heap: &H, core: CoreId, ptr: NonNull<T>) {
    std::ptr::drop_in_place(ptr.as_ptr());
    let layout = Layout::new::<T>();
    if layout.size() != 0 {
        heap.deallocate(core, ptr.cast::<u8>(), layout);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[repr(align(64))]
    struct Wide([u64; 8]);

    #[test]
    fn primary_and_secondary_cores_roundtrip() {
        for core in [0u8, 1, 7] {
            let p = alloc_value(&CoreHeap, core, Wide([core as u64; 8]));
            assert_eq!(p.as_ptr() as usize % 64, 0, "core {core} misaligned");
            assert_eq!(unsafe { p.as_ref() }.0[7], core as u64);
            unsafe { free_value(&CoreHeap, core, p) };
        }
    }

    #[test]
    fn zero_sized_values_skip_the_heap() {
        let p = alloc_value(&CoreHeap, 3, ());
        unsafe { free_value(&CoreHeap, 3, p) };
    }
}
