//! Single-writer, multi-reader read-copy-update guard.
//!
//! One atomically swapped pointer plus one reader counter. Readers bump the
//! counter around every access; a writer that swaps the pointer waits for the
//! counter to drain before reclaiming the old value. The counter is a coarse
//! grace-period signal, not a per-reader token: it is sufficient because there
//! is at most one writer and read sections are short.
use crate::heap::{alloc_value, free_value, CoreHeap, CoreId, TierHeap};
use crate::pause::Backoff;
use core::marker::PhantomData;
use core::ptr;
use core::sync::atomic::{fence, AtomicPtr, AtomicU64, Ordering};
use metrics::counter;
use std::ptr::NonNull;

#[cfg(feature = "trace")]
use log::trace;

pub struct RcuProtected<T, H: TierHeap = CoreHeap> {
    data: AtomicPtr<T>,
    readers: AtomicU64,
    backoff: Backoff,
    core: CoreId,
    heap: H,
    _owns: PhantomData<*mut T>,
}

// SAFETY: readers on any thread obtain `&T` (needs `T: Sync`) and the writer
// may reclaim a value published from another thread (needs `T: Send`).
unsafe impl<T: Send + Sync, H: TierHeap> Send for RcuProtected<T, H> {}
unsafe impl<T: Send + Sync, H: TierHeap> Sync for RcuProtected<T, H> {}

impl<T, H: TierHeap> RcuProtected<T, H> {
    /// Empty guard: readers observe null until the first publish.
    pub fn new(heap: H, core: CoreId, backoff: Backoff) -> Self {
        Self {
            data: AtomicPtr::new(ptr::null_mut()),
            readers: AtomicU64::new(0),
            backoff,
            core,
            heap,
            _owns: PhantomData,
        }
    }

    /// Guard that already protects `value`, allocated from `heap` on `core`.
    pub fn with_value(value: T, heap: H, core: CoreId, backoff: Backoff) -> Self {
        let this = Self::new(heap, core, backoff);
        let p = alloc_value(&this.heap, core, value);
        this.data.store(p.as_ptr(), Ordering::Release);
        this
    }

    #[inline]
    pub fn core(&self) -> CoreId {
        self.core
    }

    /// Rebind the core used for future allocations and frees. The guard must
    /// be empty: a held value would be freed on a core it did not come from.
    pub(crate) fn set_core(&mut self, core: CoreId) {
        assert!(
            self.data.get_mut().is_null(),
            "set_core on a guard that still holds a value"
        );
        self.core = core;
    }

    #[inline]
    pub fn heap(&self) -> &H {
        &self.heap
    }

    /// Readers currently inside a read section.
    #[inline]
    pub fn readers(&self) -> u64 {
        self.readers.load(Ordering::Acquire)
    }

    // ---- read side -----------------------------------------------------

    /// Enter a read section and load the protected pointer.
    /// The section ends when the guard is dropped.
    #[inline]
    pub fn begin_read(&self) -> RcuReadGuard<'_, T, H> {
        let mut guard = self.begin_read_guard();
        guard.snapshot = self.data.load(Ordering::Acquire);
        guard
    }

    /// Enter a read section without loading; use
    /// [`RcuReadGuard::read_current`] for the (re-)load.
    #[inline]
    pub fn begin_read_guard(&self) -> RcuReadGuard<'_, T, H> {
        self.readers.fetch_add(1, Ordering::AcqRel);
        // Pairs with the fence in `synchronize`: either the writer sees this
        // increment, or every load below sees the writer's stores.
        fence(Ordering::SeqCst);
        RcuReadGuard {
            rcu: self,
            snapshot: ptr::null_mut(),
        }
    }

    #[inline]
    fn end_read(&self) {
        self.readers.fetch_sub(1, Ordering::AcqRel);
    }

    // ---- write side ----------------------------------------------------

    /// Current pointer for the sole writer; does not touch the counter.
    #[inline]
    pub fn get_for_write(&self) -> *mut T {
        self.data.load(Ordering::Acquire)
    }

    /// Install `new_ptr` and return the previous pointer without waiting.
    ///
    /// # Safety
    /// The caller must be the only writer. `new_ptr` must be null or come from
    /// [`alloc_value`] on this guard's heap and core; ownership moves into the
    /// guard. The returned pointer's ownership moves to the caller, who must
    /// not free it before a grace period has elapsed.
    #[inline]
    pub unsafe fn raw_swap(&self, new_ptr: *mut T) -> *mut T {
        self.data.swap(new_ptr, Ordering::AcqRel)
    }

    /// Block until every read section that may have seen a value replaced
    /// before this call has ended.
    pub fn synchronize(&self) {
        fence(Ordering::SeqCst);
        let mut wait = self.backoff.start();
        while self.readers.load(Ordering::Acquire) != 0 {
            wait.snooze();
        }
        counter!("mbtrie_rcu_grace_periods_total").increment(1);
        #[cfg(feature = "trace")]
        trace!("[RCU] grace period done, yields={}", wait.yields());
    }

    /// `raw_swap`, wait for readers to drain, then free the previous value.
    ///
    /// # Safety
    /// Same contract as [`raw_swap`](Self::raw_swap) for `new_ptr`. The
    /// previous value must not be referenced by the writer afterwards.
    pub unsafe fn synchronized_swap(&self, new_ptr: *mut T) {
        let old = self.raw_swap(new_ptr);
        self.synchronize();
        if let Some(old) = NonNull::new(old) {
            free_value(&self.heap, self.core, old);
        }
    }

    /// Replace the protected value, reclaiming the previous one.
    pub fn publish(&self, value: T) {
        let p = alloc_value(&self.heap, self.core, value);
        unsafe { self.synchronized_swap(p.as_ptr()) }
    }

    /// Clear the guard, reclaiming the previous value.
    pub fn retract(&self) {
        unsafe { self.synchronized_swap(ptr::null_mut()) }
    }
}

impl<T, H: TierHeap> Drop for RcuProtected<T, H> {
    fn drop(&mut self) {
        // `&mut self`: no read section can be open.
        let old = std::mem::replace(self.data.get_mut(), ptr::null_mut());
        if let Some(old) = NonNull::new(old) {
            unsafe { free_value(&self.heap, self.core, old) };
        }
    }
}

/// An open read section on an [`RcuProtected`].
/// The section is closed when this guard is dropped.
#[must_use = "if unused the read section ends immediately"]
pub struct RcuReadGuard<'a, T, H: TierHeap = CoreHeap> {
    rcu: &'a RcuProtected<T, H>,
    snapshot: *mut T,
}

impl<'a, T, H: TierHeap> RcuReadGuard<'a, T, H> {
    /// Pointer loaded by `begin_read` (null for `begin_read_guard`).
    #[inline]
    pub fn as_ptr(&self) -> *mut T {
        self.snapshot
    }

    /// Value loaded by `begin_read`.
    #[inline]
    pub fn get(&self) -> Option<&T> {
        // SAFETY: the counter is held, so the writer cannot reclaim it.
        unsafe { self.snapshot.as_ref() }
    }

    /// Load the protected value again inside the same section.
    #[inline]
    pub fn read_current(&self) -> Option<&T> {
        unsafe { self.rcu.data.load(Ordering::Acquire).as_ref() }
    }

    /// Close the section explicitly.
    #[inline]
    pub fn end_read(self) {}
}

impl<'a, T, H: TierHeap> Drop for RcuReadGuard<'a, T, H> {
    fn drop(&mut self) {
        self.rcu.end_read();
    }
}
