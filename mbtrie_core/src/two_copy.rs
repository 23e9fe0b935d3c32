//! Two-buffer RCU for fixed-layout values that are rewritten often.
//!
//! Both buffers are allocated once by [`two_copy`]. The writer fills the
//! inactive buffer, flips it in, waits out the grace period and gets the
//! previously active buffer back for the next round. Nothing is allocated or
//! freed after construction.
//!
//! Write sequence:
//! ```text
//! let next = writer.get_updating_copy_phase1();   // modify the inactive copy
//! let prev = writer.get_updating_copy_phase2();   // publish, bring the old copy in line
//! ```
use crate::pause::Backoff;
use core::sync::atomic::{fence, AtomicPtr, AtomicU64, Ordering};
use metrics::counter;
use std::ops::Deref;
use std::ptr::NonNull;
use std::sync::Arc;

struct Shared<T> {
    buffers: [NonNull<T>; 2],
    active: AtomicPtr<T>,
    readers: AtomicU64,
    backoff: Backoff,
}

// SAFETY: readers share `&T` across threads; the writer mutates the inactive
// buffer from whichever thread owns the `TwoCopyWriter`.
unsafe impl<T: Send + Sync> Send for Shared<T> {}
unsafe impl<T: Send + Sync> Sync for Shared<T> {}

impl<T> Drop for Shared<T> {
    fn drop(&mut self) {
        for b in self.buffers {
            drop(unsafe { Box::from_raw(b.as_ptr()) });
        }
    }
}

/// Build the pair of handles; `first` starts out active.
pub fn two_copy<T>(first: T, second: T, backoff: Backoff) -> (TwoCopyWriter<T>, TwoCopyReader<T>) {
    let a = NonNull::from(Box::leak(Box::new(first)));
    let b = NonNull::from(Box::leak(Box::new(second)));
    let shared = Arc::new(Shared {
        buffers: [a, b],
        active: AtomicPtr::new(a.as_ptr()),
        readers: AtomicU64::new(0),
        backoff,
    });
    (
        TwoCopyWriter {
            shared: Arc::clone(&shared),
            inactive: 1,
        },
        TwoCopyReader { shared },
    )
}

/// The unique writer. Not `Clone`: one writer per pair.
pub struct TwoCopyWriter<T> {
    shared: Arc<Shared<T>>,
    inactive: usize,
}

impl<T> TwoCopyWriter<T> {
    /// The buffer readers cannot see; fill it with the next value.
    pub fn get_updating_copy_phase1(&mut self) -> &mut T {
        // SAFETY: the inactive buffer has been out of readers' reach since
        // the last grace period, and `&mut self` excludes other writer use.
        unsafe { &mut *self.shared.buffers[self.inactive].as_ptr() }
    }

    /// Publish the phase-1 buffer, wait for readers of the old one to drain
    /// and return the old one for the writer to bring up to date.
    pub fn get_updating_copy_phase2(&mut self) -> &mut T {
        let next = self.shared.buffers[self.inactive];
        self.shared.active.swap(next.as_ptr(), Ordering::AcqRel);
        fence(Ordering::SeqCst);
        let mut wait = self.shared.backoff.start();
        while self.shared.readers.load(Ordering::Acquire) != 0 {
            wait.snooze();
        }
        counter!("mbtrie_rcu_grace_periods_total").increment(1);
        self.inactive ^= 1;
        unsafe { &mut *self.shared.buffers[self.inactive].as_ptr() }
    }

    /// The value readers currently see.
    pub fn active(&self) -> &T {
        // The writer is the only one that can retire the active buffer.
        unsafe { &*self.shared.active.load(Ordering::Acquire) }
    }

    pub fn reader(&self) -> TwoCopyReader<T> {
        TwoCopyReader {
            shared: Arc::clone(&self.shared),
        }
    }
}

pub struct TwoCopyReader<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for TwoCopyReader<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> TwoCopyReader<T> {
    #[inline]
    pub fn begin_read(&self) -> TwoCopyReadGuard<'_, T> {
        self.shared.readers.fetch_add(1, Ordering::AcqRel);
        fence(Ordering::SeqCst);
        let current = self.shared.active.load(Ordering::Acquire);
        TwoCopyReadGuard {
            shared: &self.shared,
            current,
        }
    }

    #[inline]
    pub fn readers(&self) -> u64 {
        self.shared.readers.load(Ordering::Acquire)
    }
}

#[must_use = "if unused the read section ends immediately"]
pub struct TwoCopyReadGuard<'a, T> {
    shared: &'a Shared<T>,
    current: *mut T,
}

impl<'a, T> TwoCopyReadGuard<'a, T> {
    /// Re-load the active buffer inside the same section.
    #[inline]
    pub fn read_current(&self) -> &T {
        unsafe { &*self.shared.active.load(Ordering::Acquire) }
    }
}

impl<'a, T> Deref for TwoCopyReadGuard<'a, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the counter is held; the writer will not touch this buffer
        // until it drops.
        unsafe { &*self.current }
    }
}

impl<'a, T> Drop for TwoCopyReadGuard<'a, T> {
    fn drop(&mut self) {
        self.shared.readers.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phases_alternate_buffers() {
        let (mut w, r) = two_copy([0u32; 4], [0u32; 4], Backoff::new(4));
        w.get_updating_copy_phase1()[0] = 1;
        assert_eq!(r.begin_read()[0], 0);
        let prev = w.get_updating_copy_phase2();
        assert_eq!(prev[0], 0);
        prev[0] = 1;
        assert_eq!(r.begin_read()[0], 1);
        assert_eq!(w.active()[0], 1);

        let next = w.get_updating_copy_phase1();
        assert_eq!(next[0], 1, "phase 2 copy is reused in the next round");
        next[1] = 9;
        w.get_updating_copy_phase2()[1] = 9;
        assert_eq!(r.begin_read()[1], 9);
    }

    #[test]
    fn guard_counts_readers() {
        let (w, r) = two_copy(1u8, 2u8, Backoff::default());
        let r2 = w.reader();
        let g1 = r.begin_read();
        let g2 = r2.begin_read();
        assert_eq!(r.readers(), 2);
        assert_eq!(*g1 + *g2, 2);
        assert_eq!(*g1.read_current(), 1);
        drop((g1, g2));
        assert_eq!(r.readers(), 0);
    }
}
