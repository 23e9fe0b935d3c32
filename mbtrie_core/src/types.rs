//! Tier tables and trie configuration.

use crate::constants::{DEFAULT_YIELD_AFTER, FANOUT, PRIMARY_CORE};
use crate::heap::CoreId;
use crate::pause::Backoff;
use std::fmt;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicPtr, AtomicU16, Ordering};

/// One 256-way table: child pointers plus the count of non-null children.
///
/// Only the writer stores into a tier. Readers load with `Acquire` and may
/// see either side of a concurrent store, never a torn pointer.
pub struct Tier<C> {
    slots: [AtomicPtr<C>; FANOUT],
    effective: AtomicU16,
}

/// Leaf tier: slots hold caller-owned values.
pub type LeafTier<T> = Tier<T>;
pub type Level3<T> = Tier<LeafTier<T>>;
/// The table a level-1 slot points at.
pub type Level2<T> = Tier<Level3<T>>;

impl<C> Tier<C> {
    pub fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| AtomicPtr::new(ptr::null_mut())),
            effective: AtomicU16::new(0),
        }
    }

    #[inline]
    pub fn get(&self, idx: u8) -> *mut C {
        self.slots[idx as usize].load(Ordering::Acquire)
    }

    /// Publish `child` at `idx`. Writer only.
    #[inline]
    pub fn set(&self, idx: u8, child: *mut C) {
        self.slots[idx as usize].store(child, Ordering::Release);
    }

    /// Null the slot and return what it held. Writer only.
    #[inline]
    pub fn take(&self, idx: u8) -> *mut C {
        self.slots[idx as usize].swap(ptr::null_mut(), Ordering::AcqRel)
    }

    #[inline]
    pub fn effective(&self) -> u16 {
        self.effective.load(Ordering::Acquire)
    }

    /// Returns the new count.
    #[inline]
    pub fn inc(&self) -> u16 {
        self.effective.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Returns the new count.
    #[inline]
    pub fn dec(&self) -> u16 {
        let prev = self.effective.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "tier count underflow");
        prev - 1
    }

    pub(crate) fn reset_count(&self) {
        self.effective.store(0, Ordering::Release);
    }

    /// Non-null children in slot order.
    pub fn children(&self) -> impl Iterator<Item = (u8, NonNull<C>)> + '_ {
        (0..=u8::MAX).filter_map(move |i| NonNull::new(self.get(i)).map(|p| (i, p)))
    }
}

impl<C> Default for Tier<C> {
    fn default() -> Self {
        Self::new()
    }
}

/// Construction-time settings for a trie.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrieConfig {
    /// Core whose heap backs every table of the trie.
    pub core_id: CoreId,
    /// Idle polls before a grace-period wait yields; 0 spins forever.
    pub yield_after: u32,
    /// Reject keys that carry the byte 255 in any position.
    pub reserve_sentinel: bool,
}

impl Default for TrieConfig {
    fn default() -> Self {
        Self {
            core_id: PRIMARY_CORE,
            yield_after: DEFAULT_YIELD_AFTER,
            reserve_sentinel: true,
        }
    }
}

impl TrieConfig {
    pub fn core_id(mut self, core: CoreId) -> Self {
        self.core_id = core;
        self
    }

    pub fn yield_after(mut self, polls: u32) -> Self {
        self.yield_after = polls;
        self
    }

    pub fn reserve_sentinel(mut self, on: bool) -> Self {
        self.reserve_sentinel = on;
        self
    }

    #[inline]
    pub fn backoff(&self) -> Backoff {
        Backoff::new(self.yield_after)
    }
}

/// A stored key and its value, as reported by `MbitTrie::entries`.
pub struct Entry<T> {
    pub key: u32,
    pub value: NonNull<T>,
}

impl<T> Clone for Entry<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Entry<T> {}

impl<T> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.value == other.value
    }
}

impl<T> Eq for Entry<T> {}

impl<T> fmt::Debug for Entry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry")
            .field("key", &format_args!("{:#010x}", self.key))
            .field("value", &self.value)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_follow_children() {
        let mut vals = [1u32, 2, 3];
        let t: LeafTier<u32> = Tier::new();
        assert_eq!(t.effective(), 0);
        for (i, v) in vals.iter_mut().enumerate() {
            t.set(i as u8 * 100, v);
            t.inc();
        }
        assert_eq!(t.effective(), 3);
        let idx: Vec<u8> = t.children().map(|(i, _)| i).collect();
        assert_eq!(idx, vec![0, 100, 200]);
        assert!(!t.take(100).is_null());
        assert_eq!(t.dec(), 2);
        assert!(t.get(100).is_null());
    }

    #[test]
    fn config_builder() {
        let c = TrieConfig::default()
            .core_id(3)
            .yield_after(64)
            .reserve_sentinel(false);
        assert_eq!(c.core_id, 3);
        assert_eq!(c.backoff().yield_after(), 64);
        assert!(!c.reserve_sentinel);
        assert!(TrieConfig::default().reserve_sentinel);
    }
}
