pub mod constants;
pub mod errors;
pub mod handle_registry;
pub mod heap;
pub mod helpers;
pub mod pause;
pub mod platform;
pub mod rcu;
pub mod telemetry;
pub mod two_copy;
pub mod types;

pub use errors::{Error, ErrorCode};
pub use heap::{CoreHeap, CoreId, TierHeap};
pub use pause::{Backoff, SpinWait};
pub use rcu::{RcuProtected, RcuReadGuard};
pub use telemetry::mbtrie_register_stats_callback;
pub use two_copy::{two_copy, TwoCopyReadGuard, TwoCopyReader, TwoCopyWriter};
pub use types::{Entry, TrieConfig};

use constants::FANOUT;
use heap::{alloc_value, free_value};
use helpers::{compose_key, has_sentinel, tier_bytes};
use log::{debug, info};
use metrics::{counter, gauge};
use once_cell::sync::OnceCell;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicUsize, Ordering};
use types::{LeafTier, Level2, Level3, Tier};

#[cfg(feature = "trace")]
use log::trace;

/// Four-tier, 256-way trie keyed by `u32`.
///
/// Key bytes are consumed most significant first. Each level-1 slot is its
/// own RCU domain: lookups never block, and tables are reclaimed only after
/// every reader of the owning slot has left. Values are caller-owned; the
/// trie stores the pointers and never reads through or frees them.
///
/// Exactly one writer at a time, enforced by [`MbitTrie::writer`].
pub struct MbitTrie<T, H: TierHeap = CoreHeap> {
    roots: Box<[RcuProtected<Level2<T>, H>]>,
    /// Non-null level-1 slots.
    effective: AtomicU16,
    len: AtomicUsize,
    /// Allocated level 2-4 tables.
    tables: AtomicUsize,
    writer_claimed: AtomicBool,
    mutated: AtomicBool,
    initialized: bool,
    heap: H,
    config: TrieConfig,
}

impl<T> MbitTrie<T, CoreHeap> {
    // ---- logging bootstrapper ------------------------------------------------
    /// Install `env_logger` once per process; `RUST_LOG` picks the level.
    pub fn ensure_logging() {
        static INIT: OnceCell<()> = OnceCell::new();
        INIT.get_or_init(|| {
            let _ = env_logger::builder()
                .format_timestamp(None)
                .is_test(std::env::var("RUST_TEST_THREADS").is_ok())
                .try_init();
        });
    }

    /// Empty trie on the primary core with default settings; call
    /// [`initialize`](Self::initialize) to bind another core.
    pub fn new() -> Self {
        Self::build(CoreHeap, TrieConfig::default(), false)
    }

    /// Empty trie bound to `config.core_id`.
    pub fn with_config(config: TrieConfig) -> Self {
        Self::with_heap(CoreHeap, config)
    }
}

impl<T> Default for MbitTrie<T, CoreHeap> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, H: TierHeap> MbitTrie<T, H> {
    /// Empty trie whose tables come from `heap`, bound to `config.core_id`.
    pub fn with_heap(heap: H, config: TrieConfig) -> Self {
        Self::build(heap, config, true)
    }

    fn build(heap: H, config: TrieConfig, initialized: bool) -> Self {
        let roots = (0..FANOUT)
            .map(|_| RcuProtected::new(heap.clone(), config.core_id, config.backoff()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            roots,
            effective: AtomicU16::new(0),
            len: AtomicUsize::new(0),
            tables: AtomicUsize::new(0),
            writer_claimed: AtomicBool::new(false),
            mutated: AtomicBool::new(false),
            initialized,
            heap,
            config,
        }
    }

    /// Bind the core whose heap backs every table from now on.
    ///
    /// Only valid once, and only before the first insert.
    pub fn initialize(&mut self, core: CoreId) -> Result<(), Error> {
        if self.initialized || *self.mutated.get_mut() {
            return Err(Error::AlreadyInitialized);
        }
        self.config.core_id = core;
        for slot in self.roots.iter_mut() {
            slot.set_core(core);
        }
        self.initialized = true;
        info!("[INIT] core={}, yield_after={}", core, self.config.yield_after);
        Ok(())
    }

    #[inline]
    fn rejects(&self, bytes: &[u8; 4]) -> bool {
        self.config.reserve_sentinel && has_sentinel(bytes)
    }

    /// Value stored under `key`, if any. Never blocks.
    pub fn lookup(&self, key: u32) -> Option<NonNull<T>> {
        let b = tier_bytes(key);
        if self.rejects(&b) {
            return None;
        }
        // The guard ends the read section on every return below.
        let guard = self.roots[b[0] as usize].begin_read();
        let l2 = guard.get()?;
        // SAFETY: tables below a slot are freed only after a grace period on
        // that slot, which cannot end while `guard` is alive.
        let l3 = unsafe { l2.get(b[1]).as_ref() }?;
        let leaf = unsafe { l3.get(b[2]).as_ref() }?;
        NonNull::new(leaf.get(b[3]))
    }

    #[inline]
    pub fn contains_key(&self, key: u32) -> bool {
        self.lookup(key).is_some()
    }

    /// Claim the single-writer token.
    pub fn writer(&self) -> Result<TrieWriter<'_, T, H>, Error> {
        self.writer_claimed
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .map_err(|_| Error::WriterBusy)?;
        Ok(TrieWriter { trie: self })
    }

    /// One-shot [`TrieWriter::insert`].
    pub fn insert(&self, key: u32, value: NonNull<T>) -> Result<(), Error> {
        self.writer()?.insert(key, value)
    }

    /// One-shot [`TrieWriter::remove`]; errs only with `WriterBusy`.
    pub fn remove(&self, key: u32) -> Result<Option<NonNull<T>>, Error> {
        Ok(self.writer()?.remove(key))
    }

    /// One-shot [`TrieWriter::flush`].
    pub fn flush(&self) -> Result<(), Error> {
        self.writer()?.flush();
        Ok(())
    }

    /// Stored keys and values in ascending key order.
    ///
    /// Each level-1 slot is walked under its own read section, so the result
    /// is consistent per slot but not across slots while a writer is active.
    pub fn entries(&self) -> Vec<Entry<T>> {
        let mut out = Vec::with_capacity(self.len());
        for (b1, slot) in self.roots.iter().enumerate() {
            let guard = slot.begin_read();
            let Some(l2) = guard.get() else { continue };
            for (b2, l3) in l2.children() {
                let l3 = unsafe { l3.as_ref() };
                for (b3, leaf) in l3.children() {
                    let leaf = unsafe { leaf.as_ref() };
                    out.extend(leaf.children().map(|(b4, value)| Entry {
                        key: compose_key(b1 as u8, b2, b3, b4),
                        value,
                    }));
                }
            }
        }
        out
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of non-null level-1 slots.
    #[inline]
    pub fn effective_node_count(&self) -> u16 {
        self.effective.load(Ordering::Acquire)
    }

    /// Level 2-4 tables currently allocated.
    #[inline]
    pub fn table_count(&self) -> usize {
        self.tables.load(Ordering::Acquire)
    }

    #[inline]
    pub fn config(&self) -> &TrieConfig {
        &self.config
    }

    #[inline]
    pub fn core_id(&self) -> CoreId {
        self.config.core_id
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    #[inline]
    pub fn heap(&self) -> &H {
        &self.heap
    }

    // ---- table bookkeeping (writer only) ------------------------------------

    fn alloc_table<C>(&self) -> *mut Tier<C> {
        let n = self.tables.fetch_add(1, Ordering::AcqRel) + 1;
        gauge!("mbtrie_tier_nodes").set(n as f64);
        alloc_value(&self.heap, self.config.core_id, Tier::new()).as_ptr()
    }

    /// # Safety
    /// `table` came from `alloc_table`, is unlinked, and a grace period on its
    /// level-1 slot has passed since it was.
    unsafe fn free_table<C>(&self, table: *mut Tier<C>) {
        if let Some(p) = NonNull::new(table) {
            free_value(&self.heap, self.config.core_id, p);
            self.forget_tables(1);
        }
    }

    fn forget_tables(&self, n: usize) {
        let left = self.tables.fetch_sub(n, Ordering::AcqRel) - n;
        gauge!("mbtrie_tier_nodes").set(left as f64);
    }

    fn child_or_alloc<'t, C>(&self, parent: &'t Tier<Tier<C>>, idx: u8) -> &'t Tier<C> {
        let mut child = parent.get(idx);
        if child.is_null() {
            child = self.alloc_table();
            parent.set(idx, child);
            parent.inc();
        }
        // SAFETY: only the writer frees tables, and it is us.
        unsafe { &*child }
    }

    /// Unlink and free everything under every level-1 slot.
    fn flush_slots(&self) -> usize {
        let mut cleared = 0;
        for slot in self.roots.iter() {
            let l2p = slot.get_for_write();
            if l2p.is_null() {
                continue;
            }
            let l2 = unsafe { &*l2p };
            let mut l3s: Vec<*mut Level3<T>> = Vec::new();
            let mut leaves: Vec<*mut LeafTier<T>> = Vec::new();
            for i in 0..=u8::MAX {
                let l3p = l2.take(i);
                let Some(l3) = (unsafe { l3p.as_ref() }) else { continue };
                for j in 0..=u8::MAX {
                    let leafp = l3.take(j);
                    let Some(leaf) = (unsafe { leafp.as_ref() }) else { continue };
                    for k in 0..=u8::MAX {
                        leaf.take(k);
                    }
                    leaf.reset_count();
                    leaves.push(leafp);
                }
                l3.reset_count();
                l3s.push(l3p);
            }
            l2.reset_count();
            // Frees the level-2 table once readers of this slot drain; the
            // same grace period covers every table unlinked above.
            unsafe { slot.synchronized_swap(ptr::null_mut()) };
            self.forget_tables(1);
            for leaf in leaves {
                unsafe { self.free_table(leaf) };
            }
            for l3 in l3s {
                unsafe { self.free_table(l3) };
            }
            cleared += 1;
        }
        self.effective.store(0, Ordering::Release);
        self.len.store(0, Ordering::Release);
        cleared
    }
}

impl<T, H: TierHeap> Drop for MbitTrie<T, H> {
    fn drop(&mut self) {
        let cleared = self.flush_slots();
        debug!("[DROP] released {} level-1 slots", cleared);
    }
}

/// Exclusive mutation rights on one [`MbitTrie`]. Dropping releases them.
pub struct TrieWriter<'a, T, H: TierHeap = CoreHeap> {
    trie: &'a MbitTrie<T, H>,
}

impl<'a, T, H: TierHeap> TrieWriter<'a, T, H> {
    pub fn trie(&self) -> &'a MbitTrie<T, H> {
        self.trie
    }

    /// Store `value` under `key`.
    ///
    /// Missing tables along the path are created. A new level-2 table is
    /// installed without a grace period since the slot held nothing.
    pub fn insert(&mut self, key: u32, value: NonNull<T>) -> Result<(), Error> {
        let trie = self.trie;
        let b = tier_bytes(key);
        if trie.rejects(&b) {
            debug!("[INSERT] key={:#010x} carries the reserved byte", key);
            return Err(Error::InvalidKey);
        }
        #[cfg(feature = "trace")]
        trace!("[INSERT] key={:#010x}, bytes={:?}", key, b);
        trie.mutated.store(true, Ordering::Release);

        let slot = &trie.roots[b[0] as usize];
        let mut l2p = slot.get_for_write();
        if l2p.is_null() {
            l2p = trie.alloc_table();
            // SAFETY: sole writer; the slot was empty so nothing is returned.
            let prev = unsafe { slot.raw_swap(l2p) };
            debug_assert!(prev.is_null());
            trie.effective.fetch_add(1, Ordering::AcqRel);
            #[cfg(feature = "trace")]
            trace!("[INSERT] installed level-2 table in slot {}", b[0]);
        }
        let l2 = unsafe { &*l2p };
        let l3 = trie.child_or_alloc(l2, b[1]);
        let leaf = trie.child_or_alloc(l3, b[2]);
        if !leaf.get(b[3]).is_null() {
            #[cfg(feature = "trace")]
            trace!("[INSERT] key={:#010x} already present", key);
            return Err(Error::DuplicateKey);
        }
        leaf.set(b[3], value.as_ptr());
        leaf.inc();
        trie.len.fetch_add(1, Ordering::AcqRel);
        counter!("mbtrie_inserts_total").increment(1);
        Ok(())
    }

    /// Take the value stored under `key` out of the trie.
    ///
    /// Tables left empty are unlinked and freed after a grace period on the
    /// key's level-1 slot. Blocks until readers of that slot drain when
    /// anything was unlinked.
    pub fn remove(&mut self, key: u32) -> Option<NonNull<T>> {
        let trie = self.trie;
        let b = tier_bytes(key);
        // Read phase: nothing to do if the key is absent.
        let found = trie.lookup(key)?;
        counter!("mbtrie_removes_total").increment(1);

        let slot = &trie.roots[b[0] as usize];
        let l2p = slot.get_for_write();
        // SAFETY: the lookup above found the whole path and only this writer
        // could have changed it since.
        let l2 = unsafe { &*l2p };
        let l3p = l2.get(b[1]);
        let l3 = unsafe { &*l3p };
        let leafp = l3.get(b[2]);
        let leaf = unsafe { &*leafp };

        leaf.take(b[3]);
        trie.len.fetch_sub(1, Ordering::AcqRel);

        let mut dead_leaf = ptr::null_mut();
        let mut dead_l3 = ptr::null_mut();
        let mut dead_l2 = false;
        if leaf.dec() == 0 {
            l3.take(b[2]);
            dead_leaf = leafp;
            if l3.dec() == 0 {
                l2.take(b[1]);
                dead_l3 = l3p;
                dead_l2 = l2.dec() == 0;
            }
        }

        if dead_l2 {
            trie.effective.fetch_sub(1, Ordering::AcqRel);
            // SAFETY: sole writer; level 2 is empty and freed after the wait.
            unsafe { slot.synchronized_swap(ptr::null_mut()) };
            trie.forget_tables(1);
            #[cfg(feature = "trace")]
            trace!("[REMOVE] slot {} emptied", b[0]);
        } else if !dead_leaf.is_null() {
            slot.synchronize();
        }
        // SAFETY: both were unlinked before the grace period above.
        unsafe {
            trie.free_table(dead_leaf);
            trie.free_table(dead_l3);
        }
        #[cfg(feature = "trace")]
        trace!("[REMOVE] key={:#010x}", key);
        Some(found)
    }

    /// Drop every entry and free every table.
    pub fn flush(&mut self) {
        counter!("mbtrie_flushes_total").increment(1);
        let cleared = self.trie.flush_slots();
        info!("[FLUSH] cleared {} level-1 slots", cleared);
    }
}

impl<'a, T, H: TierHeap> Drop for TrieWriter<'a, T, H> {
    fn drop(&mut self) {
        self.trie.writer_claimed.store(false, Ordering::Release);
    }
}

// Public module for C API functions
pub mod public_api;

// Re-export all public API functions at the crate root
pub use public_api::*;
