//! Constants and defaults for the tiered trie

/// Fan-out of every tier: one slot per key byte value.
pub const FANOUT: usize = 256;

/// Last slot index. Reserved as an out-of-range marker when
/// [`TrieConfig::reserve_sentinel`](crate::types::TrieConfig) is on.
pub const SENTINEL_BYTE: u8 = (FANOUT - 1) as u8;

/// Number of tiers a 32-bit key is split into.
pub const TIER_COUNT: usize = 4;

/// Idle polls before a grace-period wait yields the thread; 0 = spin only.
pub const DEFAULT_YIELD_AFTER: u32 = 0;

/// Core whose tables come from the Rust global allocator.
pub const PRIMARY_CORE: u8 = 0;

pub const ABI_VERSION: u16 = 1;
