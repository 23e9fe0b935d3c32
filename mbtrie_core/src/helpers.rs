//! Helper functions for key decomposition

use crate::constants::{SENTINEL_BYTE, TIER_COUNT};
use std::net::Ipv4Addr;

/// Key for an IPv4 address: the octets read as a big-endian u32.
#[inline]
pub fn v4_key(addr: Ipv4Addr) -> u32 {
    u32::from_be_bytes(addr.octets())
}

/// Split a key into its four tier indices, most significant byte first.
///
/// The order is fixed and independent of host endianness: index 0 selects
/// the level-1 slot, index 3 the leaf slot.
#[inline(always)]
pub const fn tier_bytes(key: u32) -> [u8; TIER_COUNT] {
    key.to_be_bytes()
}

/// Inverse of [`tier_bytes`].
#[inline(always)]
pub const fn compose_key(b1: u8, b2: u8, b3: u8, b4: u8) -> u32 {
    u32::from_be_bytes([b1, b2, b3, b4])
}

/// True if any tier index collides with the reserved last slot.
#[inline]
pub fn has_sentinel(bytes: &[u8; TIER_COUNT]) -> bool {
    bytes.iter().any(|&b| b == SENTINEL_BYTE)
}
