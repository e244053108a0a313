//! # Cluster Hash Slot
//!
//! Key-to-slot mapping for Redis Cluster: CRC16 (XMODEM variant) of the key's
//! hash tag, modulo 16384. A pure function with no state; slot routing itself
//! lives in higher layers.
//!
//! The hash tag is the substring between the first `{` and the next `}`,
//! provided it is non-empty; otherwise the whole key is hashed. Tags let
//! callers pin related keys (`{user1000}.following`, `{user1000}.followers`)
//! to the same slot so multi-key commands keep working under cluster.

use crate::constants::CLUSTER_HASH_SLOTS;

/// CRC16-XMODEM: polynomial 0x1021, no reflection, zero initial value
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ 0x1021
            } else {
                crc << 1
            };
        }
    }
    crc
}

/// The cluster slot (0..16384) a key maps to
pub fn hash_slot(key: &[u8]) -> u16 {
    crc16(hash_tag(key)) % CLUSTER_HASH_SLOTS
}

/// The portion of the key that participates in hashing
fn hash_tag(key: &[u8]) -> &[u8] {
    let open = match key.iter().position(|&b| b == b'{') {
        Some(open) => open,
        None => return key,
    };
    match key[open + 1..].iter().position(|&b| b == b'}') {
        // Only a non-empty tag counts; "{}" hashes the whole key.
        Some(0) | None => key,
        Some(close) => &key[open + 1..open + 1 + close],
    }
}
