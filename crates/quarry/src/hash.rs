//! FNV-1a hashing of JSON values.
//!
//! Hashes are only used as cache keys. Objects are hashed in sorted key order
//! so that two values that differ only in key order hash identically.

use quarry_core::Value;
use serde_json::Map;

pub const FNV_OFFSET_BASIS: u32 = 2166136261;

const FNV_PRIME: u32 = 16777619;

/// Hashes of the structural tokens mixed into a running hash.
pub(crate) mod token {
    use super::{hash_bytes, FNV_OFFSET_BASIS};

    pub(crate) const OBJECT_OPEN: u32 = hash_bytes(b"{", FNV_OFFSET_BASIS);
    pub(crate) const OBJECT_CLOSE: u32 = hash_bytes(b"}", FNV_OFFSET_BASIS);
    pub(crate) const ARRAY_OPEN: u32 = hash_bytes(b"[", FNV_OFFSET_BASIS);
    pub(crate) const ARRAY_CLOSE: u32 = hash_bytes(b"]", FNV_OFFSET_BASIS);
    pub(crate) const NULL: u32 = hash_bytes(b"null", FNV_OFFSET_BASIS);
    pub(crate) const TRUE: u32 = hash_bytes(b"T", FNV_OFFSET_BASIS);
    pub(crate) const FALSE: u32 = hash_bytes(b"F", FNV_OFFSET_BASIS);
    pub(crate) const PARAM: u32 = hash_bytes(b"$Param", FNV_OFFSET_BASIS);
    pub(crate) const ASC: u32 = hash_bytes(b"asc", FNV_OFFSET_BASIS);
    pub(crate) const DESC: u32 = hash_bytes(b"desc", FNV_OFFSET_BASIS);
    pub(crate) const NUMBER: u32 = hash_bytes(b"#", FNV_OFFSET_BASIS);
    pub(crate) const STRING: u32 = hash_bytes(b"\"", FNV_OFFSET_BASIS);
}

const fn hash_bytes(bytes: &[u8], seed: u32) -> u32 {
    let mut hash = seed;
    let mut i = 0;
    while i < bytes.len() {
        hash ^= bytes[i] as u32;
        hash = hash.wrapping_mul(FNV_PRIME);
        i += 1;
    }
    hash
}

/// FNV-1a hash of `s`, continuing from `seed`.
pub fn hash_str(s: &str, seed: u32) -> u32 {
    hash_bytes(s.as_bytes(), seed)
}

/// Mixes a precomputed hash into a running hash.
pub fn combine(hash: u32, value: u32) -> u32 {
    (hash ^ value).wrapping_mul(FNV_PRIME)
}

/// Hash of an object key, independent of where the key appears.
pub(crate) fn key_hash(key: &str) -> u32 {
    hash_str(key, FNV_OFFSET_BASIS)
}

/// Hash of an array index marker `[i]`.
pub(crate) fn index_hash(index: usize, seed: u32) -> u32 {
    let seed = hash_str("[", seed);
    let seed = hash_str(&index.to_string(), seed);
    hash_str("]", seed)
}

/// Structural hash of `value`, continuing from `seed`.
pub fn hash_value(value: &Value, seed: u32) -> u32 {
    match value {
        Value::Null => combine(seed, token::NULL),
        Value::Bool(true) => combine(seed, token::TRUE),
        Value::Bool(false) => combine(seed, token::FALSE),
        Value::Number(number) => hash_str(&number.to_string(), combine(seed, token::NUMBER)),
        Value::String(s) => hash_str(s, combine(seed, token::STRING)),
        Value::Array(items) => {
            let mut hash = combine(seed, token::ARRAY_OPEN);
            for item in items {
                hash = hash_value(item, hash);
            }
            combine(hash, token::ARRAY_CLOSE)
        }
        Value::Object(map) => {
            let mut hash = combine(seed, token::OBJECT_OPEN);
            for (key, item) in sorted_entries(map) {
                hash = combine(hash, key_hash(key));
                hash = hash_value(item, hash);
            }
            combine(hash, token::OBJECT_CLOSE)
        }
    }
}

/// Entries of `map` ordered by key.
pub(crate) fn sorted_entries(map: &Map<String, Value>) -> Vec<(&String, &Value)> {
    let mut entries: Vec<_> = map.iter().collect();
    entries.sort_unstable_by(|a, b| a.0.cmp(b.0));
    entries
}
