//! Content hashing for the stamp tree
//!
//! Hashes are 32-bit FNV-1a over UTF-8 bytes. A parent's hash is the XOR of
//! its children's keyed hashes, which makes it independent of insertion
//! order and lets a single child be swapped in O(1): XOR out the old keyed
//! hash, XOR in the new one.
//!
//! These functions are a wire contract shared with other replicas and must
//! stay bit-exact.

use crate::types::Hash;

const FNV_OFFSET_BASIS: u32 = 2_166_136_261;
const FNV_PRIME: u32 = 16_777_619;

/// 32-bit FNV-1a hash of a string
pub fn get_hash(value: &str) -> Hash {
    value.bytes().fold(FNV_OFFSET_BASIS, |hash, byte| {
        (hash ^ u32::from(byte)).wrapping_mul(FNV_PRIME)
    })
}

/// Add a hash to, or remove it from, an aggregate
pub fn add_or_remove_hash(hash1: Hash, hash2: Hash) -> Hash {
    hash1 ^ hash2
}

/// Hash of a child as seen by its parent: `hash(id + ":" + child_hash)`
pub fn keyed_hash(id: &str, child_hash: Hash) -> Hash {
    get_hash(&format!("{id}:{child_hash}"))
}

/// Hash of a leaf from its JSON-encoded value and its HLC
pub fn leaf_hash(value_json: &str, hlc: &str) -> Hash {
    get_hash(&format!("{value_json}:{hlc}"))
}

/// Change to apply to a parent hash when a child's hash goes from
/// `old_child_hash` to `new_child_hash`. A newly created child has an old
/// hash of zero, and its `keyed_hash(id, 0)` term is part of the format.
pub fn child_hash_delta(id: &str, old_child_hash: Hash, new_child_hash: Hash) -> Hash {
    add_or_remove_hash(keyed_hash(id, old_child_hash), keyed_hash(id, new_child_hash))
}

/// Aggregate hash of a container, computed from scratch over its children
pub fn container_hash<'a>(children: impl IntoIterator<Item = (&'a str, Hash)>) -> Hash {
    children
        .into_iter()
        .fold(0, |hash, (id, child_hash)| add_or_remove_hash(hash, child_hash_delta(id, 0, child_hash)))
}
