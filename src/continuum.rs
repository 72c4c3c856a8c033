//! The ketama consistent-hashing ring: a sorted list of `(hash, value)`
//! points, one cluster of points per group, searched with wraparound so
//! the ring is circular.

use std::convert::TryInto;

use sha1::{Digest, Sha1};

/// libmemcached's default points-per-group multiplier. Must be preserved
/// for interoperability with other ketama clients addressing the same
/// logical set of groups.
const POINTS_PER_GROUP: u64 = 160;

/// A sorted ring of `(hash, value)` entries. `T` is typically an index
/// into the owning client's group list rather than the group itself,
/// since groups hold live sockets and aren't cheaply cloneable.
#[derive(Debug, Clone)]
pub(crate) struct Continuum<T> {
    entries: Vec<(u32, T)>,
}

impl<T: Clone> Continuum<T> {
    /// Build a continuum from `(name, weight, value)` triples, one per
    /// group. Each group is allotted
    /// `floor(total_groups * 160 * weight / total_weight)` points, placed
    /// by hashing `"<name>:<index>"` with SHA-1 and taking the first 4
    /// bytes of the digest as a big-endian `u32`.
    pub(crate) fn new(items: Vec<(String, u32, T)>) -> Self {
        let total_groups = items.len() as u64;
        let total_weight: u64 = items.iter().map(|(_, weight, _)| *weight as u64).sum();

        let mut entries = Vec::new();
        if total_weight > 0 {
            for (name, weight, value) in items {
                let points = total_groups * POINTS_PER_GROUP * weight as u64 / total_weight;
                for i in 0..points {
                    let input = format!("{}:{}", name, i);
                    let digest = Sha1::digest(input.as_bytes());
                    let hash = u32::from_be_bytes(digest[0..4].try_into().unwrap());
                    entries.push((hash, value.clone()));
                }
            }
        }
        entries.sort_by_key(|(hash, _)| *hash);
        Self { entries }
    }

    /// Look up the value owning `key_hash`: the entry with the largest
    /// `hash <= key_hash`, wrapping around to the last entry if
    /// `key_hash` is smaller than every entry's hash.
    pub(crate) fn lookup(&self, key_hash: u32) -> Option<&T> {
        if self.entries.is_empty() {
            return None;
        }
        let idx = binary_search_with_wraparound(&self.entries, key_hash);
        Some(&self.entries[idx].1)
    }
}

/// Returns the index of the largest entry with `hash <= key_hash`. If
/// `key_hash` is smaller than every entry's hash, wraps around to the
/// last index — this is exactly the behavior of returning `upper` after
/// a failed binary search where `upper` has underflowed below `lower`,
/// and it's essential: the ring is circular.
fn binary_search_with_wraparound<T>(entries: &[(u32, T)], key_hash: u32) -> usize {
    let mut lower: i64 = 0;
    let mut upper: i64 = entries.len() as i64 - 1;

    while lower <= upper {
        let mid = lower + (upper - lower) / 2;
        let hash = entries[mid as usize].0;
        if hash < key_hash {
            lower = mid + 1;
        } else if hash > key_hash {
            upper = mid - 1;
        } else {
            return mid as usize;
        }
    }

    if upper < 0 {
        entries.len() - 1
    } else {
        upper as usize
    }
}

/// CRC-32 (zlib's variant) of the already-namespaced key. Deliberately a
/// different hash function than the SHA-1 used to place ring points: the
/// spread of points is what provides uniformity, the lookup hash only
/// needs to be cheap and deterministic.
pub(crate) fn key_hash(bytes: &[u8]) -> u32 {
    crc32fast::hash(bytes)
}
