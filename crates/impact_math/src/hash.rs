//! Hash-related utilities.

use bytemuck::{Pod, Zeroable};
use std::fmt;

/// A 64-bit hash.
#[repr(transparent)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Zeroable, Pod)]
pub struct Hash64(u64);

impl Hash64 {
    /// Wraps the given raw hash value.
    pub const fn from_u64(value: u64) -> Self {
        Self(value)
    }
}

impl From<Hash64> for u64 {
    fn from(hash: Hash64) -> Self {
        hash.0
    }
}

impl fmt::Display for Hash64 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Computes a 64-bit FNV-1a hash of the given bytes.
pub const fn compute_hash_64_of_bytes(bytes: &[u8]) -> Hash64 {
    Hash64(const_fnv1a_hash::fnv1a_hash_64(bytes, None))
}

/// Computes a 64-bit hash of the raw bytes of the given plain-old-data value.
///
/// Two values with identical bytes always get the same hash, so the value
/// should not contain floating point fields that compare equal with different
/// bit patterns (like `0.0` and `-0.0`) unless those are meant to be distinct.
pub fn compute_hash_64_of_pod<T: Pod>(value: &T) -> Hash64 {
    compute_hash_64_of_bytes(bytemuck::bytes_of(value))
}
