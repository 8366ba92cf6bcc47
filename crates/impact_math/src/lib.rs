//! Mathematical utilities.

mod hash;

pub use hash::{Hash64, compute_hash_64_of_bytes, compute_hash_64_of_pod};
