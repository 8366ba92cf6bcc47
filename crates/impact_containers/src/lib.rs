//! Containers and data structures.

mod bit_vector;
mod slot_map;

pub use bit_vector::{BitVector, SetBitIter};
pub use slot_map::{SlotKey, SlotMap};

pub type HashMap<K, V> = hashbrown::HashMap<K, V, rustc_hash::FxBuildHasher>;
