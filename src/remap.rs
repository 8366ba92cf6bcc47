//! Mappings from delta storage indices to destination indices.

/// How the storage index of a delta item translates into the index it is
/// written to on scatter.
#[derive(Clone, Copy, Debug)]
pub enum IndexRemap<'a> {
    /// The destination index equals the storage index.
    Identity,
    /// The delta is stated in a different index space, and `table[index]`
    /// holds the destination of the item at storage index `index`. Entries
    /// equal to [`Self::DROPPED`] are skipped.
    SrcIndex(&'a [u32]),
    /// A baked reordering where `table[index]` holds the destination index.
    /// Entries that are missing or not below `num_dest` are skipped.
    ReorderTable { table: &'a [u32], num_dest: usize },
}

impl IndexRemap<'_> {
    /// Table entry marking an item that should not be written.
    pub const DROPPED: u32 = u32::MAX;

    /// Whether every item is written to its own storage index.
    pub fn is_identity(&self) -> bool {
        matches!(self, Self::Identity)
    }

    /// Returns the destination index for the item at the given storage
    /// index, or [`None`] if the item should be dropped.
    ///
    /// # Panics
    /// If the remap is [`Self::SrcIndex`] and the index is outside the table.
    pub fn remap(&self, src_index: usize) -> Option<usize> {
        match *self {
            Self::Identity => Some(src_index),
            Self::SrcIndex(table) => {
                let dest_index = table[src_index];
                (dest_index != Self::DROPPED).then_some(dest_index as usize)
            }
            Self::ReorderTable { table, num_dest } => table
                .get(src_index)
                .map(|&dest_index| dest_index as usize)
                .filter(|&dest_index| dest_index < num_dest),
        }
    }
}

/// Computes the inverse of the given permutation, so that
/// `inverse[table[i]] == i`.
///
/// # Panics
/// If an entry of the table is out of range.
pub fn invert_permutation(table: &[u32]) -> Vec<u32> {
    let mut inverse = vec![IndexRemap::DROPPED; table.len()];
    for (index, &target) in table.iter().enumerate() {
        inverse[target as usize] = index as u32;
    }
    inverse
}
