//! Ranges of changed instances.

use impact_containers::{BitVector, SetBitIter};

/// The subset of instances whose data for some attribute has to be sent to
/// the consumer.
///
/// Iterating yields `(storage_index, item_index)` pairs, where the storage
/// index is the position of the instance in the dense instance array and the
/// item index is its position in the compacted delta buffer. Iteration does
/// not consume the range and always yields the same sequence.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum DeltaRange {
    /// No instances.
    #[default]
    Empty,
    /// Every instance in `0..num_items`.
    Full(usize),
    /// The instances whose bit is set.
    Sparse { bits: BitVector, num_items: usize },
}

/// Iterator over the `(storage_index, item_index)` pairs of a [`DeltaRange`].
#[derive(Clone, Debug)]
pub enum DeltaRangeIter<'a> {
    Full(std::ops::Range<usize>),
    Sparse(std::iter::Enumerate<SetBitIter<'a>>),
}

impl DeltaRange {
    /// Creates a range covering the given number of instances, or an empty
    /// range if the number is zero.
    pub fn full(num_instances: usize) -> Self {
        if num_instances == 0 {
            Self::Empty
        } else {
            Self::Full(num_instances)
        }
    }

    /// Creates a range covering the instances whose bit is set.
    pub fn from_bits(bits: BitVector) -> Self {
        let num_items = bits.count_set_bits();
        if num_items == 0 {
            Self::Empty
        } else {
            Self::Sparse { bits, num_items }
        }
    }

    /// Returns the number of instances covered by the range.
    pub fn num_items(&self) -> usize {
        match self {
            Self::Empty => 0,
            Self::Full(num_items) | Self::Sparse { num_items, .. } => *num_items,
        }
    }

    /// Whether the range covers no instances.
    pub fn is_empty(&self) -> bool {
        self.num_items() == 0
    }

    /// Whether the range was created to cover every instance.
    pub fn is_full(&self) -> bool {
        matches!(self, Self::Full(_))
    }

    /// Returns an iterator over the `(storage_index, item_index)` pairs of the
    /// range, in increasing order.
    pub fn iter(&self) -> DeltaRangeIter<'_> {
        match self {
            Self::Empty => DeltaRangeIter::Full(0..0),
            Self::Full(num_items) => DeltaRangeIter::Full(0..*num_items),
            Self::Sparse { bits, .. } => DeltaRangeIter::Sparse(bits.set_bits().enumerate()),
        }
    }
}

impl Iterator for DeltaRangeIter<'_> {
    type Item = (usize, usize);

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            Self::Full(range) => range.next().map(|index| (index, index)),
            Self::Sparse(set_bits) => set_bits
                .next()
                .map(|(item_index, storage_index)| (storage_index, item_index)),
        }
    }
}

impl<'a> IntoIterator for &'a DeltaRange {
    type Item = (usize, usize);
    type IntoIter = DeltaRangeIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_range_pairs_each_index_with_itself() {
        let range = DeltaRange::full(3);
        assert_eq!(range.iter().collect::<Vec<_>>(), vec![(0, 0), (1, 1), (2, 2)]);
        assert!(range.is_full());
    }

    #[test]
    fn sparse_range_numbers_items_sequentially() {
        let bits: BitVector = [false, true, false, true, true].into_iter().collect();
        let range = DeltaRange::from_bits(bits);

        assert_eq!(range.num_items(), 3);
        assert_eq!(range.iter().collect::<Vec<_>>(), vec![(1, 0), (3, 1), (4, 2)]);
        // Restartable
        assert_eq!(range.iter().count(), 3);
    }

    #[test]
    fn empty_inputs_give_empty_range() {
        assert_eq!(DeltaRange::full(0), DeltaRange::Empty);
        assert_eq!(DeltaRange::from_bits(BitVector::zeroed(10)), DeltaRange::Empty);
        assert_eq!(DeltaRange::Empty.iter().next(), None);
    }
}
