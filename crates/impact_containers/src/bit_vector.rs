//! Bit vector for storing bits compactly.

/// A growable bit vector that stores bits packed into 64-bit words.
///
/// Bits beyond the length in the last word are always kept unset, so whole
/// words can be scanned when searching for set or unset bits.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BitVector {
    words: Vec<u64>,
    len: usize,
}

/// Iterator over the indices of the set bits in a [`BitVector`], in
/// increasing order.
#[derive(Clone, Debug)]
pub struct SetBitIter<'a> {
    words: &'a [u64],
    word_idx: usize,
    remaining_bits: u64,
}

const WORD_BITS: usize = 64;

impl BitVector {
    /// Creates a new empty bit vector.
    pub fn new() -> Self {
        Self {
            words: Vec::new(),
            len: 0,
        }
    }

    /// Creates a new empty bit vector with room for the specified number of
    /// bits.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            words: Vec::with_capacity(capacity.div_ceil(WORD_BITS)),
            len: 0,
        }
    }

    /// Creates a new bit vector with the specified length and all bits unset.
    pub fn zeroed(len: usize) -> Self {
        Self {
            words: vec![0; len.div_ceil(WORD_BITS)],
            len,
        }
    }

    /// Creates a new bit vector with the specified length and all bits set.
    pub fn filled(len: usize) -> Self {
        let mut bit_vec = Self {
            words: vec![u64::MAX; len.div_ceil(WORD_BITS)],
            len,
        };
        bit_vec.clear_bits_beyond_len();
        bit_vec
    }

    /// Returns whether the bit vector contains no bits.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the number of bits in the bit vector.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the bit at the specified index is set.
    ///
    /// # Panics
    /// If `bit_idx` is greater than or equal to the bit vector length.
    pub fn bit_is_set(&self, bit_idx: usize) -> bool {
        self.bounds_check(bit_idx);
        (self.words[word_idx(bit_idx)] & bit_mask(bit_idx)) != 0
    }

    /// Sets the bit at the specified index to 1.
    ///
    /// # Returns
    /// `true` if the bit was already set, `false` if it was unset.
    ///
    /// # Panics
    /// If `bit_idx` is greater than or equal to the bit vector length.
    pub fn set_bit(&mut self, bit_idx: usize) -> bool {
        self.bounds_check(bit_idx);
        let word = &mut self.words[word_idx(bit_idx)];
        let mask = bit_mask(bit_idx);
        let was_set = (*word & mask) != 0;
        *word |= mask;
        was_set
    }

    /// Sets the bit at the specified index to 0.
    ///
    /// # Returns
    /// `true` if the bit was set, `false` if it was already unset.
    ///
    /// # Panics
    /// If `bit_idx` is greater than or equal to the bit vector length.
    pub fn unset_bit(&mut self, bit_idx: usize) -> bool {
        self.bounds_check(bit_idx);
        let word = &mut self.words[word_idx(bit_idx)];
        let mask = bit_mask(bit_idx);
        let was_set = (*word & mask) != 0;
        *word &= !mask;
        was_set
    }

    /// Appends a bit with the given value to the end of the vector.
    pub fn push(&mut self, value: bool) {
        if self.len == self.words.len() * WORD_BITS {
            self.words.push(0);
        }
        self.len += 1;
        if value {
            self.set_bit(self.len - 1);
        }
    }

    /// Changes the length of the bit vector. Existing bits within the new
    /// length keep their values, and any added bits are unset.
    pub fn resize(&mut self, len: usize) {
        self.words.resize(len.div_ceil(WORD_BITS), 0);
        self.len = len;
        self.clear_bits_beyond_len();
    }

    /// Returns the number of set bits.
    pub fn count_set_bits(&self) -> usize {
        self.words
            .iter()
            .map(|word| word.count_ones() as usize)
            .sum()
    }

    /// Returns the index of the lowest unset bit, or [`None`] if every bit is
    /// set.
    pub fn first_unset_bit(&self) -> Option<usize> {
        self.words
            .iter()
            .enumerate()
            .find(|(_, word)| **word != u64::MAX)
            .map(|(idx, word)| idx * WORD_BITS + word.trailing_ones() as usize)
            .filter(|&bit_idx| bit_idx < self.len)
    }

    /// Returns an iterator over the indices of all set bits in increasing
    /// order.
    pub fn set_bits(&self) -> SetBitIter<'_> {
        SetBitIter {
            words: &self.words,
            word_idx: 0,
            remaining_bits: self.words.first().copied().unwrap_or(0),
        }
    }

    fn clear_bits_beyond_len(&mut self) {
        let used_bits_in_last_word = self.len % WORD_BITS;
        if used_bits_in_last_word != 0 {
            if let Some(last_word) = self.words.last_mut() {
                *last_word &= (1_u64 << used_bits_in_last_word) - 1;
            }
        }
    }

    fn bounds_check(&self, bit_idx: usize) {
        if bit_idx >= self.len {
            panic!(
                "Bit index {bit_idx} out of bounds for bit vector of length {}",
                self.len
            );
        }
    }
}

impl FromIterator<bool> for BitVector {
    fn from_iter<I: IntoIterator<Item = bool>>(iter: I) -> Self {
        let iter = iter.into_iter();
        let mut bit_vec = Self::with_capacity(iter.size_hint().0);
        for value in iter {
            bit_vec.push(value);
        }
        bit_vec
    }
}

impl Iterator for SetBitIter<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        loop {
            if self.remaining_bits != 0 {
                let bit_in_word = self.remaining_bits.trailing_zeros() as usize;
                // Clear lowest set bit
                self.remaining_bits &= self.remaining_bits - 1;
                return Some(self.word_idx * WORD_BITS + bit_in_word);
            }
            self.word_idx += 1;
            self.remaining_bits = *self.words.get(self.word_idx)?;
        }
    }
}

fn word_idx(bit_idx: usize) -> usize {
    bit_idx / WORD_BITS
}

fn bit_mask(bit_idx: usize) -> u64 {
    1 << (bit_idx & 0b111111)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zeroed_creates_bit_vector_with_correct_length_and_unset_bits() {
        let bit_vec = BitVector::zeroed(100);

        assert_eq!(bit_vec.len(), 100);
        assert!(!bit_vec.is_empty());
        assert!((0..100).all(|idx| !bit_vec.bit_is_set(idx)));
    }

    #[test]
    fn filled_sets_only_bits_within_length() {
        let bit_vec = BitVector::filled(70);

        assert_eq!(bit_vec.count_set_bits(), 70);
        assert!((0..70).all(|idx| bit_vec.bit_is_set(idx)));
        assert_eq!(bit_vec.first_unset_bit(), None);
    }

    #[test]
    fn set_and_unset_report_previous_state() {
        let mut bit_vec = BitVector::zeroed(10);

        assert!(!bit_vec.set_bit(5));
        assert!(bit_vec.set_bit(5));
        assert!(bit_vec.unset_bit(5));
        assert!(!bit_vec.unset_bit(5));
    }

    #[test]
    fn pushing_across_word_boundary_works() {
        let mut bit_vec = BitVector::new();
        for idx in 0..130 {
            bit_vec.push(idx % 3 == 0);
        }

        assert_eq!(bit_vec.len(), 130);
        for idx in 0..130 {
            assert_eq!(bit_vec.bit_is_set(idx), idx % 3 == 0);
        }
    }

    #[test]
    fn shrinking_resize_clears_truncated_bits() {
        let mut bit_vec = BitVector::filled(100);
        bit_vec.resize(10);
        bit_vec.resize(100);

        assert_eq!(bit_vec.count_set_bits(), 10);
        assert!(!bit_vec.bit_is_set(10));
        assert!(!bit_vec.bit_is_set(99));
    }

    #[test]
    fn first_unset_bit_finds_lowest_hole() {
        let mut bit_vec = BitVector::filled(130);
        assert_eq!(bit_vec.first_unset_bit(), None);

        bit_vec.unset_bit(100);
        bit_vec.unset_bit(70);
        assert_eq!(bit_vec.first_unset_bit(), Some(70));

        bit_vec.unset_bit(3);
        assert_eq!(bit_vec.first_unset_bit(), Some(3));
    }

    #[test]
    fn first_unset_bit_ignores_bits_beyond_length() {
        let bit_vec = BitVector::filled(64);
        assert_eq!(bit_vec.first_unset_bit(), None);

        let bit_vec = BitVector::filled(3);
        assert_eq!(bit_vec.first_unset_bit(), None);
    }

    #[test]
    fn set_bits_yields_indices_in_order() {
        let mut bit_vec = BitVector::zeroed(200);
        let indices = [0, 1, 63, 64, 65, 127, 128, 199];
        for &idx in &indices {
            bit_vec.set_bit(idx);
        }

        assert_eq!(bit_vec.set_bits().collect::<Vec<_>>(), indices);
        assert_eq!(bit_vec.count_set_bits(), indices.len());
    }

    #[test]
    fn set_bits_on_empty_vector_yields_nothing() {
        assert_eq!(BitVector::new().set_bits().count(), 0);
        assert_eq!(BitVector::zeroed(300).set_bits().count(), 0);
    }

    #[test]
    fn collecting_from_bools_works() {
        let bit_vec: BitVector = [true, false, true].into_iter().collect();
        assert_eq!(bit_vec.len(), 3);
        assert_eq!(bit_vec.set_bits().collect::<Vec<_>>(), vec![0, 2]);
    }

    #[test]
    fn collecting_across_word_boundaries_works() {
        let bit_vec: BitVector = (0..200).map(|idx| idx % 64 == 3).collect();
        assert_eq!(bit_vec.len(), 200);
        assert_eq!(bit_vec.set_bits().collect::<Vec<_>>(), vec![3, 67, 131, 195]);
        assert_eq!(bit_vec.count_set_bits(), 4);
    }

    #[test]
    fn with_capacity_creates_empty_bit_vector() {
        let bit_vec = BitVector::with_capacity(200);
        assert!(bit_vec.is_empty());
        assert_eq!(bit_vec.first_unset_bit(), None);
    }

    #[test]
    #[should_panic]
    fn set_with_out_of_bounds_index_panics() {
        let mut bit_vec = BitVector::zeroed(5);
        bit_vec.set_bit(5);
    }
}
