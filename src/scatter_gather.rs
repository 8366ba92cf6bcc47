//! Conversion between sparse per-instance data in a dense array and compact
//! delta buffers.

use crate::{delta::DeltaRange, remap::IndexRemap};

/// Copies the `stride` elements of every instance in the delta range from
/// the dense source array into a compact buffer, in delta order.
///
/// When the range covers the whole source array the buffer is a plain copy of
/// it.
///
/// # Panics
/// If the range refers to instances beyond the end of the source array.
pub fn gather<T: Copy>(delta: &DeltaRange, source: &[T], stride: usize) -> Vec<T> {
    let num_elements = delta.num_items() * stride;
    if num_elements == source.len() {
        return source.to_vec();
    }

    let mut compact = Vec::with_capacity(num_elements);
    for (storage_index, _) in delta {
        let start = storage_index * stride;
        compact.extend_from_slice(&source[start..start + stride]);
    }
    compact
}

/// Writes the `stride` elements of every item in the compact buffer into the
/// dense destination array, at the index the remap assigns to the item's
/// storage index. Items the remap drops are skipped.
///
/// A full range with an identity remap replaces the destination with the
/// buffer without copying.
///
/// # Panics
/// If a destination index lies beyond the end of the destination array.
pub fn scatter<T: Copy>(
    delta: &DeltaRange,
    compact: Vec<T>,
    dest: &mut Vec<T>,
    remap: &IndexRemap<'_>,
    stride: usize,
) {
    debug_assert_eq!(compact.len(), delta.num_items() * stride);

    if delta.is_full() && remap.is_identity() {
        *dest = compact;
        return;
    }

    for (storage_index, item_index) in delta {
        let Some(dest_index) = remap.remap(storage_index) else {
            continue;
        };
        let src_start = item_index * stride;
        let dest_start = dest_index * stride;
        dest[dest_start..dest_start + stride]
            .copy_from_slice(&compact[src_start..src_start + stride]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use impact_containers::BitVector;

    fn sparse(len: usize, set: &[usize]) -> DeltaRange {
        let mut bits = BitVector::zeroed(len);
        for &idx in set {
            bits.set_bit(idx);
        }
        DeltaRange::from_bits(bits)
    }

    #[test]
    fn gathering_sparse_range_compacts_strided_elements() {
        let source = [0, 1, 10, 11, 20, 21, 30, 31];
        let compact = gather(&sparse(4, &[1, 3]), &source, 2);
        assert_eq!(compact, vec![10, 11, 30, 31]);
    }

    #[test]
    fn gathering_full_range_copies_everything() {
        let source = [1.0, 2.0, 3.0];
        assert_eq!(gather(&DeltaRange::full(3), &source, 1), source.to_vec());
    }

    #[test]
    fn scattering_full_range_with_identity_moves_buffer() {
        let compact = vec![4, 5, 6];
        let ptr = compact.as_ptr();
        let mut dest = vec![0; 3];

        scatter(&DeltaRange::full(3), compact, &mut dest, &IndexRemap::Identity, 1);

        assert_eq!(dest, vec![4, 5, 6]);
        assert_eq!(dest.as_ptr(), ptr);
    }

    #[test]
    fn scattering_with_src_index_remap_relocates_and_drops() {
        let table = [IndexRemap::DROPPED, 0, IndexRemap::DROPPED, 2];
        let mut dest = vec![0; 6];

        scatter(
            &sparse(4, &[0, 1, 3]),
            vec![1, 1, 2, 2, 3, 3],
            &mut dest,
            &IndexRemap::SrcIndex(&table),
            2,
        );

        assert_eq!(dest, vec![2, 2, 0, 0, 3, 3]);
    }

    #[test]
    fn scattering_full_range_with_reorder_table_permutes() {
        let table = [2, 0, 1];
        let mut dest = vec![0; 3];

        scatter(
            &DeltaRange::full(3),
            vec![10, 20, 30],
            &mut dest,
            &IndexRemap::ReorderTable {
                table: &table,
                num_dest: 3,
            },
            1,
        );

        assert_eq!(dest, vec![20, 30, 10]);
    }

    #[test]
    fn gather_then_scatter_restores_covered_elements() {
        let source: Vec<u32> = (0..12).collect();
        let delta = sparse(6, &[0, 2, 5]);
        let mut dest = vec![u32::MAX; 12];

        scatter(&delta, gather(&delta, &source, 2), &mut dest, &IndexRemap::Identity, 2);

        for (storage_index, _) in &delta {
            assert_eq!(
                dest[storage_index * 2..storage_index * 2 + 2],
                source[storage_index * 2..storage_index * 2 + 2]
            );
        }
        assert_eq!(dest[2], u32::MAX);
    }
}
