//! SimHash partitioning with Gray-code indexing.
//!
//! Each of the k hyperplanes (columns of the SimHash matrix) contributes one
//! sign bit. The bit string is read as a Gray code and decoded to its rank, so
//! partitions with consecutive indices sit on opposite sides of exactly one
//! hyperplane.

use fde_core::{FdeError, Result};

/// Sign bit of one SimHash projection. Ties at exactly zero map to 0.
#[inline]
#[must_use]
pub fn sign_bit(projection: f32) -> u32 {
    u32::from(projection > 0.0)
}

/// Fold sign bits, first hyperplane first, into a partition index.
///
/// `index = (index << 1) + (bit XOR (index & 1))`, i.e. Gray-code decoding.
#[must_use]
pub fn gray_code_fold(bits: impl IntoIterator<Item = u32>) -> u32 {
    bits.into_iter()
        .fold(0_u32, |index, bit| (index << 1) + (bit ^ (index & 1)))
}

/// Gray code of `index`; the inverse of [`gray_code_fold`] over k bits.
#[inline]
#[must_use]
pub fn gray_code(index: u32) -> u32 {
    index ^ (index >> 1)
}

/// Partition index in `[0, 2^k)` of one vector under a `D x k` SimHash matrix.
///
/// With `k = 0` every vector lands in partition 0.
pub fn partition_index(
    vector: ndarray::ArrayView1<'_, f32>,
    simhash: ndarray::ArrayView2<'_, f32>,
) -> Result<u32> {
    if vector.len() != simhash.nrows() {
        return Err(FdeError::dimension_mismatch(simhash.nrows(), vector.len()));
    }
    if simhash.ncols() == 0 {
        return Ok(0);
    }

    let projections = vector.dot(&simhash);
    Ok(gray_code_fold(projections.iter().map(|&p| sign_bit(p))))
}

/// Partition index of every row of `vectors`.
pub fn partition_indices(
    vectors: ndarray::ArrayView2<'_, f32>,
    simhash: ndarray::ArrayView2<'_, f32>,
) -> Result<Vec<u32>> {
    vectors
        .rows()
        .into_iter()
        .map(|row| partition_index(row, simhash))
        .collect()
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn arb_bits(k: usize) -> impl Strategy<Value = Vec<u32>> {
        proptest::collection::vec(0_u32..=1, k)
    }

    proptest! {
        /// Consecutive partitions differ in exactly one sign bit.
        #[test]
        fn adjacent_partitions_differ_in_one_sign(k in 1_u32..=16, seed in any::<u32>()) {
            let index = seed % ((1_u32 << k) - 1);
            let diff = gray_code(index) ^ gray_code(index + 1);
            prop_assert_eq!(diff.count_ones(), 1);
        }

        /// Flipping the last hyperplane's sign moves to a neighbouring partition.
        #[test]
        fn last_bit_flip_moves_by_one(bits in (1_usize..=16).prop_flat_map(arb_bits)) {
            let mut flipped = bits.clone();
            let last = flipped.len() - 1;
            flipped[last] ^= 1;

            let a = i64::from(gray_code_fold(bits));
            let b = i64::from(gray_code_fold(flipped));
            prop_assert_eq!((a - b).abs(), 1);
        }

        /// Folding always stays inside [0, 2^k).
        #[test]
        fn fold_in_range(bits in (0_usize..=31).prop_flat_map(arb_bits)) {
            let k = bits.len();
            let index = u64::from(gray_code_fold(bits));
            prop_assert!(index < (1_u64 << k));
        }
    }
}
