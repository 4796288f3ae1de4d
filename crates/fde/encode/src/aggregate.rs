//! Per-partition aggregation of projected vectors.

use fde_core::{EmptyPartitionFill, EncodingType, FdeError, Result};

/// Result of one repetition's aggregation pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregation {
    /// `[num_partitions, P]` partition vectors, after averaging and filling.
    pub sums: ndarray::Array2<f32>,
    /// Number of vectors that landed in each partition.
    pub counts: Vec<u32>,
}

impl Aggregation {
    /// Flattened partition-major values, the layout of one repetition block.
    #[must_use]
    pub fn as_flat(&self) -> Option<&[f32]> {
        self.sums.as_slice()
    }
}

/// Bucket `projected` rows by `assignments` and combine them per `mode`.
///
/// [`EncodingType::Sum`] keeps raw sums; [`EncodingType::Average`] divides
/// each non-empty partition by its count. Partitions with count 0 are then set
/// according to `fill`.
pub fn aggregate(
    assignments: &[u32],
    projected: ndarray::ArrayView2<'_, f32>,
    num_partitions: usize,
    mode: EncodingType,
    fill: EmptyPartitionFill,
) -> Result<Aggregation> {
    if assignments.len() != projected.nrows() {
        return Err(FdeError::dimension_mismatch(
            projected.nrows(),
            assignments.len(),
        ));
    }

    let mut sums = ndarray::Array2::<f32>::zeros((num_partitions, projected.ncols()));
    let mut counts = vec![0_u32; num_partitions];

    for (&partition, row) in assignments.iter().zip(projected.rows()) {
        let partition = partition as usize;
        if partition >= num_partitions {
            return Err(FdeError::dimension_mismatch(num_partitions, partition + 1));
        }
        let mut sum = sums.row_mut(partition);
        sum += &row;
        counts[partition] += 1;
    }

    for (mut sum, &count) in sums.rows_mut().into_iter().zip(&counts) {
        if count == 0 {
            sum.fill(fill.value());
        } else if mode == EncodingType::Average {
            sum /= count as f32;
        }
    }

    Ok(Aggregation { sums, counts })
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// A partition's sum is its count times its average.
        #[test]
        fn sum_is_count_times_average(
            rows in proptest::collection::vec(proptest::collection::vec(-10.0_f32..10.0, 3), 0..24),
            seed in any::<u64>(),
        ) {
            let n = rows.len();
            let flat: Vec<f32> = rows.into_iter().flatten().collect();
            let projected = ndarray::Array2::from_shape_vec((n, 3), flat).unwrap();
            let assignments: Vec<u32> = (0..n as u64)
                .map(|i| (seed.wrapping_mul(i + 1) >> 7) as u32 % 4)
                .collect();

            let sum = aggregate(&assignments, projected.view(), 4, EncodingType::Sum, EmptyPartitionFill::Zero).unwrap();
            let avg = aggregate(&assignments, projected.view(), 4, EncodingType::Average, EmptyPartitionFill::Zero).unwrap();
            prop_assert_eq!(&sum.counts, &avg.counts);

            for (p, &count) in sum.counts.iter().enumerate() {
                for c in 0..3 {
                    let expected = avg.sums[[p, c]] * count as f32;
                    prop_assert!((sum.sums[[p, c]] - expected).abs() < 1e-3);
                }
            }
        }
    }
}
