//! Count-sketch compression of a concatenated encoding.

use fde_core::{FdeError, Result};
use rand::Rng as _;

use crate::projection::{COUNT_SKETCH_STREAM, seeded_stream};

/// Compress `input` to `output_dim` values.
///
/// Input coordinate `i` is added with a random ±1 sign into one uniformly
/// chosen output coordinate. Bucket and sign depend only on `seed` and `i`, so
/// queries and documents are compressed consistently and inner products are
/// preserved in expectation.
pub fn count_sketch(input: &[f32], output_dim: usize, seed: u64) -> Result<Vec<f32>> {
    if output_dim == 0 {
        return Err(FdeError::InvalidShape {
            rows: input.len(),
            cols: output_dim,
        });
    }

    let mut rng = seeded_stream(seed, COUNT_SKETCH_STREAM);
    let mut out = vec![0.0_f32; output_dim];
    for &value in input {
        let bucket = rng.random_range(0..output_dim);
        if rng.random_bool(0.5) {
            out[bucket] += value;
        } else {
            out[bucket] -= value;
        }
    }
    Ok(out)
}
