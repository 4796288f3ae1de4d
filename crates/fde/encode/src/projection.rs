//! Deterministic random matrices for SimHash partitioning and AMS sketching.
//!
//! Every matrix is a pure function of `(seed, repetition, rows, cols, kind)`:
//! a query and a document encoded in different processes draw the same
//! hyperplanes and land in compatible partitions. Each kind reads its own
//! ChaCha8 stream seeded with `seed + repetition`, advanced row-major.

use std::collections::HashMap;
use std::sync::Arc;

use fde_core::{FdeError, Result};
use rand::{Rng as _, SeedableRng as _};

/// ChaCha stream reserved for count-sketch compression of the final encoding.
pub(crate) const COUNT_SKETCH_STREAM: u64 = 2;

/// Which family of random matrix to generate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatrixKind {
    /// I.i.d. standard normal entries (SimHash hyperplanes, one per column).
    Gaussian,
    /// One ±1 entry per row at a uniformly chosen column, zeros elsewhere.
    AmsSketch,
}

impl MatrixKind {
    fn stream(self) -> u64 {
        match self {
            Self::Gaussian => 0,
            Self::AmsSketch => 1,
        }
    }
}

pub(crate) fn seeded_stream(seed: u64, stream: u64) -> rand_chacha::ChaCha8Rng {
    let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(seed);
    rng.set_stream(stream);
    rng
}

/// Draw two independent standard normal samples (Box–Muller).
fn box_muller(rng: &mut rand_chacha::ChaCha8Rng) -> (f64, f64) {
    // (0, 1] so the logarithm is finite
    let u1 = 1.0 - rng.random::<f64>();
    let u2 = rng.random::<f64>();
    let radius = (-2.0 * u1.ln()).sqrt();
    let theta = std::f64::consts::TAU * u2;
    (radius * theta.cos(), radius * theta.sin())
}

/// Generate the `rows x cols` matrix of `kind` for one repetition.
///
/// Repetition `r` is seeded with `seed + r` (wrapping).
pub fn generate_matrix(
    seed: u64,
    repetition: u64,
    rows: usize,
    cols: usize,
    kind: MatrixKind,
) -> Result<ndarray::Array2<f32>> {
    if rows == 0 || cols == 0 {
        return Err(FdeError::InvalidShape { rows, cols });
    }

    let mut rng = seeded_stream(seed.wrapping_add(repetition), kind.stream());

    let data = match kind {
        MatrixKind::Gaussian => {
            let len = rows * cols;
            let mut data = Vec::with_capacity(len);
            while data.len() < len {
                let (z0, z1) = box_muller(&mut rng);
                data.push(z0 as f32);
                if data.len() < len {
                    data.push(z1 as f32);
                }
            }
            data
        }
        MatrixKind::AmsSketch => {
            let mut data = vec![0.0_f32; rows * cols];
            for row in data.chunks_exact_mut(cols) {
                let col = rng.random_range(0..cols);
                row[col] = if rng.random_bool(0.5) { 1.0 } else { -1.0 };
            }
            data
        }
    };

    ndarray::Array2::from_shape_vec((rows, cols), data)
        .map_err(|_| FdeError::InvalidShape { rows, cols })
}

/// Identity of a generated matrix inside a [`ProjectionCache`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MatrixKey {
    pub seed: u64,
    pub repetition: u64,
    pub kind: MatrixKind,
    pub rows: usize,
    pub cols: usize,
}

/// Owned cache of generated matrices.
///
/// Belongs to one encoder (one config), so nothing is shared between
/// unrelated encoders. Safe to use from several threads; matrices are handed
/// out as shared read-only `Arc`s.
#[derive(Debug, Default)]
pub struct ProjectionCache {
    matrices: parking_lot::RwLock<HashMap<MatrixKey, Arc<ndarray::Array2<f32>>>>,
}

impl ProjectionCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached matrix for `key`, generating it on first use.
    pub fn get_or_generate(&self, key: MatrixKey) -> Result<Arc<ndarray::Array2<f32>>> {
        if let Some(matrix) = self.matrices.read().get(&key) {
            return Ok(Arc::clone(matrix));
        }

        let matrix = Arc::new(generate_matrix(
            key.seed,
            key.repetition,
            key.rows,
            key.cols,
            key.kind,
        )?);
        tracing::debug!(?key, "generated projection matrix");

        // another thread may have generated the same matrix meanwhile; both are identical
        let mut matrices = self.matrices.write();
        Ok(Arc::clone(matrices.entry(key).or_insert(matrix)))
    }

    /// Number of cached matrices.
    #[must_use]
    pub fn len(&self) -> usize {
        self.matrices.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.matrices.read().is_empty()
    }

    /// Drop every cached matrix.
    pub fn clear(&self) {
        self.matrices.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gaussian_is_reproducible() {
        let a = generate_matrix(42, 3, 16, 5, MatrixKind::Gaussian).unwrap();
        let b = generate_matrix(42, 3, 16, 5, MatrixKind::Gaussian).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.shape(), &[16, 5]);
    }

    #[test]
    fn test_seed_plus_repetition() {
        // Repetition r of seed s draws from seed s + r.
        let a = generate_matrix(40, 2, 8, 3, MatrixKind::Gaussian).unwrap();
        let b = generate_matrix(42, 0, 8, 3, MatrixKind::Gaussian).unwrap();
        assert_eq!(a, b);

        let c = generate_matrix(42, 1, 8, 3, MatrixKind::Gaussian).unwrap();
        assert_ne!(b, c);
    }

    #[test]
    fn test_gaussian_moments() {
        let m = generate_matrix(7, 0, 200, 50, MatrixKind::Gaussian).unwrap();
        let n = m.len() as f64;
        let mean = m.iter().map(|&x| f64::from(x)).sum::<f64>() / n;
        let var = m
            .iter()
            .map(|&x| (f64::from(x) - mean).powi(2))
            .sum::<f64>()
            / n;
        assert!(mean.abs() < 0.05, "mean was {mean}");
        assert!((var - 1.0).abs() < 0.1, "variance was {var}");
        assert!(m.iter().all(|x| x.is_finite()));
    }

    #[test]
    fn test_ams_sketch_one_sign_per_row() {
        let m = generate_matrix(42, 0, 64, 8, MatrixKind::AmsSketch).unwrap();
        for row in m.rows() {
            let nonzero: Vec<f32> = row.iter().copied().filter(|&x| x != 0.0).collect();
            assert_eq!(nonzero.len(), 1);
            assert!(nonzero[0] == 1.0 || nonzero[0] == -1.0);
        }

        let positives = m.iter().filter(|&&x| x > 0.0).count();
        assert!(positives > 10 && positives < 54, "positives was {positives}");
    }

    #[test]
    fn test_kinds_use_independent_streams() {
        let gaussian = generate_matrix(42, 0, 4, 4, MatrixKind::Gaussian).unwrap();
        let sketch = generate_matrix(42, 0, 4, 4, MatrixKind::AmsSketch).unwrap();
        assert_ne!(gaussian, sketch);
    }

    #[test]
    fn test_rejects_empty_shape() {
        assert_eq!(
            generate_matrix(1, 0, 0, 4, MatrixKind::Gaussian),
            Err(FdeError::InvalidShape { rows: 0, cols: 4 })
        );
        assert!(generate_matrix(1, 0, 4, 0, MatrixKind::AmsSketch).is_err());
    }

    #[test]
    fn test_cache_reuses_matrices() {
        let cache = ProjectionCache::new();
        let key = MatrixKey {
            seed: 42,
            repetition: 0,
            kind: MatrixKind::Gaussian,
            rows: 8,
            cols: 2,
        };

        let first = cache.get_or_generate(key).unwrap();
        let second = cache.get_or_generate(key).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);

        let other = cache
            .get_or_generate(MatrixKey {
                repetition: 1,
                ..key
            })
            .unwrap();
        assert_ne!(*first, *other);
        assert_eq!(cache.len(), 2);

        cache.clear();
        assert!(cache.is_empty());
    }
}
