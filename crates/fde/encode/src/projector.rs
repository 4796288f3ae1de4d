//! Per-vector dimensionality reduction.

use std::sync::Arc;

use fde_core::{FdeError, Result};

/// Maps D-dimensional vectors to the P-dimensional space partitions are aggregated in.
///
/// Projection is linear, so projecting each vector before summing gives the
/// same partition sums as projecting the sums.
#[derive(Debug, Clone)]
pub enum Projector {
    /// P = D, vectors pass through unchanged.
    Identity { dimension: usize },
    /// `vector · matrix` with a `D x P` AMS sketch matrix.
    AmsSketch(Arc<ndarray::Array2<f32>>),
}

impl Projector {
    /// Input dimension D.
    #[must_use]
    pub fn input_dim(&self) -> usize {
        match self {
            Self::Identity { dimension } => *dimension,
            Self::AmsSketch(matrix) => matrix.nrows(),
        }
    }

    /// Output dimension P.
    #[must_use]
    pub fn output_dim(&self) -> usize {
        match self {
            Self::Identity { dimension } => *dimension,
            Self::AmsSketch(matrix) => matrix.ncols(),
        }
    }

    /// Project one vector.
    pub fn project(&self, vector: ndarray::ArrayView1<'_, f32>) -> Result<ndarray::Array1<f32>> {
        if vector.len() != self.input_dim() {
            return Err(FdeError::dimension_mismatch(self.input_dim(), vector.len()));
        }

        let projected = match self {
            Self::Identity { .. } => vector.to_owned(),
            Self::AmsSketch(matrix) => vector.dot(&**matrix),
        };

        if projected.len() != self.output_dim() {
            return Err(FdeError::dimension_mismatch(
                self.output_dim(),
                projected.len(),
            ));
        }
        Ok(projected)
    }

    /// Project every row of a `[N, D]` matrix into a `[N, P]` matrix.
    pub fn project_rows(
        &self,
        vectors: ndarray::ArrayView2<'_, f32>,
    ) -> Result<ndarray::Array2<f32>> {
        if vectors.ncols() != self.input_dim() {
            return Err(FdeError::dimension_mismatch(
                self.input_dim(),
                vectors.ncols(),
            ));
        }

        let mut out = ndarray::Array2::zeros((vectors.nrows(), self.output_dim()));
        for (row, mut out_row) in vectors.rows().into_iter().zip(out.rows_mut()) {
            out_row.assign(&self.project(row)?);
        }
        Ok(out)
    }
}
