//! Repetition loop and concatenation into the final encoding.

use std::sync::Arc;

use fde_core::{
    Encoding, EncodingConfig, EncodingType, FdeError, ProjectionType, Result, VectorSet,
    VectorSetView,
};

use crate::aggregate::{Aggregation, aggregate};
use crate::partition::partition_indices;
use crate::projection::{MatrixKey, MatrixKind, ProjectionCache};
use crate::projector::Projector;

/// Encodes vector sets under one validated [`EncodingConfig`].
///
/// Owns the projection matrices generated for that config. Encoding is a pure
/// function of the vector set and the config, so one encoder can be shared
/// across threads.
#[derive(Debug)]
pub struct FdeEncoder {
    config: EncodingConfig,
    cache: ProjectionCache,
}

impl FdeEncoder {
    /// Validate `config` and create an encoder for it.
    pub fn new(config: EncodingConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            cache: ProjectionCache::new(),
        })
    }

    #[must_use]
    pub fn config(&self) -> &EncodingConfig {
        &self.config
    }

    /// The matrices generated so far.
    #[must_use]
    pub fn cache(&self) -> &ProjectionCache {
        &self.cache
    }

    /// Length of every encoding this encoder produces.
    #[must_use]
    pub fn encoding_len(&self) -> usize {
        self.config.encoding_len()
    }

    /// Encode with the config's own [`EncodingType`].
    pub fn encode(&self, vector_set: &VectorSet) -> Result<Encoding> {
        self.encode_with_mode(vector_set, self.config.encoding_type)
    }

    /// Encode a query: per-partition sums.
    pub fn encode_query(&self, vector_set: &VectorSet) -> Result<Encoding> {
        self.encode_with_mode(vector_set, EncodingType::Sum)
    }

    /// Encode a document: per-partition averages.
    pub fn encode_document(&self, vector_set: &VectorSet) -> Result<Encoding> {
        self.encode_with_mode(vector_set, EncodingType::Average)
    }

    /// Encode with an explicit aggregation mode.
    pub fn encode_with_mode(&self, vector_set: &VectorSet, mode: EncodingType) -> Result<Encoding> {
        let vectors = vector_set.to_array(self.config.dimension)?;
        self.encode_view(vectors.view(), mode)
    }

    /// Encode a `[num_vectors, dimension]` view.
    pub fn encode_view(&self, vectors: VectorSetView<'_>, mode: EncodingType) -> Result<Encoding> {
        if vectors.ncols() != self.config.dimension {
            return Err(FdeError::dimension_mismatch(
                self.config.dimension,
                vectors.ncols(),
            ));
        }
        if vectors.nrows() == 0 {
            tracing::debug!(?mode, "encoding empty vector set");
        }

        let mut values = Vec::with_capacity(self.config.concatenated_len());
        for repetition in 0..self.config.num_repetitions {
            let aggregation = self.encode_repetition(vectors, repetition, mode)?;
            values.extend(aggregation.sums.iter().copied());
        }

        let values = match self.config.final_projection_dimension {
            Some(final_dim) => crate::sketch::count_sketch(&values, final_dim, self.config.seed)?,
            None => values,
        };

        debug_assert_eq!(values.len(), self.encoding_len());
        Ok(Encoding::from_vec(values))
    }

    /// Run partition, projection and aggregation for one repetition.
    ///
    /// The returned block is what lands at offset `repetition * 2^k * P` of
    /// the concatenated encoding.
    pub fn encode_repetition(
        &self,
        vectors: VectorSetView<'_>,
        repetition: usize,
        mode: EncodingType,
    ) -> Result<Aggregation> {
        let assignments = match self.simhash_matrix(repetition)? {
            Some(simhash) => partition_indices(vectors, simhash.view())?,
            None => vec![0; vectors.nrows()],
        };

        let projector = self.projector(repetition)?;
        let projected = projector.project_rows(vectors)?;

        tracing::trace!(repetition, num_vectors = vectors.nrows(), "aggregating repetition");

        aggregate(
            &assignments,
            projected.view(),
            self.config.num_partitions(),
            mode,
            self.config.empty_partition_fill,
        )
    }

    /// The `D x k` SimHash matrix, or `None` when k = 0.
    pub fn simhash_matrix(&self, repetition: usize) -> Result<Option<Arc<ndarray::Array2<f32>>>> {
        if self.config.num_simhash_projections == 0 {
            return Ok(None);
        }
        self.cache
            .get_or_generate(MatrixKey {
                seed: self.config.seed,
                repetition: repetition as u64,
                kind: MatrixKind::Gaussian,
                rows: self.config.dimension,
                cols: self.config.num_simhash_projections as usize,
            })
            .map(Some)
    }

    /// The projector used by `repetition`.
    pub fn projector(&self, repetition: usize) -> Result<Projector> {
        match self.config.projection_type {
            ProjectionType::Identity => Ok(Projector::Identity {
                dimension: self.config.dimension,
            }),
            ProjectionType::AmsSketch => {
                let matrix = self.cache.get_or_generate(MatrixKey {
                    seed: self.config.seed,
                    repetition: repetition as u64,
                    kind: MatrixKind::AmsSketch,
                    rows: self.config.dimension,
                    cols: self.config.projection_dim(),
                })?;
                Ok(Projector::AmsSketch(matrix))
            }
        }
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn arb_set(dim: usize) -> impl Strategy<Value = VectorSet> {
        proptest::collection::vec(proptest::collection::vec(-1.0_f32..1.0, dim), 0..12)
            .prop_map(VectorSet::new)
    }

    proptest! {
        #[test]
        fn length_is_reps_times_partitions_times_width(
            set in arb_set(5),
            reps in 1_usize..4,
            k in 0_u32..4,
            width in 1_usize..6,
        ) {
            let config = EncodingConfig::new(5)
                .with_repetitions(reps)
                .with_simhash_projections(k)
                .with_ams_sketch(width);
            let encoder = FdeEncoder::new(config).unwrap();
            let encoding = encoder.encode_query(&set).unwrap();
            prop_assert_eq!(encoding.len(), reps * (1 << k) * width);
        }

        #[test]
        fn encoding_is_deterministic(set in arb_set(6), seed in any::<u64>()) {
            let config = EncodingConfig::new(6)
                .with_repetitions(2)
                .with_simhash_projections(3)
                .with_seed(seed);
            let a = FdeEncoder::new(config.clone()).unwrap().encode_document(&set).unwrap();
            let b = FdeEncoder::new(config).unwrap().encode_document(&set).unwrap();
            prop_assert_eq!(a, b);
        }
    }
}
