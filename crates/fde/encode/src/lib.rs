//! Fixed dimensional encoding of multi-vector sets.
//!
//! Each repetition draws k random hyperplanes, assigns every vector to one of
//! 2^k partitions by its sign pattern, optionally projects it to P dimensions
//! with an AMS sketch, and aggregates each partition: sums for queries,
//! centroids for documents. The R repetition blocks are concatenated.
//!
//! The dot product of a query encoding and a document encoding approximates
//! the Chamfer similarity of the two sets:
//!
//! Formula: sum over q in Q of max over d in D of <q, d>
//!
//! Final dimension: R * 2^k * P

pub mod aggregate;
pub mod chamfer;
pub mod encoder;
pub mod partition;
pub mod projection;
pub mod projector;
pub mod similarity;
pub mod sketch;

pub use aggregate::{Aggregation, aggregate};
pub use chamfer::chamfer_similarity;
pub use encoder::FdeEncoder;
pub use partition::{gray_code_fold, partition_index};
pub use projection::{MatrixKey, MatrixKind, ProjectionCache, generate_matrix};
pub use projector::Projector;
pub use similarity::{rank, similarity, similarity_batch, similarity_slices};

use fde_core::{Encoding, EncodingConfig, Result, VectorSet};

/// Encode a vector set with the config's own encoding type.
///
/// Builds a throwaway [`FdeEncoder`]; keep an encoder around when encoding
/// many sets so projection matrices are generated once.
pub fn encode(vector_set: &VectorSet, config: &EncodingConfig) -> Result<Encoding> {
    FdeEncoder::new(config.clone())?.encode(vector_set)
}

/// Encode a query vector set (per-partition sums).
pub fn encode_query(vector_set: &VectorSet, config: &EncodingConfig) -> Result<Encoding> {
    FdeEncoder::new(config.clone())?.encode_query(vector_set)
}

/// Encode a document vector set (per-partition averages).
pub fn encode_document(vector_set: &VectorSet, config: &EncodingConfig) -> Result<Encoding> {
    FdeEncoder::new(config.clone())?.encode_document(vector_set)
}
