//! Core types for fixed dimensional encodings.
//!
//! A query or document is a [`VectorSet`]: one embedding per token. An
//! [`Encoding`] is the single fixed-length vector it is transformed into, so
//! that a dot product between a query encoding and a document encoding
//! approximates the Chamfer similarity between the two sets.

mod config;
mod error;

pub use config::{
    ConfigFingerprint, DEFAULT_FILL_EPSILON, EmptyPartitionFill, EncodingConfig, EncodingType,
    MAX_SIMHASH_PROJECTIONS, ProjectionType,
};
pub use error::{FdeError, Result};

/// A token vector - a single embedding of dimension D.
pub type TokenVector = Vec<f32>;

/// A borrowed `[num_vectors, dimension]` view of a vector set.
pub type VectorSetView<'a> = ndarray::ArrayView2<'a, f32>;

/// A multi-vector representation of one query or document.
///
/// Vectors are kept in input order. An empty set is valid and encodes to a
/// well-defined output.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct VectorSet {
    vectors: Vec<TokenVector>,
}

impl VectorSet {
    /// Create a vector set. Dimensions are checked when the set is encoded.
    #[must_use]
    pub fn new(vectors: Vec<TokenVector>) -> Self {
        Self { vectors }
    }

    /// Build a set from a row-major buffer of `num_vectors * dimension` values.
    pub fn from_flat(data: &[f32], dimension: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(FdeError::configuration("dimension must be positive"));
        }
        if data.len() % dimension != 0 {
            return Err(FdeError::dimension_mismatch(
                data.len().next_multiple_of(dimension),
                data.len(),
            ));
        }
        Ok(Self {
            vectors: data.chunks_exact(dimension).map(<[f32]>::to_vec).collect(),
        })
    }

    /// Number of vectors in this set.
    #[must_use]
    pub fn num_vectors(&self) -> usize {
        self.vectors.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// The vectors in input order.
    #[must_use]
    pub fn vectors(&self) -> &[TokenVector] {
        &self.vectors
    }

    pub fn iter(&self) -> impl Iterator<Item = &[f32]> {
        self.vectors.iter().map(Vec::as_slice)
    }

    /// Fail with the first vector whose length differs from `dimension`.
    pub fn check_dimension(&self, dimension: usize) -> Result<()> {
        match self.vectors.iter().find(|v| v.len() != dimension) {
            Some(bad) => Err(FdeError::dimension_mismatch(dimension, bad.len())),
            None => Ok(()),
        }
    }

    /// Copy the set into a `[num_vectors, dimension]` matrix after checking dimensions.
    pub fn to_array(&self, dimension: usize) -> Result<ndarray::Array2<f32>> {
        self.check_dimension(dimension)?;
        let flat: Vec<f32> = self.vectors.iter().flatten().copied().collect();
        ndarray::Array2::from_shape_vec((self.vectors.len(), dimension), flat)
            .map_err(|_| FdeError::dimension_mismatch(dimension, 0))
    }
}

impl From<Vec<TokenVector>> for VectorSet {
    fn from(vectors: Vec<TokenVector>) -> Self {
        Self::new(vectors)
    }
}

/// A fixed dimensional encoding.
///
/// Immutable once produced. The layout is repetition-major, then partition,
/// then coordinate, which is what makes independently produced encodings
/// comparable.
#[derive(Debug, Clone, PartialEq)]
pub struct Encoding {
    values: Vec<f32>,
}

impl Encoding {
    /// Wrap encoded values.
    #[must_use]
    pub fn from_vec(values: Vec<f32>) -> Self {
        Self { values }
    }

    #[must_use]
    pub fn as_slice(&self) -> &[f32] {
        &self.values
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[must_use]
    pub fn into_vec(self) -> Vec<f32> {
        self.values
    }
}

impl AsRef<[f32]> for Encoding {
    fn as_ref(&self) -> &[f32] {
        &self.values
    }
}

/// A search result with score and document identifier.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    /// The document identifier.
    pub doc_id: String,
    /// The relevance score.
    pub score: f32,
}

/// A ranked list of search results.
pub type SearchResults = Vec<SearchResult>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vector_set_dimension_check() {
        let set = VectorSet::new(vec![vec![1.0, 2.0], vec![3.0, 4.0, 5.0]]);
        assert_eq!(set.num_vectors(), 2);
        assert_eq!(
            set.check_dimension(2),
            Err(FdeError::dimension_mismatch(2, 3))
        );
        assert!(set.to_array(2).is_err());
    }

    #[test]
    fn test_empty_set_is_valid() {
        let set = VectorSet::default();
        assert!(set.is_empty());
        set.check_dimension(16).unwrap();
        let array = set.to_array(16).unwrap();
        assert_eq!(array.shape(), &[0, 16]);
    }

    #[test]
    fn test_from_flat() {
        let set = VectorSet::from_flat(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], 3).unwrap();
        assert_eq!(set.vectors(), &[vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]]);
        assert!(VectorSet::from_flat(&[1.0, 2.0, 3.0], 2).is_err());
        assert!(VectorSet::from_flat(&[], 0).is_err());
    }

    #[test]
    fn test_to_array_row_major() {
        let set = VectorSet::new(vec![vec![1.0, 2.0], vec![3.0, 4.0]]);
        let array = set.to_array(2).unwrap();
        assert_eq!(array[[1, 0]], 3.0);
        assert_eq!(array[[0, 1]], 2.0);
    }

    #[test]
    fn test_vector_set_json_is_nested_arrays() {
        let set: VectorSet = serde_json::from_str("[[1.0, 0.0], [0.0, 1.0]]").unwrap();
        assert_eq!(set.num_vectors(), 2);
    }
}
