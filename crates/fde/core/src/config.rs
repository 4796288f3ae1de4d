//! Encoding configuration and its fingerprint.

use crate::{FdeError, Result};

/// Largest supported number of SimHash projections (2^31 partitions).
pub const MAX_SIMHASH_PROJECTIONS: u32 = 31;

/// Fill value used by [`EmptyPartitionFill::epsilon`].
pub const DEFAULT_FILL_EPSILON: f32 = 1e-4;

/// How the vectors that land in one partition are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncodingType {
    /// Raw per-partition sums. Used for queries.
    #[default]
    Sum,
    /// Per-partition centroids. Used for documents.
    Average,
}

/// Per-vector dimensionality reduction applied before aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectionType {
    /// Vectors are aggregated unchanged.
    #[default]
    Identity,
    /// Sparse ±1 random projection down to the projection dimension.
    AmsSketch,
}

/// Value written into partitions that received no vectors.
#[derive(Debug, Clone, Copy, PartialEq, Default, serde::Serialize, serde::Deserialize)]
#[serde(tag = "policy", content = "value", rename_all = "snake_case")]
pub enum EmptyPartitionFill {
    /// Leave empty partitions as zero vectors.
    #[default]
    Zero,
    /// Set every coordinate of an empty partition to this constant.
    Constant(f32),
}

impl EmptyPartitionFill {
    /// Constant fill with [`DEFAULT_FILL_EPSILON`].
    #[must_use]
    pub fn epsilon() -> Self {
        Self::Constant(DEFAULT_FILL_EPSILON)
    }

    /// The value an empty partition coordinate takes under this policy.
    #[must_use]
    pub fn value(self) -> f32 {
        match self {
            Self::Zero => 0.0,
            Self::Constant(value) => value,
        }
    }
}

/// Parameters of a fixed dimensional encoding.
///
/// Queries and documents are only comparable when encoded with configs that
/// agree on everything except [`EncodingType`]; see [`EncodingConfig::fingerprint`].
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct EncodingConfig {
    /// Dimension D of every input vector.
    pub dimension: usize,
    /// Number of independent repetitions R.
    pub num_repetitions: usize,
    /// Number of SimHash hyperplanes k; there are 2^k partitions.
    pub num_simhash_projections: u32,
    /// Base seed; repetition r uses `seed + r`.
    pub seed: u64,
    /// Aggregation used when the caller does not force a query or document mode.
    pub encoding_type: EncodingType,
    /// Per-vector projection.
    pub projection_type: ProjectionType,
    /// Projection dimension P for [`ProjectionType::AmsSketch`]. Defaults to D.
    /// Ignored for [`ProjectionType::Identity`].
    pub projection_dimension: Option<usize>,
    /// Policy for partitions that received no vectors.
    pub empty_partition_fill: EmptyPartitionFill,
    /// Optional count-sketch compression of the concatenated encoding.
    pub final_projection_dimension: Option<usize>,
}

impl Default for EncodingConfig {
    fn default() -> Self {
        Self {
            dimension: 128,
            num_repetitions: 20,
            num_simhash_projections: 5,
            seed: 42,
            encoding_type: EncodingType::Sum,
            projection_type: ProjectionType::Identity,
            projection_dimension: None,
            empty_partition_fill: EmptyPartitionFill::Zero,
            final_projection_dimension: None,
        }
    }
}

impl EncodingConfig {
    /// Config with the given input dimension and defaults for everything else.
    #[must_use]
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_repetitions(mut self, num_repetitions: usize) -> Self {
        self.num_repetitions = num_repetitions;
        self
    }

    #[must_use]
    pub fn with_simhash_projections(mut self, num_simhash_projections: u32) -> Self {
        self.num_simhash_projections = num_simhash_projections;
        self
    }

    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    #[must_use]
    pub fn with_encoding_type(mut self, encoding_type: EncodingType) -> Self {
        self.encoding_type = encoding_type;
        self
    }

    /// Use an AMS sketch projection down to `projection_dimension`.
    #[must_use]
    pub fn with_ams_sketch(mut self, projection_dimension: usize) -> Self {
        self.projection_type = ProjectionType::AmsSketch;
        self.projection_dimension = Some(projection_dimension);
        self
    }

    #[must_use]
    pub fn with_empty_partition_fill(mut self, fill: EmptyPartitionFill) -> Self {
        self.empty_partition_fill = fill;
        self
    }

    #[must_use]
    pub fn with_final_projection(mut self, final_projection_dimension: usize) -> Self {
        self.final_projection_dimension = Some(final_projection_dimension);
        self
    }

    /// Check every constraint. Encoders refuse to run on a config that fails this.
    pub fn validate(&self) -> Result<()> {
        if self.dimension == 0 {
            return Err(FdeError::configuration("dimension must be positive"));
        }
        if self.num_repetitions == 0 {
            return Err(FdeError::configuration(
                "number of repetitions must be positive",
            ));
        }
        if self.num_simhash_projections > MAX_SIMHASH_PROJECTIONS {
            return Err(FdeError::configuration(format!(
                "number of simhash projections must be in [0, {MAX_SIMHASH_PROJECTIONS}], got {}",
                self.num_simhash_projections
            )));
        }
        if self.projection_type == ProjectionType::AmsSketch
            && self.projection_dimension == Some(0)
        {
            return Err(FdeError::configuration(
                "projection dimension must be positive for AMS sketch projection",
            ));
        }
        if self.final_projection_dimension == Some(0) {
            return Err(FdeError::configuration(
                "final projection dimension must be positive when set",
            ));
        }
        if let EmptyPartitionFill::Constant(value) = self.empty_partition_fill
            && !value.is_finite()
        {
            return Err(FdeError::configuration(format!(
                "empty partition fill must be finite, got {value}"
            )));
        }

        self.repetition_len()
            .and_then(|len| len.checked_mul(self.num_repetitions))
            .ok_or_else(|| FdeError::configuration("encoding length overflows usize"))?;

        Ok(())
    }

    /// Number of partitions, 2^k.
    #[must_use]
    pub fn num_partitions(&self) -> usize {
        1_usize << self.num_simhash_projections
    }

    /// Width P of each partition block.
    #[must_use]
    pub fn projection_dim(&self) -> usize {
        match self.projection_type {
            ProjectionType::Identity => self.dimension,
            ProjectionType::AmsSketch => self.projection_dimension.unwrap_or(self.dimension),
        }
    }

    /// Length of one repetition's block, 2^k × P, or `None` on overflow.
    #[must_use]
    pub fn repetition_len(&self) -> Option<usize> {
        self.num_partitions().checked_mul(self.projection_dim())
    }

    /// Length of the concatenated encoding before any final projection, R × 2^k × P.
    ///
    /// Only meaningful on a validated config.
    #[must_use]
    pub fn concatenated_len(&self) -> usize {
        self.num_partitions() * self.projection_dim() * self.num_repetitions
    }

    /// Length of the encodings this config produces.
    #[must_use]
    pub fn encoding_len(&self) -> usize {
        self.final_projection_dimension
            .unwrap_or_else(|| self.concatenated_len())
    }

    /// Fingerprint of every field that affects the encoded values.
    ///
    /// [`EncodingType`] is excluded: a query (sum) and a document (average)
    /// encoded under otherwise identical configs share a fingerprint because
    /// they are meant to be compared.
    #[must_use]
    pub fn fingerprint(&self) -> ConfigFingerprint {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"fde-config-v1");
        hasher.update(&(self.dimension as u64).to_le_bytes());
        hasher.update(&(self.num_repetitions as u64).to_le_bytes());
        hasher.update(&self.num_simhash_projections.to_le_bytes());
        hasher.update(&self.seed.to_le_bytes());
        hasher.update(&[match self.projection_type {
            ProjectionType::Identity => 0,
            ProjectionType::AmsSketch => 1,
        }]);
        hasher.update(&(self.projection_dim() as u64).to_le_bytes());
        match self.empty_partition_fill {
            EmptyPartitionFill::Zero => {
                hasher.update(&[0]);
            }
            EmptyPartitionFill::Constant(value) => {
                hasher.update(&[1]);
                hasher.update(&value.to_bits().to_le_bytes());
            }
        }
        let final_dim = self.final_projection_dimension.map_or(0, |d| d as u64);
        hasher.update(&final_dim.to_le_bytes());
        ConfigFingerprint(*hasher.finalize().as_bytes())
    }
}

/// A blake3 digest identifying encodings that are mutually comparable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConfigFingerprint(pub [u8; 32]);

impl ConfigFingerprint {
    /// Get the fingerprint as a hex string.
    #[must_use]
    pub fn to_hex(self) -> String {
        self.to_string()
    }
}

impl std::fmt::Display for ConfigFingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for b in self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}
