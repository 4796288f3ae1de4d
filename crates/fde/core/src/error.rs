//! Error types shared by every encoding crate.

/// Convenience alias for results carrying an [`FdeError`].
pub type Result<T, E = FdeError> = std::result::Result<T, E>;

/// Errors raised while configuring, computing or comparing encodings.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FdeError {
    /// The encoding configuration is invalid. Nothing was computed.
    #[error("invalid encoding config: {message}")]
    Configuration {
        /// What is wrong with the configuration.
        message: String,
    },

    /// A vector or encoding has the wrong length.
    #[error("dimension mismatch: expected {expected}, actual {actual}")]
    DimensionMismatch {
        /// Length required by the configuration or the other operand.
        expected: usize,
        /// Length actually provided.
        actual: usize,
    },

    /// A projection matrix was requested with an empty shape.
    #[error("invalid matrix shape {rows}x{cols}: both dimensions must be positive")]
    InvalidShape {
        /// Requested row count.
        rows: usize,
        /// Requested column count.
        cols: usize,
    },

    /// A batch was cancelled before every item was processed.
    #[error("batch cancelled after {completed} of {total} items")]
    Cancelled {
        /// Items processed before cancellation was observed.
        completed: usize,
        /// Items in the batch.
        total: usize,
    },
}

impl FdeError {
    /// Create a Configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a DimensionMismatch error.
    #[must_use]
    pub fn dimension_mismatch(expected: usize, actual: usize) -> Self {
        Self::DimensionMismatch { expected, actual }
    }

    /// Whether this error concerns a single input item rather than the whole call.
    #[must_use]
    pub fn is_per_item(&self) -> bool {
        matches!(self, Self::DimensionMismatch { .. })
    }
}
