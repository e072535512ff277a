//! Error types for Strata.
//!
//! This module provides a unified error type for all index operations.
//! Error codes follow the pattern `STRATA-XXX` for easy debugging.

use thiserror::Error;

/// Result type alias for Strata operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while building, querying or persisting an index.
#[derive(Error, Debug)]
pub enum Error {
    /// Input stream is truncated or the paired streams disagree (STRATA-001).
    #[error("[STRATA-001] Corrupt input: {0}")]
    CorruptInput(String),

    /// Persisted index data is malformed (STRATA-002).
    ///
    /// Indicates a damaged or foreign index file; the index must be rebuilt.
    #[error("[STRATA-002] Corrupt index: {0}")]
    CorruptIndex(String),

    /// The coarse quantizer returned fewer centroids than requested (STRATA-003).
    #[error("[STRATA-003] Insufficient centroids: requested {requested}, quantizer returned {returned}")]
    InsufficientCentroids {
        /// Number of neighbor centroids needed.
        requested: usize,
        /// Number the quantizer actually produced.
        returned: usize,
    },

    /// A product quantizer was used before training (STRATA-004).
    #[error("[STRATA-004] Product quantizer is not trained")]
    PqNotTrained,

    /// Not enough training rows to fit a codebook (STRATA-005).
    #[error("[STRATA-005] Insufficient training data: need at least {required} rows, got {actual}")]
    TrainingDataInsufficient {
        /// Minimum number of training rows the codebook needs.
        required: usize,
        /// Number of rows actually collected.
        actual: usize,
    },

    /// Vector width does not match the index dimension (STRATA-006).
    #[error("[STRATA-006] Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Expected dimension.
        expected: usize,
        /// Actual dimension.
        actual: usize,
    },

    /// A parameter is outside its valid range (STRATA-007).
    #[error("[STRATA-007] Parameter '{param}' out of range: {message}")]
    ParameterOutOfRange {
        /// Name of the offending parameter.
        param: &'static str,
        /// What went wrong.
        message: String,
    },

    /// IO error (STRATA-008).
    #[error("[STRATA-008] IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error (STRATA-009).
    #[error("[STRATA-009] Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Returns the stable error code (e.g., "STRATA-001").
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::CorruptInput(_) => "STRATA-001",
            Self::CorruptIndex(_) => "STRATA-002",
            Self::InsufficientCentroids { .. } => "STRATA-003",
            Self::PqNotTrained => "STRATA-004",
            Self::TrainingDataInsufficient { .. } => "STRATA-005",
            Self::DimensionMismatch { .. } => "STRATA-006",
            Self::ParameterOutOfRange { .. } => "STRATA-007",
            Self::Io(_) => "STRATA-008",
            Self::Config(_) => "STRATA-009",
        }
    }

    /// Returns true if the caller can recover by fixing its input.
    ///
    /// Corruption and IO failures are not recoverable: the index object
    /// must be discarded and rebuilt from source data.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            Self::CorruptInput(_) | Self::CorruptIndex(_) | Self::Io(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_are_stable() {
        assert_eq!(Error::PqNotTrained.code(), "STRATA-004");
        assert_eq!(
            Error::DimensionMismatch {
                expected: 128,
                actual: 96
            }
            .code(),
            "STRATA-006"
        );
    }

    #[test]
    fn corruption_is_not_recoverable() {
        assert!(!Error::CorruptIndex("bad size prefix".into()).is_recoverable());
        assert!(Error::ParameterOutOfRange {
            param: "k",
            message: "must be positive".into()
        }
        .is_recoverable());
    }

    #[test]
    fn messages_carry_the_code() {
        let err = Error::InsufficientCentroids {
            requested: 64,
            returned: 12,
        };
        let msg = err.to_string();
        assert!(msg.contains("STRATA-003"));
        assert!(msg.contains("64"));
    }
}
