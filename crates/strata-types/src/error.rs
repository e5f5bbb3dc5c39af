use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("digest is missing an algorithm prefix: {0:?}")]
    MissingAlgorithm(String),

    #[error("unsupported digest algorithm: {0:?}")]
    UnsupportedAlgorithm(String),

    #[error("invalid digest encoding length: expected {expected} hex characters, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("invalid hex in digest: {0:?}")]
    InvalidHex(String),
}
