use strata_types::{Compression, Digest};

/// Errors from blob-chain materialization.
///
/// `Clone` is load-bearing: concurrent callers deduplicated onto one
/// in-flight computation all observe the same error value, so collaborator
/// failures are carried as rendered context rather than source chains.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ChainError {
    /// The caller's lease capability is not active. A contract violation,
    /// not a runtime condition to recover from: without a lease, a freshly
    /// created blob could be collected before anything references it.
    #[error("missing lease requirement for {operation}")]
    MissingLease { operation: &'static str },

    /// The reference has no blob and creation was not requested. Callers
    /// may treat this specially, e.g. to keep a lazy reference lazy.
    #[error("no blobs available for snapshot {reference}")]
    NoBlobs { reference: String },

    /// A merge reference was constructed with no inputs.
    #[error("merge reference {reference} has no inputs")]
    EmptyMerge { reference: String },

    #[error("unrecognized layer compression type: {value:?}")]
    UnrecognizedCompression { value: String },

    /// The blob's uncompressed-content digest cannot be determined: no
    /// content-store label, and the media type is not the canonical
    /// uncompressed layer type.
    #[error("cannot determine uncompressed digest of blob {digest} ({media_type})")]
    UnresolvableUncompressedDigest { digest: Digest, media_type: String },

    /// The overlay fast path found no overlay-shaped mounts and fallback is
    /// disabled.
    #[error("overlay mounts not detected for {reference}")]
    FastPathUnavailable { reference: String },

    /// The overlay fast path failed and fallback is disabled.
    #[error("failed to compute overlay diff for {reference}: {message}")]
    FastPathFailed { reference: String, message: String },

    /// A parent lacks the chain identity this reference needs.
    #[error("failed to chain {reference}: ancestor {parent} is not addressable")]
    NonAddressableAncestor { reference: String, parent: String },

    #[error("failed to convert {reference} to {target} compression: {message}")]
    ConversionFailed {
        reference: String,
        target: Compression,
        message: String,
    },

    #[error("failed to fetch lazy blob for {reference}: {message}")]
    FetchFailed { reference: String, message: String },

    /// A collaborator call failed; carries the operation and reference for
    /// diagnosis without inspecting collaborator internals.
    #[error("{operation} failed for {reference}: {message}")]
    Collaborator {
        operation: &'static str,
        reference: String,
        message: String,
    },

    /// A traversal task died without producing a result.
    #[error("blob chain task failed: {0}")]
    TaskFailure(String),
}

impl ChainError {
    /// Wrap a collaborator failure with the operation and reference that
    /// drove it.
    pub(crate) fn collaborator(
        operation: &'static str,
        reference: &str,
        err: impl std::fmt::Display,
    ) -> Self {
        Self::Collaborator {
            operation,
            reference: reference.to_string(),
            message: err.to_string(),
        }
    }
}

/// Result alias for blob-chain operations.
pub type ChainResult<T> = Result<T, ChainError>;
