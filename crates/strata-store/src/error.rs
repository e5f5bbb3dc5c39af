use strata_types::Digest;

/// Errors from storage collaborators.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The requested blob does not exist in the content store.
    #[error("blob not found: {0}")]
    NotFound(Digest),

    /// I/O error from the underlying storage backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failure reported by an external backend (remote provider, metadata
    /// engine) that has no more specific shape at this boundary.
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Result alias for storage operations.
pub type StoreResult<T> = Result<T, StoreError>;
