/// Errors from the differencing boundary.
#[derive(Debug, thiserror::Error)]
pub enum DiffError {
    /// The overlay-diff override value could not be parsed as a boolean.
    #[error("invalid overlay-diff override value: {0:?}")]
    InvalidOverlayOverride(String),

    /// Failure acquiring or mounting a snapshot's mount set.
    #[error("mount failed: {0}")]
    Mount(String),

    /// Failure from the diff computation itself.
    #[error("diff computation failed: {0}")]
    Compare(String),

    /// Failure finalizing a compression encoding after the diff.
    #[error("failed to finalize compression: {0}")]
    Finalize(String),

    /// I/O error from a compressor or the underlying subsystem.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for differencing operations.
pub type DiffResult<T> = Result<T, DiffError>;
