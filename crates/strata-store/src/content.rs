use std::collections::BTreeMap;

use async_trait::async_trait;

use strata_types::Digest;

use crate::error::StoreResult;

/// Metadata the content store holds for a blob.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContentInfo {
    pub digest: Digest,
    pub size: u64,
    /// String labels attached to the blob. The differ records the
    /// uncompressed-content digest here (see
    /// [`strata_types::UNCOMPRESSED_LABEL`]).
    pub labels: BTreeMap<String, String>,
}

/// Content-addressed blob storage.
///
/// Implementations must satisfy:
/// - Blobs are immutable once written; the same data always produces the
///   same digest.
/// - Writes are idempotent. Labels supplied on a repeated write are merged
///   into the existing label set.
/// - Concurrent reads are always safe.
/// - All I/O errors are propagated, never silently ignored.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Metadata for a blob. Fails with [`crate::StoreError::NotFound`] if
    /// the blob is not locally present.
    async fn info(&self, digest: &Digest) -> StoreResult<ContentInfo>;

    /// Full contents of a blob.
    async fn read(&self, digest: &Digest) -> StoreResult<Vec<u8>>;

    /// Write a blob and return its digest. Idempotent.
    async fn write(
        &self,
        data: Vec<u8>,
        labels: BTreeMap<String, String>,
    ) -> StoreResult<Digest>;
}
