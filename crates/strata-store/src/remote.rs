use async_trait::async_trait;

use strata_types::Descriptor;

use crate::content::ContentStore;
use crate::error::StoreResult;

/// Fetches a lazy reference's blob into the local content store.
///
/// A lazy reference has a committed blob digest whose bytes are not locally
/// present. The transport behind this trait (registry session, peer pull) is
/// out of scope; this core only calls it when an operation genuinely needs
/// the bytes, e.g. before a compression conversion.
#[async_trait]
pub trait RemoteBlobProvider: Send + Sync {
    /// Make the blob described by `desc` locally present in `store`.
    /// Idempotent: a no-op if the blob is already present.
    async fn fetch(&self, store: &dyn ContentStore, desc: &Descriptor) -> StoreResult<()>;
}
