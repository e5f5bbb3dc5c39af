use async_trait::async_trait;

use strata_types::Descriptor;

use crate::compress::Compressor;
use crate::error::DiffResult;
use crate::mount::Mount;

/// Options for a generic diff computation.
pub struct DiffOptions {
    /// Media type the produced blob must carry.
    pub media_type: String,
    /// Reference identifier, used by the differ as a diff-session label.
    pub reference: String,
    /// Optional streaming compressor applied while writing the blob. When
    /// absent, the differ applies whatever encoding the media type implies
    /// (none, or implicit gzip).
    pub compressor: Option<Compressor>,
}

impl std::fmt::Debug for DiffOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiffOptions")
            .field("media_type", &self.media_type)
            .field("reference", &self.reference)
            .field("compressor", &self.compressor.is_some())
            .finish()
    }
}

/// The generic diff collaborator.
///
/// Compares two mount sets, writes the difference to the content store as a
/// compressed blob (recording the uncompressed-content digest as a blob
/// label), and returns the blob's descriptor.
#[async_trait]
pub trait Differ: Send + Sync {
    async fn compare(
        &self,
        lower: &[Mount],
        upper: &[Mount],
        options: DiffOptions,
    ) -> DiffResult<Descriptor>;
}
