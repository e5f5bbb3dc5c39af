use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use strata_types::Digest;

use crate::error::StoreResult;

/// The blob-side metadata of a materialized reference, persisted as one
/// atomic record: either all four fields are durable or none are.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobMetadata {
    pub diff_id: Digest,
    pub blob: Digest,
    pub media_type: String,
    pub blob_size: u64,
}

/// The derived chain identities of a reference, persisted as one atomic
/// record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainMetadata {
    pub chain_id: Digest,
    pub blob_chain_id: Digest,
}

/// Durable per-reference metadata collaborator.
///
/// The persistence engine behind it (key/value store, database) is out of
/// scope; the contract this core relies on is that each `commit_*` call is
/// atomic and that committed records are readable back.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Durably record a reference's blob metadata in one atomic write.
    async fn commit_blob(&self, reference: &str, metadata: &BlobMetadata) -> StoreResult<()>;

    /// Durably record a reference's chain identities in one atomic write.
    async fn commit_chain(&self, reference: &str, metadata: &ChainMetadata) -> StoreResult<()>;

    /// Read back a reference's blob metadata, if committed.
    async fn blob_metadata(&self, reference: &str) -> StoreResult<Option<BlobMetadata>>;

    /// Read back a reference's chain identities, if committed.
    async fn chain_metadata(&self, reference: &str) -> StoreResult<Option<ChainMetadata>>;
}

/// In-memory metadata store for tests and embedding.
#[derive(Debug, Default)]
pub struct InMemoryMetadataStore {
    blobs: RwLock<HashMap<String, BlobMetadata>>,
    chains: RwLock<HashMap<String, ChainMetadata>>,
}

impl InMemoryMetadataStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetadataStore for InMemoryMetadataStore {
    async fn commit_blob(&self, reference: &str, metadata: &BlobMetadata) -> StoreResult<()> {
        debug!(reference, blob = %metadata.blob.short(), "committed blob metadata");
        self.blobs
            .write()
            .expect("lock poisoned")
            .insert(reference.to_string(), metadata.clone());
        Ok(())
    }

    async fn commit_chain(&self, reference: &str, metadata: &ChainMetadata) -> StoreResult<()> {
        debug!(reference, chain_id = %metadata.chain_id.short(), "committed chain metadata");
        self.chains
            .write()
            .expect("lock poisoned")
            .insert(reference.to_string(), metadata.clone());
        Ok(())
    }

    async fn blob_metadata(&self, reference: &str) -> StoreResult<Option<BlobMetadata>> {
        Ok(self
            .blobs
            .read()
            .expect("lock poisoned")
            .get(reference)
            .cloned())
    }

    async fn chain_metadata(&self, reference: &str) -> StoreResult<Option<ChainMetadata>> {
        Ok(self
            .chains
            .read()
            .expect("lock poisoned")
            .get(reference)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blob_record() -> BlobMetadata {
        BlobMetadata {
            diff_id: Digest::from_bytes(b"diff"),
            blob: Digest::from_bytes(b"blob"),
            media_type: "application/vnd.oci.image.layer.v1.tar+gzip".to_string(),
            blob_size: 4,
        }
    }

    #[tokio::test]
    async fn commit_and_read_blob_metadata() {
        let store = InMemoryMetadataStore::new();
        let record = blob_record();
        store.commit_blob("ref-1", &record).await.unwrap();
        assert_eq!(store.blob_metadata("ref-1").await.unwrap(), Some(record));
        assert_eq!(store.blob_metadata("ref-2").await.unwrap(), None);
    }

    #[tokio::test]
    async fn commit_and_read_chain_metadata() {
        let store = InMemoryMetadataStore::new();
        let record = ChainMetadata {
            chain_id: Digest::from_bytes(b"chain"),
            blob_chain_id: Digest::from_bytes(b"blob chain"),
        };
        store.commit_chain("ref-1", &record).await.unwrap();
        assert_eq!(store.chain_metadata("ref-1").await.unwrap(), Some(record));
        assert_eq!(store.chain_metadata("ref-2").await.unwrap(), None);
    }

    #[test]
    fn records_serde_roundtrip() {
        let record = blob_record();
        let json = serde_json::to_string(&record).unwrap();
        let parsed: BlobMetadata = serde_json::from_str(&json).unwrap();
        assert_eq!(record, parsed);
    }
}
