use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use async_trait::async_trait;

use strata_types::Digest;

use crate::content::{ContentInfo, ContentStore};
use crate::error::{StoreError, StoreResult};

#[derive(Clone, Debug)]
struct StoredBlob {
    data: Vec<u8>,
    labels: BTreeMap<String, String>,
}

/// In-memory, HashMap-based content store.
///
/// Intended for tests and embedding. All blobs are held in memory behind a
/// `RwLock` for safe concurrent access.
pub struct InMemoryContentStore {
    blobs: RwLock<HashMap<Digest, StoredBlob>>,
}

impl InMemoryContentStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self {
            blobs: RwLock::new(HashMap::new()),
        }
    }

    /// Number of blobs currently stored.
    pub fn len(&self) -> usize {
        self.blobs.read().expect("lock poisoned").len()
    }

    /// Returns `true` if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.blobs.read().expect("lock poisoned").is_empty()
    }

    /// Returns `true` if a blob with this digest is present.
    pub fn contains(&self, digest: &Digest) -> bool {
        self.blobs.read().expect("lock poisoned").contains_key(digest)
    }

    /// Remove a blob. Returns `true` if it existed. Test helper for
    /// simulating lazy (not-yet-fetched) content.
    pub fn remove(&self, digest: &Digest) -> bool {
        self.blobs
            .write()
            .expect("lock poisoned")
            .remove(digest)
            .is_some()
    }
}

impl Default for InMemoryContentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryContentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryContentStore")
            .field("blob_count", &self.len())
            .finish()
    }
}

#[async_trait]
impl ContentStore for InMemoryContentStore {
    async fn info(&self, digest: &Digest) -> StoreResult<ContentInfo> {
        let blobs = self.blobs.read().expect("lock poisoned");
        let blob = blobs
            .get(digest)
            .ok_or_else(|| StoreError::NotFound(digest.clone()))?;
        Ok(ContentInfo {
            digest: digest.clone(),
            size: blob.data.len() as u64,
            labels: blob.labels.clone(),
        })
    }

    async fn read(&self, digest: &Digest) -> StoreResult<Vec<u8>> {
        let blobs = self.blobs.read().expect("lock poisoned");
        blobs
            .get(digest)
            .map(|blob| blob.data.clone())
            .ok_or_else(|| StoreError::NotFound(digest.clone()))
    }

    async fn write(
        &self,
        data: Vec<u8>,
        labels: BTreeMap<String, String>,
    ) -> StoreResult<Digest> {
        let digest = Digest::from_bytes(&data);
        let mut blobs = self.blobs.write().expect("lock poisoned");
        blobs
            .entry(digest.clone())
            .and_modify(|existing| existing.labels.extend(labels.clone()))
            .or_insert(StoredBlob { data, labels });
        Ok(digest)
    }
}
