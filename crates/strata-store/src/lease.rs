use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tracing::debug;

use crate::error::StoreResult;

/// A garbage-collection retention capability.
///
/// Blob materialization requires an active lease for its whole duration:
/// a freshly created blob that nothing references yet would otherwise be a
/// candidate for concurrent collection. The lease is passed explicitly to
/// every call that creates or commits a blob; releasing it makes the handle
/// detectably inactive.
#[derive(Clone)]
pub struct Lease {
    id: String,
    active: Arc<AtomicBool>,
}

impl Lease {
    /// Create an active lease with the given id.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            active: Arc::new(AtomicBool::new(true)),
        }
    }

    /// The lease id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns `true` until [`Lease::release`] is called on any clone.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Mark the lease inactive. Resources pinned under it become eligible
    /// for collection; that collection itself happens elsewhere.
    pub fn release(&self) {
        self.active.store(false, Ordering::SeqCst);
        debug!(lease = %self.id, "lease released");
    }
}

impl fmt::Debug for Lease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

/// The kind of resource pinned under a lease.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// A content-store blob, identified by digest.
    Content,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Content => f.write_str("content"),
        }
    }
}

/// A resource pinned under a lease.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Resource {
    pub id: String,
    pub kind: ResourceKind,
}

impl Resource {
    /// A content-store blob resource.
    pub fn content(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: ResourceKind::Content,
        }
    }
}

/// Lease bookkeeping collaborator.
///
/// The collection policy behind it is out of scope here; this core only
/// registers resources so they survive collection for as long as their
/// lease does.
#[async_trait]
pub trait LeaseManager: Send + Sync {
    /// Pin `resource` under the lease with id `lease_id`. Idempotent.
    async fn add_resource(&self, lease_id: &str, resource: Resource) -> StoreResult<()>;
}

/// In-memory lease bookkeeping for tests and embedding.
#[derive(Debug, Default)]
pub struct InMemoryLeaseManager {
    resources: RwLock<HashMap<String, Vec<Resource>>>,
}

impl InMemoryLeaseManager {
    /// Create a new empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resources currently pinned under a lease id.
    pub fn resources(&self, lease_id: &str) -> Vec<Resource> {
        self.resources
            .read()
            .expect("lock poisoned")
            .get(lease_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl LeaseManager for InMemoryLeaseManager {
    async fn add_resource(&self, lease_id: &str, resource: Resource) -> StoreResult<()> {
        let mut resources = self.resources.write().expect("lock poisoned");
        let pinned = resources.entry(lease_id.to_string()).or_default();
        if !pinned.contains(&resource) {
            debug!(lease = lease_id, resource = %resource.id, "pinned lease resource");
            pinned.push(resource);
        }
        Ok(())
    }
}
