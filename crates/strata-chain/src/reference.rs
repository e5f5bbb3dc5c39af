//! Snapshot chain references.
//!
//! A [`Reference`] is an immutable node in a snapshot chain: a base layer,
//! a layer atop a single parent, or a merge of several chains. References
//! form a DAG -- the same ancestor may sit under many descendants -- so a
//! `Reference` is a cheaply cloneable shared handle and every clone sees
//! the same node state.
//!
//! Materialization state (blob digest, diffID, media type, size, chain
//! identities) is commit-once: written exactly once under the node's commit
//! lock, readable without it thereafter. The commit lock is asynchronous
//! because a commit spans collaborator I/O (lease registration, metadata
//! persistence) that must be serialized with the has-value check.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use tokio::sync::{Mutex, MutexGuard};
use tracing::debug;

use strata_store::{ContentStore, RemoteBlobProvider, StoreError};
use strata_types::{Compression, Descriptor, Digest, UNCOMPRESSED_LABEL};

use crate::error::{ChainError, ChainResult};

/// Layer type marker for Windows layer content.
pub const LAYER_TYPE_WINDOWS: &str = "windows";

/// The structural kind of a reference.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefKind {
    /// A layer with no ancestry.
    BaseLayer,
    /// A layer atop a single parent chain.
    Layer,
    /// An ordered merge of several chains.
    Merge,
}

impl fmt::Display for RefKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BaseLayer => f.write_str("base-layer"),
            Self::Layer => f.write_str("layer"),
            Self::Merge => f.write_str("merge"),
        }
    }
}

enum Parentage {
    None,
    Layer(Reference),
    Merge(Vec<Reference>),
}

/// Borrowed view of a reference's ancestry, for exhaustive dispatch.
pub(crate) enum ParentageRef<'a> {
    Base,
    Layer(&'a Reference),
    Merge(&'a [Reference]),
}

/// Commit-once materialization state plus the compression-variant registry.
#[derive(Default)]
struct RefState {
    blob: Option<Digest>,
    diff_id: Option<Digest>,
    media_type: Option<String>,
    blob_size: Option<u64>,
    chain_id: Option<Digest>,
    blob_chain_id: Option<Digest>,
    finalized: bool,
    layer_type: Option<String>,
    remote: Option<Arc<dyn RemoteBlobProvider>>,
    variants: BTreeMap<Compression, Descriptor>,
}

struct ReferenceInner {
    id: String,
    parentage: Parentage,
    state: RwLock<RefState>,
    /// Serializes commits, including the collaborator I/O inside them.
    commit_mu: Mutex<()>,
}

/// A shared handle to an immutable snapshot node.
#[derive(Clone)]
pub struct Reference {
    inner: Arc<ReferenceInner>,
}

impl Reference {
    fn with_parentage(id: impl Into<String>, parentage: Parentage) -> Self {
        Self {
            inner: Arc::new(ReferenceInner {
                id: id.into(),
                parentage,
                state: RwLock::new(RefState::default()),
                commit_mu: Mutex::new(()),
            }),
        }
    }

    /// A layer with no ancestry.
    pub fn base_layer(id: impl Into<String>) -> Self {
        Self::with_parentage(id, Parentage::None)
    }

    /// A layer atop `parent`'s chain.
    pub fn layer(id: impl Into<String>, parent: Reference) -> Self {
        Self::with_parentage(id, Parentage::Layer(parent))
    }

    /// An ordered merge of `inputs`. At least one input is required.
    pub fn merge(id: impl Into<String>, inputs: Vec<Reference>) -> ChainResult<Self> {
        let id = id.into();
        if inputs.is_empty() {
            return Err(ChainError::EmptyMerge { reference: id });
        }
        Ok(Self::with_parentage(id, Parentage::Merge(inputs)))
    }

    /// Stable identifier of this reference.
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// The structural kind of this reference.
    pub fn kind(&self) -> RefKind {
        match self.inner.parentage {
            Parentage::None => RefKind::BaseLayer,
            Parentage::Layer(_) => RefKind::Layer,
            Parentage::Merge(_) => RefKind::Merge,
        }
    }

    pub(crate) fn parentage(&self) -> ParentageRef<'_> {
        match &self.inner.parentage {
            Parentage::None => ParentageRef::Base,
            Parentage::Layer(parent) => ParentageRef::Layer(parent),
            Parentage::Merge(inputs) => ParentageRef::Merge(inputs),
        }
    }

    /// The single parent of a layer reference, if any.
    pub fn layer_parent(&self) -> Option<Reference> {
        match &self.inner.parentage {
            Parentage::Layer(parent) => Some(parent.clone()),
            _ => None,
        }
    }

    /// The ordered inputs of a merge reference; empty for other kinds.
    pub fn merge_inputs(&self) -> &[Reference] {
        match &self.inner.parentage {
            Parentage::Merge(inputs) => inputs,
            _ => &[],
        }
    }

    // ---------------------------------------------------------------
    // Upstream-set attributes
    // ---------------------------------------------------------------

    /// Record the snapshot's layer type (e.g. [`LAYER_TYPE_WINDOWS`]).
    /// Set by the snapshot manager at creation time.
    pub fn set_layer_type(&self, layer_type: impl Into<String>) {
        self.state_mut().layer_type = Some(layer_type.into());
    }

    /// The snapshot's layer type, if any.
    pub fn layer_type(&self) -> Option<String> {
        self.state().layer_type.clone()
    }

    /// Attach the provider that can fetch this reference's blob when it is
    /// lazy (committed digest, bytes not locally present).
    pub fn set_remote(&self, remote: Arc<dyn RemoteBlobProvider>) {
        self.state_mut().remote = Some(remote);
    }

    /// The remote blob provider, if any.
    pub fn remote(&self) -> Option<Arc<dyn RemoteBlobProvider>> {
        self.state().remote.clone()
    }

    /// Returns `true` if this chain contains Windows layer content anywhere.
    pub fn is_windows_chain(&self) -> bool {
        if self.layer_type().as_deref() == Some(LAYER_TYPE_WINDOWS) {
            return true;
        }
        match &self.inner.parentage {
            Parentage::None => false,
            Parentage::Layer(parent) => parent.is_windows_chain(),
            Parentage::Merge(inputs) => inputs.iter().any(Reference::is_windows_chain),
        }
    }

    // ---------------------------------------------------------------
    // Materialization state
    // ---------------------------------------------------------------

    /// The committed blob digest, if materialized.
    pub fn blob(&self) -> Option<Digest> {
        self.state().blob.clone()
    }

    /// The committed uncompressed-content digest, if materialized.
    pub fn diff_id(&self) -> Option<Digest> {
        self.state().diff_id.clone()
    }

    /// The committed blob media type, if materialized.
    pub fn media_type(&self) -> Option<String> {
        self.state().media_type.clone()
    }

    /// The committed blob size, if materialized.
    pub fn blob_size(&self) -> Option<u64> {
        self.state().blob_size
    }

    /// The committed chain identity, if computed.
    pub fn chain_id(&self) -> Option<Digest> {
        self.state().chain_id.clone()
    }

    /// The committed blob-chain identity, if computed.
    pub fn blob_chain_id(&self) -> Option<Digest> {
        self.state().blob_chain_id.clone()
    }

    /// The descriptor tracked for a compression variant, if any.
    pub fn compression_variant(&self, compression: Compression) -> Option<Descriptor> {
        self.state().variants.get(&compression).cloned()
    }

    /// All tracked compression variants.
    pub fn compression_variants(&self) -> BTreeMap<Compression, Descriptor> {
        self.state().variants.clone()
    }

    /// Returns `true` once any pending state transition has been finalized.
    pub fn is_finalized(&self) -> bool {
        self.state().finalized
    }

    /// The current descriptor of this reference's blob, with the diffID
    /// carried as the uncompressed annotation. Fails with
    /// [`ChainError::NoBlobs`] if no blob is committed.
    pub fn descriptor(&self) -> ChainResult<Descriptor> {
        let state = self.state();
        match (&state.blob, &state.media_type, state.blob_size, &state.diff_id) {
            (Some(blob), Some(media_type), Some(size), Some(diff_id)) => {
                Ok(Descriptor::new(blob.clone(), media_type.clone(), size)
                    .with_annotation(UNCOMPRESSED_LABEL, diff_id.as_str()))
            }
            _ => Err(ChainError::NoBlobs {
                reference: self.inner.id.clone(),
            }),
        }
    }

    /// Returns `true` if this reference has a committed blob whose bytes are
    /// not locally present in `store`.
    pub async fn is_lazy(&self, store: &dyn ContentStore) -> ChainResult<bool> {
        let Some(blob) = self.blob() else {
            return Ok(false);
        };
        match store.info(&blob).await {
            Ok(_) => Ok(false),
            Err(StoreError::NotFound(_)) => Ok(true),
            Err(err) => Err(ChainError::collaborator("stat blob", self.id(), err)),
        }
    }

    /// Finalize any pending reference-state transition.
    pub async fn finalize(&self) {
        let _commit = self.lock_commit().await;
        self.mark_finalized();
    }

    /// The flattened layer sequence of this chain, oldest to newest. Merge
    /// nodes contribute their inputs' layers in input order and are not
    /// layers themselves.
    pub fn layer_chain(&self) -> Vec<Reference> {
        let mut chain = Vec::new();
        self.collect_layer_chain(&mut chain);
        chain
    }

    fn collect_layer_chain(&self, out: &mut Vec<Reference>) {
        match &self.inner.parentage {
            Parentage::None => out.push(self.clone()),
            Parentage::Layer(parent) => {
                parent.collect_layer_chain(out);
                out.push(self.clone());
            }
            Parentage::Merge(inputs) => {
                for input in inputs {
                    input.collect_layer_chain(out);
                }
            }
        }
    }

    // ---------------------------------------------------------------
    // Crate-internal commit plumbing
    // ---------------------------------------------------------------

    fn state(&self) -> std::sync::RwLockReadGuard<'_, RefState> {
        self.inner.state.read().expect("reference state lock poisoned")
    }

    fn state_mut(&self) -> std::sync::RwLockWriteGuard<'_, RefState> {
        self.inner.state.write().expect("reference state lock poisoned")
    }

    /// Acquire the commit lock. Commits hold it across the collaborator
    /// I/O they perform between the has-value check and the state write.
    pub(crate) async fn lock_commit(&self) -> MutexGuard<'_, ()> {
        self.inner.commit_mu.lock().await
    }

    /// Mark the pending state transition finalized. Caller holds the
    /// commit lock.
    pub(crate) fn mark_finalized(&self) {
        let mut state = self.state_mut();
        if !state.finalized {
            state.finalized = true;
            debug!(reference = %self.inner.id, "reference finalized");
        }
    }

    /// Write the blob-side commit-once fields. Caller holds the commit lock
    /// and has verified none of them are set.
    pub(crate) fn set_blob_state(
        &self,
        diff_id: Digest,
        blob: Digest,
        media_type: String,
        blob_size: u64,
    ) {
        let mut state = self.state_mut();
        state.diff_id = Some(diff_id);
        state.blob = Some(blob);
        state.media_type = Some(media_type);
        state.blob_size = Some(blob_size);
    }

    /// Write the chain identities. Caller holds the commit lock and has
    /// verified they are unset.
    pub(crate) fn set_chain_state(&self, chain_id: Digest, blob_chain_id: Digest) {
        let mut state = self.state_mut();
        state.chain_id = Some(chain_id);
        state.blob_chain_id = Some(blob_chain_id);
    }

    /// Track a descriptor as this reference's variant for `compression`.
    /// Idempotent; the first registration for a given compression wins.
    pub(crate) fn add_variant(&self, compression: Compression, descriptor: Descriptor) {
        self.state_mut().variants.entry(compression).or_insert(descriptor);
    }
}

impl fmt::Debug for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reference")
            .field("id", &self.inner.id)
            .field("kind", &self.kind())
            .field("blob", &self.blob())
            .finish()
    }
}
