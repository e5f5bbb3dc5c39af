//! In-memory collaborator fakes for materialization tests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicIsize, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;

use strata_diff::{
    ActiveMount, DiffError, DiffOptions, DiffResult, Differ, Mount, MountHandle, MountProvider,
    OverlayDiffer, OverlayOutcome, ESTARGZ_TOC_LABEL,
};
use strata_store::{
    ContentStore, InMemoryContentStore, InMemoryLeaseManager, InMemoryMetadataStore, Lease,
    RemoteBlobProvider, StoreResult,
};
use strata_types::{Compression, Descriptor, Digest, MEDIA_TYPE_LAYER_GZIP, UNCOMPRESSED_LABEL};

use crate::convert::DefaultConverterResolver;
use crate::error::ChainResult;
use crate::materialize::{Collaborators, Materializer, MaterializerConfig, OverlayOverride};
use crate::reference::Reference;

/// Per-reference layer content, shared between the generic and overlay
/// differ fakes so both produce identical blobs for a reference.
pub(crate) struct LayerContents {
    map: RwLock<HashMap<String, Vec<u8>>>,
}

impl LayerContents {
    pub(crate) fn new() -> Self {
        Self {
            map: RwLock::new(HashMap::new()),
        }
    }

    pub(crate) fn set(&self, reference: &str, bytes: impl Into<Vec<u8>>) {
        self.map
            .write()
            .expect("lock poisoned")
            .insert(reference.to_string(), bytes.into());
    }

    fn get(&self, reference: &str) -> Vec<u8> {
        self.map
            .read()
            .expect("lock poisoned")
            .get(reference)
            .cloned()
            .unwrap_or_else(|| reference.as_bytes().to_vec())
    }
}

/// A `Write` target backed by a shared buffer, surviving the encoder drop
/// that finishes a compressed stream.
#[derive(Clone)]
struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    fn new() -> Self {
        Self(Arc::new(Mutex::new(Vec::new())))
    }

    fn bytes(&self) -> Vec<u8> {
        self.0.lock().expect("lock poisoned").clone()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().expect("lock poisoned").extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Produce a blob the way a real differ would: encode the reference's layer
/// content per the requested options and write it to the content store with
/// the uncompressed-content label.
async fn produce_blob(
    store: &dyn ContentStore,
    contents: &LayerContents,
    options: &DiffOptions,
    record_toc: bool,
    omit_uncompressed_label: bool,
) -> DiffResult<Descriptor> {
    let raw = contents.get(&options.reference);
    let encoded = match &options.compressor {
        Some(compressor) => {
            let buffer = SharedBuffer::new();
            let mut writer = compressor.as_ref()(Box::new(buffer.clone()))?;
            writer.write_all(&raw)?;
            drop(writer);
            buffer.bytes()
        }
        // Implicit gzip for the gzip media type, as the real differ does.
        None if options.media_type == MEDIA_TYPE_LAYER_GZIP => {
            let mut encoder =
                flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
            encoder.write_all(&raw)?;
            encoder.finish()?
        }
        None => raw.clone(),
    };

    let diff_id = Digest::from_bytes(&raw);
    let mut labels = BTreeMap::new();
    if !omit_uncompressed_label {
        labels.insert(UNCOMPRESSED_LABEL.to_string(), diff_id.to_string());
    }
    if record_toc {
        labels.insert(
            ESTARGZ_TOC_LABEL.to_string(),
            Digest::from_bytes(&encoded).to_string(),
        );
    }
    let size = encoded.len() as u64;
    let digest = store
        .write(encoded, labels)
        .await
        .map_err(|err| DiffError::Compare(err.to_string()))?;
    Ok(Descriptor::new(digest, options.media_type.clone(), size))
}

/// Generic differ fake with per-reference failure injection and call
/// counting.
pub(crate) struct TestDiffer {
    store: Arc<InMemoryContentStore>,
    contents: Arc<LayerContents>,
    calls: AtomicUsize,
    record_toc: AtomicBool,
    omit_uncompressed_label: AtomicBool,
    fail_refs: RwLock<HashSet<String>>,
}

impl TestDiffer {
    pub(crate) fn new(store: Arc<InMemoryContentStore>, contents: Arc<LayerContents>) -> Self {
        Self {
            store,
            contents,
            calls: AtomicUsize::new(0),
            record_toc: AtomicBool::new(false),
            omit_uncompressed_label: AtomicBool::new(false),
            fail_refs: RwLock::new(HashSet::new()),
        }
    }

    /// Number of diffs actually computed.
    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Record an eStargz TOC label on produced blobs.
    pub(crate) fn set_record_toc(&self, record: bool) {
        self.record_toc.store(record, Ordering::SeqCst);
    }

    /// Skip the uncompressed-content label on produced blobs.
    pub(crate) fn set_omit_uncompressed_label(&self, omit: bool) {
        self.omit_uncompressed_label.store(omit, Ordering::SeqCst);
    }

    /// Fail any diff for the given reference.
    pub(crate) fn fail_for(&self, reference: &str) {
        self.fail_refs
            .write()
            .expect("lock poisoned")
            .insert(reference.to_string());
    }
}

#[async_trait]
impl Differ for TestDiffer {
    async fn compare(
        &self,
        _lower: &[Mount],
        _upper: &[Mount],
        options: DiffOptions,
    ) -> DiffResult<Descriptor> {
        if self
            .fail_refs
            .read()
            .expect("lock poisoned")
            .contains(&options.reference)
        {
            return Err(DiffError::Compare(format!(
                "injected failure for {}",
                options.reference
            )));
        }
        self.calls.fetch_add(1, Ordering::SeqCst);
        produce_blob(
            &*self.store,
            &self.contents,
            &options,
            self.record_toc.load(Ordering::SeqCst),
            self.omit_uncompressed_label.load(Ordering::SeqCst),
        )
        .await
    }
}

/// Configured behavior of the overlay fast-path fake.
#[derive(Clone, Copy, Debug)]
pub(crate) enum OverlayBehavior {
    /// Mounts are not overlay-shaped.
    NotApplicable,
    /// The overlay computation errors.
    Fail,
    /// Produce a blob like the generic differ would.
    Compute,
}

pub(crate) struct TestOverlayDiffer {
    store: Arc<InMemoryContentStore>,
    contents: Arc<LayerContents>,
    behavior: RwLock<OverlayBehavior>,
    calls: AtomicUsize,
}

impl TestOverlayDiffer {
    pub(crate) fn new(store: Arc<InMemoryContentStore>, contents: Arc<LayerContents>) -> Self {
        Self {
            store,
            contents,
            behavior: RwLock::new(OverlayBehavior::NotApplicable),
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn set_behavior(&self, behavior: OverlayBehavior) {
        *self.behavior.write().expect("lock poisoned") = behavior;
    }
}

#[async_trait]
impl OverlayDiffer for TestOverlayDiffer {
    async fn try_compute_overlay_blob(
        &self,
        _lower: &[Mount],
        _upper: &[Mount],
        media_type: &str,
        reference: &str,
        compressor: Option<strata_diff::Compressor>,
    ) -> DiffResult<OverlayOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let behavior = *self.behavior.read().expect("lock poisoned");
        match behavior {
            OverlayBehavior::NotApplicable => Ok(OverlayOutcome::NotApplicable),
            OverlayBehavior::Fail => Err(DiffError::Compare("injected overlay failure".to_string())),
            OverlayBehavior::Compute => {
                let options = DiffOptions {
                    media_type: media_type.to_string(),
                    reference: reference.to_string(),
                    compressor,
                };
                let desc = produce_blob(&*self.store, &self.contents, &options, false, false).await?;
                Ok(OverlayOutcome::Computed(desc))
            }
        }
    }
}

/// Mount provider fake tracking how many mount sets are currently held.
pub(crate) struct TestMountProvider {
    active: Arc<AtomicIsize>,
    total: AtomicUsize,
}

impl TestMountProvider {
    pub(crate) fn new() -> Self {
        Self {
            active: Arc::new(AtomicIsize::new(0)),
            total: AtomicUsize::new(0),
        }
    }

    /// Mount sets currently held (not yet released).
    pub(crate) fn active(&self) -> isize {
        self.active.load(Ordering::SeqCst)
    }

    /// Mount sets handed out over the provider's lifetime.
    pub(crate) fn total(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }
}

struct TestMountHandle {
    reference: String,
    active: Arc<AtomicIsize>,
}

#[async_trait]
impl MountProvider for TestMountProvider {
    async fn mount(&self, reference: &str, _readonly: bool) -> DiffResult<Box<dyn MountHandle>> {
        self.total.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(TestMountHandle {
            reference: reference.to_string(),
            active: Arc::clone(&self.active),
        }))
    }
}

#[async_trait]
impl MountHandle for TestMountHandle {
    async fn mount(&self) -> DiffResult<ActiveMount> {
        self.active.fetch_add(1, Ordering::SeqCst);
        let active = Arc::clone(&self.active);
        Ok(ActiveMount::new(
            vec![Mount::new(
                "overlay",
                format!("/snapshots/{}", self.reference),
                vec![],
            )],
            move || {
                active.fetch_sub(1, Ordering::SeqCst);
            },
        ))
    }
}

/// Remote provider fake restoring pre-captured blob bytes on fetch.
pub(crate) struct TestRemoteProvider {
    data: Vec<u8>,
    labels: BTreeMap<String, String>,
    fetches: AtomicUsize,
}

impl TestRemoteProvider {
    pub(crate) fn new(data: Vec<u8>, labels: BTreeMap<String, String>) -> Self {
        Self {
            data,
            labels,
            fetches: AtomicUsize::new(0),
        }
    }

    pub(crate) fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteBlobProvider for TestRemoteProvider {
    async fn fetch(&self, store: &dyn ContentStore, _desc: &Descriptor) -> StoreResult<()> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        store.write(self.data.clone(), self.labels.clone()).await?;
        Ok(())
    }
}

/// A fully wired materialization environment over in-memory collaborators.
pub(crate) struct TestEnv {
    pub(crate) content: Arc<InMemoryContentStore>,
    pub(crate) leases: Arc<InMemoryLeaseManager>,
    pub(crate) metadata: Arc<InMemoryMetadataStore>,
    pub(crate) mounts: Arc<TestMountProvider>,
    pub(crate) differ: Arc<TestDiffer>,
    pub(crate) overlay: Arc<TestOverlayDiffer>,
    pub(crate) contents: Arc<LayerContents>,
    pub(crate) materializer: Materializer,
    pub(crate) lease: Lease,
}

impl TestEnv {
    /// Environment with the stock config, with the overlay override pinned
    /// to "unset" so tests never consult the real environment.
    pub(crate) fn new() -> Self {
        Self::with_config(MaterializerConfig {
            overlay_override: OverlayOverride::Fixed(None),
            ..MaterializerConfig::default()
        })
    }

    pub(crate) fn with_config(config: MaterializerConfig) -> Self {
        let content = Arc::new(InMemoryContentStore::new());
        let contents = Arc::new(LayerContents::new());
        let differ = Arc::new(TestDiffer::new(Arc::clone(&content), Arc::clone(&contents)));
        let overlay = Arc::new(TestOverlayDiffer::new(
            Arc::clone(&content),
            Arc::clone(&contents),
        ));
        let leases = Arc::new(InMemoryLeaseManager::new());
        let metadata = Arc::new(InMemoryMetadataStore::new());
        let mounts = Arc::new(TestMountProvider::new());
        let materializer = Materializer::new(
            Collaborators {
                content: Arc::clone(&content) as Arc<dyn ContentStore>,
                leases: Arc::clone(&leases) as Arc<dyn strata_store::LeaseManager>,
                metadata: Arc::clone(&metadata) as Arc<dyn strata_store::MetadataStore>,
                mounts: Arc::clone(&mounts) as Arc<dyn MountProvider>,
                differ: Arc::clone(&differ) as Arc<dyn Differ>,
                overlay: Arc::clone(&overlay) as Arc<dyn OverlayDiffer>,
                converter: Arc::new(DefaultConverterResolver),
            },
            config,
        );
        Self {
            content,
            leases,
            metadata,
            mounts,
            differ,
            overlay,
            contents,
            materializer,
            lease: Lease::new("build-lease"),
        }
    }

    pub(crate) async fn materialize(
        &self,
        reference: &Reference,
        create_if_needed: bool,
        compression: Compression,
        force_compression: bool,
    ) -> ChainResult<()> {
        self.materializer
            .materialize_chain(
                &self.lease,
                reference,
                create_if_needed,
                compression,
                force_compression,
            )
            .await
    }
}
