//! Blob-chain materialization: traversal, per-node blob computation,
//! commit, and chain-identity derivation.
//!
//! [`Materializer::materialize_chain`] is the single entry point surfaced
//! to the rest of the system: given a reference, it ensures every node in
//! the reference's ancestry has a blob in the content store, then derives
//! the chain identities. Sibling subtrees are traversed concurrently with
//! fail-fast cancellation; per-node work is deduplicated so concurrent
//! callers collapse onto one computation.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{debug, warn};

use strata_diff::{
    finalize_estargz, overlay_override_from_env, resolve_overlay_policy, ActiveMount,
    Compressor, DiffOptions, Differ, Mount, MountProvider, OverlayDiffer, OverlayOutcome,
    OverlaySupportTable,
};
use strata_diff::{estargz_compressor, zstd_compressor};
use strata_flight::Group;
use strata_identity::combine;
use strata_store::{
    BlobMetadata, ChainMetadata, ContentStore, Lease, LeaseManager, MetadataStore, Resource,
};
use strata_types::{
    Compression, Descriptor, Digest, MEDIA_TYPE_LAYER, MEDIA_TYPE_LAYER_GZIP,
    MEDIA_TYPE_LAYER_ZSTD, UNCOMPRESSED_LABEL,
};

use crate::convert::ConverterResolver;
use crate::error::{ChainError, ChainResult};
use crate::reference::{ParentageRef, Reference};

/// Where the overlay fast-path override comes from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OverlayOverride {
    /// Consult [`strata_diff::FORCE_OVERLAY_DIFF_ENV`] once per
    /// materialization.
    #[default]
    FromEnv,
    /// Fixed setting; the environment is ignored.
    Fixed(Option<bool>),
}

/// Materializer configuration.
#[derive(Clone, Debug)]
pub struct MaterializerConfig {
    /// Name of the snapshotter driver backing the mounts, consulted by the
    /// overlay fast-path policy.
    pub snapshotter: String,
    /// Which snapshotter drivers produce overlay mounts.
    pub overlay_support: OverlaySupportTable,
    /// Overlay fast-path override source.
    pub overlay_override: OverlayOverride,
}

impl Default for MaterializerConfig {
    fn default() -> Self {
        Self {
            snapshotter: "overlayfs".to_string(),
            overlay_support: OverlaySupportTable::default(),
            overlay_override: OverlayOverride::default(),
        }
    }
}

/// The external collaborators materialization drives.
pub struct Collaborators {
    pub content: Arc<dyn ContentStore>,
    pub leases: Arc<dyn LeaseManager>,
    pub metadata: Arc<dyn MetadataStore>,
    pub mounts: Arc<dyn MountProvider>,
    pub differ: Arc<dyn Differ>,
    pub overlay: Arc<dyn OverlayDiffer>,
    pub converter: Arc<dyn ConverterResolver>,
}

struct Inner {
    collab: Collaborators,
    config: MaterializerConfig,
    flight: Group<(), ChainError>,
}

/// Materializes blob chains. Cheap to clone; clones share the same
/// collaborator set and deduplication state.
#[derive(Clone)]
pub struct Materializer {
    inner: Arc<Inner>,
}

type BoxedChainFuture = Pin<Box<dyn Future<Output = ChainResult<()>> + Send + 'static>>;

impl Materializer {
    /// Create a materializer over the given collaborators.
    pub fn new(collaborators: Collaborators, config: MaterializerConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                collab: collaborators,
                config,
                flight: Group::new(),
            }),
        }
    }

    /// Ensure every reference in `reference`'s ancestry has a blob in the
    /// content store, then compute chain identities for `reference`.
    ///
    /// If a blob is missing and `create_if_needed` is false, the call fails
    /// with [`ChainError::NoBlobs`]. If `force_compression` is set, the
    /// exact `compression` variant is ensured for every materialized node
    /// even where the diff natively produced a different encoding. The
    /// caller must hold `lease` active for the whole call.
    pub async fn materialize_chain(
        &self,
        lease: &Lease,
        reference: &Reference,
        create_if_needed: bool,
        compression: Compression,
        force_compression: bool,
    ) -> ChainResult<()> {
        if !lease.is_active() {
            return Err(ChainError::MissingLease {
                operation: "materialize_chain",
            });
        }
        reference.finalize().await;
        debug!(
            reference = reference.id(),
            %compression,
            create_if_needed,
            force_compression,
            "materializing blob chain"
        );
        self.compute_blob_chain(
            lease.clone(),
            reference.clone(),
            create_if_needed,
            compression,
            force_compression,
        )
        .await
    }

    /// Recursive traversal step. Boxed because the future recurses; every
    /// spawned subtree owns its clones of the handles it needs.
    fn compute_blob_chain(
        &self,
        lease: Lease,
        reference: Reference,
        create_if_needed: bool,
        compression: Compression,
        force_compression: bool,
    ) -> BoxedChainFuture {
        let this = self.clone();
        Box::pin(async move {
            let mut tasks: JoinSet<ChainResult<()>> = JoinSet::new();
            match reference.parentage() {
                ParentageRef::Merge(inputs) => {
                    for input in inputs.to_vec() {
                        tasks.spawn(this.compute_blob_chain(
                            lease.clone(),
                            input,
                            create_if_needed,
                            compression,
                            force_compression,
                        ));
                    }
                }
                ParentageRef::Layer(parent) => {
                    tasks.spawn(this.compute_blob_chain(
                        lease.clone(),
                        parent.clone(),
                        create_if_needed,
                        compression,
                        force_compression,
                    ));
                    tasks.spawn(this.clone().materialize_node(
                        lease.clone(),
                        reference.clone(),
                        create_if_needed,
                        compression,
                        force_compression,
                    ));
                }
                ParentageRef::Base => {
                    tasks.spawn(this.clone().materialize_node(
                        lease.clone(),
                        reference.clone(),
                        create_if_needed,
                        compression,
                        force_compression,
                    ));
                }
            }
            join_fail_fast(tasks).await?;
            this.compute_chain_metadata(&lease, &reference).await
        })
    }

    /// Materialize one node's blob, deduplicated across concurrent callers,
    /// then ensure the forced compression variant if requested.
    async fn materialize_node(
        self,
        lease: Lease,
        reference: Reference,
        create_if_needed: bool,
        compression: Compression,
        force_compression: bool,
    ) -> ChainResult<()> {
        let key = format!("{}-{}", reference.id(), create_if_needed);
        let this = self.clone();
        let blob_lease = lease.clone();
        let blob_ref = reference.clone();
        self.inner
            .flight
            .run(&key, move || async move {
                this.compute_blob(blob_lease, blob_ref, create_if_needed, compression)
                    .await
            })
            .await?;

        if force_compression {
            self.ensure_compression(&lease, &reference, compression).await?;
        }
        Ok(())
    }

    /// Compute and commit one node's blob. No-op if the node already has
    /// one; fails with [`ChainError::NoBlobs`] if creation is not requested.
    async fn compute_blob(
        &self,
        lease: Lease,
        reference: Reference,
        create_if_needed: bool,
        compression: Compression,
    ) -> ChainResult<()> {
        if reference.blob().is_some() {
            return Ok(());
        }
        if !create_if_needed {
            return Err(ChainError::NoBlobs {
                reference: reference.id().to_string(),
            });
        }

        let media_type: &str;
        let compressor: Option<Compressor>;
        let mut finalize_toc = false;
        match compression {
            Compression::Uncompressed => {
                media_type = MEDIA_TYPE_LAYER;
                compressor = None;
            }
            Compression::Gzip => {
                // The differ applies implicit gzip for this media type.
                media_type = MEDIA_TYPE_LAYER_GZIP;
                compressor = None;
            }
            Compression::EStargz => {
                media_type = MEDIA_TYPE_LAYER_GZIP;
                compressor = Some(estargz_compressor());
                finalize_toc = true;
            }
            Compression::Zstd => {
                media_type = MEDIA_TYPE_LAYER_ZSTD;
                compressor = Some(zstd_compressor());
            }
            Compression::Unknown => {
                return Err(ChainError::UnrecognizedCompression {
                    value: compression.to_string(),
                });
            }
        }

        let lower_guard = match reference.layer_parent() {
            Some(parent) => Some(self.acquire_mounts(parent.id(), "mount lower snapshot").await?),
            None => None,
        };
        let upper_guard = self.acquire_mounts(reference.id(), "mount upper snapshot").await?;
        let lower: &[Mount] = lower_guard.as_ref().map(ActiveMount::mounts).unwrap_or(&[]);
        let upper: &[Mount] = upper_guard.mounts();

        let override_enabled = match self.inner.config.overlay_override {
            OverlayOverride::Fixed(value) => value,
            OverlayOverride::FromEnv => overlay_override_from_env()
                .map_err(|err| ChainError::collaborator("read overlay override", reference.id(), err))?,
        };
        let policy = resolve_overlay_policy(
            override_enabled,
            reference.is_windows_chain(),
            &self.inner.config.snapshotter,
            &self.inner.config.overlay_support,
        );

        let mut computed: Option<Descriptor> = None;
        if policy.enabled {
            match self
                .inner
                .collab
                .overlay
                .try_compute_overlay_blob(lower, upper, media_type, reference.id(), compressor.clone())
                .await
            {
                Ok(OverlayOutcome::Computed(desc)) => computed = Some(desc),
                Ok(OverlayOutcome::NotApplicable) => {
                    if !policy.fallback {
                        return Err(ChainError::FastPathUnavailable {
                            reference: reference.id().to_string(),
                        });
                    }
                    if policy.warn_on_failure {
                        warn!(
                            reference = reference.id(),
                            "overlay mounts not detected, falling back to generic diff"
                        );
                    }
                }
                Err(err) => {
                    if !policy.fallback {
                        return Err(ChainError::FastPathFailed {
                            reference: reference.id().to_string(),
                            message: err.to_string(),
                        });
                    }
                    if policy.warn_on_failure {
                        warn!(
                            reference = reference.id(),
                            error = %err,
                            "overlay diff failed, falling back to generic diff"
                        );
                    }
                }
            }
        }

        let mut desc = match computed {
            Some(desc) => desc,
            None => self
                .inner
                .collab
                .differ
                .compare(
                    lower,
                    upper,
                    DiffOptions {
                        media_type: media_type.to_string(),
                        reference: reference.id().to_string(),
                        compressor,
                    },
                )
                .await
                .map_err(|err| ChainError::collaborator("compute diff", reference.id(), err))?,
        };
        // Mounts are only needed for the diff itself.
        drop(upper_guard);
        drop(lower_guard);

        if finalize_toc {
            let annotations = finalize_estargz(&*self.inner.collab.content, &desc)
                .await
                .map_err(|err| ChainError::collaborator("finalize estargz", reference.id(), err))?;
            desc.annotations.extend(annotations);
        }

        let info = self
            .inner
            .collab
            .content
            .info(&desc.digest)
            .await
            .map_err(|err| ChainError::collaborator("stat diff blob", reference.id(), err))?;
        if let Some(diff_id) = info.labels.get(UNCOMPRESSED_LABEL) {
            desc.annotations
                .insert(UNCOMPRESSED_LABEL.to_string(), diff_id.clone());
        } else if desc.media_type == MEDIA_TYPE_LAYER {
            desc.annotations
                .insert(UNCOMPRESSED_LABEL.to_string(), desc.digest.to_string());
        } else {
            return Err(ChainError::UnresolvableUncompressedDigest {
                digest: desc.digest.clone(),
                media_type: desc.media_type.clone(),
            });
        }

        self.set_blob(&lease, &reference, compression, desc).await
    }

    async fn acquire_mounts(
        &self,
        reference: &str,
        operation: &'static str,
    ) -> ChainResult<ActiveMount> {
        let handle = self
            .inner
            .collab
            .mounts
            .mount(reference, true)
            .await
            .map_err(|err| ChainError::collaborator(operation, reference, err))?;
        handle
            .mount()
            .await
            .map_err(|err| ChainError::collaborator(operation, reference, err))
    }

    /// Atomically record a freshly computed descriptor on a reference.
    ///
    /// Idempotent: losing a commit race is success, the earlier blob wins.
    pub(crate) async fn set_blob(
        &self,
        lease: &Lease,
        reference: &Reference,
        compression: Compression,
        desc: Descriptor,
    ) -> ChainResult<()> {
        if !lease.is_active() {
            return Err(ChainError::MissingLease {
                operation: "set_blob",
            });
        }
        let diff_id = desc
            .uncompressed_digest()
            .ok()
            .flatten()
            .ok_or_else(|| ChainError::UnresolvableUncompressedDigest {
                digest: desc.digest.clone(),
                media_type: desc.media_type.clone(),
            })?;
        self.inner
            .collab
            .content
            .info(&desc.digest)
            .await
            .map_err(|err| ChainError::collaborator("stat blob", reference.id(), err))?;
        if !compression.is_known() {
            return Err(ChainError::UnrecognizedCompression {
                value: desc.media_type.clone(),
            });
        }

        let _commit = reference.lock_commit().await;
        if reference.blob().is_some() {
            // Lost the race; the committed blob stands.
            return Ok(());
        }
        reference.mark_finalized();

        self.inner
            .collab
            .leases
            .add_resource(reference.id(), Resource::content(desc.digest.as_str()))
            .await
            .map_err(|err| ChainError::collaborator("pin blob", reference.id(), err))?;

        self.inner
            .collab
            .metadata
            .commit_blob(
                reference.id(),
                &BlobMetadata {
                    diff_id: diff_id.clone(),
                    blob: desc.digest.clone(),
                    media_type: desc.media_type.clone(),
                    blob_size: desc.size,
                },
            )
            .await
            .map_err(|err| ChainError::collaborator("commit blob metadata", reference.id(), err))?;

        debug!(
            reference = reference.id(),
            blob = %desc.digest.short(),
            media_type = %desc.media_type,
            size = desc.size,
            "blob committed"
        );
        reference.set_blob_state(diff_id, desc.digest.clone(), desc.media_type.clone(), desc.size);
        reference.add_variant(compression, desc);
        Ok(())
    }

    /// Derive and commit `chain_id` and `blob_chain_id` for a reference
    /// whose own and whose ancestors' blob and diffID are already set.
    async fn compute_chain_metadata(&self, lease: &Lease, reference: &Reference) -> ChainResult<()> {
        if !lease.is_active() {
            return Err(ChainError::MissingLease {
                operation: "compute_chain_metadata",
            });
        }

        let _commit = reference.lock_commit().await;
        if reference.chain_id().is_some() {
            return Ok(());
        }

        let (chain_id, blob_chain_id) = match reference.parentage() {
            ParentageRef::Base => {
                let diff_id = committed_diff_id(reference)?;
                let blob = committed_blob(reference)?;
                (diff_id.clone(), combine(&blob, &diff_id))
            }
            ParentageRef::Layer(parent) => {
                let parent_chain_id = parent
                    .chain_id()
                    .ok_or_else(|| non_addressable(reference, parent))?;
                let parent_blob_chain_id = parent
                    .blob_chain_id()
                    .ok_or_else(|| non_addressable(reference, parent))?;
                let diff_id = committed_diff_id(reference)?;
                let blob = committed_blob(reference)?;
                (
                    combine(&parent_chain_id, &diff_id),
                    combine(&parent_blob_chain_id, &combine(&blob, &diff_id)),
                )
            }
            ParentageRef::Merge(inputs) => {
                // The first input seeds the fold; every further input's
                // layers fold in as if they were unpacked atop it in order.
                let Some((first, rest)) = inputs.split_first() else {
                    return Err(ChainError::EmptyMerge {
                        reference: reference.id().to_string(),
                    });
                };
                let mut chain_id = first
                    .chain_id()
                    .ok_or_else(|| non_addressable(reference, first))?;
                let mut blob_chain_id = first
                    .blob_chain_id()
                    .ok_or_else(|| non_addressable(reference, first))?;
                for input in rest {
                    for layer in input.layer_chain() {
                        let diff_id = committed_diff_id(&layer)?;
                        let blob = committed_blob(&layer)?;
                        chain_id = combine(&chain_id, &diff_id);
                        blob_chain_id = combine(&blob_chain_id, &combine(&blob, &diff_id));
                    }
                }
                (chain_id, blob_chain_id)
            }
        };

        self.inner
            .collab
            .metadata
            .commit_chain(
                reference.id(),
                &ChainMetadata {
                    chain_id: chain_id.clone(),
                    blob_chain_id: blob_chain_id.clone(),
                },
            )
            .await
            .map_err(|err| ChainError::collaborator("commit chain metadata", reference.id(), err))?;

        debug!(
            reference = reference.id(),
            chain_id = chain_id.short(),
            blob_chain_id = blob_chain_id.short(),
            "chain identity committed"
        );
        reference.set_chain_state(chain_id, blob_chain_id);
        Ok(())
    }

    /// Guarantee `reference` has a blob in exactly the `compression`
    /// encoding, converting if necessary. Deduplicated per
    /// (reference, target) pair.
    pub async fn ensure_compression(
        &self,
        lease: &Lease,
        reference: &Reference,
        compression: Compression,
    ) -> ChainResult<()> {
        if !lease.is_active() {
            return Err(ChainError::MissingLease {
                operation: "ensure_compression",
            });
        }

        let key = format!("{}-{}", reference.id(), compression);
        let this = self.clone();
        let reference = reference.clone();
        self.inner
            .flight
            .run(&key, move || async move {
                let conversion_failed = |err: &dyn std::fmt::Display| ChainError::ConversionFailed {
                    reference: reference.id().to_string(),
                    target: compression,
                    message: err.to_string(),
                };

                let desc = reference.descriptor()?;
                let converter = this
                    .inner
                    .collab
                    .converter
                    .resolve(&*this.inner.collab.content, &desc, compression)
                    .await
                    .map_err(|err| conversion_failed(&err))?;

                let Some(converter) = converter else {
                    if reference.is_lazy(&*this.inner.collab.content).await? {
                        // Already compatible with the requested encoding
                        // once fetched; keep it lazy.
                        debug!(
                            reference = reference.id(),
                            %compression,
                            "lazy blob already satisfies requested compression"
                        );
                        return Ok(());
                    }
                    reference.add_variant(compression, desc);
                    return Ok(());
                };

                if reference.compression_variant(compression).is_some() {
                    return Ok(());
                }

                this.unlazy(&reference, &desc).await?;
                let converted = converter
                    .convert(&*this.inner.collab.content, &desc)
                    .await
                    .map_err(|err| conversion_failed(&err))?;

                this.inner
                    .collab
                    .leases
                    .add_resource(reference.id(), Resource::content(converted.digest.as_str()))
                    .await
                    .map_err(|err| {
                        ChainError::collaborator("pin converted blob", reference.id(), err)
                    })?;
                debug!(
                    reference = reference.id(),
                    %compression,
                    blob = %converted.digest.short(),
                    "tracked converted compression variant"
                );
                reference.add_variant(compression, converted);
                Ok(())
            })
            .await
    }

    /// Force a lazy reference's blob to be locally present.
    async fn unlazy(&self, reference: &Reference, desc: &Descriptor) -> ChainResult<()> {
        if !reference.is_lazy(&*self.inner.collab.content).await? {
            return Ok(());
        }
        let Some(remote) = reference.remote() else {
            return Err(ChainError::FetchFailed {
                reference: reference.id().to_string(),
                message: "reference is lazy and has no remote provider".to_string(),
            });
        };
        remote
            .fetch(&*self.inner.collab.content, desc)
            .await
            .map_err(|err| ChainError::FetchFailed {
                reference: reference.id().to_string(),
                message: err.to_string(),
            })
    }
}

fn committed_diff_id(reference: &Reference) -> ChainResult<Digest> {
    reference.diff_id().ok_or_else(|| ChainError::NoBlobs {
        reference: reference.id().to_string(),
    })
}

fn committed_blob(reference: &Reference) -> ChainResult<Digest> {
    reference.blob().ok_or_else(|| ChainError::NoBlobs {
        reference: reference.id().to_string(),
    })
}

fn non_addressable(reference: &Reference, parent: &Reference) -> ChainError {
    ChainError::NonAddressableAncestor {
        reference: reference.id().to_string(),
        parent: parent.id().to_string(),
    }
}

/// Await all traversal tasks; the first failure aborts the rest and wins.
async fn join_fail_fast(mut tasks: JoinSet<ChainResult<()>>) -> ChainResult<()> {
    let mut first_error: Option<ChainError> = None;
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                if first_error.is_none() {
                    tasks.abort_all();
                    first_error = Some(err);
                }
            }
            Err(join_err) if join_err.is_cancelled() => {}
            Err(join_err) => {
                if first_error.is_none() {
                    tasks.abort_all();
                    first_error = Some(ChainError::TaskFailure(join_err.to_string()));
                }
            }
        }
    }
    first_error.map_or(Ok(()), Err)
}
