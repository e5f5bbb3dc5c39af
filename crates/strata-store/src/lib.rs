//! Collaborator interfaces at the storage boundary of Strata.
//!
//! The blob-chain core treats storage as a set of already-working external
//! collaborators and only speaks to them through the traits in this crate:
//!
//! - [`ContentStore`] -- content-addressed blob storage with labels
//! - [`LeaseManager`] + [`Lease`] -- garbage-collection retention: a blob
//!   pinned as a lease resource survives collection while the lease lives
//! - [`MetadataStore`] -- durable per-reference metadata, committed
//!   atomically per record
//! - [`RemoteBlobProvider`] -- fetches a lazy reference's blob into the
//!   local content store
//!
//! Each trait ships with an in-memory implementation for tests and
//! embedding. All I/O errors are propagated, never silently ignored.

pub mod content;
pub mod error;
pub mod lease;
pub mod memory;
pub mod metadata;
pub mod remote;

// Re-export primary types at crate root for ergonomic imports.
pub use content::{ContentInfo, ContentStore};
pub use error::{StoreError, StoreResult};
pub use lease::{InMemoryLeaseManager, Lease, LeaseManager, Resource, ResourceKind};
pub use memory::InMemoryContentStore;
pub use metadata::{BlobMetadata, ChainMetadata, InMemoryMetadataStore, MetadataStore};
pub use remote::RemoteBlobProvider;
