//! Blob-chain materialization core for Strata.
//!
//! This crate coordinates the materialization of content-addressable blobs
//! backing chains of filesystem snapshots, and derives the chain identities
//! downstream caching and image-export logic depend on:
//!
//! - [`Reference`] -- an immutable snapshot node (base layer, layer, or
//!   merge of chains), with commit-once materialization state
//! - [`Materializer`] -- the traversal driver: walks a reference's
//!   ancestry concurrently with fail-fast cancellation, computes missing
//!   blobs exactly once via single-flight deduplication, commits them
//!   under lease protection, derives chain identities, and converts blobs
//!   between compression encodings on demand
//! - [`ConverterResolver`] / [`LayerConverter`] -- the conversion boundary,
//!   with [`DefaultConverterResolver`] covering the
//!   uncompressed/gzip/zstd triangle
//!
//! Everything stateful external to the chain itself (content store, lease
//! manager, metadata persistence, mounts, differs) is a collaborator trait
//! wired in through [`Collaborators`].

pub mod convert;
pub mod error;
pub mod materialize;
pub mod reference;

#[cfg(test)]
mod testutil;

// Re-export primary types at crate root for ergonomic imports.
pub use convert::{
    ConvertError, ConvertResult, ConverterResolver, DefaultConverterResolver, LayerConverter,
};
pub use error::{ChainError, ChainResult};
pub use materialize::{Collaborators, Materializer, MaterializerConfig, OverlayOverride};
pub use reference::{RefKind, Reference, LAYER_TYPE_WINDOWS};
