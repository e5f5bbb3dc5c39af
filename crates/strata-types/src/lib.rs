//! Core value types for the Strata layer-materialization engine.
//!
//! Everything in this crate is a plain value: content digests, blob
//! descriptors, and compression encodings. No I/O, no collaborators --
//! higher layers (the content store, the differ, the chain materializer)
//! all speak in these types.
//!
//! # Types
//!
//! - [`Digest`] -- an algorithm-prefixed SHA-256 content digest
//!   (`sha256:<hex>`), the unit of content addressing
//! - [`Descriptor`] -- a content-addressable blob description: digest,
//!   media type, size, and string annotations
//! - [`Compression`] -- the set of supported layer compression encodings

pub mod compression;
pub mod descriptor;
pub mod digest;
pub mod error;

// Re-export primary types at crate root for ergonomic imports.
pub use compression::{
    Compression, MEDIA_TYPE_LAYER, MEDIA_TYPE_LAYER_GZIP, MEDIA_TYPE_LAYER_ZSTD,
};
pub use descriptor::{Descriptor, UNCOMPRESSED_LABEL};
pub use digest::Digest;
pub use error::TypeError;
