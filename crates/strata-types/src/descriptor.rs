use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::digest::Digest;
use crate::error::TypeError;

/// Label and annotation key recording a blob's uncompressed-content digest
/// (its diffID). Written as a content-store label by the differ and carried
/// forward as a descriptor annotation once a blob is materialized.
pub const UNCOMPRESSED_LABEL: &str = "strata.io/uncompressed";

/// A content-addressable blob description.
///
/// Produced by the differ or the compression converter; owned thereafter by
/// the reference that stores it as a compression variant.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Descriptor {
    pub digest: Digest,
    pub media_type: String,
    pub size: u64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

impl Descriptor {
    /// Create a descriptor with no annotations.
    pub fn new(digest: Digest, media_type: impl Into<String>, size: u64) -> Self {
        Self {
            digest,
            media_type: media_type.into(),
            size,
            annotations: BTreeMap::new(),
        }
    }

    /// Builder-style annotation insertion.
    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    /// The uncompressed-content digest recorded on this descriptor, if any.
    ///
    /// Returns an error if the annotation is present but not a valid digest.
    pub fn uncompressed_digest(&self) -> Result<Option<Digest>, TypeError> {
        match self.annotations.get(UNCOMPRESSED_LABEL) {
            None => Ok(None),
            Some(raw) => Digest::parse(raw).map(Some),
        }
    }
}
