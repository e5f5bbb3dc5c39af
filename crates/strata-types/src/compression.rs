use std::fmt;

use serde::{Deserialize, Serialize};

/// Media type of an uncompressed tar layer.
pub const MEDIA_TYPE_LAYER: &str = "application/vnd.oci.image.layer.v1.tar";
/// Media type of a gzip-compressed tar layer.
pub const MEDIA_TYPE_LAYER_GZIP: &str = "application/vnd.oci.image.layer.v1.tar+gzip";
/// Media type of a zstd-compressed tar layer.
pub const MEDIA_TYPE_LAYER_ZSTD: &str = "application/vnd.oci.image.layer.v1.tar+zstd";

/// A layer blob compression encoding.
///
/// `EStargz` shares the gzip media type: an eStargz blob is a valid gzip
/// stream with an embedded table of contents, so it cannot be told apart
/// from plain gzip by media type alone.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Compression {
    Uncompressed,
    Gzip,
    EStargz,
    Zstd,
    /// A media type this system does not recognize. Never a valid target
    /// for materialization or conversion.
    Unknown,
}

impl Compression {
    /// The media type a freshly diffed blob of this encoding carries.
    ///
    /// Returns `None` for [`Compression::Unknown`].
    pub fn default_media_type(&self) -> Option<&'static str> {
        match self {
            Self::Uncompressed => Some(MEDIA_TYPE_LAYER),
            Self::Gzip | Self::EStargz => Some(MEDIA_TYPE_LAYER_GZIP),
            Self::Zstd => Some(MEDIA_TYPE_LAYER_ZSTD),
            Self::Unknown => None,
        }
    }

    /// Classify a layer media type. Gzip and eStargz both map to
    /// [`Compression::Gzip`]; anything unrecognized maps to
    /// [`Compression::Unknown`].
    pub fn from_media_type(media_type: &str) -> Self {
        match media_type {
            MEDIA_TYPE_LAYER => Self::Uncompressed,
            MEDIA_TYPE_LAYER_GZIP => Self::Gzip,
            MEDIA_TYPE_LAYER_ZSTD => Self::Zstd,
            _ => Self::Unknown,
        }
    }

    /// Returns `true` for every variant except [`Compression::Unknown`].
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown)
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Uncompressed => "uncompressed",
            Self::Gzip => "gzip",
            Self::EStargz => "estargz",
            Self::Zstd => "zstd",
            Self::Unknown => "unknown",
        };
        f.write_str(name)
    }
}
