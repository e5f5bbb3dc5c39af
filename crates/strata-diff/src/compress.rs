//! Streaming compressors handed to the differ, and the eStargz finalize
//! step that runs after a diff.

use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Arc;

use flate2::write::GzEncoder;

use strata_store::ContentStore;
use strata_types::Descriptor;

use crate::error::{DiffError, DiffResult};

/// Content-store label and descriptor annotation carrying an eStargz blob's
/// table-of-contents digest. Recorded as a label by the differ while the
/// blob is written; surfaced as an annotation by [`finalize_estargz`].
pub const ESTARGZ_TOC_LABEL: &str = "strata.io/estargz/toc-digest";

/// A streaming compressor: wraps the differ's output stream in an encoder.
///
/// The encoder finishes its stream when dropped.
pub type Compressor =
    Arc<dyn Fn(Box<dyn Write + Send>) -> std::io::Result<Box<dyn Write + Send>> + Send + Sync>;

/// Wrap the raw diff stream in a standard zstd encoder.
pub fn zstd_compressor() -> Compressor {
    Arc::new(
        |dest: Box<dyn Write + Send>| -> std::io::Result<Box<dyn Write + Send>> {
            let encoder = zstd::stream::write::Encoder::new(dest, 0)?;
            Ok(Box::new(encoder.auto_finish()))
        },
    )
}

/// The eStargz gzip stream. The table of contents itself is assembled by
/// the differ, which records its digest as the [`ESTARGZ_TOC_LABEL`] blob
/// label for [`finalize_estargz`] to pick up.
pub fn estargz_compressor() -> Compressor {
    Arc::new(
        |dest: Box<dyn Write + Send>| -> std::io::Result<Box<dyn Write + Send>> {
            Ok(Box::new(GzEncoder::new(dest, flate2::Compression::default())))
        },
    )
}

/// Finalize an eStargz blob: read the TOC digest the differ recorded as a
/// content-store label and return it as descriptor annotations.
pub async fn finalize_estargz(
    store: &dyn ContentStore,
    desc: &Descriptor,
) -> DiffResult<BTreeMap<String, String>> {
    let info = store
        .info(&desc.digest)
        .await
        .map_err(|err| DiffError::Finalize(err.to_string()))?;
    let toc_digest = info.labels.get(ESTARGZ_TOC_LABEL).ok_or_else(|| {
        DiffError::Finalize(format!(
            "blob {} carries no eStargz TOC digest label",
            desc.digest
        ))
    })?;
    let mut annotations = BTreeMap::new();
    annotations.insert(ESTARGZ_TOC_LABEL.to_string(), toc_digest.clone());
    Ok(annotations)
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Read;
    use std::sync::Mutex;

    use strata_store::InMemoryContentStore;
    use strata_types::{Digest, MEDIA_TYPE_LAYER_GZIP};

    /// A `Write` target backed by a shared buffer, so the compressed bytes
    /// survive the encoder being dropped (dropping finishes the stream).
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

    fn compress(compressor: &Compressor, payload: &[u8]) -> Vec<u8> {
        let buffer = SharedBuffer::new();
        let mut writer = compressor.as_ref()(Box::new(buffer.clone())).unwrap();
        writer.write_all(payload).unwrap();
        drop(writer);
        buffer.bytes()
    }

    #[test]
    fn zstd_compressor_roundtrips() {
        let payload = b"layer tar stream".repeat(64);
        let compressed = compress(&zstd_compressor(), &payload);
        assert_ne!(compressed, payload);
        assert_eq!(zstd::decode_all(compressed.as_slice()).unwrap(), payload);
    }

    #[test]
    fn estargz_compressor_produces_gzip() {
        let payload = b"estargz tar stream".repeat(64);
        let compressed = compress(&estargz_compressor(), &payload);
        let mut decoded = Vec::new();
        flate2::read::GzDecoder::new(compressed.as_slice())
            .read_to_end(&mut decoded)
            .unwrap();
        assert_eq!(decoded, payload);
    }

    #[tokio::test]
    async fn finalize_reads_the_toc_label() {
        let store = InMemoryContentStore::new();
        let toc = Digest::from_bytes(b"toc json");
        let labels = [(ESTARGZ_TOC_LABEL.to_string(), toc.to_string())]
            .into_iter()
            .collect();
        let digest = store.write(b"estargz blob".to_vec(), labels).await.unwrap();

        let desc = Descriptor::new(digest, MEDIA_TYPE_LAYER_GZIP, 12);
        let annotations = finalize_estargz(&store, &desc).await.unwrap();
        assert_eq!(annotations.get(ESTARGZ_TOC_LABEL), Some(&toc.to_string()));
    }

    #[tokio::test]
    async fn finalize_without_toc_label_fails() {
        let store = InMemoryContentStore::new();
        let digest = store
            .write(b"plain gzip blob".to_vec(), BTreeMap::new())
            .await
            .unwrap();
        let desc = Descriptor::new(digest, MEDIA_TYPE_LAYER_GZIP, 15);
        let err = finalize_estargz(&store, &desc).await.unwrap_err();
        assert!(matches!(err, DiffError::Finalize(_)));
    }
}
