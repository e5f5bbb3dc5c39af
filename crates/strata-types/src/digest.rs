use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};

use crate::error::TypeError;

/// Length of a hex-encoded SHA-256 digest.
const SHA256_HEX_LEN: usize = 64;

/// An algorithm-prefixed content digest (`sha256:<hex>`).
///
/// Identical content always produces the same `Digest`, making blobs
/// deduplicatable and verifiable. The textual form is what crosses every
/// boundary in the system: content-store keys, lease resource ids, chain
/// identities. Downstream consumers re-derive chain identities from these
/// strings, so the representation must stay bit-compatible with the wider
/// ecosystem (SHA-256, lowercase hex).
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Digest(String);

impl Digest {
    /// Compute the digest of raw bytes.
    pub fn from_bytes(data: &[u8]) -> Self {
        let hash = Sha256::digest(data);
        Self(format!("sha256:{}", hex::encode(hash)))
    }

    /// Parse and validate a digest string of the form `sha256:<64 hex>`.
    pub fn parse(s: &str) -> Result<Self, TypeError> {
        let Some((algorithm, encoded)) = s.split_once(':') else {
            return Err(TypeError::MissingAlgorithm(s.to_string()));
        };
        if algorithm != "sha256" {
            return Err(TypeError::UnsupportedAlgorithm(algorithm.to_string()));
        }
        if encoded.len() != SHA256_HEX_LEN {
            return Err(TypeError::InvalidLength {
                expected: SHA256_HEX_LEN,
                actual: encoded.len(),
            });
        }
        if !encoded.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase()) {
            return Err(TypeError::InvalidHex(encoded.to_string()));
        }
        Ok(Self(s.to_string()))
    }

    /// The digest algorithm (`sha256`).
    pub fn algorithm(&self) -> &str {
        self.0.split_once(':').map(|(a, _)| a).unwrap_or("")
    }

    /// The hex-encoded hash without the algorithm prefix.
    pub fn encoded(&self) -> &str {
        self.0.split_once(':').map(|(_, e)| e).unwrap_or("")
    }

    /// The full `algorithm:hex` string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form (first 8 hex characters) for log lines.
    pub fn short(&self) -> &str {
        let encoded = self.encoded();
        &encoded[..encoded.len().min(8)]
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.short())
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_bytes_is_deterministic() {
        let data = b"hello world";
        let d1 = Digest::from_bytes(data);
        let d2 = Digest::from_bytes(data);
        assert_eq!(d1, d2);
    }

    #[test]
    fn different_data_produces_different_digests() {
        assert_ne!(Digest::from_bytes(b"hello"), Digest::from_bytes(b"world"));
    }

    #[test]
    fn known_sha256_vectors() {
        assert_eq!(
            Digest::from_bytes(b"").as_str(),
            "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855",
        );
        assert_eq!(
            Digest::from_bytes(b"abc").as_str(),
            "sha256:ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad",
        );
    }

    #[test]
    fn parse_roundtrip() {
        let d = Digest::from_bytes(b"roundtrip");
        let parsed = Digest::parse(d.as_str()).unwrap();
        assert_eq!(d, parsed);
    }

    #[test]
    fn parse_rejects_missing_algorithm() {
        let err = Digest::parse("deadbeef").unwrap_err();
        assert!(matches!(err, TypeError::MissingAlgorithm(_)));
    }

    #[test]
    fn parse_rejects_unknown_algorithm() {
        let err = Digest::parse(&format!("md5:{}", "a".repeat(64))).unwrap_err();
        assert!(matches!(err, TypeError::UnsupportedAlgorithm(_)));
    }

    #[test]
    fn parse_rejects_short_encoding() {
        let err = Digest::parse("sha256:abcd").unwrap_err();
        assert_eq!(
            err,
            TypeError::InvalidLength {
                expected: 64,
                actual: 4
            }
        );
    }

    #[test]
    fn parse_rejects_non_hex() {
        let err = Digest::parse(&format!("sha256:{}", "z".repeat(64))).unwrap_err();
        assert!(matches!(err, TypeError::InvalidHex(_)));
    }

    #[test]
    fn parse_rejects_uppercase_hex() {
        let err = Digest::parse(&format!("sha256:{}", "A".repeat(64))).unwrap_err();
        assert!(matches!(err, TypeError::InvalidHex(_)));
    }

    #[test]
    fn accessors_split_the_parts() {
        let d = Digest::from_bytes(b"parts");
        assert_eq!(d.algorithm(), "sha256");
        assert_eq!(d.encoded().len(), 64);
        assert_eq!(d.as_str(), format!("sha256:{}", d.encoded()));
    }

    #[test]
    fn short_is_8_chars() {
        let d = Digest::from_bytes(b"short");
        assert_eq!(d.short().len(), 8);
        assert!(d.encoded().starts_with(d.short()));
    }

    #[test]
    fn display_is_full_string() {
        let d = Digest::from_bytes(b"display");
        assert_eq!(format!("{d}"), d.as_str());
    }

    #[test]
    fn serde_roundtrip() {
        let d = Digest::from_bytes(b"serde");
        let json = serde_json::to_string(&d).unwrap();
        let parsed: Digest = serde_json::from_str(&json).unwrap();
        assert_eq!(d, parsed);
    }

    #[test]
    fn ordering_is_lexicographic() {
        let mut digests = vec![Digest::from_bytes(b"b"), Digest::from_bytes(b"a")];
        digests.sort();
        assert!(digests[0].as_str() <= digests[1].as_str());
    }
}
