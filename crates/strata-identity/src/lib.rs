//! Chain-identity derivation for snapshot chains.
//!
//! A chain identity is an order-sensitive fold over a sequence of content
//! digests: each step hashes the ASCII rendering of the accumulated identity
//! and the next digest, separated by a single space. Downstream caching and
//! image-export logic re-derives these identities independently, so the fold
//! here must match the ecosystem's canonical algorithm bit-for-bit.

use strata_types::Digest;

/// Fold one digest into an accumulated chain identity.
///
/// `combine(a, b)` is the digest of the ASCII string `"<a> <b>"`.
pub fn combine(parent: &Digest, item: &Digest) -> Digest {
    Digest::from_bytes(format!("{parent} {item}").as_bytes())
}

/// The chain identity of an ordered digest sequence.
///
/// A single-element sequence is its own identity. Returns `None` for an
/// empty sequence, which has no identity.
pub fn chain_id(digests: &[Digest]) -> Option<Digest> {
    let (first, rest) = digests.split_first()?;
    let mut id = first.clone();
    for item in rest {
        id = combine(&id, item);
    }
    Some(id)
}
