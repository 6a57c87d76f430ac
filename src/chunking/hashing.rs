//! Content hashing used for dedup and change detection.

use sha2::{Digest, Sha256};

/// Compute the deterministic content hash of a piece of text.
///
/// SHA-256 over the UTF-8 bytes, hex-encoded. The same text always produces
/// the same digest, so unchanged chunks can be recognized across reprocessing
/// runs without comparing full text.
///
/// # Examples
///
/// ```
/// use chunkmill::chunking::content_hash;
///
/// let a = content_hash("quarterly totals");
/// let b = content_hash("quarterly totals");
/// assert_eq!(a, b);
/// assert_eq!(a.len(), 64);
/// ```
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}
