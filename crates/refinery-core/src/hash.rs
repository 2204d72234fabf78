//! Content and model digests.
//!
//! All digests are SHA-256, rendered as 64 lowercase hex characters. The
//! [`ContentHasher`] trait is the seam the ingestion cache hashes
//! submissions through, so callers can count or replace digest computation.
//! Model identities are hashed once and memoized by the app crate.

use std::io::Read;

use sha2::{Digest, Sha256};

use crate::models::{ContentDigest, ModelDigest};

/// Read size used when streaming a digest from a reader.
pub const CHUNK_SIZE: usize = 128 * 1024;

/// Computes the stable digest of a submission's bytes.
pub trait ContentHasher: Send + Sync {
    fn content_digest(&self, bytes: &[u8]) -> ContentDigest;
}

/// SHA-256 implementation of [`ContentHasher`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256Hasher;

impl ContentHasher for Sha256Hasher {
    fn content_digest(&self, bytes: &[u8]) -> ContentDigest {
        ContentDigest::from_hex(sha256_hex(bytes))
    }
}

/// Digest of a model identifier string (used when no file backs it).
pub fn model_identifier_digest(identifier: &str) -> ModelDigest {
    ModelDigest::from_hex(sha256_hex(identifier.as_bytes()))
}

/// SHA-256 of a byte slice as lowercase hex.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Streams a reader through SHA-256 in [`CHUNK_SIZE`] reads.
///
/// The reader is consumed exactly once. Produces the same digest as
/// [`sha256_hex`] over the reader's full contents.
pub fn digest_reader<R: Read>(mut reader: R) -> std::io::Result<String> {
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_vector() {
        assert_eq!(
            sha256_hex(b"hello"),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn identical_bytes_identical_digest() {
        let h = Sha256Hasher;
        let a = h.content_digest(b"%PDF-1.4\n%%EOF");
        let b = h.content_digest(b"%PDF-1.4\n%%EOF");
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
        assert_ne!(a, h.content_digest(b"%PDF-1.5\n%%EOF"));
    }

    #[test]
    fn reader_digest_matches_slice_digest_across_chunks() {
        // Larger than one read so the loop runs more than once.
        let data: Vec<u8> = (0..(CHUNK_SIZE * 2 + 17)).map(|i| (i % 251) as u8).collect();
        let streamed = digest_reader(std::io::Cursor::new(&data)).unwrap();
        assert_eq!(streamed, sha256_hex(&data));
    }

    #[test]
    fn empty_reader() {
        let streamed = digest_reader(std::io::empty()).unwrap();
        assert_eq!(streamed, sha256_hex(b""));
    }
}
