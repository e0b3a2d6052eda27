//! Content fingerprinting
//!
//! Every upload is identified by the SHA-256 digest of its raw bytes. The
//! lowercase hex form doubles as the cache key suffix and as the unique key of
//! the durable record, so two uploads with identical content always collapse
//! onto the same entry.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Prefix applied to fingerprints when used as result-cache keys.
const CACHE_KEY_PREFIX: &str = "nsfw:";

/// SHA-256 content digest, lowercase hex encoded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Digest an in-memory buffer.
    pub fn of(bytes: &[u8]) -> Self {
        Self(format!("{:x}", Sha256::digest(bytes)))
    }

    /// Accept a fingerprint supplied by a client.
    ///
    /// Only 64-character lowercase hex strings are valid; anything else could
    /// never have been produced by [`Fingerprint::of`].
    pub fn parse(value: &str) -> Option<Self> {
        let valid = value.len() == 64
            && value
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));

        valid.then(|| Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Key under which a classification result is cached.
    pub fn cache_key(&self) -> String {
        format!("{CACHE_KEY_PREFIX}{}", self.0)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Incremental digest for content that arrives in chunks.
#[derive(Clone, Default)]
pub struct FingerprintHasher {
    hasher: Sha256,
    len: usize,
}

impl fmt::Debug for FingerprintHasher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FingerprintHasher").field("len", &self.len).finish_non_exhaustive()
    }
}

impl FingerprintHasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.hasher.update(chunk);
        self.len += chunk.len();
    }

    /// Bytes hashed so far
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn finish(self) -> Fingerprint {
        Fingerprint(format!("{:x}", self.hasher.finalize()))
    }
}
