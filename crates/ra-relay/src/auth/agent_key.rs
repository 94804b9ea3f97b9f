//! Shared-secret checks

use sha2::{Digest, Sha256};

/// A secret compared by SHA-256 digest
///
/// Only the digest is kept. Comparison is over fixed-length digests in
/// constant time, so neither the secret's length nor a matching prefix
/// leaks through timing.
pub struct SharedSecret {
    digest: [u8; 32],
}

/// Shared secret every agent presents on connect
pub type AgentKey = SharedSecret;

impl SharedSecret {
    pub fn new(key: &str) -> Self {
        Self {
            digest: Sha256::digest(key.as_bytes()).into(),
        }
    }

    pub fn verify(&self, provided: &str) -> bool {
        let provided: [u8; 32] = Sha256::digest(provided.as_bytes()).into();
        constant_time_eq(&provided, &self.digest)
    }
}

pub(crate) fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}
