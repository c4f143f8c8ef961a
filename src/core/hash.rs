//! Domain-Separated Hashing
//!
//! Every hash in the engine (crash point derivation, seed commitments,
//! participant ids) goes through SHA-256 with a distinct domain prefix so a
//! digest from one context can never be replayed in another.

use sha2::{Digest, Sha256};

/// Hash output type (256 bits / 32 bytes).
pub type HashDigest = [u8; 32];

/// Domain for crash point derivation.
pub const CRASH_POINT_DOMAIN: &[u8] = b"CRASH_POINT_V1";

/// Domain for server seed commitments.
pub const COMMITMENT_DOMAIN: &[u8] = b"CRASH_COMMIT_V1";

/// Domain for participant id derivation from auth subjects.
pub const PARTICIPANT_DOMAIN: &[u8] = b"crash-round-participant:";

/// Incremental hasher bound to a domain.
///
/// Order of updates is part of the digest; callers must feed fields in a
/// fixed order.
pub struct DomainHasher {
    hasher: Sha256,
}

impl DomainHasher {
    /// Create a new hasher with domain separator.
    pub fn new(domain: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(domain);
        Self { hasher }
    }

    /// Update with raw bytes.
    #[inline]
    pub fn update_bytes(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }

    /// Update with a u64 value (little-endian).
    #[inline]
    pub fn update_u64(&mut self, value: u64) {
        self.hasher.update(value.to_le_bytes());
    }

    /// Finalize and return the digest.
    pub fn finalize(self) -> HashDigest {
        self.hasher.finalize().into()
    }
}

/// Compute hash with domain separator.
pub fn hash_with_domain(domain: &[u8], data: &[u8]) -> HashDigest {
    let mut hasher = DomainHasher::new(domain);
    hasher.update_bytes(data);
    hasher.finalize()
}

/// Read the first 8 bytes of a digest as a big-endian integer.
pub fn digest_prefix_u64(digest: &HashDigest) -> u64 {
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(prefix)
}
