//! Server Seed Generation
//!
//! Each round's crash point is derived from a fresh 32-byte server seed.
//! Production seeds come from the operating system's CSPRNG; a deterministic
//! source exists for replays and tests.
//!
//! A wall-clock timestamp is never used as a seed: it is low entropy and
//! guessable by anyone who knows roughly when the round starts.

use std::fmt;

use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use super::hash::DomainHasher;

/// Length of a server seed in bytes.
pub const SEED_LEN: usize = 32;

/// A round's secret server seed.
///
/// Kept private until the round crashes, then revealed so the crash point
/// can be recomputed by anyone.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct ServerSeed([u8; SEED_LEN]);

impl ServerSeed {
    /// Create from raw bytes.
    pub const fn new(bytes: [u8; SEED_LEN]) -> Self {
        Self(bytes)
    }

    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8; SEED_LEN] {
        &self.0
    }

    /// Hex encoding.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hex.
    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s).ok()?;
        let arr: [u8; SEED_LEN] = bytes.try_into().ok()?;
        Some(Self(arr))
    }
}

// Seeds are secret until reveal; keep them out of debug logs.
impl fmt::Debug for ServerSeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ServerSeed({}..)", &self.to_hex()[..8])
    }
}

impl From<ServerSeed> for String {
    fn from(seed: ServerSeed) -> String {
        seed.to_hex()
    }
}

impl TryFrom<String> for ServerSeed {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::from_hex(&s).ok_or_else(|| format!("invalid server seed: {}", s))
    }
}

/// Source of per-round server seeds.
pub trait SeedSource: Send {
    /// Produce the seed for the next round.
    fn next_seed(&mut self) -> ServerSeed;
}

/// Seeds from the operating system CSPRNG.
#[derive(Debug, Default)]
pub struct OsSeedSource;

impl SeedSource for OsSeedSource {
    fn next_seed(&mut self) -> ServerSeed {
        let mut bytes = [0u8; SEED_LEN];
        OsRng.fill_bytes(&mut bytes);
        ServerSeed(bytes)
    }
}

/// Deterministic seed sequence: `SHA-256(domain || base || counter)`.
///
/// Given the same base, produces the same sequence of seeds. Only suitable
/// for replays and tests; the base must never be a production secret that is
/// reused across deployments.
#[derive(Debug, Clone)]
pub struct SequenceSeedSource {
    base: [u8; SEED_LEN],
    counter: u64,
}

impl SequenceSeedSource {
    /// Create a sequence from a base value.
    pub fn new(base: [u8; SEED_LEN]) -> Self {
        Self { base, counter: 0 }
    }
}

impl SeedSource for SequenceSeedSource {
    fn next_seed(&mut self) -> ServerSeed {
        let mut hasher = DomainHasher::new(b"CRASH_SEED_SEQUENCE_V1");
        hasher.update_bytes(&self.base);
        hasher.update_u64(self.counter);
        self.counter += 1;
        ServerSeed(hasher.finalize())
    }
}

// =============================================================================
// TESTS
// =============================================================================
