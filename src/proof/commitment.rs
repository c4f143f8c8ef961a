//! Round Commitment Protocol
//!
//! Commit to the server seed before betting opens; reveal it when the round
//! crashes. Anyone holding the commitment can then check that the crash
//! point was fixed before a single bet was placed.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::core::fixed::Multiplier;
use crate::core::hash::{DomainHasher, HashDigest, COMMITMENT_DOMAIN};
use crate::core::rng::ServerSeed;
use crate::game::crash_point::CrashPointGenerator;
use crate::game::state::RoundId;

/// Pre-round commitment (published when the round is created).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundCommitment {
    /// Round the commitment is bound to.
    pub round_id: RoundId,
    /// `SHA-256("CRASH_COMMIT_V1" || round_id_le || seed)`.
    #[serde(with = "hex_digest")]
    pub hash: HashDigest,
}

impl RoundCommitment {
    /// Commit to a seed for a round.
    pub fn commit(round_id: RoundId, seed: &ServerSeed) -> Self {
        Self {
            round_id,
            hash: compute_commitment_hash(round_id, seed),
        }
    }

    /// Verify that a seed matches this commitment.
    pub fn verify(&self, seed: &ServerSeed) -> bool {
        compute_commitment_hash(self.round_id, seed) == self.hash
    }

    /// Hex encoding of the hash.
    pub fn to_hex(&self) -> String {
        hex::encode(self.hash)
    }
}

/// Compute commitment hash.
fn compute_commitment_hash(round_id: RoundId, seed: &ServerSeed) -> HashDigest {
    let mut hasher = DomainHasher::new(COMMITMENT_DOMAIN);
    hasher.update_u64(round_id.0);
    hasher.update_bytes(seed.as_bytes());
    hasher.finalize()
}

/// Reveal structure (published after the round crashes).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundReveal {
    /// Round.
    pub round_id: RoundId,
    /// The previously secret seed.
    pub server_seed: ServerSeed,
    /// Crash point the server claims the seed produced.
    pub crash_point: Multiplier,
}

impl RoundReveal {
    /// Verify reveal against commitment, recomputing the crash point.
    pub fn verify(
        &self,
        commitment: &RoundCommitment,
        generator: &CrashPointGenerator,
    ) -> Result<(), CommitmentError> {
        // 1. Same round
        if commitment.round_id != self.round_id {
            return Err(CommitmentError::RoundMismatch {
                committed: commitment.round_id,
                revealed: self.round_id,
            });
        }

        // 2. Seed matches commitment
        if !commitment.verify(&self.server_seed) {
            return Err(CommitmentError::PreimageMismatch);
        }

        // 3. Seed produces the claimed crash point
        let expected = generator.generate(self.round_id, &self.server_seed);
        if expected != self.crash_point {
            return Err(CommitmentError::CrashPointMismatch {
                expected,
                got: self.crash_point,
            });
        }

        Ok(())
    }
}

/// Errors that can occur during reveal verification.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommitmentError {
    /// Reveal is for a different round.
    #[error("round mismatch: committed {committed}, revealed {revealed}")]
    RoundMismatch {
        /// Round in the commitment.
        committed: RoundId,
        /// Round in the reveal.
        revealed: RoundId,
    },

    /// Seed hash doesn't match commitment.
    #[error("revealed seed does not match commitment")]
    PreimageMismatch,

    /// Seed does not produce the claimed crash point.
    #[error("crash point mismatch: expected {expected}, got {got}")]
    CrashPointMismatch {
        /// Recomputed from the seed.
        expected: Multiplier,
        /// Claimed.
        got: Multiplier,
    },
}

mod hex_digest {
    use super::*;
    use serde::de::Error;

    pub fn serialize<S: Serializer>(digest: &HashDigest, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(digest))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<HashDigest, D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(D::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| D::Error::custom("expected 32-byte digest"))
    }
}
