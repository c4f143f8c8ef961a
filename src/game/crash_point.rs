//! Crash Point Generation
//!
//! Pure function from `(round id, server seed)` to the multiplier at which a
//! round crashes. No clock, no global RNG: the same inputs always produce the
//! same crash point, which is what lets a revealed seed be verified.
//!
//! ## Distribution
//!
//! ```text
//! h     = SHA-256("CRASH_POINT_V1" || round_id_le || seed)
//! r     = top 52 bits of h             (uniform in [0, 2^52))
//! raw   = (1 - edge) / (1 - r / 2^52)
//! crash = clamp(floor(raw * 100) / 100, 1.00, max)
//! ```
//!
//! `P(crash >= x) = (1 - edge) / x` for `1 < x <= max`, so cashing out at any
//! fixed target returns `1 - edge` in the long run. Most rounds crash early;
//! the cap turns the tail into a point mass at `max`.

use serde::{Deserialize, Serialize};

use crate::core::fixed::Multiplier;
use crate::core::hash::{digest_prefix_u64, DomainHasher, CRASH_POINT_DOMAIN};
use crate::core::rng::ServerSeed;
use crate::game::state::RoundId;

/// Basis points in one whole.
const BPS_ONE: u128 = 10_000;

/// Bits of uniform randomness drawn from the digest.
const UNIFORM_BITS: u32 = 52;

/// Generator parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratorConfig {
    /// House edge in basis points (300 = 3%, i.e. 97% return-to-player).
    pub house_edge_bps: u32,
    /// Highest crash point the generator will ever produce.
    pub max_crash_point: Multiplier,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            house_edge_bps: 300,
            max_crash_point: Multiplier::from_hundredths(1000),
        }
    }
}

impl GeneratorConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            house_edge_bps: std::env::var("CRASH_HOUSE_EDGE_BPS")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|bps| *bps < 10_000)
                .unwrap_or(defaults.house_edge_bps),
            max_crash_point: std::env::var("CRASH_MAX_MULTIPLIER")
                .ok()
                .and_then(|v| v.parse::<f64>().ok())
                .and_then(Multiplier::from_decimal)
                .filter(|m| *m >= Multiplier::ONE)
                .unwrap_or(defaults.max_crash_point),
        }
    }

    /// Target long-run return-to-player, in basis points.
    pub fn rtp_bps(&self) -> u32 {
        10_000u32.saturating_sub(self.house_edge_bps)
    }
}

/// Derives crash points from seeds.
#[derive(Debug, Clone, Copy, Default)]
pub struct CrashPointGenerator {
    config: GeneratorConfig,
}

impl CrashPointGenerator {
    /// Create a generator.
    pub fn new(config: GeneratorConfig) -> Self {
        Self { config }
    }

    /// Generator parameters.
    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    /// Crash point for a round.
    ///
    /// The round id is hashed alongside the seed, so a seed accidentally
    /// reused for another round yields an unrelated crash point.
    pub fn generate(&self, round_id: RoundId, seed: &ServerSeed) -> Multiplier {
        let mut hasher = DomainHasher::new(CRASH_POINT_DOMAIN);
        hasher.update_u64(round_id.0);
        hasher.update_bytes(seed.as_bytes());
        let digest = hasher.finalize();

        let r = (digest_prefix_u64(&digest) >> (64 - UNIFORM_BITS)) as u128;
        let e = 1u128 << UNIFORM_BITS;

        let edge = (self.config.house_edge_bps as u128).min(BPS_ONE - 1);
        let numerator = (BPS_ONE - edge) * 100 * e;
        let denominator = (e - r) * BPS_ONE;
        let hundredths = numerator / denominator;

        let max = self.config.max_crash_point.hundredths().max(Multiplier::ONE.hundredths()) as u128;
        let clamped = hundredths.clamp(Multiplier::ONE.hundredths() as u128, max);
        Multiplier::from_hundredths(clamped as u32)
    }
}
