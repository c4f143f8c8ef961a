//! Core primitives.
//!
//! Fixed-point decimals, domain-separated hashing and seed sources.
//! Nothing in this module touches the clock or the network.

pub mod fixed;
pub mod hash;
pub mod rng;

// Re-export core types
pub use fixed::{Amount, Multiplier, DECIMAL_SCALE};
pub use hash::{hash_with_domain, DomainHasher, HashDigest};
pub use rng::{OsSeedSource, SeedSource, SequenceSeedSource, ServerSeed};
