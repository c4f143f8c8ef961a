//! Provable Fairness
//!
//! Commit-reveal of the per-round server seed.
//!
//! ```text
//! round created   ──►  publish commitment = H(round_id || seed)
//! betting, flight       (seed stays secret)
//! round crashed   ──►  publish seed; anyone recomputes
//!                      H(round_id || seed) == commitment
//!                      generate(round_id, seed) == crash point
//! ```

pub mod commitment;

pub use commitment::{CommitmentError, RoundCommitment, RoundReveal};
