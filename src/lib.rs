//! # Crash Round Server
//!
//! Authoritative round engine for a real-time crash wagering game. A shared
//! multiplier climbs from 1.00x; players bet before the flight and must cash
//! out before a crash point that was committed to before betting opened.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    CRASH ROUND SERVER                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/              - Primitives                             │
//! │  ├── fixed.rs       - Fixed-point multipliers and money      │
//! │  ├── hash.rs        - Domain-separated SHA-256               │
//! │  └── rng.rs         - Server seeds and seed sources          │
//! │                                                              │
//! │  game/              - Round engine                           │
//! │  ├── crash_point.rs - Seed to crash point                    │
//! │  ├── clock.rs       - Elapsed time to multiplier             │
//! │  ├── tick.rs        - Advance a round to an instant          │
//! │  ├── round.rs       - Round state machine                    │
//! │  ├── supervisor.rs  - Single-writer round loop               │
//! │  ├── hub.rs         - Commands in, events out                │
//! │  ├── ledger.rs      - External balance ledger                │
//! │  ├── settlement.rs  - Crediting outcomes with retry          │
//! │  └── history.rs     - Finished rounds                        │
//! │                                                              │
//! │  proof/             - Provable fairness                      │
//! │  └── commitment.rs  - Seed commit and reveal                 │
//! │                                                              │
//! │  network/           - Transport                              │
//! │  ├── server.rs      - WebSocket server                       │
//! │  ├── protocol.rs    - Message types                          │
//! │  ├── auth.rs        - JWT validation                         │
//! │  └── session.rs     - Connection registry                    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Fairness
//!
//! Each round draws a fresh 32-byte seed from the OS, derives its crash
//! point from it, and publishes a hash commitment before betting opens. The
//! seed is revealed when the round crashes, so anyone can recompute both the
//! commitment and the crash point.
//!
//! ## Single writer
//!
//! One supervisor task owns the active round. Clock ticks and player
//! commands are serialized through it, so there are no locks around the bet
//! book and ties between a cash-out and the crash always resolve the same
//! way: the crash wins.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod game;
pub mod network;
pub mod proof;

// Re-export commonly used types
pub use core::fixed::{Amount, Multiplier};
pub use core::rng::{OsSeedSource, SeedSource, ServerSeed};
pub use game::hub::BroadcastHub;
pub use game::state::{ParticipantId, RoundId, RoundPhase};
pub use game::supervisor::{RoundSupervisor, SupervisorConfig};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
