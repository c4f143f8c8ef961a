//! Round Engine
//!
//! Everything that decides the outcome of a round.
//!
//! ## Module Structure
//!
//! - `state`: Round, bet and identifier types
//! - `crash_point`: Seed to crash point
//! - `clock`: Elapsed time to multiplier, tick scheduling
//! - `tick`: Advancing a round to an instant
//! - `round`: Round state machine (bets, cash-outs, abort)
//! - `events`: Round events for subscribers
//! - `ledger`: External balance ledger seam
//! - `settlement`: Crediting outcomes with retry, pending-credit store
//! - `history`: Append-only record of finished rounds
//! - `hub`: Commands in, events out
//! - `supervisor`: The single task that runs rounds back to back

pub mod clock;
pub mod crash_point;
pub mod events;
pub mod history;
pub mod hub;
pub mod ledger;
pub mod round;
pub mod settlement;
pub mod state;
pub mod supervisor;
pub mod tick;

// Re-export key types
pub use clock::RoundClock;
pub use crash_point::{CrashPointGenerator, GeneratorConfig};
pub use events::RoundEvent;
pub use history::{HistoryStore, InMemoryHistoryStore, RoundHistoryEntry};
pub use hub::{BroadcastHub, HubError, Subscription, SubscriptionItem};
pub use ledger::{BalanceLedger, InMemoryLedger, LedgerError};
pub use round::{BetReceipt, CommandRejection, RoundConfig, RoundStateMachine};
pub use settlement::{InMemorySettlementStore, RetryPolicy, SettlementBatch, SettlementStore};
pub use state::{Bet, CashOut, ParticipantId, Round, RoundId, RoundPhase, RoundSnapshot};
pub use supervisor::{RoundSupervisor, SupervisorConfig, SupervisorError};
pub use tick::{InvariantViolation, TickResult};
