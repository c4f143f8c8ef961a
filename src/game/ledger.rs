//! Balance Ledger
//!
//! The engine never owns balances. It asks an external ledger to hold a
//! stake when a bet is placed and to credit the outcome once the round is
//! over.
//!
//! ```text
//! place_bet ──► reserve(participant, stake)     synchronous, may refuse
//! crashed   ──► settle(round, participant, amt) one call per bet,
//!                                               amt = payout or 0
//! aborted   ──► settle(round, participant, stake) refund
//! ```
//!
//! `settle` must be idempotent on `(round, participant)`: settlement is
//! retried until acknowledged, so a call may be repeated after a timeout.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use tracing::debug;

use crate::core::fixed::Amount;
use crate::game::state::{ParticipantId, RoundId};

/// Ledger errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    /// Balance too low for the requested hold.
    #[error("insufficient funds: requested {requested}, available {available}")]
    InsufficientFunds {
        /// Amount asked for.
        requested: Amount,
        /// Amount available.
        available: Amount,
    },

    /// No account for the participant.
    #[error("unknown account")]
    UnknownAccount,

    /// Transient failure; the call may be retried.
    #[error("ledger unavailable: {0}")]
    Unavailable(String),
}

impl LedgerError {
    /// Whether retrying the same call can succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, LedgerError::Unavailable(_))
    }
}

/// Stake holds and winnings credits.
pub trait BalanceLedger: Send + Sync {
    /// Hold `amount` from the participant's available balance.
    fn reserve(&self, participant: ParticipantId, amount: Amount) -> Result<(), LedgerError>;

    /// Release the participant's hold for `round` and credit `amount`.
    ///
    /// Repeating a call for the same `(round, participant)` is a no-op.
    fn settle(&self, round: RoundId, participant: ParticipantId, amount: Amount) -> Result<(), LedgerError>;
}

// =============================================================================
// IN-MEMORY LEDGER
// =============================================================================

#[derive(Debug, Default)]
struct LedgerState {
    balances: HashMap<ParticipantId, Amount>,
    settled: HashSet<(RoundId, ParticipantId)>,
}

/// Process-local ledger for development and tests.
///
/// With an opening balance configured, unknown participants get an account
/// on first use.
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    state: Mutex<LedgerState>,
    opening_balance: Option<Amount>,
}

impl InMemoryLedger {
    /// Empty ledger; only deposited accounts exist.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ledger that opens accounts on demand with `opening_balance`.
    pub fn with_opening_balance(opening_balance: Amount) -> Self {
        Self {
            state: Mutex::default(),
            opening_balance: Some(opening_balance),
        }
    }

    /// Credit an account, opening it if needed.
    pub fn deposit(&self, participant: ParticipantId, amount: Amount) {
        let mut state = self.lock();
        let balance = state.balances.entry(participant).or_default();
        *balance = balance.saturating_add(amount);
    }

    /// Available balance.
    pub fn balance(&self, participant: &ParticipantId) -> Option<Amount> {
        let state = self.lock();
        state
            .balances
            .get(participant)
            .copied()
            .or(self.opening_balance)
    }

    /// Whether `settle` has been applied for `(round, participant)`.
    pub fn is_settled(&self, round: RoundId, participant: &ParticipantId) -> bool {
        self.lock().settled.contains(&(round, *participant))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl BalanceLedger for InMemoryLedger {
    fn reserve(&self, participant: ParticipantId, amount: Amount) -> Result<(), LedgerError> {
        let mut state = self.lock();
        if let Some(opening) = self.opening_balance {
            state.balances.entry(participant).or_insert(opening);
        }
        let balance = state
            .balances
            .get_mut(&participant)
            .ok_or(LedgerError::UnknownAccount)?;

        if *balance < amount {
            return Err(LedgerError::InsufficientFunds {
                requested: amount,
                available: *balance,
            });
        }
        *balance = balance.saturating_sub(amount);
        Ok(())
    }

    fn settle(&self, round: RoundId, participant: ParticipantId, amount: Amount) -> Result<(), LedgerError> {
        let mut state = self.lock();
        if !state.settled.insert((round, participant)) {
            debug!(round = %round, participant = %participant.short(), "Duplicate settlement ignored");
            return Ok(());
        }
        let balance = state.balances.entry(participant).or_default();
        *balance = balance.saturating_add(amount);
        Ok(())
    }
}
