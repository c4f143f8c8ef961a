//! Round State Machine
//!
//! Owns one round from creation to settlement. All mutations go through
//! here; each command is validated completely before anything changes.
//!
//! ```text
//!            place_bet                    cash_out
//!               │                            │
//!   ┌───────────▼──┐  betting window  ┌──────▼───────┐  m >= crash  ┌─────────┐
//!   │   Waiting    │ ───────────────► │    Flying    │ ───────────► │ Crashed │
//!   └──────────────┘                  └──────────────┘              └─────────┘
//!                                         tick(now)                 settlement,
//!                                  recompute, auto cash-out          history
//! ```

use std::collections::BTreeMap;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, error};

use crate::core::fixed::{Amount, Multiplier};
use crate::core::rng::ServerSeed;
use crate::game::clock::RoundClock;
use crate::game::crash_point::CrashPointGenerator;
use crate::game::events::RoundEvent;
use crate::game::history::RoundHistoryEntry;
use crate::game::ledger::{BalanceLedger, LedgerError};
use crate::game::settlement::{SettlementBatch, SettlementCredit};
use crate::game::state::{Bet, CashOut, ParticipantId, Round, RoundId, RoundPhase, RoundSnapshot};
use crate::game::tick::{self, InvariantViolation, TickResult};
use crate::proof::commitment::RoundCommitment;

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Round timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundConfig {
    /// How long bets are accepted.
    pub betting_window: Duration,
    /// Pause between a crash and the next round.
    pub cooldown: Duration,
    /// Time for the multiplier to climb from 1.00 to the ceiling.
    pub flight_duration: Duration,
    /// Clock tick period.
    pub tick_interval: Duration,
}

impl Default for RoundConfig {
    fn default() -> Self {
        Self {
            betting_window: Duration::from_secs(5),
            cooldown: Duration::from_secs(3),
            flight_duration: Duration::from_secs(15),
            tick_interval: Duration::from_millis(100),
        }
    }
}

impl RoundConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let millis = |key: &str, default: Duration| {
            std::env::var(key)
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis)
                .unwrap_or(default)
        };
        Self {
            betting_window: millis("CRASH_BETTING_WINDOW_MS", defaults.betting_window),
            cooldown: millis("CRASH_COOLDOWN_MS", defaults.cooldown),
            flight_duration: millis("CRASH_FLIGHT_DURATION_MS", defaults.flight_duration),
            tick_interval: millis("CRASH_TICK_INTERVAL_MS", defaults.tick_interval),
        }
    }

    /// Clock for rounds run with this config.
    pub fn clock(&self, ceiling: Multiplier) -> RoundClock {
        RoundClock::new(self.flight_duration, ceiling, self.tick_interval)
    }
}

// =============================================================================
// REJECTIONS
// =============================================================================

/// Why a player command was refused. Nothing was changed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandRejection {
    /// Command not valid in the current phase.
    #[error("command not accepted while round is {phase}")]
    WrongPhase {
        /// Phase at the time of the command.
        phase: RoundPhase,
    },

    /// Participant already has a bet this round.
    #[error("participant already has a bet this round")]
    DuplicateBet,

    /// Participant has no bet this round.
    #[error("no open bet this round")]
    NoOpenBet,

    /// Bet already cashed out.
    #[error("bet already cashed out at {multiplier}")]
    AlreadyCashedOut {
        /// Multiplier of the earlier cash-out.
        multiplier: Multiplier,
    },

    /// Stake must be positive.
    #[error("stake must be greater than zero")]
    InvalidStake,

    /// Auto cash-out threshold must be above 1.00x.
    #[error("auto cash-out threshold must be above 1.00x, got {0}")]
    InvalidThreshold(Multiplier),

    /// The ledger refused to hold the stake.
    #[error("insufficient funds")]
    InsufficientFunds,

    /// The ledger could not be reached.
    #[error("ledger unavailable")]
    LedgerUnavailable,
}

impl CommandRejection {
    /// Wire reason code.
    pub fn code(&self) -> &'static str {
        match self {
            CommandRejection::WrongPhase { .. } => "WRONG_PHASE",
            CommandRejection::DuplicateBet => "DUPLICATE_BET",
            CommandRejection::NoOpenBet => "NO_OPEN_BET",
            CommandRejection::AlreadyCashedOut { .. } => "ALREADY_CASHED_OUT",
            CommandRejection::InvalidStake => "INVALID_STAKE",
            CommandRejection::InvalidThreshold(_) => "INVALID_THRESHOLD",
            CommandRejection::InsufficientFunds => "INSUFFICIENT_FUNDS",
            CommandRejection::LedgerUnavailable => "ENGINE_UNAVAILABLE",
        }
    }
}

impl From<LedgerError> for CommandRejection {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InsufficientFunds { .. } | LedgerError::UnknownAccount => {
                CommandRejection::InsufficientFunds
            }
            LedgerError::Unavailable(_) => CommandRejection::LedgerUnavailable,
        }
    }
}

// =============================================================================
// STATE MACHINE
// =============================================================================

/// Confirmation of an accepted bet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BetReceipt {
    /// Round the bet belongs to.
    pub round_id: RoundId,
    /// Reserved stake.
    pub stake: Amount,
    /// Auto cash-out threshold.
    pub auto_cash_out: Option<Multiplier>,
}

/// Lifecycle of one round.
#[derive(Debug)]
pub struct RoundStateMachine {
    round: Round,
    clock: RoundClock,
}

impl RoundStateMachine {
    /// Create a round in Waiting, drawing the crash point from `seed`.
    ///
    /// Fails if the generator produced a crash point outside
    /// `[1.00, max_crash_point]`.
    pub fn new(
        id: RoundId,
        seed: ServerSeed,
        generator: &CrashPointGenerator,
        clock: RoundClock,
        betting_window: Duration,
        now: Instant,
    ) -> Result<Self, InvariantViolation> {
        let crash_point = generator.generate(id, &seed);
        let max_crash_point = generator.config().max_crash_point;
        if crash_point < Multiplier::ONE || crash_point > max_crash_point {
            return Err(InvariantViolation::CrashPointOutOfBounds {
                round_id: id,
                crash_point,
                cap: max_crash_point,
            });
        }

        let round = Round {
            id,
            phase: RoundPhase::Waiting,
            crash_point,
            multiplier: Multiplier::ONE,
            created_at: now,
            betting_closes_at: now + betting_window,
            flight_started_at: None,
            bets: BTreeMap::new(),
            server_seed: seed,
            commitment: RoundCommitment::commit(id, &seed),
            aborted: false,
        };

        Ok(Self { round, clock })
    }

    /// The round.
    pub fn round(&self) -> &Round {
        &self.round
    }

    /// Round id.
    pub fn id(&self) -> RoundId {
        self.round.id
    }

    /// Current phase.
    pub fn phase(&self) -> RoundPhase {
        self.round.phase
    }

    /// Event announcing the round.
    pub fn created_event(&self, now: Instant) -> RoundEvent {
        RoundEvent::RoundCreated {
            round_id: self.round.id,
            commitment: self.round.commitment.to_hex(),
            betting_window: self.round.betting_closes_at.saturating_duration_since(now),
        }
    }

    /// Consistent public view at `now`.
    pub fn snapshot(&self, now: Instant) -> RoundSnapshot {
        self.round.snapshot(now)
    }

    /// Accept a bet. Only valid while Waiting.
    ///
    /// The stake is reserved with the ledger last, so a refused hold leaves
    /// the bet book untouched and a rejected command never touches the
    /// ledger.
    pub fn place_bet(
        &mut self,
        participant_id: ParticipantId,
        stake: Amount,
        auto_cash_out: Option<Multiplier>,
        ledger: &dyn BalanceLedger,
    ) -> Result<(BetReceipt, RoundEvent), CommandRejection> {
        if self.round.phase != RoundPhase::Waiting {
            return Err(CommandRejection::WrongPhase { phase: self.round.phase });
        }
        if stake.is_zero() {
            return Err(CommandRejection::InvalidStake);
        }
        if let Some(threshold) = auto_cash_out {
            if threshold <= Multiplier::ONE {
                return Err(CommandRejection::InvalidThreshold(threshold));
            }
        }
        if self.round.bets.contains_key(&participant_id) {
            return Err(CommandRejection::DuplicateBet);
        }

        ledger.reserve(participant_id, stake)?;

        self.round
            .bets
            .insert(participant_id, Bet::new(participant_id, stake, auto_cash_out));
        debug!(
            round = %self.round.id,
            participant = %participant_id.short(),
            stake = %stake,
            "Bet placed"
        );

        let receipt = BetReceipt {
            round_id: self.round.id,
            stake,
            auto_cash_out,
        };
        let event = RoundEvent::BetPlaced {
            round_id: self.round.id,
            participant_id,
            stake,
            auto_cash_out,
        };
        Ok((receipt, event))
    }

    /// Cash out at the current multiplier. Only valid while Flying.
    ///
    /// The caller advances the round to now with [`tick`](Self::tick) first,
    /// so a crash due at this instant has already happened.
    pub fn cash_out(&mut self, participant_id: ParticipantId) -> Result<(CashOut, RoundEvent), CommandRejection> {
        if self.round.phase != RoundPhase::Flying {
            return Err(CommandRejection::WrongPhase { phase: self.round.phase });
        }
        let multiplier = self.round.multiplier;
        let bet = self
            .round
            .bets
            .get_mut(&participant_id)
            .ok_or(CommandRejection::NoOpenBet)?;
        if let Some(existing) = bet.cash_out() {
            return Err(CommandRejection::AlreadyCashedOut {
                multiplier: existing.multiplier,
            });
        }

        let cash_out = bet
            .settle_cash_out(multiplier, false)
            .ok_or(CommandRejection::AlreadyCashedOut { multiplier })?;
        debug!(
            round = %self.round.id,
            participant = %participant_id.short(),
            multiplier = %cash_out.multiplier,
            payout = %cash_out.payout,
            "Cashed out"
        );

        let event = RoundEvent::CashedOut {
            round_id: self.round.id,
            participant_id,
            multiplier: cash_out.multiplier,
            payout: cash_out.payout,
            automatic: false,
        };
        Ok((cash_out, event))
    }

    /// Advance the round to `now`.
    pub fn tick(&mut self, now: Instant) -> Result<TickResult, InvariantViolation> {
        tick::tick(&mut self.round, &self.clock, now)
    }

    /// Abandon the round after an invariant violation.
    ///
    /// Every bet is voided, cash-outs included, and the stakes are returned
    /// by [`settlement_batch`](Self::settlement_batch).
    pub fn abort(&mut self, violation: &InvariantViolation) -> RoundEvent {
        error!(round = %self.round.id, %violation, bets = self.round.bets.len(), "Round aborted");
        self.round.phase = RoundPhase::Crashed;
        self.round.aborted = true;
        RoundEvent::RoundAborted {
            round_id: self.round.id,
            reason: violation.to_string(),
        }
    }

    /// Ledger credits owed once the round is over.
    ///
    /// One credit per bet so every hold is released: the payout for winners,
    /// zero for losers, the stake for every bet of an aborted round.
    /// `None` while the round is still running.
    pub fn settlement_batch(&self) -> Option<SettlementBatch> {
        if self.round.phase != RoundPhase::Crashed {
            return None;
        }
        let credits = self
            .round
            .bets
            .values()
            .map(|bet| SettlementCredit {
                participant_id: bet.participant_id,
                amount: if self.round.aborted { bet.stake } else { bet.final_payout() },
            })
            .collect();
        Some(SettlementBatch {
            round_id: self.round.id,
            credits,
        })
    }

    /// History record for a crashed round. `None` if still running or
    /// aborted.
    pub fn history_entry(&self) -> Option<RoundHistoryEntry> {
        let crash_point = self.round.revealed_crash_point()?;
        let winners = self.round.bets.values().filter(|b| b.is_cashed_out()).count();
        Some(RoundHistoryEntry {
            round_id: self.round.id,
            crash_point,
            final_multiplier: self.round.multiplier,
            commitment: self.round.commitment.to_hex(),
            server_seed: self.round.server_seed,
            bet_count: self.round.bets.len() as u32,
            winner_count: winners as u32,
            total_staked: self
                .round
                .bets
                .values()
                .fold(Amount::ZERO, |sum, b| sum.saturating_add(b.stake)),
            total_paid: self
                .round
                .bets
                .values()
                .fold(Amount::ZERO, |sum, b| sum.saturating_add(b.final_payout())),
            ended_at: chrono::Utc::now(),
        })
    }
}
