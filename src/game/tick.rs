//! Round Tick
//!
//! Advances one round to a point in time. Called by the round state machine
//! on every clock tick and before every manual cash-out, so the round is
//! always evaluated at "now" before a command is applied.
//!
//! Order within a tick:
//!
//! ```text
//! 1. Waiting and betting window over  ──►  Flying (FlightStarted)
//! 2. Recompute multiplier from elapsed flight time
//! 3. Multiplier must not decrease       (InvariantViolation otherwise)
//! 4. Multiplier >= crash point          ──►  Crashed, frozen at crash point
//! 5. Otherwise auto cash-outs at the new multiplier, ascending
//!    participant id, then Tick
//! ```
//!
//! The crash is checked before any cash-out, so nothing is paid on the
//! tick that crashes the round.

use tokio::time::Instant;

use crate::core::fixed::Multiplier;
use crate::game::clock::RoundClock;
use crate::game::events::RoundEvent;
use crate::game::state::{Round, RoundId, RoundPhase};

/// Result of a tick.
#[derive(Debug, Default)]
pub struct TickResult {
    /// Events generated this tick, in order.
    pub events: Vec<RoundEvent>,
    /// Whether the round is over.
    pub crashed: bool,
}

/// Internal consistency failure. The round cannot continue.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvariantViolation {
    /// Crash point outside `[1.00, cap]`.
    #[error("round {round_id}: crash point {crash_point} outside [1.00x, {cap}]")]
    CrashPointOutOfBounds {
        /// Round.
        round_id: RoundId,
        /// Generated crash point.
        crash_point: Multiplier,
        /// Configured cap.
        cap: Multiplier,
    },

    /// Multiplier went down while flying.
    #[error("round {round_id}: multiplier decreased from {previous} to {next}")]
    MultiplierDecreased {
        /// Round.
        round_id: RoundId,
        /// Last published value.
        previous: Multiplier,
        /// Newly computed value.
        next: Multiplier,
    },
}

/// Advance `round` to `now`.
///
/// Mutations are applied only after every check has passed: on error the
/// round is left exactly as it was.
pub fn tick(round: &mut Round, clock: &RoundClock, now: Instant) -> Result<TickResult, InvariantViolation> {
    let mut result = TickResult::default();

    let flight_started_at = match round.phase {
        RoundPhase::Crashed => {
            result.crashed = true;
            return Ok(result);
        }
        RoundPhase::Waiting if now < round.betting_closes_at => return Ok(result),
        RoundPhase::Waiting => round.betting_closes_at,
        RoundPhase::Flying => round.flight_started_at.unwrap_or(round.betting_closes_at),
    };

    // 1-3. Compute and check before touching the round
    let next = clock
        .multiplier_at(flight_started_at, now)
        .min(round.crash_point);
    if next < round.multiplier {
        return Err(InvariantViolation::MultiplierDecreased {
            round_id: round.id,
            previous: round.multiplier,
            next,
        });
    }

    if round.phase == RoundPhase::Waiting {
        round.phase = RoundPhase::Flying;
        round.flight_started_at = Some(flight_started_at);
        result.events.push(RoundEvent::FlightStarted { round_id: round.id });
    }

    // 4. Crash wins over anything due this tick
    round.multiplier = next;
    if next >= round.crash_point {
        round.phase = RoundPhase::Crashed;
        result.crashed = true;
        result.events.push(RoundEvent::Crashed {
            round_id: round.id,
            crash_point: round.crash_point,
            server_seed: round.server_seed,
        });
        return Ok(result);
    }

    // 5. Auto cash-outs at the published multiplier
    for bet in round.bets.values_mut() {
        if !bet.auto_triggered(next) {
            continue;
        }
        if let Some(cash_out) = bet.settle_cash_out(next, true) {
            result.events.push(RoundEvent::CashedOut {
                round_id: round.id,
                participant_id: bet.participant_id,
                multiplier: cash_out.multiplier,
                payout: cash_out.payout,
                automatic: true,
            });
        }
    }
    result.events.push(RoundEvent::Tick {
        round_id: round.id,
        multiplier: next,
    });

    Ok(result)
}
