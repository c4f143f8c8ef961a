//! Round Events
//!
//! Everything observers need to follow a round, in the order the engine
//! produced it. Events are published on the broadcast hub and converted to
//! wire messages per connection.

use std::time::Duration;

use crate::core::fixed::{Amount, Multiplier};
use crate::core::rng::ServerSeed;
use crate::game::state::{ParticipantId, RoundId, RoundPhase};

/// A round state change.
#[derive(Clone, Debug, PartialEq)]
pub enum RoundEvent {
    /// New round accepting bets.
    RoundCreated {
        round_id: RoundId,
        /// Hex commitment to the server seed.
        commitment: String,
        betting_window: Duration,
    },

    /// A bet was accepted.
    BetPlaced {
        round_id: RoundId,
        participant_id: ParticipantId,
        stake: Amount,
        auto_cash_out: Option<Multiplier>,
    },

    /// Betting closed, multiplier started climbing.
    FlightStarted { round_id: RoundId },

    /// Multiplier recomputed.
    Tick {
        round_id: RoundId,
        multiplier: Multiplier,
    },

    /// A bet was cashed out.
    CashedOut {
        round_id: RoundId,
        participant_id: ParticipantId,
        multiplier: Multiplier,
        payout: Amount,
        automatic: bool,
    },

    /// The round crashed. Seed revealed.
    Crashed {
        round_id: RoundId,
        crash_point: Multiplier,
        server_seed: ServerSeed,
    },

    /// The round was abandoned on an internal consistency failure; stakes
    /// are refunded.
    RoundAborted { round_id: RoundId, reason: String },
}

impl RoundEvent {
    /// Round the event belongs to.
    pub fn round_id(&self) -> RoundId {
        match self {
            RoundEvent::RoundCreated { round_id, .. }
            | RoundEvent::BetPlaced { round_id, .. }
            | RoundEvent::FlightStarted { round_id }
            | RoundEvent::Tick { round_id, .. }
            | RoundEvent::CashedOut { round_id, .. }
            | RoundEvent::Crashed { round_id, .. }
            | RoundEvent::RoundAborted { round_id, .. } => *round_id,
        }
    }

    /// Phase the round is in once this event has been applied, if the event
    /// changes it.
    pub fn phase_after(&self) -> Option<RoundPhase> {
        match self {
            RoundEvent::RoundCreated { .. } => Some(RoundPhase::Waiting),
            RoundEvent::FlightStarted { .. } => Some(RoundPhase::Flying),
            RoundEvent::Crashed { .. } | RoundEvent::RoundAborted { .. } => Some(RoundPhase::Crashed),
            _ => None,
        }
    }

    /// Whether this event ends the round.
    pub fn is_terminal(&self) -> bool {
        self.phase_after() == Some(RoundPhase::Crashed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_after() {
        let id = RoundId(1);
        assert_eq!(
            RoundEvent::FlightStarted { round_id: id }.phase_after(),
            Some(RoundPhase::Flying)
        );
        assert_eq!(
            RoundEvent::Tick { round_id: id, multiplier: Multiplier::ONE }.phase_after(),
            None
        );
        assert!(RoundEvent::Crashed {
            round_id: id,
            crash_point: Multiplier::ONE,
            server_seed: ServerSeed::new([0; 32]),
        }
        .is_terminal());
        assert!(RoundEvent::RoundAborted { round_id: id, reason: "x".into() }.is_terminal());
    }

    #[test]
    fn test_round_id() {
        let event = RoundEvent::CashedOut {
            round_id: RoundId(42),
            participant_id: ParticipantId::new([1; 16]),
            multiplier: Multiplier::from_hundredths(180),
            payout: Amount::from_minor(1800),
            automatic: false,
        };
        assert_eq!(event.round_id(), RoundId(42));
    }
}
