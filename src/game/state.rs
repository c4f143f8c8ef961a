//! Round State Definitions
//!
//! Data types for one round of play. Uses BTreeMap for the bet book so that
//! iteration (auto cash-outs, settlement) is in ascending participant order.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::core::fixed::{Amount, Multiplier};
use crate::core::hash::{DomainHasher, PARTICIPANT_DOMAIN};
use crate::core::rng::ServerSeed;
use crate::proof::commitment::RoundCommitment;

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Participant identifier (UUID as bytes).
///
/// Implements Ord for deterministic BTreeMap ordering. Travels on the wire as
/// a UUID string.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct ParticipantId(pub [u8; 16]);

impl ParticipantId {
    /// Create from raw bytes.
    pub const fn new(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Derive a stable id from an auth subject.
    pub fn from_subject(subject: &str) -> Self {
        let mut hasher = DomainHasher::new(PARTICIPANT_DOMAIN);
        hasher.update_bytes(subject.as_bytes());
        let hash = hasher.finalize();

        let mut id = [0u8; 16];
        id.copy_from_slice(&hash[..16]);
        Self(id)
    }

    /// Create from UUID string.
    pub fn from_uuid_str(s: &str) -> Option<Self> {
        uuid::Uuid::parse_str(s).ok().map(|u| Self(*u.as_bytes()))
    }

    /// Convert to UUID string.
    pub fn to_uuid_string(&self) -> String {
        uuid::Uuid::from_bytes(self.0).to_string()
    }

    /// Get raw bytes.
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Short hex prefix for log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl From<ParticipantId> for String {
    fn from(id: ParticipantId) -> String {
        id.to_uuid_string()
    }
}

impl TryFrom<String> for ParticipantId {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::from_uuid_str(&s).ok_or_else(|| format!("invalid participant id: {}", s))
    }
}

/// Round identifier. Strictly increasing across rounds of one supervisor.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoundId(pub u64);

impl RoundId {
    /// The id of the round that follows this one.
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for RoundId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// PHASE
// =============================================================================

/// Round lifecycle phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RoundPhase {
    /// Accepting bets; multiplier not yet moving.
    Waiting,
    /// Multiplier climbing; cash-outs accepted.
    Flying,
    /// Terminal. Multiplier frozen at the crash point.
    Crashed,
}

impl fmt::Display for RoundPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RoundPhase::Waiting => "waiting",
            RoundPhase::Flying => "flying",
            RoundPhase::Crashed => "crashed",
        };
        f.write_str(name)
    }
}

// =============================================================================
// BET
// =============================================================================

/// A honored cash-out. Exists only once payout has been computed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CashOut {
    /// Multiplier the cash-out was honored at.
    pub multiplier: Multiplier,
    /// `stake * multiplier`.
    pub payout: Amount,
    /// Triggered by the auto cash-out threshold rather than a command.
    pub automatic: bool,
}

/// One participant's stake in one round.
///
/// `cash_out` is `Some` exactly when the bet has been cashed out, and is
/// never overwritten once set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Bet {
    /// Owner.
    pub participant_id: ParticipantId,
    /// Reserved stake.
    pub stake: Amount,
    /// Standing instruction to cash out at or above this multiplier.
    pub auto_cash_out: Option<Multiplier>,
    cash_out: Option<CashOut>,
}

impl Bet {
    /// Create an open bet.
    pub fn new(participant_id: ParticipantId, stake: Amount, auto_cash_out: Option<Multiplier>) -> Self {
        Self {
            participant_id,
            stake,
            auto_cash_out,
            cash_out: None,
        }
    }

    /// Whether the bet has been cashed out.
    pub fn is_cashed_out(&self) -> bool {
        self.cash_out.is_some()
    }

    /// The cash-out, if honored.
    pub fn cash_out(&self) -> Option<&CashOut> {
        self.cash_out.as_ref()
    }

    /// Whether the auto threshold has been reached at `multiplier`.
    pub fn auto_triggered(&self, multiplier: Multiplier) -> bool {
        !self.is_cashed_out() && self.auto_cash_out.map_or(false, |t| t <= multiplier)
    }

    /// Honor a cash-out at `multiplier`. Returns `None` if already cashed out.
    pub(crate) fn settle_cash_out(&mut self, multiplier: Multiplier, automatic: bool) -> Option<CashOut> {
        if self.cash_out.is_some() {
            return None;
        }
        let cash_out = CashOut {
            multiplier,
            payout: self.stake.scaled_by(multiplier),
            automatic,
        };
        self.cash_out = Some(cash_out);
        Some(cash_out)
    }

    /// Amount owed to the participant once the round has ended.
    pub fn final_payout(&self) -> Amount {
        self.cash_out.map_or(Amount::ZERO, |c| c.payout)
    }
}

/// Public view of a bet for snapshots.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BetView {
    /// Owner.
    pub participant_id: ParticipantId,
    /// Stake.
    pub stake: Amount,
    /// Whether the bet has been cashed out.
    pub cashed_out: bool,
    /// Multiplier the bet cashed out at.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cash_out_multiplier: Option<Multiplier>,
}

impl From<&Bet> for BetView {
    fn from(bet: &Bet) -> Self {
        Self {
            participant_id: bet.participant_id,
            stake: bet.stake,
            cashed_out: bet.is_cashed_out(),
            cash_out_multiplier: bet.cash_out().map(|c| c.multiplier),
        }
    }
}

// =============================================================================
// ROUND
// =============================================================================

/// One play cycle. Mutated only by the round state machine.
#[derive(Debug)]
pub struct Round {
    pub(crate) id: RoundId,
    pub(crate) phase: RoundPhase,
    pub(crate) crash_point: Multiplier,
    pub(crate) multiplier: Multiplier,
    pub(crate) created_at: Instant,
    pub(crate) betting_closes_at: Instant,
    pub(crate) flight_started_at: Option<Instant>,
    pub(crate) bets: BTreeMap<ParticipantId, Bet>,
    pub(crate) server_seed: ServerSeed,
    pub(crate) commitment: RoundCommitment,
    pub(crate) aborted: bool,
}

impl Round {
    /// Round id.
    pub fn id(&self) -> RoundId {
        self.id
    }

    /// Current phase.
    pub fn phase(&self) -> RoundPhase {
        self.phase
    }

    /// Last computed multiplier.
    pub fn multiplier(&self) -> Multiplier {
        self.multiplier
    }

    /// Crash point, only once crashed.
    pub fn revealed_crash_point(&self) -> Option<Multiplier> {
        (self.phase == RoundPhase::Crashed && !self.aborted).then_some(self.crash_point)
    }

    /// Server seed, only once crashed.
    pub fn revealed_seed(&self) -> Option<ServerSeed> {
        (self.phase == RoundPhase::Crashed).then_some(self.server_seed)
    }

    /// Commitment to the server seed.
    pub fn commitment(&self) -> &RoundCommitment {
        &self.commitment
    }

    /// When the round was created.
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// When betting closes and flight starts.
    pub fn betting_closes_at(&self) -> Instant {
        self.betting_closes_at
    }

    /// When flight started.
    pub fn flight_started_at(&self) -> Option<Instant> {
        self.flight_started_at
    }

    /// Whether the round was aborted on an invariant violation.
    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    /// Bet held by a participant.
    pub fn bet(&self, participant_id: &ParticipantId) -> Option<&Bet> {
        self.bets.get(participant_id)
    }

    /// All bets in ascending participant order.
    pub fn bets(&self) -> impl Iterator<Item = &Bet> {
        self.bets.values()
    }

    /// Number of bets.
    pub fn bet_count(&self) -> usize {
        self.bets.len()
    }

    /// Consistent public view of the round at `now`.
    pub fn snapshot(&self, now: Instant) -> RoundSnapshot {
        RoundSnapshot {
            id: self.id,
            phase: self.phase,
            multiplier: self.multiplier,
            crash_point: self.revealed_crash_point(),
            commitment: self.commitment.to_hex(),
            server_seed: self.revealed_seed(),
            betting_closes_in_ms: match self.phase {
                RoundPhase::Waiting => self.betting_closes_at.saturating_duration_since(now).as_millis() as u64,
                _ => 0,
            },
            bets: self.bets.values().map(BetView::from).collect(),
        }
    }
}

/// Full public state of the active round.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundSnapshot {
    /// Round id.
    pub id: RoundId,
    /// Phase.
    pub phase: RoundPhase,
    /// Current multiplier.
    pub multiplier: Multiplier,
    /// Present only once crashed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crash_point: Option<Multiplier>,
    /// Hex commitment to the server seed.
    pub commitment: String,
    /// Present only once crashed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_seed: Option<ServerSeed>,
    /// Remaining betting window (0 outside Waiting).
    pub betting_closes_in_ms: u64,
    /// Bets in ascending participant order.
    pub bets: Vec<BetView>,
}
