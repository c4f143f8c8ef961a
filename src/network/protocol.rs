//! Protocol Messages
//!
//! Wire format for client-server communication over WebSocket.
//! JSON text frames, a `type` tag per message, camelCase fields. Multipliers
//! and money travel as plain JSON numbers with two decimals.

use serde::{Deserialize, Serialize};

use crate::core::fixed::{Amount, Multiplier};
use crate::core::rng::ServerSeed;
use crate::game::events::RoundEvent;
use crate::game::history::RoundHistoryEntry;
use crate::game::hub::HubError;
use crate::game::round::CommandRejection;
use crate::game::state::{ParticipantId, RoundId, RoundSnapshot};

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// Authenticate with a JWT from the identity provider.
    Auth { token: String },

    /// Bet on the round currently accepting bets.
    ///
    /// Values are kept as sent and validated by the round, so a bad stake
    /// is reported as `INVALID_STAKE` rather than a parse error.
    PlaceBet {
        stake: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        auto_cash_out_threshold: Option<f64>,
    },

    /// Cash out of the active round.
    CashOut,

    /// Request a fresh snapshot of the active round.
    SyncRequest,

    /// Request recent round history.
    History {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        limit: Option<usize>,
    },

    /// Ping for latency measurement.
    Ping { timestamp: u64 },
}

/// A bet request that passed wire validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BetRequest {
    /// Stake.
    pub stake: Amount,
    /// Auto cash-out threshold.
    pub auto_cash_out: Option<Multiplier>,
}

impl BetRequest {
    /// Convert wire decimals, reporting which field was unusable.
    pub fn from_wire(stake: f64, auto_cash_out_threshold: Option<f64>) -> Result<Self, CommandRejection> {
        let stake = Amount::from_decimal(stake).ok_or(CommandRejection::InvalidStake)?;
        let auto_cash_out = match auto_cash_out_threshold {
            Some(value) => Some(
                Multiplier::from_decimal(value)
                    .ok_or(CommandRejection::InvalidThreshold(Multiplier::from_hundredths(0)))?,
            ),
            None => None,
        };
        Ok(Self { stake, auto_cash_out })
    }
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// Authentication result.
    AuthResult {
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        participant_id: Option<ParticipantId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        server_version: String,
    },

    /// Full state of the active round plus recent history.
    Snapshot {
        round: RoundSnapshot,
        history: Vec<RoundHistoryEntry>,
    },

    /// New round accepting bets.
    RoundCreated {
        round_id: RoundId,
        commitment: String,
        betting_closes_in_ms: u64,
    },

    /// Someone placed a bet.
    BetPlaced {
        round_id: RoundId,
        participant_id: ParticipantId,
        stake: Amount,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        auto_cash_out_threshold: Option<Multiplier>,
    },

    /// Betting closed, multiplier climbing.
    FlightStarted { round_id: RoundId },

    /// Current multiplier.
    Tick { round_id: RoundId, multiplier: Multiplier },

    /// Someone cashed out.
    CashedOut {
        round_id: RoundId,
        participant_id: ParticipantId,
        multiplier: Multiplier,
        payout: Amount,
        automatic: bool,
    },

    /// Round crashed; seed revealed for verification.
    Crashed {
        round_id: RoundId,
        crash_point: Multiplier,
        server_seed: ServerSeed,
    },

    /// Round abandoned; stakes refunded.
    RoundAborted { round_id: RoundId, reason: String },

    /// Recent round history, newest first.
    History { entries: Vec<RoundHistoryEntry> },

    /// Your bet was accepted.
    BetAccepted { round_id: RoundId, stake: Amount },

    /// Your cash-out was honored.
    CashOutAccepted { multiplier: Multiplier, payout: Amount },

    /// Pong response.
    Pong { timestamp: u64, server_time: u64 },

    /// A request failed.
    Error { code: ErrorCode, message: String },

    /// Server is shutting down.
    Shutdown { reason: String },
}

impl ServerMessage {
    /// Error message from a code and anything displayable.
    pub fn error(code: ErrorCode, message: impl ToString) -> Self {
        ServerMessage::Error {
            code,
            message: message.to_string(),
        }
    }
}

impl From<RoundEvent> for ServerMessage {
    fn from(event: RoundEvent) -> Self {
        match event {
            RoundEvent::RoundCreated {
                round_id,
                commitment,
                betting_window,
            } => ServerMessage::RoundCreated {
                round_id,
                commitment,
                betting_closes_in_ms: betting_window.as_millis() as u64,
            },
            RoundEvent::BetPlaced {
                round_id,
                participant_id,
                stake,
                auto_cash_out,
            } => ServerMessage::BetPlaced {
                round_id,
                participant_id,
                stake,
                auto_cash_out_threshold: auto_cash_out,
            },
            RoundEvent::FlightStarted { round_id } => ServerMessage::FlightStarted { round_id },
            RoundEvent::Tick { round_id, multiplier } => ServerMessage::Tick { round_id, multiplier },
            RoundEvent::CashedOut {
                round_id,
                participant_id,
                multiplier,
                payout,
                automatic,
            } => ServerMessage::CashedOut {
                round_id,
                participant_id,
                multiplier,
                payout,
                automatic,
            },
            RoundEvent::Crashed {
                round_id,
                crash_point,
                server_seed,
            } => ServerMessage::Crashed {
                round_id,
                crash_point,
                server_seed,
            },
            RoundEvent::RoundAborted { round_id, reason } => ServerMessage::RoundAborted { round_id, reason },
        }
    }
}

/// Error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Command not valid in the current phase.
    WrongPhase,
    /// Already bet this round.
    DuplicateBet,
    /// No bet this round.
    NoOpenBet,
    /// Bet already cashed out.
    AlreadyCashedOut,
    /// Stake not positive or not a number.
    InvalidStake,
    /// Auto cash-out threshold not above 1.00x.
    InvalidThreshold,
    /// Ledger refused the stake.
    InsufficientFunds,
    /// Command requires authentication.
    NotAuthenticated,
    /// Frame could not be parsed.
    InvalidMessage,
    /// Authentication failed.
    AuthFailed,
    /// JWT token has expired.
    TokenExpired,
    /// Round engine not running.
    EngineUnavailable,
    /// Connection limit reached.
    ServerOverloaded,
}

impl From<&CommandRejection> for ErrorCode {
    fn from(rejection: &CommandRejection) -> Self {
        match rejection {
            CommandRejection::WrongPhase { .. } => ErrorCode::WrongPhase,
            CommandRejection::DuplicateBet => ErrorCode::DuplicateBet,
            CommandRejection::NoOpenBet => ErrorCode::NoOpenBet,
            CommandRejection::AlreadyCashedOut { .. } => ErrorCode::AlreadyCashedOut,
            CommandRejection::InvalidStake => ErrorCode::InvalidStake,
            CommandRejection::InvalidThreshold(_) => ErrorCode::InvalidThreshold,
            CommandRejection::InsufficientFunds => ErrorCode::InsufficientFunds,
            CommandRejection::LedgerUnavailable => ErrorCode::EngineUnavailable,
        }
    }
}

impl From<&HubError> for ErrorCode {
    fn from(err: &HubError) -> Self {
        match err {
            HubError::Rejected(rejection) => rejection.into(),
            HubError::EngineUnavailable => ErrorCode::EngineUnavailable,
        }
    }
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl ClientMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl ServerMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}
