//! Broadcast Hub
//!
//! The only way in or out of the round engine.
//!
//! ```text
//!   connections                      supervisor task
//!  ┌───────────┐  EngineCommand    ┌─────────────────┐
//!  │ place_bet │ ── mpsc ────────► │ mailbox         │
//!  │ cash_out  │ ◄─ oneshot ────── │ (single writer) │
//!  │ subscribe │                   │                 │
//!  │           │ ◄─ broadcast ──── │ RoundEvent      │
//!  └───────────┘                   └─────────────────┘
//! ```
//!
//! Subscribing goes through the mailbox so the snapshot and the event
//! receiver are created in the same engine step: nothing is missed and
//! nothing is seen twice.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, warn};

use crate::core::fixed::{Amount, Multiplier};
use crate::game::events::RoundEvent;
use crate::game::history::{HistoryStore, RoundHistoryEntry};
use crate::game::round::{BetReceipt, CommandRejection};
use crate::game::state::{CashOut, ParticipantId, RoundSnapshot};

/// Reply channel for a command.
pub type Reply<T> = oneshot::Sender<T>;

/// Request into the supervisor's mailbox.
#[derive(Debug)]
pub enum EngineCommand {
    /// Place a bet in the active round.
    PlaceBet {
        participant_id: ParticipantId,
        stake: Amount,
        auto_cash_out: Option<Multiplier>,
        reply: Reply<Result<BetReceipt, CommandRejection>>,
    },
    /// Cash out of the active round.
    CashOut {
        participant_id: ParticipantId,
        reply: Reply<Result<CashOut, CommandRejection>>,
    },
    /// Open a subscription.
    Subscribe { reply: Reply<SubscriptionStart> },
}

/// Everything a new subscriber starts from.
#[derive(Debug)]
pub struct SubscriptionStart {
    /// Active round at subscription time.
    pub snapshot: RoundSnapshot,
    /// Recent finished rounds, newest first.
    pub history: Vec<RoundHistoryEntry>,
    /// Events after the snapshot.
    pub events: broadcast::Receiver<RoundEvent>,
}

/// Hub errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HubError {
    /// The round refused the command.
    #[error(transparent)]
    Rejected(#[from] CommandRejection),

    /// The supervisor is not running.
    #[error("round engine unavailable")]
    EngineUnavailable,
}

impl HubError {
    /// Wire reason code.
    pub fn code(&self) -> &'static str {
        match self {
            HubError::Rejected(rejection) => rejection.code(),
            HubError::EngineUnavailable => "ENGINE_UNAVAILABLE",
        }
    }
}

/// Cloneable handle to the round engine.
///
/// Holds no event sender: once the supervisor stops, every subscription
/// ends.
#[derive(Clone)]
pub struct BroadcastHub {
    commands: mpsc::Sender<EngineCommand>,
    history: Arc<dyn HistoryStore>,
    subscribers: Arc<AtomicUsize>,
}

impl BroadcastHub {
    pub(crate) fn new(commands: mpsc::Sender<EngineCommand>, history: Arc<dyn HistoryStore>) -> Self {
        Self {
            commands,
            history,
            subscribers: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Subscribe to round events, starting from a snapshot.
    pub async fn subscribe(&self) -> Result<Subscription, HubError> {
        let start = self.request(|reply| EngineCommand::Subscribe { reply }).await?;
        self.subscribers.fetch_add(1, Ordering::Relaxed);
        Ok(Subscription {
            hub: self.clone(),
            snapshot: Some(start.snapshot),
            history: start.history,
            events: start.events,
        })
    }

    /// Place a bet for an authenticated participant.
    pub async fn place_bet(
        &self,
        participant_id: ParticipantId,
        stake: Amount,
        auto_cash_out: Option<Multiplier>,
    ) -> Result<BetReceipt, HubError> {
        self.request(|reply| EngineCommand::PlaceBet {
            participant_id,
            stake,
            auto_cash_out,
            reply,
        })
        .await?
        .map_err(HubError::from)
    }

    /// Cash out for an authenticated participant.
    pub async fn cash_out(&self, participant_id: ParticipantId) -> Result<CashOut, HubError> {
        self.request(|reply| EngineCommand::CashOut { participant_id, reply })
            .await?
            .map_err(HubError::from)
    }

    /// Recent finished rounds, newest first.
    pub fn recent_history(&self, limit: usize) -> Vec<RoundHistoryEntry> {
        self.history.recent(limit)
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.load(Ordering::Relaxed)
    }

    async fn request<T>(&self, command: impl FnOnce(Reply<T>) -> EngineCommand) -> Result<T, HubError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| HubError::EngineUnavailable)?;
        response.await.map_err(|_| HubError::EngineUnavailable)
    }
}

/// Item delivered to a subscriber.
#[derive(Debug, Clone, PartialEq)]
pub enum SubscriptionItem {
    /// Full state. Always first, and again after a resync.
    Snapshot(RoundSnapshot),
    /// Incremental change.
    Event(RoundEvent),
}

/// A live subscription. Dropping it unsubscribes.
pub struct Subscription {
    hub: BroadcastHub,
    snapshot: Option<RoundSnapshot>,
    history: Vec<RoundHistoryEntry>,
    events: broadcast::Receiver<RoundEvent>,
}

impl Subscription {
    /// Recent history captured at subscription time, newest first.
    pub fn history(&self) -> &[RoundHistoryEntry] {
        &self.history
    }

    /// Next item. `None` once the engine has stopped.
    ///
    /// A subscriber that fell too far behind gets a fresh snapshot instead
    /// of the events it missed.
    pub async fn next(&mut self) -> Option<SubscriptionItem> {
        if let Some(snapshot) = self.snapshot.take() {
            return Some(SubscriptionItem::Snapshot(snapshot));
        }

        match self.events.recv().await {
            Ok(event) => Some(SubscriptionItem::Event(event)),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Subscriber lagged, resyncing");
                self.resync().await
            }
            Err(broadcast::error::RecvError::Closed) => None,
        }
    }

    async fn resync(&mut self) -> Option<SubscriptionItem> {
        match self.hub.request(|reply| EngineCommand::Subscribe { reply }).await {
            Ok(start) => {
                self.events = start.events;
                self.history = start.history;
                Some(SubscriptionItem::Snapshot(start.snapshot))
            }
            Err(err) => {
                debug!(%err, "Resync failed");
                None
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.hub.subscribers.fetch_sub(1, Ordering::Relaxed);
    }
}
