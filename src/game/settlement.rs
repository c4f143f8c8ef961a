//! Round Settlement
//!
//! Once a round is over its outcome is fixed: settlement only has to get the
//! credits into the ledger. Each credit is retried with exponential backoff
//! until the ledger acknowledges it, independently of the round loop.
//!
//! ```text
//! crashed ──► store.record(batch) ──► settle_with_retry
//!                                        │ ledger ok  ──► store.acknowledge
//!                                        │ transient  ──► backoff, retry
//!                                        └ abandoned  ──► stays pending
//! ```
//!
//! A credit leaves the [`SettlementStore`] only once the ledger has
//! acknowledged it, so a cancelled or abandoned settlement can be resumed
//! from [`SettlementStore::pending`] without recomputing the round.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};

use crate::core::fixed::Amount;
use crate::game::ledger::{BalanceLedger, LedgerError};
use crate::game::state::{ParticipantId, RoundId};

/// One ledger credit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementCredit {
    /// Bet owner.
    pub participant_id: ParticipantId,
    /// Amount to credit. Zero releases a losing hold.
    pub amount: Amount,
}

/// All credits for one round, in ascending participant order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementBatch {
    /// Round.
    pub round_id: RoundId,
    /// Credits.
    pub credits: Vec<SettlementCredit>,
}

impl SettlementBatch {
    /// Sum of all credits.
    pub fn total(&self) -> Amount {
        self.credits
            .iter()
            .fold(Amount::ZERO, |sum, c| sum.saturating_add(c.amount))
    }

    /// Compact binary encoding for a durable store.
    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    /// Decode from [`to_bytes`](Self::to_bytes) output.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(bytes)
    }
}

// =============================================================================
// PENDING SETTLEMENTS
// =============================================================================

/// Credits owed but not yet acknowledged by the ledger.
pub trait SettlementStore: Send + Sync {
    /// Record a finished round's credits. Replaces any batch for the round.
    fn record(&self, batch: SettlementBatch);

    /// Drop one credit after the ledger acknowledged it.
    fn acknowledge(&self, round_id: RoundId, participant_id: ParticipantId);

    /// Unacknowledged credits, oldest round first.
    fn pending(&self) -> Vec<SettlementBatch>;
}

/// Process-local pending settlements.
#[derive(Debug, Default)]
pub struct InMemorySettlementStore {
    batches: Mutex<BTreeMap<RoundId, SettlementBatch>>,
}

impl InMemorySettlementStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<RoundId, SettlementBatch>> {
        self.batches.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl SettlementStore for InMemorySettlementStore {
    fn record(&self, batch: SettlementBatch) {
        let mut batches = self.lock();
        if batch.credits.is_empty() {
            batches.remove(&batch.round_id);
        } else {
            batches.insert(batch.round_id, batch);
        }
    }

    fn acknowledge(&self, round_id: RoundId, participant_id: ParticipantId) {
        let mut batches = self.lock();
        if let Some(batch) = batches.get_mut(&round_id) {
            batch.credits.retain(|c| c.participant_id != participant_id);
            if batch.credits.is_empty() {
                batches.remove(&round_id);
            }
        }
    }

    fn pending(&self) -> Vec<SettlementBatch> {
        self.lock().values().cloned().collect()
    }
}

/// Retry schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub initial_backoff: Duration,
    /// Upper bound on the delay.
    pub max_backoff: Duration,
    /// Give up after this many attempts per credit. `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(30),
            max_attempts: None,
        }
    }
}

impl RetryPolicy {
    /// Delay after `attempt` failed attempts (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}

/// Outcome of settling a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementReport {
    /// Round.
    pub round_id: RoundId,
    /// Credits acknowledged.
    pub settled: usize,
    /// Credits abandoned after a permanent error or `max_attempts`. They
    /// stay pending in the store.
    pub failed: Vec<SettlementCredit>,
    /// Total ledger calls made.
    pub attempts: u32,
}

/// Apply every credit in the batch, retrying transient failures.
///
/// Permanent errors are not retried. Each acknowledged credit is removed
/// from `store`; the caller records the batch there beforehand.
#[instrument(skip(ledger, store, batch), fields(round = %batch.round_id, credits = batch.credits.len()))]
pub async fn settle_with_retry(
    ledger: Arc<dyn BalanceLedger>,
    store: Arc<dyn SettlementStore>,
    batch: SettlementBatch,
    policy: RetryPolicy,
) -> SettlementReport {
    let mut report = SettlementReport {
        round_id: batch.round_id,
        settled: 0,
        failed: Vec::new(),
        attempts: 0,
    };

    for credit in &batch.credits {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            report.attempts += 1;

            match ledger.settle(batch.round_id, credit.participant_id, credit.amount) {
                Ok(()) => {
                    store.acknowledge(batch.round_id, credit.participant_id);
                    report.settled += 1;
                    break;
                }
                Err(err) if should_retry(&err, attempt, &policy) => {
                    let delay = policy.backoff(attempt);
                    warn!(
                        participant = %credit.participant_id.short(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Settlement failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    error!(
                        participant = %credit.participant_id.short(),
                        amount = %credit.amount,
                        attempt,
                        error = %err,
                        "Settlement abandoned"
                    );
                    report.failed.push(*credit);
                    break;
                }
            }
        }
    }

    if report.failed.is_empty() {
        info!(settled = report.settled, total = %batch.total(), "Round settled");
    } else {
        error!(
            settled = report.settled,
            failed = report.failed.len(),
            "Round settlement incomplete, credits left pending"
        );
    }
    report
}

fn should_retry(err: &LedgerError, attempt: u32, policy: &RetryPolicy) -> bool {
    err.is_transient() && policy.max_attempts.map_or(true, |max| attempt < max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::ledger::InMemoryLedger;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails the first `failures` calls, then delegates.
    struct FlakyLedger {
        inner: InMemoryLedger,
        failures: AtomicU32,
    }

    impl BalanceLedger for FlakyLedger {
        fn reserve(&self, participant: ParticipantId, amount: Amount) -> Result<(), LedgerError> {
            self.inner.reserve(participant, amount)
        }

        fn settle(&self, round: RoundId, participant: ParticipantId, amount: Amount) -> Result<(), LedgerError> {
            if self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                return Err(LedgerError::Unavailable("timeout".into()));
            }
            self.inner.settle(round, participant, amount)
        }
    }

    fn batch() -> SettlementBatch {
        SettlementBatch {
            round_id: RoundId(3),
            credits: vec![
                SettlementCredit {
                    participant_id: ParticipantId::new([1; 16]),
                    amount: Amount::from_minor(1800),
                },
                SettlementCredit {
                    participant_id: ParticipantId::new([2; 16]),
                    amount: Amount::ZERO,
                },
            ],
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(1),
            max_attempts: None,
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(4), Duration::from_millis(800));
        assert_eq!(policy.backoff(5), Duration::from_secs(1));
        assert_eq!(policy.backoff(40), Duration::from_secs(1));
    }

    #[test]
    fn test_batch_total() {
        assert_eq!(batch().total(), Amount::from_minor(1800));
    }

    fn store_with(batch: SettlementBatch) -> Arc<InMemorySettlementStore> {
        let store = Arc::new(InMemorySettlementStore::new());
        store.record(batch);
        store
    }

    #[test]
    fn test_store_drops_acknowledged_credits() {
        let store = store_with(batch());
        store.acknowledge(RoundId(3), ParticipantId::new([2; 16]));
        assert_eq!(store.pending()[0].credits, vec![batch().credits[0]]);

        store.acknowledge(RoundId(3), ParticipantId::new([1; 16]));
        assert!(store.pending().is_empty());

        // Unknown round is a no-op
        store.acknowledge(RoundId(9), ParticipantId::new([1; 16]));
    }

    #[test]
    fn test_store_pending_oldest_first() {
        let store = InMemorySettlementStore::new();
        for id in [7, 2, 5] {
            store.record(SettlementBatch {
                round_id: RoundId(id),
                ..batch()
            });
        }
        let rounds: Vec<_> = store.pending().iter().map(|b| b.round_id).collect();
        assert_eq!(rounds, vec![RoundId(2), RoundId(5), RoundId(7)]);
    }

    #[test]
    fn test_batch_bytes() {
        let bytes = batch().to_bytes().unwrap();
        assert_eq!(SettlementBatch::from_bytes(&bytes).unwrap(), batch());
    }

    #[tokio::test(start_paused = true)]
    async fn test_settles_after_transient_failures() {
        let ledger = Arc::new(FlakyLedger {
            inner: InMemoryLedger::new(),
            failures: AtomicU32::new(3),
        });
        let store = store_with(batch());

        let report = settle_with_retry(ledger.clone(), store.clone(), batch(), RetryPolicy::default()).await;

        assert_eq!(report.settled, 2);
        assert!(report.failed.is_empty());
        assert_eq!(report.attempts, 5);
        assert_eq!(
            ledger.inner.balance(&ParticipantId::new([1; 16])),
            Some(Amount::from_minor(1800))
        );
        assert!(store.pending().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let ledger = Arc::new(FlakyLedger {
            inner: InMemoryLedger::new(),
            failures: AtomicU32::new(100),
        });
        let policy = RetryPolicy {
            max_attempts: Some(3),
            ..RetryPolicy::default()
        };
        let store = store_with(batch());

        let report = settle_with_retry(ledger, store.clone(), batch(), policy).await;

        assert_eq!(report.settled, 0);
        assert_eq!(report.failed.len(), 2);
        assert_eq!(report.attempts, 6);
        // Abandoned credits are still owed
        assert_eq!(store.pending(), vec![batch()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_settlement_resumes_from_store() {
        let down = Arc::new(FlakyLedger {
            inner: InMemoryLedger::new(),
            failures: AtomicU32::new(u32::MAX),
        });
        let store = store_with(batch());

        let task = tokio::spawn(settle_with_retry(down, store.clone(), batch(), RetryPolicy::default()));
        tokio::time::sleep(Duration::from_secs(2)).await;
        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());
        assert_eq!(store.pending(), vec![batch()]);

        let ledger = Arc::new(InMemoryLedger::new());
        for pending in store.pending() {
            let report = settle_with_retry(ledger.clone(), store.clone(), pending, RetryPolicy::default()).await;
            assert_eq!(report.settled, 2);
        }
        assert!(store.pending().is_empty());
        assert_eq!(
            ledger.balance(&ParticipantId::new([1; 16])),
            Some(Amount::from_minor(1800))
        );
    }
}
