//! Round History
//!
//! Append-only record of finished rounds. Each entry carries the commitment
//! and the revealed seed, so any past round can be re-verified from the
//! feed alone.

use std::collections::VecDeque;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::fixed::{Amount, Multiplier};
use crate::core::rng::ServerSeed;
use crate::game::state::RoundId;

/// Summary of one crashed round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundHistoryEntry {
    /// Round.
    #[serde(rename = "id")]
    pub round_id: RoundId,
    /// Where the round crashed.
    pub crash_point: Multiplier,
    /// Multiplier when the round ended. Equals the crash point.
    pub final_multiplier: Multiplier,
    /// Hex commitment published at round creation.
    pub commitment: String,
    /// Revealed seed.
    pub server_seed: ServerSeed,
    /// Bets placed.
    pub bet_count: u32,
    /// Bets cashed out before the crash.
    pub winner_count: u32,
    /// Sum of stakes.
    pub total_staked: Amount,
    /// Sum of payouts.
    pub total_paid: Amount,
    /// Wall-clock time the round ended.
    pub ended_at: DateTime<Utc>,
}

impl RoundHistoryEntry {
    /// Compact binary encoding for archival.
    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    /// Decode from [`to_bytes`](Self::to_bytes) output.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(bytes)
    }
}

/// Append-only store of finished rounds.
pub trait HistoryStore: Send + Sync {
    /// Append an entry.
    fn append(&self, entry: RoundHistoryEntry);

    /// Up to `limit` most recent entries, newest first.
    fn recent(&self, limit: usize) -> Vec<RoundHistoryEntry>;
}

/// Bounded in-memory history. Oldest entries fall off past `capacity`.
#[derive(Debug)]
pub struct InMemoryHistoryStore {
    entries: RwLock<VecDeque<RoundHistoryEntry>>,
    capacity: usize,
}

impl InMemoryHistoryStore {
    /// Default number of retained rounds.
    pub const DEFAULT_CAPACITY: usize = 1_000;

    /// Create a store keeping at most `capacity` rounds.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(VecDeque::with_capacity(capacity.min(Self::DEFAULT_CAPACITY))),
            capacity: capacity.max(1),
        }
    }

    /// Number of retained rounds.
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryHistoryStore {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

impl HistoryStore for InMemoryHistoryStore {
    fn append(&self, entry: RoundHistoryEntry) {
        let mut entries = self.entries.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    fn recent(&self, limit: usize) -> Vec<RoundHistoryEntry> {
        let entries = self.entries.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        entries.iter().rev().take(limit).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: u64, crash: u32) -> RoundHistoryEntry {
        RoundHistoryEntry {
            round_id: RoundId(id),
            crash_point: Multiplier::from_hundredths(crash),
            final_multiplier: Multiplier::from_hundredths(crash),
            commitment: "00".repeat(32),
            server_seed: ServerSeed::new([id as u8; 32]),
            bet_count: 3,
            winner_count: 2,
            total_staked: Amount::from_minor(3000),
            total_paid: Amount::from_minor(4200),
            ended_at: Utc::now(),
        }
    }

    #[test]
    fn test_recent_newest_first() {
        let store = InMemoryHistoryStore::default();
        for id in 1..=5 {
            store.append(entry(id, 200));
        }
        let ids: Vec<_> = store.recent(3).iter().map(|e| e.round_id.0).collect();
        assert_eq!(ids, vec![5, 4, 3]);
        assert_eq!(store.recent(100).len(), 5);
    }

    #[test]
    fn test_capacity_drops_oldest() {
        let store = InMemoryHistoryStore::new(2);
        for id in 1..=3 {
            store.append(entry(id, 150));
        }
        assert_eq!(store.len(), 2);
        let ids: Vec<_> = store.recent(10).iter().map(|e| e.round_id.0).collect();
        assert_eq!(ids, vec![3, 2]);
    }

    #[test]
    fn test_bincode_encoding() {
        let original = entry(9, 290);
        let bytes = original.to_bytes().unwrap();
        assert_eq!(RoundHistoryEntry::from_bytes(&bytes).unwrap(), original);
        assert!(RoundHistoryEntry::from_bytes(&bytes[..4]).is_err());
    }

    #[test]
    fn test_wire_shape() {
        let json = serde_json::to_value(entry(7, 290)).unwrap();
        assert_eq!(json["id"], 7);
        assert_eq!(json["crashPoint"], 2.9);
        assert!(json["serverSeed"].is_string());
    }
}
