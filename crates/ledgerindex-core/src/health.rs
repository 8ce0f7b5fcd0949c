//! Coarse health signal shared between the pipeline (writer) and the Read
//! API's `/health` endpoint (reader).

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};

use crate::indexer::IndexerState;

/// Lock-free health counters. Block numbers are stored offset by one so that
/// zero means "none yet".
#[derive(Debug, Default)]
pub struct IndexerHealth {
    connected: AtomicBool,
    state: AtomicU8,
    last_indexed: AtomicU64,
    highest_seen: AtomicU64,
    blocks_indexed: AtomicU64,
    write_failures: AtomicU64,
    rejected_records: AtomicU64,
}

/// Point-in-time copy of [`IndexerHealth`], serialized by `/health`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthSnapshot {
    pub connected: bool,
    pub state: IndexerState,
    /// Highest block number written to the store.
    pub last_indexed_block: Option<u64>,
    /// Highest block number the source has delivered.
    pub highest_seen_block: Option<u64>,
    /// `highest_seen - last_indexed`; a growing value means the store is
    /// falling behind or writes are failing.
    pub lag: u64,
    pub blocks_indexed: u64,
    pub write_failures: u64,
    pub rejected_records: u64,
}

impl IndexerHealth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_connected(&self, connected: bool) {
        let was = self.connected.swap(connected, Ordering::Relaxed);
        if was != connected {
            tracing::info!(connected, "block source connectivity changed");
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub fn set_state(&self, state: IndexerState) {
        self.state.store(state as u8, Ordering::Relaxed);
    }

    pub fn state(&self) -> IndexerState {
        IndexerState::from_u8(self.state.load(Ordering::Relaxed))
    }

    // Counters hold `number + 1` so zero means "none"; the top of the range saturates.
    pub fn record_seen(&self, number: u64) {
        self.highest_seen.fetch_max(number.saturating_add(1), Ordering::Relaxed);
    }

    pub fn record_indexed(&self, number: u64) {
        self.last_indexed.fetch_max(number.saturating_add(1), Ordering::Relaxed);
        self.blocks_indexed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_write_failure(&self) {
        self.write_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self, count: u64) {
        self.rejected_records.fetch_add(count, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        let decode = |v: u64| v.checked_sub(1);
        let last = self.last_indexed.load(Ordering::Relaxed);
        let seen = self.highest_seen.load(Ordering::Relaxed);
        HealthSnapshot {
            connected: self.is_connected(),
            state: self.state(),
            last_indexed_block: decode(last),
            highest_seen_block: decode(seen),
            lag: seen.saturating_sub(last),
            blocks_indexed: self.blocks_indexed.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
            rejected_records: self.rejected_records.load(Ordering::Relaxed),
        }
    }
}
