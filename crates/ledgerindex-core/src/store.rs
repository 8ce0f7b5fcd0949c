//! `LedgerStore`: the materialized view's storage boundary.
//!
//! The uniqueness rules live here rather than in the transform:
//! - blocks: match-or-insert by `number` (last write wins)
//! - transactions: insert-or-ignore by `tx_id` (first write wins)
//! - events: plain append, no identity key
//!
//! The indexer is the only writer; the Read API only calls the read side.

use async_trait::async_trait;

use crate::error::IndexerError;
use crate::types::{BlockRecord, ChaincodeEvent, InsertOutcome, LedgerTransaction, StoreStats};

#[async_trait]
pub trait LedgerStore: Send + Sync {
    // ── write side ──────────────────────────────────────────────────────────

    /// Insert the block, or overwrite every field of the existing row with
    /// the same `number`.
    async fn upsert_block(&self, block: &BlockRecord) -> Result<(), IndexerError>;

    /// Insert each transaction whose `tx_id` is not yet stored. Existing rows
    /// are left untouched and counted as `ignored`.
    async fn insert_transactions_if_absent(
        &self,
        txs: &[LedgerTransaction],
    ) -> Result<InsertOutcome, IndexerError>;

    /// Append events. Returns the number of rows written.
    async fn append_events(&self, events: &[ChaincodeEvent]) -> Result<u64, IndexerError>;

    // ── read side ───────────────────────────────────────────────────────────

    /// The block with the highest number, if any.
    async fn latest_block(&self) -> Result<Option<BlockRecord>, IndexerError>;

    /// Up to `limit` blocks, ordered by descending number.
    async fn recent_blocks(&self, limit: usize) -> Result<Vec<BlockRecord>, IndexerError>;

    async fn block_by_number(&self, number: u64) -> Result<Option<BlockRecord>, IndexerError>;

    async fn block_by_hash(&self, hash: &str) -> Result<Option<BlockRecord>, IndexerError>;

    async fn transaction(&self, tx_id: &str) -> Result<Option<LedgerTransaction>, IndexerError>;

    async fn transactions_in_block(
        &self,
        block_number: u64,
    ) -> Result<Vec<LedgerTransaction>, IndexerError>;

    /// Events for a transaction in insertion order.
    async fn events_for_transaction(&self, tx_id: &str)
        -> Result<Vec<ChaincodeEvent>, IndexerError>;

    async fn stats(&self) -> Result<StoreStats, IndexerError>;

    // ── lifecycle ───────────────────────────────────────────────────────────

    /// Release the underlying connection. Reads after `close` may fail.
    async fn close(&self) {}
}
