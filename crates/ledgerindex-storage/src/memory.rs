//! In-memory storage backend.
//!
//! Holds blocks, transactions and events in RAM behind one mutex, so each
//! batch is applied atomically. All data is lost when the process exits.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use ledgerindex_core::error::IndexerError;
use ledgerindex_core::store::LedgerStore;
use ledgerindex_core::types::{
    BlockRecord, ChaincodeEvent, InsertOutcome, LedgerTransaction, StoreStats,
};

#[derive(Default)]
struct Collections {
    blocks: BTreeMap<u64, BlockRecord>,
    transactions: Vec<LedgerTransaction>,
    tx_index: HashMap<String, usize>,
    events: Vec<ChaincodeEvent>,
}

/// In-memory ledger store.
#[derive(Default)]
pub struct InMemoryStorage {
    data: Mutex<Collections>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Collections>, IndexerError> {
        self.data
            .lock()
            .map_err(|_| IndexerError::Storage("memory store lock poisoned".into()))
    }
}

#[async_trait]
impl LedgerStore for InMemoryStorage {
    async fn upsert_block(&self, block: &BlockRecord) -> Result<(), IndexerError> {
        self.lock()?.blocks.insert(block.number, block.clone());
        Ok(())
    }

    async fn insert_transactions_if_absent(
        &self,
        txs: &[LedgerTransaction],
    ) -> Result<InsertOutcome, IndexerError> {
        let mut data = self.lock()?;
        let mut outcome = InsertOutcome::default();
        for tx in txs {
            if data.tx_index.contains_key(&tx.tx_id) {
                outcome.ignored += 1;
                continue;
            }
            let pos = data.transactions.len();
            data.tx_index.insert(tx.tx_id.clone(), pos);
            data.transactions.push(tx.clone());
            outcome.inserted += 1;
        }
        Ok(outcome)
    }

    async fn append_events(&self, events: &[ChaincodeEvent]) -> Result<u64, IndexerError> {
        self.lock()?.events.extend_from_slice(events);
        Ok(events.len() as u64)
    }

    async fn latest_block(&self) -> Result<Option<BlockRecord>, IndexerError> {
        Ok(self.lock()?.blocks.values().next_back().cloned())
    }

    async fn recent_blocks(&self, limit: usize) -> Result<Vec<BlockRecord>, IndexerError> {
        Ok(self.lock()?.blocks.values().rev().take(limit).cloned().collect())
    }

    async fn block_by_number(&self, number: u64) -> Result<Option<BlockRecord>, IndexerError> {
        Ok(self.lock()?.blocks.get(&number).cloned())
    }

    async fn block_by_hash(&self, hash: &str) -> Result<Option<BlockRecord>, IndexerError> {
        Ok(self
            .lock()?
            .blocks
            .values()
            .find(|b| b.block_hash.eq_ignore_ascii_case(hash))
            .cloned())
    }

    async fn transaction(&self, tx_id: &str) -> Result<Option<LedgerTransaction>, IndexerError> {
        let data = self.lock()?;
        Ok(data.tx_index.get(tx_id).map(|&i| data.transactions[i].clone()))
    }

    async fn transactions_in_block(
        &self,
        block_number: u64,
    ) -> Result<Vec<LedgerTransaction>, IndexerError> {
        Ok(self
            .lock()?
            .transactions
            .iter()
            .filter(|t| t.block_number == block_number)
            .cloned()
            .collect())
    }

    async fn events_for_transaction(
        &self,
        tx_id: &str,
    ) -> Result<Vec<ChaincodeEvent>, IndexerError> {
        Ok(self
            .lock()?
            .events
            .iter()
            .filter(|e| e.tx_id == tx_id)
            .cloned()
            .collect())
    }

    async fn stats(&self) -> Result<StoreStats, IndexerError> {
        let data = self.lock()?;
        Ok(StoreStats {
            blocks: data.blocks.len() as u64,
            transactions: data.transactions.len() as u64,
            events: data.events.len() as u64,
            latest_block: data.blocks.keys().next_back().copied(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledgerindex_core::types::ValidationCode;

    fn block(number: u64, hash: &str) -> BlockRecord {
        BlockRecord {
            number,
            block_hash: hash.into(),
            previous_hash: "0x0".into(),
            transaction_count: 0,
            observed_at: None,
        }
    }

    fn tx(id: &str, block: u64, code: i32) -> LedgerTransaction {
        LedgerTransaction {
            tx_id: id.into(),
            status: "VALID".into(),
            validation_code: ValidationCode::Code(code),
            chaincode_id: None,
            block_number: block,
        }
    }

    #[tokio::test]
    async fn upsert_overwrites_same_number() {
        let store = InMemoryStorage::new();
        store.upsert_block(&block(5, "0xold")).await.unwrap();
        store.upsert_block(&block(5, "0xnew")).await.unwrap();
        assert_eq!(store.stats().await.unwrap().blocks, 1);
        assert_eq!(store.block_by_number(5).await.unwrap().unwrap().block_hash, "0xnew");
    }

    #[tokio::test]
    async fn duplicate_tx_ignored_first_write_wins() {
        let store = InMemoryStorage::new();
        let first = store.insert_transactions_if_absent(&[tx("tx-1", 1, 0)]).await.unwrap();
        let second = store
            .insert_transactions_if_absent(&[tx("tx-1", 1, 11), tx("tx-2", 1, 0)])
            .await
            .unwrap();
        assert_eq!(first, InsertOutcome { inserted: 1, ignored: 0 });
        assert_eq!(second, InsertOutcome { inserted: 1, ignored: 1 });
        let kept = store.transaction("tx-1").await.unwrap().unwrap();
        assert_eq!(kept.validation_code, ValidationCode::Code(0));
    }

    #[tokio::test]
    async fn recent_blocks_descending() {
        let store = InMemoryStorage::new();
        for n in [3, 1, 7, 5] {
            store.upsert_block(&block(n, &format!("0x{n}"))).await.unwrap();
        }
        let nums: Vec<_> = store
            .recent_blocks(3)
            .await
            .unwrap()
            .into_iter()
            .map(|b| b.number)
            .collect();
        assert_eq!(nums, vec![7, 5, 3]);
        assert_eq!(store.latest_block().await.unwrap().unwrap().number, 7);
    }

    #[tokio::test]
    async fn block_lookup_by_hash() {
        let store = InMemoryStorage::new();
        store.upsert_block(&block(2, "0xABC")).await.unwrap();
        assert_eq!(store.block_by_hash("0xabc").await.unwrap().unwrap().number, 2);
        assert!(store.block_by_hash("0xdef").await.unwrap().is_none());
    }
}
