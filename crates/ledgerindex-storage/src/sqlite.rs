//! SQLite storage backend for LedgerIndex.
//!
//! Persists the three ledger collections to a single SQLite file with the
//! uniqueness rules expressed as SQL:
//! - `blocks`: `number` primary key, written with `ON CONFLICT … DO UPDATE`
//! - `ledger_transactions`: `tx_id` primary key, written with `INSERT OR IGNORE`
//! - `chaincode_events`: surrogate key only, plain `INSERT`
//!
//! Uses `sqlx` with WAL mode so Read API queries do not block the indexer.
//!
//! # Usage
//! ```rust,no_run
//! use ledgerindex_storage::sqlite::SqliteStorage;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteStorage::open("./ledger.db").await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteStorage::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::debug;

use ledgerindex_core::error::IndexerError;
use ledgerindex_core::store::LedgerStore;
use ledgerindex_core::types::{
    BlockRecord, ChaincodeEvent, InsertOutcome, LedgerTransaction, StoreStats, ValidationCode,
};

fn storage_err(e: sqlx::Error) -> IndexerError {
    IndexerError::Storage(e.to_string())
}

/// SQLite-backed ledger store.
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./ledger.db"`) or a full
    /// SQLite URL (`"sqlite:./ledger.db?mode=rwc"`).
    pub async fn open(path: &str) -> Result<Self, IndexerError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };

        let pool = SqlitePool::connect(&url).await.map_err(storage_err)?;

        let storage = Self { pool };
        storage.init_schema(true).await?;
        Ok(storage)
    }

    /// Open an in-memory SQLite database.
    ///
    /// Pinned to a single long-lived connection, since every SQLite
    /// connection to `:memory:` is its own database.
    pub async fn in_memory() -> Result<Self, IndexerError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .map_err(storage_err)?;

        let storage = Self { pool };
        storage.init_schema(false).await?;
        Ok(storage)
    }

    /// Create tables and indexes.
    async fn init_schema(&self, wal: bool) -> Result<(), IndexerError> {
        if wal {
            sqlx::query("PRAGMA journal_mode=WAL;")
                .execute(&self.pool)
                .await
                .map_err(storage_err)?;
        }

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS blocks (
                number            INTEGER PRIMARY KEY,
                block_hash        TEXT    NOT NULL,
                previous_hash     TEXT    NOT NULL,
                transaction_count INTEGER NOT NULL,
                observed_at       TEXT
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS ledger_transactions (
                tx_id           TEXT    PRIMARY KEY,
                status          TEXT    NOT NULL,
                validation_code INTEGER,
                validation_name TEXT,
                chaincode_id    TEXT,
                block_number    INTEGER NOT NULL
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS chaincode_events (
                id           INTEGER PRIMARY KEY AUTOINCREMENT,
                tx_id        TEXT    NOT NULL,
                chaincode_id TEXT,
                event_name   TEXT    NOT NULL,
                payload      TEXT,
                block_number INTEGER NOT NULL
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        for ddl in [
            "CREATE INDEX IF NOT EXISTS idx_blocks_hash ON blocks (block_hash);",
            "CREATE INDEX IF NOT EXISTS idx_ledger_tx_block ON ledger_transactions (block_number);",
            "CREATE INDEX IF NOT EXISTS idx_events_tx ON chaincode_events (tx_id);",
        ] {
            sqlx::query(ddl)
                .execute(&self.pool)
                .await
                .map_err(storage_err)?;
        }

        Ok(())
    }
}

fn block_from_row(r: &SqliteRow) -> BlockRecord {
    BlockRecord {
        number: r.get::<i64, _>("number") as u64,
        block_hash: r.get("block_hash"),
        previous_hash: r.get("previous_hash"),
        transaction_count: r.get::<i64, _>("transaction_count") as u32,
        observed_at: r.get::<Option<DateTime<Utc>>, _>("observed_at"),
    }
}

fn tx_from_row(r: &SqliteRow) -> LedgerTransaction {
    LedgerTransaction {
        tx_id: r.get("tx_id"),
        status: r.get("status"),
        validation_code: match r.get::<Option<i32>, _>("validation_code") {
            Some(code) => ValidationCode::Code(code),
            None => ValidationCode::Name(r.get::<Option<String>, _>("validation_name").unwrap_or_default()),
        },
        chaincode_id: r.get("chaincode_id"),
        block_number: r.get::<i64, _>("block_number") as u64,
    }
}

fn event_from_row(r: &SqliteRow) -> ChaincodeEvent {
    ChaincodeEvent {
        tx_id: r.get("tx_id"),
        chaincode_id: r.get("chaincode_id"),
        event_name: r.get("event_name"),
        payload: r.get("payload"),
        block_number: r.get::<i64, _>("block_number") as u64,
    }
}

const BLOCK_COLUMNS: &str = "number, block_hash, previous_hash, transaction_count, observed_at";
const TX_COLUMNS: &str =
    "tx_id, status, validation_code, validation_name, chaincode_id, block_number";

#[async_trait]
impl LedgerStore for SqliteStorage {
    async fn upsert_block(&self, block: &BlockRecord) -> Result<(), IndexerError> {
        sqlx::query(
            "INSERT INTO blocks (number, block_hash, previous_hash, transaction_count, observed_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(number) DO UPDATE SET
                block_hash        = excluded.block_hash,
                previous_hash     = excluded.previous_hash,
                transaction_count = excluded.transaction_count,
                observed_at       = excluded.observed_at",
        )
        .bind(block.number as i64)
        .bind(&block.block_hash)
        .bind(&block.previous_hash)
        .bind(block.transaction_count as i64)
        .bind(block.observed_at)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        debug!(block = block.number, "block upserted");
        Ok(())
    }

    async fn insert_transactions_if_absent(
        &self,
        txs: &[LedgerTransaction],
    ) -> Result<InsertOutcome, IndexerError> {
        let mut db_tx = self.pool.begin().await.map_err(storage_err)?;
        let mut outcome = InsertOutcome::default();

        for tx in txs {
            // Numeric codes and symbolic names live in separate columns.
            let (code, name) = match &tx.validation_code {
                ValidationCode::Code(c) => (Some(*c), None),
                ValidationCode::Name(n) => (None, Some(n.as_str())),
            };
            let result = sqlx::query(
                "INSERT OR IGNORE INTO ledger_transactions
                 (tx_id, status, validation_code, validation_name, chaincode_id, block_number)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(&tx.tx_id)
            .bind(&tx.status)
            .bind(code)
            .bind(name)
            .bind(&tx.chaincode_id)
            .bind(tx.block_number as i64)
            .execute(&mut *db_tx)
            .await
            .map_err(storage_err)?;

            if result.rows_affected() == 0 {
                outcome.ignored += 1;
            } else {
                outcome.inserted += 1;
            }
        }

        db_tx.commit().await.map_err(storage_err)?;
        Ok(outcome)
    }

    async fn append_events(&self, events: &[ChaincodeEvent]) -> Result<u64, IndexerError> {
        let mut db_tx = self.pool.begin().await.map_err(storage_err)?;

        for ev in events {
            sqlx::query(
                "INSERT INTO chaincode_events
                 (tx_id, chaincode_id, event_name, payload, block_number)
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&ev.tx_id)
            .bind(&ev.chaincode_id)
            .bind(&ev.event_name)
            .bind(&ev.payload)
            .bind(ev.block_number as i64)
            .execute(&mut *db_tx)
            .await
            .map_err(storage_err)?;
        }

        db_tx.commit().await.map_err(storage_err)?;
        Ok(events.len() as u64)
    }

    async fn latest_block(&self) -> Result<Option<BlockRecord>, IndexerError> {
        let row = sqlx::query(&format!(
            "SELECT {BLOCK_COLUMNS} FROM blocks ORDER BY number DESC LIMIT 1"
        ))
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(row.as_ref().map(block_from_row))
    }

    async fn recent_blocks(&self, limit: usize) -> Result<Vec<BlockRecord>, IndexerError> {
        let rows = sqlx::query(&format!(
            "SELECT {BLOCK_COLUMNS} FROM blocks ORDER BY number DESC LIMIT ?"
        ))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(rows.iter().map(block_from_row).collect())
    }

    async fn block_by_number(&self, number: u64) -> Result<Option<BlockRecord>, IndexerError> {
        let row = sqlx::query(&format!("SELECT {BLOCK_COLUMNS} FROM blocks WHERE number = ?"))
            .bind(number as i64)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;

        Ok(row.as_ref().map(block_from_row))
    }

    async fn block_by_hash(&self, hash: &str) -> Result<Option<BlockRecord>, IndexerError> {
        let row = sqlx::query(&format!(
            "SELECT {BLOCK_COLUMNS} FROM blocks WHERE block_hash = ? COLLATE NOCASE LIMIT 1"
        ))
        .bind(hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(row.as_ref().map(block_from_row))
    }

    async fn transaction(&self, tx_id: &str) -> Result<Option<LedgerTransaction>, IndexerError> {
        let row = sqlx::query(&format!(
            "SELECT {TX_COLUMNS} FROM ledger_transactions WHERE tx_id = ?"
        ))
        .bind(tx_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(row.as_ref().map(tx_from_row))
    }

    async fn transactions_in_block(
        &self,
        block_number: u64,
    ) -> Result<Vec<LedgerTransaction>, IndexerError> {
        let rows = sqlx::query(&format!(
            "SELECT {TX_COLUMNS} FROM ledger_transactions WHERE block_number = ? ORDER BY rowid"
        ))
        .bind(block_number as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(rows.iter().map(tx_from_row).collect())
    }

    async fn events_for_transaction(
        &self,
        tx_id: &str,
    ) -> Result<Vec<ChaincodeEvent>, IndexerError> {
        let rows = sqlx::query(
            "SELECT tx_id, chaincode_id, event_name, payload, block_number
             FROM chaincode_events WHERE tx_id = ? ORDER BY id",
        )
        .bind(tx_id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(rows.iter().map(event_from_row).collect())
    }

    async fn stats(&self) -> Result<StoreStats, IndexerError> {
        let row = sqlx::query(
            "SELECT
                (SELECT COUNT(*) FROM blocks)              AS blocks,
                (SELECT COUNT(*) FROM ledger_transactions) AS transactions,
                (SELECT COUNT(*) FROM chaincode_events)    AS events,
                (SELECT MAX(number) FROM blocks)           AS latest",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(StoreStats {
            blocks: row.get::<i64, _>("blocks") as u64,
            transactions: row.get::<i64, _>("transactions") as u64,
            events: row.get::<i64, _>("events") as u64,
            latest_block: row.get::<Option<i64>, _>("latest").map(|n| n as u64),
        })
    }

    async fn close(&self) {
        self.pool.close().await;
        debug!("sqlite pool closed");
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn block(number: u64, hash: &str, tx_count: u32) -> BlockRecord {
        BlockRecord {
            number,
            block_hash: hash.into(),
            previous_hash: format!("0xprev{number}"),
            transaction_count: tx_count,
            observed_at: Some(Utc::now()),
        }
    }

    fn tx(id: &str, block: u64, code: ValidationCode) -> LedgerTransaction {
        LedgerTransaction {
            tx_id: id.into(),
            status: code.to_string(),
            validation_code: code,
            chaincode_id: Some("kindledgercc".into()),
            block_number: block,
        }
    }

    fn event(tx_id: &str, name: &str, block: u64) -> ChaincodeEvent {
        ChaincodeEvent {
            tx_id: tx_id.into(),
            chaincode_id: Some("kindledgercc".into()),
            event_name: name.into(),
            payload: Some(r#"{"campaignId":"c-1"}"#.into()),
            block_number: block,
        }
    }

    // ── Blocks ────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn block_upsert_is_last_write_wins() {
        let store = SqliteStorage::in_memory().await.unwrap();

        store.upsert_block(&block(10, "0xfirst", 1)).await.unwrap();
        store.upsert_block(&block(10, "0xsecond", 4)).await.unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.blocks, 1);

        let loaded = store.block_by_number(10).await.unwrap().unwrap();
        assert_eq!(loaded.block_hash, "0xsecond");
        assert_eq!(loaded.transaction_count, 4);
        assert!(loaded.observed_at.is_some());
    }

    #[tokio::test]
    async fn recent_blocks_order_and_limit() {
        let store = SqliteStorage::in_memory().await.unwrap();
        for n in [2u64, 0, 4, 1, 3] {
            store.upsert_block(&block(n, &format!("0x{n}"), 0)).await.unwrap();
        }

        let recent = store.recent_blocks(3).await.unwrap();
        let nums: Vec<_> = recent.iter().map(|b| b.number).collect();
        assert_eq!(nums, vec![4, 3, 2]);

        assert_eq!(store.latest_block().await.unwrap().unwrap().number, 4);
        assert_eq!(store.stats().await.unwrap().latest_block, Some(4));
    }

    #[tokio::test]
    async fn empty_store_has_no_latest_block() {
        let store = SqliteStorage::in_memory().await.unwrap();
        assert!(store.latest_block().await.unwrap().is_none());
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.blocks, 0);
        assert_eq!(stats.latest_block, None);
    }

    #[tokio::test]
    async fn block_lookup_by_hash_ignores_case() {
        let store = SqliteStorage::in_memory().await.unwrap();
        store.upsert_block(&block(8, "0xAbCd", 0)).await.unwrap();
        assert_eq!(store.block_by_hash("0xabcd").await.unwrap().unwrap().number, 8);
        assert!(store.block_by_hash("0xffff").await.unwrap().is_none());
    }

    // ── Transactions ──────────────────────────────────────────────────────────

    #[tokio::test]
    async fn transaction_insert_or_ignore_keeps_first() {
        let store = SqliteStorage::in_memory().await.unwrap();

        let first = store
            .insert_transactions_if_absent(&[tx("tx-1", 1, ValidationCode::Code(0))])
            .await
            .unwrap();
        assert_eq!(first, InsertOutcome { inserted: 1, ignored: 0 });

        let second = store
            .insert_transactions_if_absent(&[
                tx("tx-1", 1, ValidationCode::Name("MVCC_READ_CONFLICT".into())),
                tx("tx-2", 1, ValidationCode::Code(0)),
            ])
            .await
            .unwrap();
        assert_eq!(second, InsertOutcome { inserted: 1, ignored: 1 });

        let kept = store.transaction("tx-1").await.unwrap().unwrap();
        assert_eq!(kept.validation_code, ValidationCode::Code(0));
        assert_eq!(store.stats().await.unwrap().transactions, 2);
    }

    #[tokio::test]
    async fn validation_code_kind_survives_storage() {
        let store = SqliteStorage::in_memory().await.unwrap();
        store
            .insert_transactions_if_absent(&[
                tx("numeric", 1, ValidationCode::Code(0)),
                tx("symbolic-zero", 1, ValidationCode::Name("0".into())),
                tx("named", 1, ValidationCode::Name("MVCC_READ_CONFLICT".into())),
            ])
            .await
            .unwrap();

        let numeric = store.transaction("numeric").await.unwrap().unwrap();
        assert_eq!(numeric.validation_code, ValidationCode::Code(0));
        let symbolic = store.transaction("symbolic-zero").await.unwrap().unwrap();
        assert_eq!(symbolic.validation_code, ValidationCode::Name("0".into()));
        let named = store.transaction("named").await.unwrap().unwrap();
        assert_eq!(named.validation_code, ValidationCode::Name("MVCC_READ_CONFLICT".into()));
    }

    #[tokio::test]
    async fn transactions_in_block_in_insert_order() {
        let store = SqliteStorage::in_memory().await.unwrap();
        store
            .insert_transactions_if_absent(&[
                tx("b", 3, ValidationCode::Code(0)),
                tx("a", 3, ValidationCode::Code(0)),
                tx("z", 4, ValidationCode::Code(0)),
            ])
            .await
            .unwrap();
        let ids: Vec<_> = store
            .transactions_in_block(3)
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.tx_id)
            .collect();
        assert_eq!(ids, vec!["b", "a"]);
    }

    #[tokio::test]
    async fn missing_transaction_returns_none() {
        let store = SqliteStorage::in_memory().await.unwrap();
        assert!(store.transaction("nope").await.unwrap().is_none());
    }

    // ── Events ────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn events_accumulate_without_dedup() {
        let store = SqliteStorage::in_memory().await.unwrap();

        store.append_events(&[event("tx-1", "Donated", 1)]).await.unwrap();
        store.append_events(&[event("tx-1", "Donated", 1)]).await.unwrap();

        let events = store.events_for_transaction("tx-1").await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].payload.as_deref(), Some(r#"{"campaignId":"c-1"}"#));
        assert!(store.events_for_transaction("tx-2").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn file_backed_store_persists_across_reopen() {
        let path = std::env::temp_dir().join(format!(
            "ledgerindex-test-{}-{}.db",
            std::process::id(),
            Utc::now().timestamp_nanos_opt().unwrap_or_default()
        ));
        let path = path.to_string_lossy().to_string();

        let store = SqliteStorage::open(&path).await.unwrap();
        store.upsert_block(&block(1, "0x1", 0)).await.unwrap();
        store.close().await;

        let reopened = SqliteStorage::open(&path).await.unwrap();
        assert_eq!(reopened.latest_block().await.unwrap().unwrap().number, 1);
        reopened.close().await;

        let _ = std::fs::remove_file(&path);
    }
}
