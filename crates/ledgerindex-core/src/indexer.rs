//! The indexing pipeline: a source-adapter task feeding a single indexer
//! task over a bounded channel.
//!
//! ```text
//! BlockSource ──subscribe──▶ adapter task ──mpsc──▶ indexer task ──▶ LedgerStore
//!                                 │                      │
//!                                 └──── IndexerHealth ◀──┘
//! ```
//!
//! Blocks are applied strictly one at a time in arrival order. The bounded
//! channel makes a slow store push back on the source instead of buffering
//! without limit. The pipeline never retries a failed subscription; that is
//! the source's job (see [`BlockSource`]).

use chrono::Utc;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::cursor::StartCursor;
use crate::health::IndexerHealth;
use crate::source::BlockSource;
use crate::store::LedgerStore;
use crate::transform::normalize_block;
use crate::types::{InsertOutcome, SourceBlock};

/// Configuration for an indexer instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
    /// Name used in logs.
    pub name: String,
    /// Where the block subscription starts.
    pub cursor: StartCursor,
    /// Capacity of the adapter → indexer channel.
    pub channel_capacity: usize,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            name: "ledger-indexer".into(),
            cursor: StartCursor::Newest,
            channel_capacity: 64,
        }
    }
}

/// Runtime state of the indexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[repr(u8)]
pub enum IndexerState {
    /// Not yet started.
    Idle = 0,
    /// Subscribing to the block source.
    Connecting = 1,
    /// Receiving blocks.
    Live = 2,
    /// Source unavailable; the read path serves what is already stored.
    Degraded = 3,
    /// Shutting down gracefully.
    Stopping = 4,
    /// Terminated.
    Stopped = 5,
}

impl IndexerState {
    pub(crate) fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Connecting,
            2 => Self::Live,
            3 => Self::Degraded,
            4 => Self::Stopping,
            5 => Self::Stopped,
            _ => Self::Idle,
        }
    }
}

impl std::fmt::Display for IndexerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Connecting => write!(f, "connecting"),
            Self::Live => write!(f, "live"),
            Self::Degraded => write!(f, "degraded"),
            Self::Stopping => write!(f, "stopping"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

// ─── apply_block ──────────────────────────────────────────────────────────────

/// What happened when one block delivery was applied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub block_number: Option<u64>,
    pub block_written: bool,
    /// `None` when the transaction batch failed.
    pub transactions: Option<InsertOutcome>,
    /// `None` when the event batch failed.
    pub events: Option<u64>,
    pub rejected: usize,
}

/// Transform one block and write it through the store.
///
/// The block upsert, the transaction batch and the event batch are
/// independent: a failure in one is logged and counted, and the others are
/// still attempted. Nothing is propagated to the caller.
pub async fn apply_block(
    store: &dyn LedgerStore,
    health: &IndexerHealth,
    raw: &SourceBlock,
) -> ApplyReport {
    let normalized = match normalize_block(raw, Utc::now()) {
        Ok(n) => n,
        Err(e) => {
            warn!(error = %e, "skipping undecodable block");
            health.record_rejected(1);
            return ApplyReport {
                rejected: 1,
                ..Default::default()
            };
        }
    };
    let number = normalized.block.number;

    for reason in &normalized.rejected {
        warn!(block = number, %reason, "dropped malformed record");
    }
    health.record_rejected(normalized.rejected.len() as u64);

    let mut report = ApplyReport {
        block_number: Some(number),
        rejected: normalized.rejected.len(),
        ..Default::default()
    };

    match store.upsert_block(&normalized.block).await {
        Ok(()) => report.block_written = true,
        Err(e) => {
            error!(block = number, error = %e, "block upsert failed");
            health.record_write_failure();
        }
    }

    if !normalized.transactions.is_empty() {
        match store.insert_transactions_if_absent(&normalized.transactions).await {
            Ok(outcome) => {
                if outcome.ignored > 0 {
                    debug!(block = number, ignored = outcome.ignored, "already-indexed transactions ignored");
                }
                report.transactions = Some(outcome);
            }
            Err(e) => {
                error!(block = number, error = %e, "transaction batch failed");
                health.record_write_failure();
            }
        }
    } else {
        report.transactions = Some(InsertOutcome::default());
    }

    if !normalized.events.is_empty() {
        match store.append_events(&normalized.events).await {
            Ok(n) => report.events = Some(n),
            Err(e) => {
                error!(block = number, error = %e, "event batch failed");
                health.record_write_failure();
            }
        }
    } else {
        report.events = Some(0);
    }

    if report.block_written {
        health.record_indexed(number);
    }
    debug!(
        block = number,
        txs = normalized.transactions.len(),
        events = normalized.events.len(),
        "block applied"
    );
    report
}

// ─── LedgerIndexer ────────────────────────────────────────────────────────────

/// Owns everything the pipeline needs. Constructed once at startup and
/// consumed by [`LedgerIndexer::spawn`].
pub struct LedgerIndexer {
    config: IndexerConfig,
    source: Arc<dyn BlockSource>,
    store: Arc<dyn LedgerStore>,
    health: Arc<IndexerHealth>,
}

impl LedgerIndexer {
    pub fn new(
        config: IndexerConfig,
        source: Arc<dyn BlockSource>,
        store: Arc<dyn LedgerStore>,
        health: Arc<IndexerHealth>,
    ) -> Self {
        Self {
            config,
            source,
            store,
            health,
        }
    }

    /// Start the adapter and indexer tasks. Returns immediately; a source
    /// that cannot be reached only degrades the health signal.
    pub fn spawn(self) -> IndexerHandle {
        let (block_tx, block_rx) = mpsc::channel(self.config.channel_capacity.max(1));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        info!(
            indexer = %self.config.name,
            source = self.source.name(),
            cursor = %self.config.cursor,
            "starting ledger indexer"
        );

        let adapter = tokio::spawn(run_source_adapter(
            self.config.cursor,
            Arc::clone(&self.source),
            Arc::clone(&self.store),
            Arc::clone(&self.health),
            block_tx,
            shutdown_rx.clone(),
        ));
        let worker = tokio::spawn(run_indexer(
            Arc::clone(&self.store),
            Arc::clone(&self.health),
            block_rx,
            shutdown_rx,
        ));

        IndexerHandle {
            shutdown_tx,
            adapter,
            worker,
            store: self.store,
            health: self.health,
        }
    }
}

/// Handle to a running pipeline.
pub struct IndexerHandle {
    shutdown_tx: watch::Sender<bool>,
    adapter: JoinHandle<()>,
    worker: JoinHandle<()>,
    store: Arc<dyn LedgerStore>,
    health: Arc<IndexerHealth>,
}

impl IndexerHandle {
    /// Stop consuming blocks, let the in-flight block finish, then release
    /// the store connection.
    pub async fn shutdown(self) {
        self.health.set_state(IndexerState::Stopping);
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.adapter.await {
            error!(error = %e, "source adapter task panicked");
        }
        if let Err(e) = self.worker.await {
            error!(error = %e, "indexer task panicked");
        }
        self.store.close().await;
        self.health.set_connected(false);
        self.health.set_state(IndexerState::Stopped);
        info!("ledger indexer stopped");
    }

    /// Wait until the source ends and every queued block has been applied.
    /// The store stays open.
    pub async fn wait(self) {
        if let Err(e) = self.adapter.await {
            error!(error = %e, "source adapter task panicked");
        }
        if let Err(e) = self.worker.await {
            error!(error = %e, "indexer task panicked");
        }
    }
}

async fn run_source_adapter(
    cursor: StartCursor,
    source: Arc<dyn BlockSource>,
    store: Arc<dyn LedgerStore>,
    health: Arc<IndexerHealth>,
    block_tx: mpsc::Sender<SourceBlock>,
    mut shutdown: watch::Receiver<bool>,
) {
    health.set_state(IndexerState::Connecting);

    let cursor = match cursor {
        StartCursor::Resume => match store.latest_block().await {
            Ok(latest) => cursor.resolve(latest.map(|b| b.number)),
            Err(e) => {
                warn!(error = %e, "cannot read last indexed block; subscribing from newest");
                StartCursor::Newest
            }
        },
        other => other,
    };

    let mut stream = match source.subscribe(cursor).await {
        Ok(s) => {
            info!(source = source.name(), %cursor, "subscribed to block source");
            health.set_connected(true);
            health.set_state(IndexerState::Live);
            s
        }
        Err(e) => {
            error!(source = source.name(), error = %e, "block source unavailable; indexer degraded");
            health.set_connected(false);
            health.set_state(IndexerState::Degraded);
            return;
        }
    };

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            item = stream.next() => match item {
                Some(Ok(block)) => {
                    if !health.is_connected() {
                        health.set_connected(true);
                        health.set_state(IndexerState::Live);
                    }
                    if let Some(n) = block.number {
                        health.record_seen(n);
                    }
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        sent = block_tx.send(block) => if sent.is_err() { break },
                    }
                }
                Some(Err(e)) => {
                    warn!(source = source.name(), error = %e, "block source disconnected");
                    health.set_connected(false);
                    health.set_state(IndexerState::Degraded);
                }
                None => {
                    warn!(source = source.name(), "block stream ended");
                    health.set_connected(false);
                    health.set_state(IndexerState::Degraded);
                    break;
                }
            },
        }
    }
}

async fn run_indexer(
    store: Arc<dyn LedgerStore>,
    health: Arc<IndexerHealth>,
    mut block_rx: mpsc::Receiver<SourceBlock>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            next = block_rx.recv() => match next {
                // Applied outside the select so shutdown cannot interrupt a write.
                Some(block) => {
                    apply_block(store.as_ref(), &health, &block).await;
                }
                None => break,
            },
        }
    }
    debug!("indexer task exiting");
}
