//! Route handlers.

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Utc};
use ledgerindex_core::{BlockRecord, ChaincodeEvent, HealthSnapshot, ValidationCode};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::response::ok;
use crate::router::ApiState;

pub const DEFAULT_BLOCK_LIMIT: usize = 10;
pub const MAX_BLOCK_LIMIT: usize = 100;

/// Clamp a client-supplied `limit`: missing, zero or unparseable falls back
/// to [`DEFAULT_BLOCK_LIMIT`]; anything above [`MAX_BLOCK_LIMIT`] is capped.
pub fn clamp_limit(raw: Option<&str>) -> usize {
    match raw.and_then(|s| s.trim().parse::<usize>().ok()) {
        None | Some(0) => DEFAULT_BLOCK_LIMIT,
        Some(n) => n.min(MAX_BLOCK_LIMIT),
    }
}

fn parse_block_number(raw: &str) -> Result<u64, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::BadRequest(format!("block number must be a non-negative integer, got '{raw}'")))
}

// ─── Health ───────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct HealthBody {
    pub status: &'static str,
    pub service: String,
    pub fabric: &'static str,
    pub indexer: HealthSnapshot,
}

/// Always 200; reports connectivity rather than failing.
pub async fn health(State(state): State<ApiState>) -> impl IntoResponse {
    let fabric = if state.health.is_connected() { "Connected" } else { "Disconnected" };
    Json(HealthBody {
        status: "UP",
        service: state.service.clone(),
        fabric,
        indexer: state.health.snapshot(),
    })
}

// ─── Blocks ───────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct BlocksQuery {
    /// Kept as a string so junk values fall back to the default instead of
    /// being rejected.
    pub limit: Option<String>,
}

pub async fn recent_blocks(
    State(state): State<ApiState>,
    Query(query): Query<BlocksQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let limit = clamp_limit(query.limit.as_deref());
    let blocks = state.store.recent_blocks(limit).await?;
    Ok(ok(blocks))
}

pub async fn block_by_number(
    State(state): State<ApiState>,
    Path(number): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let number = parse_block_number(&number)?;
    let block = state
        .store
        .block_by_number(number)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("block {number}")))?;
    Ok(ok(block))
}

pub async fn block_by_hash(
    State(state): State<ApiState>,
    Path(hash): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let block = state
        .store
        .block_by_hash(&hash)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("block with hash {hash}")))?;
    Ok(ok(block))
}

pub async fn block_transactions(
    State(state): State<ApiState>,
    Path(number): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let number = parse_block_number(&number)?;
    let txs = state.store.transactions_in_block(number).await?;
    Ok(ok(txs))
}

// ─── Chain info ───────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChainInfo {
    /// Highest indexed block number + 1, as a decimal string.
    pub height: String,
    pub current_block_hash: String,
    pub previous_block_hash: String,
    pub timestamp: DateTime<Utc>,
}

impl ChainInfo {
    pub fn from_latest(latest: Option<&BlockRecord>, now: DateTime<Utc>) -> Self {
        match latest {
            Some(block) => Self {
                height: (u128::from(block.number) + 1).to_string(),
                current_block_hash: block.block_hash.clone(),
                previous_block_hash: block.previous_hash.clone(),
                timestamp: now,
            },
            None => Self {
                height: "0".into(),
                current_block_hash: String::new(),
                previous_block_hash: String::new(),
                timestamp: now,
            },
        }
    }
}

pub async fn blockchain_info(State(state): State<ApiState>) -> Result<impl IntoResponse, ApiError> {
    let latest = state.store.latest_block().await?;
    Ok(ok(ChainInfo::from_latest(latest.as_ref(), Utc::now())))
}

// ─── Transactions ─────────────────────────────────────────────────────────────

pub async fn transaction(
    State(state): State<ApiState>,
    Path(tx_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let tx = state
        .store
        .transaction(&tx_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("transaction {tx_id}")))?;
    Ok(ok(tx))
}

pub async fn transaction_events(
    State(state): State<ApiState>,
    Path(tx_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let events = state.store.events_for_transaction(&tx_id).await?;
    Ok(ok(events))
}

/// Best-known ledger status of a transaction.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceView {
    pub tx_id: String,
    /// `COMMITTED` when the validation code is valid, `INVALID` otherwise.
    pub blockchain_status: &'static str,
    pub block_number: u64,
    pub validation_code: ValidationCode,
    pub status: String,
    pub chaincode_id: Option<String>,
    pub events: Vec<ChaincodeEvent>,
}

pub async fn trace(
    State(state): State<ApiState>,
    Path(tx_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let tx = state
        .store
        .transaction(&tx_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("transaction {tx_id}")))?;
    let events = state.store.events_for_transaction(&tx_id).await?;

    let blockchain_status = if tx.validation_code.is_valid() { "COMMITTED" } else { "INVALID" };
    Ok(ok(TraceView {
        tx_id: tx.tx_id,
        blockchain_status,
        block_number: tx.block_number,
        validation_code: tx.validation_code,
        status: tx.status,
        chaincode_id: tx.chaincode_id,
        events,
    }))
}

// ─── Stats ────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsView {
    pub total_blocks: u64,
    pub total_transactions: u64,
    pub total_events: u64,
    pub latest_block: Option<u64>,
}

pub async fn stats(State(state): State<ApiState>) -> Result<impl IntoResponse, ApiError> {
    let s = state.store.stats().await?;
    Ok(ok(StatsView {
        total_blocks: s.blocks,
        total_transactions: s.transactions,
        total_events: s.events,
        latest_block: s.latest_block,
    }))
}
