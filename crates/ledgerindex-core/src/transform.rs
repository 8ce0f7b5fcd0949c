//! Block transform: turns a raw [`SourceBlock`] into normalized records.
//!
//! Malformed transactions (undecodable, or no `txId`) and events (undecodable,
//! or no `eventName`) are dropped one at a time; only a block without a usable
//! number is rejected outright.

use chrono::{DateTime, Utc};

use crate::error::IndexerError;
use crate::types::{
    BlockRecord, ChaincodeEvent, Decoded, LedgerTransaction, SourceBlock, ValidationCode,
};

/// Highest block number the stores can hold (SQLite integers are signed).
pub const MAX_BLOCK_NUMBER: u64 = i64::MAX as u64;

/// The records derived from one block delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedBlock {
    pub block: BlockRecord,
    pub transactions: Vec<LedgerTransaction>,
    pub events: Vec<ChaincodeEvent>,
    /// Why individual records were dropped.
    pub rejected: Vec<String>,
}

pub fn normalize_block(
    raw: &SourceBlock,
    observed_at: DateTime<Utc>,
) -> Result<NormalizedBlock, IndexerError> {
    let number = raw.number.ok_or_else(|| IndexerError::Transform {
        block: "?".into(),
        reason: "missing block number".into(),
    })?;
    if number > MAX_BLOCK_NUMBER {
        return Err(IndexerError::Transform {
            block: number.to_string(),
            reason: format!("block number exceeds {MAX_BLOCK_NUMBER}"),
        });
    }

    let block = BlockRecord {
        number,
        block_hash: raw.data_hash.clone().unwrap_or_default(),
        previous_hash: raw.previous_hash.clone().unwrap_or_default(),
        transaction_count: saturating_count(raw.transactions.len()),
        observed_at: Some(observed_at),
    };

    let mut transactions = Vec::with_capacity(raw.transactions.len());
    let mut events = Vec::new();
    let mut rejected = Vec::new();

    for (index, entry) in raw.transactions.iter().enumerate() {
        let tx = match entry {
            Decoded::Valid(tx) => tx,
            Decoded::Malformed { reason, .. } => {
                rejected.push(format!("transaction #{index}: {reason}"));
                continue;
            }
        };

        // Ids are stored verbatim; only blank ones are unusable.
        let tx_id = match tx.tx_id.as_deref() {
            Some(id) if !id.trim().is_empty() => id.to_string(),
            _ => {
                rejected.push(format!("transaction #{index}: missing txId"));
                continue;
            }
        };

        let validation_code = tx
            .validation_code
            .clone()
            .unwrap_or_else(|| ValidationCode::Name("UNKNOWN".into()));
        let status = tx.status.clone().unwrap_or_else(|| validation_code.to_string());

        for (ordinal, entry) in tx.events.iter().enumerate() {
            let ev = match entry {
                Decoded::Valid(ev) => ev,
                Decoded::Malformed { reason, .. } => {
                    rejected.push(format!("event #{ordinal} of {tx_id}: {reason}"));
                    continue;
                }
            };
            let Some(event_name) = ev.event_name.clone().filter(|n| !n.is_empty()) else {
                rejected.push(format!("event #{ordinal} of {tx_id}: missing eventName"));
                continue;
            };
            events.push(ChaincodeEvent {
                tx_id: tx_id.clone(),
                chaincode_id: ev.chaincode_id.clone().or_else(|| tx.chaincode_id.clone()),
                event_name,
                payload: ev
                    .payload
                    .as_deref()
                    .map(|bytes| String::from_utf8_lossy(bytes).into_owned()),
                block_number: number,
            });
        }

        transactions.push(LedgerTransaction {
            tx_id,
            status,
            validation_code,
            chaincode_id: tx.chaincode_id.clone(),
            block_number: number,
        });
    }

    Ok(NormalizedBlock {
        block,
        transactions,
        events,
        rejected,
    })
}

fn saturating_count(len: usize) -> u32 {
    u32::try_from(len).unwrap_or(u32::MAX)
}
