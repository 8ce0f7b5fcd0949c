//! Shared types: raw block payloads from a source, and the normalized
//! records the indexer persists.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

// ─── Raw source payloads ──────────────────────────────────────────────────────

/// A block notification as delivered by a [`BlockSource`](crate::source::BlockSource).
///
/// Transactions and events are decoded one by one into [`Decoded`], so a
/// single bad record does not reject the block at decode time;
/// [`normalize_block`](crate::transform::normalize_block) decides what survives.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceBlock {
    pub number: Option<u64>,
    /// Header data hash (hex).
    #[serde(default)]
    pub data_hash: Option<String>,
    /// Header previous-block hash (hex).
    #[serde(default)]
    pub previous_hash: Option<String>,
    #[serde(default)]
    pub transactions: Vec<Decoded<SourceTransaction>>,
}

/// One transaction inside a [`SourceBlock`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceTransaction {
    #[serde(default)]
    pub tx_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub validation_code: Option<ValidationCode>,
    #[serde(default)]
    pub chaincode_id: Option<String>,
    #[serde(default)]
    pub events: Vec<Decoded<SourceEvent>>,
}

/// A contract event emitted by a transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceEvent {
    #[serde(default)]
    pub chaincode_id: Option<String>,
    #[serde(default)]
    pub event_name: Option<String>,
    /// Raw payload bytes, hex-encoded on the wire.
    #[serde(default, with = "hex_bytes")]
    pub payload: Option<Vec<u8>>,
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        match v {
            Some(bytes) => s.serialize_str(&format!("0x{}", hex::encode(bytes))),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        let raw: Option<String> = Option::deserialize(d)?;
        match raw {
            None => Ok(None),
            Some(s) => {
                let s = s.strip_prefix("0x").unwrap_or(&s);
                hex::decode(s).map(Some).map_err(serde::de::Error::custom)
            }
        }
    }
}

// ─── Per-record decoding ──────────────────────────────────────────────────────

/// One list entry of a raw payload, decoded independently of its siblings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded<T> {
    Valid(T),
    /// The entry did not match the expected shape; `raw` is kept as received.
    Malformed {
        raw: serde_json::Value,
        reason: String,
    },
}

impl<T> Decoded<T> {
    pub fn valid(&self) -> Option<&T> {
        match self {
            Self::Valid(v) => Some(v),
            Self::Malformed { .. } => None,
        }
    }
}

impl<T> From<T> for Decoded<T> {
    fn from(v: T) -> Self {
        Self::Valid(v)
    }
}

impl<'de, T: DeserializeOwned> Deserialize<'de> for Decoded<T> {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let raw = serde_json::Value::deserialize(d)?;
        Ok(match serde_json::from_value(raw.clone()) {
            Ok(v) => Self::Valid(v),
            Err(e) => Self::Malformed {
                raw,
                reason: e.to_string(),
            },
        })
    }
}

impl<T: Serialize> Serialize for Decoded<T> {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Valid(v) => v.serialize(s),
            Self::Malformed { raw, .. } => raw.serialize(s),
        }
    }
}

// ─── ValidationCode ───────────────────────────────────────────────────────────

/// The ledger's per-transaction outcome: either a numeric code or its
/// symbolic name, depending on the source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ValidationCode {
    Code(i32),
    Name(String),
}

impl ValidationCode {
    /// Returns `true` if the ledger committed the transaction as valid.
    pub fn is_valid(&self) -> bool {
        match self {
            Self::Code(c) => *c == 0,
            Self::Name(n) => n.eq_ignore_ascii_case("VALID"),
        }
    }
}

impl std::fmt::Display for ValidationCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Code(c) => write!(f, "{c}"),
            Self::Name(n) => write!(f, "{n}"),
        }
    }
}

// ─── Normalized records ───────────────────────────────────────────────────────

/// One indexed ledger block. Unique by `number`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockRecord {
    pub number: u64,
    pub block_hash: String,
    pub previous_hash: String,
    pub transaction_count: u32,
    /// When the indexer persisted the record (not the ledger's block time).
    pub observed_at: Option<DateTime<Utc>>,
}

/// One indexed transaction. Unique by `tx_id`; never updated once stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerTransaction {
    pub tx_id: String,
    pub status: String,
    pub validation_code: ValidationCode,
    pub chaincode_id: Option<String>,
    pub block_number: u64,
}

/// A chaincode event. Append-only, no identity key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChaincodeEvent {
    pub tx_id: String,
    pub chaincode_id: Option<String>,
    pub event_name: String,
    pub payload: Option<String>,
    pub block_number: u64,
}

/// Result of an insert-or-ignore batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsertOutcome {
    /// Rows written.
    pub inserted: u64,
    /// Rows skipped because the key already existed.
    pub ignored: u64,
}

/// Row counts across the materialized store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    pub blocks: u64,
    pub transactions: u64,
    pub events: u64,
    pub latest_block: Option<u64>,
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_block_decodes_camel_case_json() {
        let json = r#"{
            "number": 7,
            "dataHash": "0xdd",
            "previousHash": "0xpp",
            "transactions": [{
                "txId": "tx-1",
                "status": "VALID",
                "validationCode": 0,
                "chaincodeId": "kindledgercc",
                "events": [{ "eventName": "Donated", "payload": "0x7b7d" }]
            }]
        }"#;
        let block: SourceBlock = serde_json::from_str(json).unwrap();
        assert_eq!(block.number, Some(7));
        let tx = block.transactions[0].valid().unwrap();
        assert_eq!(tx.validation_code, Some(ValidationCode::Code(0)));
        let ev = tx.events[0].valid().unwrap();
        assert_eq!(ev.payload.as_deref(), Some(&b"{}"[..]));
    }

    #[test]
    fn missing_tx_id_still_decodes() {
        let json = r#"{ "number": 1, "transactions": [{ "status": "VALID" }] }"#;
        let block: SourceBlock = serde_json::from_str(json).unwrap();
        assert!(block.transactions[0].valid().unwrap().tx_id.is_none());
    }

    #[test]
    fn bad_records_are_isolated_from_siblings() {
        let json = r#"{
            "number": 9,
            "transactions": [
                { "txId": "good", "validationCode": 0 },
                { "txId": "bad", "events": [
                    { "eventName": "Minted", "payload": "0x7b7d" },
                    { "eventName": "Broken", "payload": "not-hex" }
                ]},
                { "txId": 42 },
                { "txId": "odd-code", "validationCode": true }
            ]
        }"#;
        let block: SourceBlock = serde_json::from_str(json).unwrap();
        assert_eq!(block.number, Some(9));
        assert_eq!(block.transactions.len(), 4);
        assert!(block.transactions[0].valid().is_some());

        let with_events = block.transactions[1].valid().unwrap();
        assert!(with_events.events[0].valid().is_some());
        assert!(matches!(with_events.events[1], Decoded::Malformed { .. }));

        assert!(block.transactions[2].valid().is_none());
        assert!(block.transactions[3].valid().is_none());
    }

    #[test]
    fn malformed_entry_serializes_as_received() {
        let json = r#"{"number":1,"transactions":[{"txId":42}]}"#;
        let block: SourceBlock = serde_json::from_str(json).unwrap();
        let v = serde_json::to_value(&block).unwrap();
        assert_eq!(v["transactions"][0]["txId"], 42);
    }

    #[test]
    fn validation_code_validity() {
        assert!(ValidationCode::Code(0).is_valid());
        assert!(ValidationCode::Name("valid".into()).is_valid());
        assert!(!ValidationCode::Code(10).is_valid());
        assert!(!ValidationCode::Name("ENDORSEMENT_POLICY_FAILURE".into()).is_valid());
    }

    #[test]
    fn block_record_serializes_camel_case() {
        let b = BlockRecord {
            number: 3,
            block_hash: "0xabc".into(),
            previous_hash: "0xab".into(),
            transaction_count: 2,
            observed_at: None,
        };
        let v = serde_json::to_value(&b).unwrap();
        assert_eq!(v["blockHash"], "0xabc");
        assert_eq!(v["transactionCount"], 2);
    }
}
