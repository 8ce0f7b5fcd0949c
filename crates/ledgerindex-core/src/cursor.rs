//! Start cursor: where a block subscription begins delivering notifications.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::str::FromStr;

use crate::error::IndexerError;

/// Starting point for a block subscription.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StartCursor {
    /// Only blocks produced after subscription time.
    #[default]
    Newest,
    /// Backfill from a specific height.
    Height(u64),
    /// Continue after the highest block already in the store
    /// (falls back to `Newest` on an empty store).
    Resume,
}

impl StartCursor {
    /// Resolve `Resume` against the highest indexed block number.
    pub fn resolve(self, latest_indexed: Option<u64>) -> Self {
        match (self, latest_indexed) {
            (Self::Resume, Some(n)) => Self::Height(n.saturating_add(1)),
            (Self::Resume, None) => Self::Newest,
            (other, _) => other,
        }
    }
}

impl FromStr for StartCursor {
    type Err = IndexerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "newest" => Ok(Self::Newest),
            "resume" => Ok(Self::Resume),
            other => other
                .parse::<u64>()
                .map(Self::Height)
                .map_err(|_| IndexerError::Config(format!("unknown start cursor '{s}'"))),
        }
    }
}

impl std::fmt::Display for StartCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Newest => write!(f, "newest"),
            Self::Height(h) => write!(f, "{h}"),
            Self::Resume => write!(f, "resume"),
        }
    }
}

// Accepts both `cursor = "newest"` and `cursor = 1200` in config files.
impl<'de> Deserialize<'de> for StartCursor {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Height(u64),
            Text(String),
        }
        match Raw::deserialize(d)? {
            Raw::Height(h) => Ok(Self::Height(h)),
            Raw::Text(s) => s.parse().map_err(serde::de::Error::custom),
        }
    }
}

impl Serialize for StartCursor {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Height(h) => s.serialize_u64(*h),
            other => s.serialize_str(&other.to_string()),
        }
    }
}
