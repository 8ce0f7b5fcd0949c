//! `ledgerindex.toml`: application configuration.
//!
//! ```toml
//! [indexer]
//! cursor = "resume"          # "newest" | "resume" | <height>
//!
//! [source]
//! url = "ws://fabric-gateway:7080/blocks"
//! max_retries = 10
//!
//! [store]
//! backend = "sqlite"         # "sqlite" | "memory"
//! path = "ledger.db"
//!
//! [api]
//! listen = "0.0.0.0:3000"
//! service = "ledger-explorer"
//!
//! [log]
//! level = "info"
//! json = false
//! ```
//!
//! Every field has a default, so an empty file (or no file) is valid.

use std::path::Path;

use anyhow::{Context, Result};
use ledgerindex_core::IndexerConfig;
use ledgerindex_stream::WsSourceConfig;
use serde::{Deserialize, Serialize};

use crate::telemetry::LogConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub indexer: IndexerConfig,
    pub source: WsSourceConfig,
    pub store: StoreConfig,
    pub api: ApiConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Sqlite,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// SQLite database file; ignored by the memory backend.
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Sqlite,
            path: "ledgerindex.db".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub listen: String,
    /// Name reported by `/health`.
    pub service: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:3000".into(),
            service: "ledger-explorer".into(),
        }
    }
}

impl AppConfig {
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).context("invalid configuration")
    }

    /// Load `path`, or defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("reading config file {}", path.display()))?;
                Self::from_toml(&text).with_context(|| format!("in {}", path.display()))
            }
            None => Ok(Self::default()),
        }
    }
}
