//! ledgerindex-stream: block sources that talk to a live ledger.
//!
//! [`WsBlockSource`] subscribes to a ledger gateway over WebSocket and owns
//! reconnection, so the indexer pipeline can treat it as a source that
//! "retries under the hood".

pub mod config;
pub mod ws;

pub use config::WsSourceConfig;
pub use ws::WsBlockSource;
