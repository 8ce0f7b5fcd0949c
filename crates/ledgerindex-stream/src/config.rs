//! WebSocket source configuration.

use serde::{Deserialize, Serialize};

/// Connection settings for a [`WsBlockSource`](crate::WsBlockSource).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsSourceConfig {
    /// Gateway endpoint, e.g. `"ws://fabric-gateway:7080/blocks"`.
    #[serde(default = "default_url")]
    pub url: String,
    /// Connect attempts after a failed or dropped connection before giving up.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Initial backoff in milliseconds; doubles per attempt, capped at 2^6.
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    /// Frames buffered between the socket task and the consumer.
    #[serde(default = "default_buffer")]
    pub buffer: usize,
}

fn default_url() -> String { "ws://127.0.0.1:7080/blocks".into() }
fn default_max_retries() -> u32 { 10 }
fn default_backoff_ms() -> u64 { 500 }
fn default_buffer() -> usize { 256 }

impl Default for WsSourceConfig {
    fn default() -> Self {
        Self::new(default_url())
    }
}

impl WsSourceConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_retries: default_max_retries(),
            backoff_ms: default_backoff_ms(),
            buffer: default_buffer(),
        }
    }

    /// Delay before reconnect attempt number `retry` (1-based).
    pub fn backoff(&self, retry: u32) -> std::time::Duration {
        std::time::Duration::from_millis(self.backoff_ms * 2u64.pow(retry.min(6)))
    }
}
