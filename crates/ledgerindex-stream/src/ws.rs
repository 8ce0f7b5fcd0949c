//! WebSocket block source: subscribes to a ledger gateway's block feed.
//!
//! Protocol:
//! - client sends `{"type":"subscribe","start":"newest"}` or `{"type":"subscribe","start":<height>}`
//! - gateway replies with text frames, one block each, either bare
//!   (`{"number":4,"dataHash":...}`) or wrapped (`{"type":"block","block":{...}}`)
//! - other typed frames (`subscribed`, `heartbeat`) are ignored; `error` frames are logged
//!
//! The source owns (re)connection. `subscribe` hands back a stream even when
//! the gateway is not up yet; every failed connect or dropped socket yields
//! one `Err` item, then the source backs off and subscribes again from the
//! block after the last one it delivered.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};
use url::Url;

use ledgerindex_core::{BlockSource, BlockStream, IndexerError, SourceBlock, StartCursor};

use crate::config::WsSourceConfig;

type GatewaySocket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Item = Result<SourceBlock, IndexerError>;

/// Live block source backed by a gateway WebSocket.
pub struct WsBlockSource {
    config: WsSourceConfig,
    connected: Arc<AtomicBool>,
}

impl WsBlockSource {
    /// Validates the gateway URL; no connection is made until `subscribe`.
    pub fn new(config: WsSourceConfig) -> Result<Self, IndexerError> {
        let url = Url::parse(&config.url)
            .map_err(|e| IndexerError::Config(format!("invalid gateway url '{}': {e}", config.url)))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(IndexerError::Config(format!(
                "gateway url must use ws:// or wss://, got '{}'",
                config.url
            )));
        }
        Ok(Self {
            config,
            connected: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Whether a gateway socket is currently open.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl BlockSource for WsBlockSource {
    fn name(&self) -> &str {
        &self.config.url
    }

    async fn subscribe(&self, cursor: StartCursor) -> Result<BlockStream, IndexerError> {
        let first = match connect_async(self.config.url.as_str()).await {
            Ok((socket, _)) => {
                self.connected.store(true, Ordering::Relaxed);
                info!(url = %self.config.url, cursor = %cursor, "connected to ledger gateway");
                Ok(socket)
            }
            Err(e) => Err(format!("connect {}: {e}", self.config.url)),
        };

        let (tx, rx) = mpsc::channel(self.config.buffer.max(1));
        let session = Session {
            config: self.config.clone(),
            connected: Arc::clone(&self.connected),
            tx,
        };
        tokio::spawn(session.run(first, cursor));

        Ok(Box::pin(futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })))
    }
}

// ─── Subscription session ─────────────────────────────────────────────────────

enum Pump {
    /// The stream consumer went away; stop without reconnecting.
    ConsumerGone,
    /// The socket dropped for the given reason.
    Dropped(String),
}

struct Session {
    config: WsSourceConfig,
    connected: Arc<AtomicBool>,
    tx: mpsc::Sender<Item>,
}

impl Session {
    async fn run(self, first: Result<GatewaySocket, String>, cursor: StartCursor) {
        let mut next = cursor;
        let mut retry = 0u32;
        let mut socket = match first {
            Ok(ws) => Some(ws),
            Err(reason) => {
                retry = 1;
                if !self.back_off(retry, reason).await {
                    return;
                }
                None
            }
        };

        loop {
            let ws = match socket.take() {
                Some(ws) => ws,
                None => match connect_async(self.config.url.as_str()).await {
                    Ok((ws, _)) => {
                        info!(url = %self.config.url, cursor = %next, retry, "connected to ledger gateway");
                        ws
                    }
                    Err(e) => {
                        retry += 1;
                        if !self.back_off(retry, format!("connect failed: {e}")).await {
                            return;
                        }
                        continue;
                    }
                },
            };

            self.connected.store(true, Ordering::Relaxed);
            let reason = match self.pump(ws, &mut next, &mut retry).await {
                Pump::ConsumerGone => {
                    self.connected.store(false, Ordering::Relaxed);
                    debug!(url = %self.config.url, "block stream dropped by consumer");
                    return;
                }
                Pump::Dropped(reason) => reason,
            };
            self.connected.store(false, Ordering::Relaxed);

            retry += 1;
            if !self.back_off(retry, reason).await {
                return;
            }
        }
    }

    /// Report a disconnect and wait before the next attempt.
    /// Returns `false` when the session should end.
    async fn back_off(&self, retry: u32, reason: String) -> bool {
        warn!(url = %self.config.url, retry, reason = %reason, "gateway unavailable");
        if self.tx.send(Err(IndexerError::Source(reason))).await.is_err() {
            return false;
        }
        if retry > self.config.max_retries {
            error!(
                url = %self.config.url,
                max_retries = self.config.max_retries,
                "giving up on ledger gateway"
            );
            return false;
        }
        let delay = self.config.backoff(retry);
        tokio::select! {
            _ = tokio::time::sleep(delay) => true,
            _ = self.tx.closed() => false,
        }
    }

    async fn pump(&self, ws: GatewaySocket, next: &mut StartCursor, retry: &mut u32) -> Pump {
        let (mut write, mut read) = ws.split();

        if let Err(e) = write.send(Message::Text(subscribe_message(*next))).await {
            return Pump::Dropped(format!("subscribe failed: {e}"));
        }
        debug!(url = %self.config.url, cursor = %next, "subscribe sent");

        loop {
            let frame = tokio::select! {
                frame = read.next() => frame,
                _ = self.tx.closed() => return Pump::ConsumerGone,
            };
            let Some(frame) = frame else {
                return Pump::Dropped("gateway stream ended".into());
            };
            match frame {
                Ok(Message::Text(text)) => match parse_frame(&text) {
                    Ok(Some(block)) => {
                        if let Some(n) = block.number {
                            *next = advance(*next, n);
                        }
                        *retry = 0;
                        if self.tx.send(Ok(block)).await.is_err() {
                            return Pump::ConsumerGone;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => error!(url = %self.config.url, error = %e, "skipping undecodable gateway frame"),
                },
                Ok(Message::Ping(payload)) => {
                    if let Err(e) = write.send(Message::Pong(payload)).await {
                        return Pump::Dropped(format!("pong failed: {e}"));
                    }
                }
                Ok(Message::Close(frame)) => {
                    let reason = frame.map(|f| f.reason.to_string()).unwrap_or_default();
                    return Pump::Dropped(format!("closed by gateway: {reason}"));
                }
                Ok(_) => {}
                Err(e) => return Pump::Dropped(format!("read error: {e}")),
            }
        }
    }
}

/// Cursor to resubscribe from once block `delivered` has been handed out.
fn advance(current: StartCursor, delivered: u64) -> StartCursor {
    match current {
        StartCursor::Height(h) if h > delivered => current,
        _ => StartCursor::Height(delivered.saturating_add(1)),
    }
}

// ─── Wire format ──────────────────────────────────────────────────────────────

/// Build the subscribe request for `cursor`.
pub fn subscribe_message(cursor: StartCursor) -> String {
    serde_json::json!({ "type": "subscribe", "start": cursor }).to_string()
}

/// Decode one gateway text frame.
///
/// `Ok(None)` for control frames that carry no block.
pub fn parse_frame(text: &str) -> Result<Option<SourceBlock>, IndexerError> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| IndexerError::Source(format!("invalid JSON frame: {e}")))?;

    let block = match value.get("type").and_then(Value::as_str) {
        None => value,
        Some("block") => value
            .get("block")
            .cloned()
            .ok_or_else(|| IndexerError::Source("block frame without 'block' field".into()))?,
        Some("error") => {
            let message = value.get("message").and_then(Value::as_str).unwrap_or("unknown");
            warn!(message, "gateway reported an error");
            return Ok(None);
        }
        Some(other) => {
            debug!(frame_type = other, "ignoring gateway control frame");
            return Ok(None);
        }
    };

    serde_json::from_value(block)
        .map(Some)
        .map_err(|e| IndexerError::Source(format!("invalid block frame: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;
    use tokio_tungstenite::accept_async;

    #[test]
    fn subscribe_message_encodes_cursor() {
        let newest: Value = serde_json::from_str(&subscribe_message(StartCursor::Newest)).unwrap();
        assert_eq!(newest["type"], "subscribe");
        assert_eq!(newest["start"], "newest");

        let height: Value = serde_json::from_str(&subscribe_message(StartCursor::Height(42))).unwrap();
        assert_eq!(height["start"], 42);
    }

    #[test]
    fn parse_bare_and_wrapped_blocks() {
        let bare = parse_frame(r#"{"number":7,"dataHash":"0xaa","transactions":[]}"#)
            .unwrap()
            .unwrap();
        assert_eq!(bare.number, Some(7));
        assert_eq!(bare.data_hash.as_deref(), Some("0xaa"));

        let wrapped = parse_frame(
            r#"{"type":"block","block":{"number":8,"transactions":[{"txId":"t1","validationCode":0}]}}"#,
        )
        .unwrap()
        .unwrap();
        assert_eq!(wrapped.number, Some(8));
        assert_eq!(wrapped.transactions[0].valid().unwrap().tx_id.as_deref(), Some("t1"));
    }

    #[test]
    fn bad_record_keeps_the_rest_of_the_block() {
        let block = parse_frame(
            r#"{"number":9,"transactions":[
                {"txId":"good","events":[{"eventName":"Donated","payload":"7b7d"}]},
                {"txId":"bad","events":[{"eventName":"Broken","payload":"not-hex"}]},
                {"txId":42}
            ]}"#,
        )
        .unwrap()
        .unwrap();
        assert_eq!(block.number, Some(9));
        assert_eq!(block.transactions.len(), 3);
        assert_eq!(block.transactions[0].valid().unwrap().tx_id.as_deref(), Some("good"));
        let bad = block.transactions[1].valid().unwrap();
        assert!(bad.events[0].valid().is_none());
        assert!(block.transactions[2].valid().is_none());
    }

    #[test]
    fn control_frames_carry_no_block() {
        assert!(parse_frame(r#"{"type":"subscribed","start":"newest"}"#).unwrap().is_none());
        assert!(parse_frame(r#"{"type":"error","message":"channel not found"}"#).unwrap().is_none());
    }

    #[test]
    fn garbage_frames_are_errors() {
        assert!(parse_frame("not json").is_err());
        assert!(parse_frame(r#"{"type":"block"}"#).is_err());
        assert!(parse_frame(r#"{"number":"seven"}"#).is_err());
    }

    #[test]
    fn advance_never_moves_backwards() {
        assert_eq!(advance(StartCursor::Newest, 4), StartCursor::Height(5));
        assert_eq!(advance(StartCursor::Height(10), 4), StartCursor::Height(10));
        assert_eq!(advance(StartCursor::Height(5), 5), StartCursor::Height(6));
    }

    #[test]
    fn rejects_non_websocket_urls() {
        assert!(WsBlockSource::new(WsSourceConfig::new("http://localhost:7080")).is_err());
        assert!(WsBlockSource::new(WsSourceConfig::new("not a url")).is_err());
        assert!(WsBlockSource::new(WsSourceConfig::new("wss://gateway.example/blocks")).is_ok());
    }

    fn block_frame(n: u64) -> Message {
        Message::Text(format!(r#"{{"number":{n},"dataHash":"0x{n:02x}","transactions":[]}}"#))
    }

    async fn vacant_addr() -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    }

    #[tokio::test]
    async fn unreachable_gateway_yields_errors_then_ends() {
        let addr = vacant_addr().await;
        let config = WsSourceConfig {
            url: format!("ws://{addr}"),
            max_retries: 0,
            backoff_ms: 5,
            buffer: 8,
        };
        let source = WsBlockSource::new(config).unwrap();
        let mut stream = source.subscribe(StartCursor::Newest).await.unwrap();

        assert!(stream.next().await.unwrap().is_err());
        assert!(stream.next().await.is_none());
        assert!(!source.is_connected());
    }

    #[tokio::test]
    async fn gateway_started_after_subscribe_is_picked_up() {
        let addr = vacant_addr().await;
        let config = WsSourceConfig {
            url: format!("ws://{addr}"),
            max_retries: 100,
            backoff_ms: 5,
            buffer: 8,
        };
        let source = WsBlockSource::new(config).unwrap();
        let mut stream = source.subscribe(StartCursor::Newest).await.unwrap();
        assert!(stream.next().await.unwrap().is_err());

        let listener = TcpListener::bind(addr).await.unwrap();
        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(tcp).await.unwrap();
            let _ = ws.next().await;
            ws.send(block_frame(7)).await.unwrap();
            // hold the socket open until the client leaves
            let _ = ws.next().await;
        });

        let block = loop {
            match stream.next().await {
                Some(Ok(block)) => break block,
                Some(Err(_)) => continue,
                None => panic!("stream ended before the gateway came up"),
            }
        };
        assert_eq!(block.number, Some(7));
        assert!(source.is_connected());
    }

    #[tokio::test]
    async fn resubscribes_after_last_delivered_block() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (seen_tx, seen_rx) = oneshot::channel::<Vec<String>>();

        tokio::spawn(async move {
            let mut subscriptions = Vec::new();

            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(tcp).await.unwrap();
            if let Some(Ok(Message::Text(sub))) = ws.next().await {
                subscriptions.push(sub);
            }
            ws.send(Message::Text(r#"{"type":"subscribed"}"#.into())).await.unwrap();
            ws.send(block_frame(1)).await.unwrap();
            ws.send(block_frame(2)).await.unwrap();
            ws.close(None).await.unwrap();

            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(tcp).await.unwrap();
            if let Some(Ok(Message::Text(sub))) = ws.next().await {
                subscriptions.push(sub);
            }
            ws.send(block_frame(3)).await.unwrap();
            ws.close(None).await.unwrap();

            drop(listener);
            let _ = seen_tx.send(subscriptions);
        });

        let config = WsSourceConfig {
            url: format!("ws://{addr}"),
            max_retries: 1,
            backoff_ms: 5,
            buffer: 8,
        };
        let source = WsBlockSource::new(config).unwrap();
        let mut stream = source.subscribe(StartCursor::Newest).await.unwrap();

        assert_eq!(stream.next().await.unwrap().unwrap().number, Some(1));
        assert_eq!(stream.next().await.unwrap().unwrap().number, Some(2));
        assert!(stream.next().await.unwrap().is_err());
        assert_eq!(stream.next().await.unwrap().unwrap().number, Some(3));

        // Remaining items are disconnect errors until retries run out.
        while let Some(item) = stream.next().await {
            assert!(item.is_err());
        }
        assert!(!source.is_connected());

        let subscriptions = seen_rx.await.unwrap();
        let first: Value = serde_json::from_str(&subscriptions[0]).unwrap();
        let second: Value = serde_json::from_str(&subscriptions[1]).unwrap();
        assert_eq!(first["start"], "newest");
        assert_eq!(second["start"], 3);
    }
}
