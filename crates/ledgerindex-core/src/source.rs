//! `BlockSource` trait: abstraction over a ledger's block subscription.
//!
//! Implementations own reconnection: the indexer never retries a
//! subscription itself. An `Err` item on the stream means the source is
//! temporarily disconnected and is expected to resume yielding blocks;
//! the end of the stream means the source is gone for good.

use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

use crate::cursor::StartCursor;
use crate::error::IndexerError;
use crate::types::SourceBlock;

/// A stream of block notifications from a single source.
pub type BlockStream = Pin<Box<dyn Stream<Item = Result<SourceBlock, IndexerError>> + Send>>;

#[async_trait]
pub trait BlockSource: Send + Sync {
    /// Human-readable name for logs.
    fn name(&self) -> &str;

    /// Start delivering blocks from `cursor`. Never receives
    /// [`StartCursor::Resume`]; the pipeline resolves it first.
    async fn subscribe(&self, cursor: StartCursor) -> Result<BlockStream, IndexerError>;
}

/// Replays a fixed sequence of blocks, then ends.
///
/// `Height(h)` skips blocks numbered below `h`; `Newest` replays everything.
/// Useful in tests and for loading exported block dumps.
#[derive(Debug, Clone, Default)]
pub struct ReplaySource {
    items: Vec<Result<SourceBlock, String>>,
}

impl ReplaySource {
    pub fn new(blocks: Vec<SourceBlock>) -> Self {
        Self {
            items: blocks.into_iter().map(Ok).collect(),
        }
    }

    /// Inject a transient disconnect at this point in the sequence.
    pub fn with_disconnect(mut self, reason: impl Into<String>) -> Self {
        self.items.push(Err(reason.into()));
        self
    }

    /// Append another block after any injected disconnects.
    pub fn then(mut self, block: SourceBlock) -> Self {
        self.items.push(Ok(block));
        self
    }
}

#[async_trait]
impl BlockSource for ReplaySource {
    fn name(&self) -> &str {
        "replay"
    }

    async fn subscribe(&self, cursor: StartCursor) -> Result<BlockStream, IndexerError> {
        let floor = match cursor {
            StartCursor::Height(h) => h,
            _ => 0,
        };
        let items: Vec<_> = self
            .items
            .iter()
            .filter(|item| match item {
                Ok(b) => b.number.map_or(true, |n| n >= floor),
                Err(_) => true,
            })
            .cloned()
            .map(|item| item.map_err(IndexerError::Source))
            .collect();
        Ok(Box::pin(futures::stream::iter(items)))
    }
}

/// A source whose subscription always fails: models an unreachable peer.
#[derive(Debug, Clone)]
pub struct UnavailableSource {
    reason: String,
}

impl UnavailableSource {
    pub fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into() }
    }
}

#[async_trait]
impl BlockSource for UnavailableSource {
    fn name(&self) -> &str {
        "unavailable"
    }

    async fn subscribe(&self, _cursor: StartCursor) -> Result<BlockStream, IndexerError> {
        Err(IndexerError::Source(self.reason.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn block(n: u64) -> SourceBlock {
        SourceBlock {
            number: Some(n),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn replay_respects_height_cursor() {
        let src = ReplaySource::new(vec![block(1), block(2), block(3)]);
        let got: Vec<_> = src
            .subscribe(StartCursor::Height(2))
            .await
            .unwrap()
            .map(|r| r.unwrap().number.unwrap())
            .collect()
            .await;
        assert_eq!(got, vec![2, 3]);
    }

    #[tokio::test]
    async fn replay_yields_injected_disconnect() {
        let src = ReplaySource::new(vec![block(1)]).with_disconnect("peer restarted").then(block(2));
        let items: Vec<_> = src.subscribe(StartCursor::Newest).await.unwrap().collect().await;
        assert_eq!(items.len(), 3);
        assert!(items[1].is_err());
    }

    #[tokio::test]
    async fn unavailable_source_fails_subscribe() {
        let src = UnavailableSource::new("connection refused");
        assert!(src.subscribe(StartCursor::Newest).await.is_err());
    }
}
