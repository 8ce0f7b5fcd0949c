//! ledgerindex-core: foundation for the ledger explorer's indexer.
//!
//! # Architecture
//!
//! ```text
//! LedgerIndexer::spawn
//!     ├── BlockSource      (ledger block subscription, owns reconnection)
//!     ├── adapter task     (subscribe → bounded channel, health signal)
//!     ├── indexer task     (normalize_block → apply_block, one block at a time)
//!     └── LedgerStore      (upsert blocks, insert-or-ignore txs, append events)
//! ```

pub mod cursor;
pub mod error;
pub mod health;
pub mod indexer;
pub mod source;
pub mod store;
pub mod transform;
pub mod types;

pub use cursor::StartCursor;
pub use error::IndexerError;
pub use health::{HealthSnapshot, IndexerHealth};
pub use indexer::{apply_block, ApplyReport, IndexerConfig, IndexerHandle, IndexerState, LedgerIndexer};
pub use source::{BlockSource, BlockStream, ReplaySource, UnavailableSource};
pub use store::LedgerStore;
pub use transform::{normalize_block, NormalizedBlock};
pub use types::{
    BlockRecord, ChaincodeEvent, Decoded, InsertOutcome, LedgerTransaction, SourceBlock, SourceEvent,
    SourceTransaction, StoreStats, ValidationCode,
};
