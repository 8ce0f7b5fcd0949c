//! Error types for the ledger indexing pipeline.

use thiserror::Error;

/// Errors that can occur while ingesting or serving ledger history.
#[derive(Debug, Error)]
pub enum IndexerError {
    #[error("block source error: {0}")]
    Source(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("malformed block {block}: {reason}")]
    Transform { block: String, reason: String },

    #[error("invalid configuration: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transform_error_names_block() {
        let e = IndexerError::Transform {
            block: "42".into(),
            reason: "missing header".into(),
        };
        assert_eq!(e.to_string(), "malformed block 42: missing header");
    }
}
