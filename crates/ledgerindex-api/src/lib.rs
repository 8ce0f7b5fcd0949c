//! ledgerindex-api: read-only HTTP API over the materialized store.
//!
//! Handlers only ever read from the [`LedgerStore`](ledgerindex_core::LedgerStore);
//! they never touch the block source. Successful responses use the envelope
//! `{ "success": true, "data": ..., "timestamp": ... }`, failures
//! `{ "success": false, "error": ... }`.

pub mod error;
pub mod handlers;
pub mod response;
pub mod router;

pub use error::ApiError;
pub use router::{router, ApiState};
