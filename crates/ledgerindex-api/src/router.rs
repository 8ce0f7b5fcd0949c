//! Router construction and shared handler state.

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use ledgerindex_core::{IndexerHealth, LedgerStore};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::handlers;

/// State shared across handlers.
#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<dyn LedgerStore>,
    pub health: Arc<IndexerHealth>,
    /// Service name reported by `/health`.
    pub service: String,
}

impl ApiState {
    pub fn new(store: Arc<dyn LedgerStore>, health: Arc<IndexerHealth>, service: impl Into<String>) -> Self {
        Self {
            store,
            health,
            service: service.into(),
        }
    }
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/blocks", get(handlers::recent_blocks))
        .route("/blocks/hash/:hash", get(handlers::block_by_hash))
        .route("/blocks/:number", get(handlers::block_by_number))
        .route("/blocks/:number/transactions", get(handlers::block_transactions))
        .route("/blockchain/info", get(handlers::blockchain_info))
        .route("/transactions/:tx_id", get(handlers::transaction))
        .route("/transactions/:tx_id/events", get(handlers::transaction_events))
        .route("/trace/:tx_id", get(handlers::trace))
        .route("/stats", get(handlers::stats))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
