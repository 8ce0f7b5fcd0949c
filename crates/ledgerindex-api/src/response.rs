//! Success envelope shared by every data endpoint.

use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub success: bool,
    pub data: T,
    pub timestamp: DateTime<Utc>,
}

/// Wrap `data` in a `{success: true, ...}` envelope stamped with the current time.
pub fn ok<T: Serialize>(data: T) -> Json<Envelope<T>> {
    Json(Envelope {
        success: true,
        data,
        timestamp: Utc::now(),
    })
}
