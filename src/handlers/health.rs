//! # Health Check Handler
//!
//! Used by load balancers and monitoring systems.

use axum::Json;
use serde_json::{json, Value};

/// Health check endpoint
///
/// ## Route
/// GET /health
///
/// ## Response
/// ```json
/// { "status": "healthy", "service": "passkey-rp-server" }
/// ```
///
/// Never fails, so it returns `Json<Value>` rather than `AppResult`.
pub async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
