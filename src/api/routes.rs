//! HTTP API route definitions.

use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;

use super::handlers::{active, health, history, metrics, ready, recent, AppState};

/// Create the API router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health endpoints
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/metrics", get(metrics))
        // Mention data
        .route("/api/v1/mentions/active", get(active))
        .route("/api/v1/mentions/history", get(history))
        .route("/api/v1/mentions/recent", get(recent))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
