//! Axum Router Configuration
//!
//! The relay serves its WebSocket on both `/` and `/ws`, plus a plain-text
//! health probe.

use crate::{state::AppState, ws::ws_handler};
use axum::{Router, routing::get};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

async fn health() -> &'static str {
    "OK"
}

/// Creates the main Axum router for the relay.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(ws_handler))
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .with_state(app_state)
        .layer(cors)
}
