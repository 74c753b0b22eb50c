// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP + WebSocket transport: the two upgrade paths and the registration
//! surface.

pub mod auth;
pub mod glasses;
pub mod http;
pub mod tpa;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::CloudState;

/// Build the axum `Router` with all cloud routes.
pub fn build_router(state: Arc<CloudState>) -> Router {
    Router::new()
        // Liveness
        .route("/api/v1/health", get(http::health))
        // TPA-server registration
        .route("/register", post(http::register))
        .route("/heartbeat", post(http::heartbeat))
        .route("/restart", post(http::restart))
        // Streaming channels
        .route("/glasses", get(glasses::ws_handler))
        .route("/tpa", get(tpa::ws_handler))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
