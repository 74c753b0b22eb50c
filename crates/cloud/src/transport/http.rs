// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP handlers: health and the TPA registration surface.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::error::CloudError;
use crate::registration::{self, RegisterParams};
use crate::state::CloudState;

// -- Request/Response types ---------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub session_count: usize,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    #[serde(default)]
    pub package_name: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub webhook_url: String,
    #[serde(default)]
    pub server_urls: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterResponse {
    pub success: bool,
    pub registration_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatRequest {
    #[serde(default)]
    pub registration_id: String,
}

#[derive(Debug, Serialize)]
pub struct AckResponse {
    pub success: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestartRequest {
    #[serde(default)]
    pub registration_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestartResponse {
    pub success: bool,
    pub recovered_sessions: usize,
}

// -- Handlers -----------------------------------------------------------------

/// `GET /api/v1/health`
pub async fn health(State(s): State<Arc<CloudState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "running".to_owned(),
        session_count: s.sessions.len().await,
    })
}

/// `POST /register` — register a TPA server.
pub async fn register(
    State(s): State<Arc<CloudState>>,
    Json(req): Json<RegisterRequest>,
) -> impl IntoResponse {
    if req.package_name.is_empty() || req.api_key.is_empty() || req.webhook_url.is_empty() {
        return CloudError::BadRequest
            .to_http_response("packageName, apiKey and webhookUrl are required")
            .into_response();
    }

    let params = RegisterParams {
        package_name: req.package_name,
        api_key: req.api_key,
        webhook_url: req.webhook_url,
        server_urls: req.server_urls,
    };
    match s.registrations.register(&s, params).await {
        Ok(registration_id) => (
            StatusCode::CREATED,
            Json(RegisterResponse { success: true, registration_id }),
        )
            .into_response(),
        Err(e) => e.to_http_response("invalid api key").into_response(),
    }
}

/// `POST /heartbeat` — refresh a registration.
pub async fn heartbeat(
    State(s): State<Arc<CloudState>>,
    Json(req): Json<HeartbeatRequest>,
) -> impl IntoResponse {
    match s.registrations.heartbeat(&req.registration_id).await {
        Ok(()) => Json(AckResponse { success: true }).into_response(),
        Err(e) => e.to_http_response("unknown registration").into_response(),
    }
}

/// `POST /restart` — restart-driven session recovery.
pub async fn restart(
    State(s): State<Arc<CloudState>>,
    Json(req): Json<RestartRequest>,
) -> impl IntoResponse {
    match registration::restart(&s, &req.registration_id).await {
        Ok(recovered_sessions) => {
            Json(RestartResponse { success: true, recovered_sessions }).into_response()
        }
        Err(e) => e.to_http_response("unknown registration").into_response(),
    }
}
