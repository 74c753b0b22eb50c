// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Glasses WebSocket endpoint.
//!
//! The upgrade carries a bearer JWT (header, or `token` query param for
//! clients that cannot set headers). A failed verification still upgrades so
//! the companion receives a typed `auth_error` frame before close; no
//! session is touched. The receive loop is the session's single dispatcher:
//! messages are handled one at a time in arrival order.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::apps::lifecycle;
use crate::protocol::{CloudToGlassesMessage, GlassesMessage};
use crate::router;
use crate::session::registry::{connect_glasses, mark_disconnected};
use crate::session::{GlassesConn, Location, UserSession, GLASSES_OUT_CAPACITY};
use crate::speech;
use crate::state::{epoch_ms, CloudState};
use crate::transport::auth;

/// Query parameters for the glasses upgrade.
#[derive(Debug, Deserialize)]
pub struct GlassesWsQuery {
    pub token: Option<String>,
}

/// `GET /glasses` — WebSocket upgrade for the glasses companion.
pub async fn ws_handler(
    State(state): State<Arc<CloudState>>,
    headers: HeaderMap,
    Query(query): Query<GlassesWsQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let token = auth::bearer_from_headers(&headers).or(query.token);
    let claims = token
        .as_deref()
        .and_then(|t| auth::verify_glasses_token(t, &state.config.jwt_secret).ok());

    ws.on_upgrade(move |socket| async move {
        match claims {
            Some(claims) => handle_glasses(state, claims.email, socket).await,
            None => reject(socket).await,
        }
    })
}

/// Send a typed auth error and close; no session side-effect.
async fn reject(mut socket: WebSocket) {
    let frame = CloudToGlassesMessage::AuthError {
        message: "missing or invalid bearer token".to_owned(),
    };
    if let Ok(json) = serde_json::to_string(&frame) {
        let _ = socket.send(Message::Text(json.into())).await;
    }
    let _ = socket.close().await;
}

/// Per-connection glasses loop.
async fn handle_glasses(state: Arc<CloudState>, user_id: String, socket: WebSocket) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut rx) = mpsc::channel(GLASSES_OUT_CAPACITY);
    let conn_cancel = CancellationToken::new();
    let conn = GlassesConn { tx, cancel: conn_cancel.clone() };

    let (session, adopted) = connect_glasses(&state, &user_id, conn).await;
    tracing::debug!(session_id = %session.session_id, user_id, adopted, "glasses channel up");

    let mut replaced = false;
    loop {
        tokio::select! {
            // A newer connection for the same user adopted the session.
            _ = conn_cancel.cancelled() => {
                replaced = true;
                break;
            }
            _ = state.shutdown.cancelled() => break,

            frame = rx.recv() => {
                match frame {
                    Some(msg) => {
                        let Ok(json) = serde_json::to_string(&msg) else { continue };
                        if ws_tx.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }

            inbound = ws_rx.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<GlassesMessage>(&text) {
                            Ok(msg) => handle_message(&state, &session, msg).await,
                            Err(e) => {
                                // Single message rejected; the channel stays open.
                                tracing::warn!(
                                    session_id = %session.session_id,
                                    err = %e,
                                    "malformed glasses frame"
                                );
                            }
                        }
                    }
                    Some(Ok(Message::Binary(bytes))) => {
                        handle_audio(&state, &session, bytes).await;
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    _ => {}
                }
            }
        }
    }

    if !replaced {
        mark_disconnected(&state, &session).await;
    }
}

/// Opaque audio: feed every ASR sink, then fan out to `audio_chunk`
/// subscribers.
async fn handle_audio(state: &Arc<CloudState>, session: &Arc<UserSession>, bytes: Bytes) {
    speech::feed_audio(session, &bytes).await;
    router::route_audio(state, session, &bytes).await;
}

async fn handle_message(state: &Arc<CloudState>, session: &Arc<UserSession>, msg: GlassesMessage) {
    match &msg {
        GlassesMessage::ConnectionInit => {
            let user_session = session.snapshot().await;
            let delivered = session
                .send_to_glasses(CloudToGlassesMessage::ConnectionAck {
                    session_id: session.session_id.clone(),
                    user_session,
                    timestamp: epoch_ms(),
                })
                .await;
            if !delivered {
                mark_disconnected(state, session).await;
            }
        }
        GlassesMessage::StartApp { package_name, .. } => {
            if let Err(e) = lifecycle::start_app(state, session, package_name).await {
                tracing::warn!(
                    session_id = %session.session_id,
                    package = %package_name,
                    err = %e,
                    "start_app failed"
                );
                // The state change shows the package absent.
                lifecycle::notify_app_state(state, session).await;
            }
        }
        GlassesMessage::StopApp { package_name, .. } => {
            if let Err(e) = lifecycle::stop_app(state, session, package_name, "user_disabled").await
            {
                tracing::warn!(
                    session_id = %session.session_id,
                    package = %package_name,
                    err = %e,
                    "stop_app failed"
                );
            }
        }
        GlassesMessage::GlassesConnectionState { status, model_name } => {
            tracing::info!(
                session_id = %session.session_id,
                status,
                model = model_name.as_deref().unwrap_or("unknown"),
                "glasses connection state"
            );
        }
        GlassesMessage::LocationUpdate { lat, lng, timestamp } => {
            *session.location.write().await =
                Some(Location { lat: *lat, lng: *lng, timestamp: *timestamp });
            router::route_glasses_event(state, session, &msg).await;
        }
        _ => router::route_glasses_event(state, session, &msg).await,
    }
}
