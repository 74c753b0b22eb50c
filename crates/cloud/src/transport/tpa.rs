// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! TPA WebSocket endpoint.
//!
//! Unauthenticated at upgrade; the first frame must be a
//! `tpa_connection_init` carrying the composite session id and API key.
//! After bind, inbound frames are subscription or display requests and
//! outbound frames are routed data, control notices, and binary audio.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{ConnectInfo, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::apps::lifecycle;
use crate::display;
use crate::microphone;
use crate::protocol::{CloudToTpaMessage, StreamKey, TpaMessage};
use crate::session::{TpaOutbound, UserSession, TPA_OUT_CAPACITY};
use crate::speech;
use crate::state::CloudState;

/// `GET /tpa` — WebSocket upgrade for a TPA server.
pub async fn ws_handler(
    State(state): State<Arc<CloudState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_tpa(state, addr, socket))
}

async fn handle_tpa(state: Arc<CloudState>, addr: SocketAddr, socket: WebSocket) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    // The channel authenticates with its first frame, inside the bind budget.
    let first = tokio::time::timeout(state.config.loading_timeout(), ws_rx.next()).await;
    let init = match first {
        Ok(Some(Ok(Message::Text(text)))) => serde_json::from_str::<TpaMessage>(&text).ok(),
        _ => None,
    };
    let Some(TpaMessage::TpaConnectionInit { package_name, session_id, api_key, .. }) = init
    else {
        send_error(&mut ws_tx, "expected tpa_connection_init as the first frame").await;
        return;
    };

    let (tx, mut rx) = mpsc::channel(TPA_OUT_CAPACITY);
    let probe = tx.clone();
    let outcome = lifecycle::bind_tpa(
        &state,
        &package_name,
        &session_id,
        &api_key,
        Some(addr.ip()),
        tx,
    )
    .await;
    let outcome = match outcome {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::warn!(package = %package_name, err = %e, "TPA bind rejected");
            send_error(&mut ws_tx, &format!("bind rejected: {e}")).await;
            return;
        }
    };
    let session = Arc::clone(&outcome.session);

    let ack = CloudToTpaMessage::TpaConnectionAck {
        session_id: outcome.composite_id.clone(),
        settings: outcome.settings,
    };
    if send_json(&mut ws_tx, &ack).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            _ = session.cancel.cancelled() => break,

            frame = rx.recv() => {
                match frame {
                    Some(TpaOutbound::Message(msg)) => {
                        let stopping = matches!(msg, CloudToTpaMessage::AppStopped { .. });
                        if send_json(&mut ws_tx, &msg).await.is_err() {
                            break;
                        }
                        if stopping {
                            break;
                        }
                    }
                    Some(TpaOutbound::Audio(bytes)) => {
                        if ws_tx.send(Message::Binary(bytes)).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }

            inbound = ws_rx.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<TpaMessage>(&text) {
                            Ok(msg) => handle_message(&state, &session, &package_name, msg).await,
                            Err(e) => {
                                tracing::warn!(
                                    session_id = %session.session_id,
                                    package = %package_name,
                                    err = %e,
                                    "malformed TPA frame"
                                );
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    _ => {}
                }
            }
        }
    }

    // Unbind only if the slot still belongs to this connection; a recovered
    // connection may have replaced it already.
    let mut channels = session.app_channels.write().await;
    if channels.get(&package_name).is_some_and(|tx| tx.same_channel(&probe)) {
        channels.remove(&package_name);
        tracing::info!(
            session_id = %session.session_id,
            package = %package_name,
            "TPA channel closed"
        );
    }
}

async fn handle_message(
    state: &Arc<CloudState>,
    session: &Arc<UserSession>,
    bound_package: &str,
    msg: TpaMessage,
) {
    match msg {
        TpaMessage::SubscriptionUpdate { package_name, subscriptions, .. } => {
            if package_name != bound_package {
                tracing::warn!(
                    session_id = %session.session_id,
                    bound = bound_package,
                    claimed = %package_name,
                    "subscription update for foreign package ignored"
                );
                return;
            }
            apply_subscription_update(state, session, bound_package, subscriptions).await;
        }
        TpaMessage::DisplayEvent { package_name, view, layout, duration_ms, .. } => {
            if package_name != bound_package {
                return;
            }
            if let Err(e) =
                display::show_from_tpa(state, session, bound_package, &view, layout, duration_ms)
                    .await
            {
                tracing::warn!(
                    session_id = %session.session_id,
                    package = bound_package,
                    view,
                    err = %e,
                    "display request rejected"
                );
            }
        }
        TpaMessage::TpaConnectionInit { .. } => {
            tracing::debug!(
                session_id = %session.session_id,
                package = bound_package,
                "duplicate tpa_connection_init ignored"
            );
        }
    }
}

/// Replace the package's subscriptions, then reconcile the ASR streams and
/// the debounced mic state.
async fn apply_subscription_update(
    state: &Arc<CloudState>,
    session: &Arc<UserSession>,
    package: &str,
    subscriptions: Vec<StreamKey>,
) {
    let media_before =
        state.subscriptions.has_media_subscriptions(&session.session_id).await;
    let diff = state
        .subscriptions
        .update(&session.session_id, package, subscriptions)
        .await;
    if diff.is_empty() {
        return;
    }
    tracing::info!(
        session_id = %session.session_id,
        package,
        added = diff.added.len(),
        removed = diff.removed.len(),
        "subscriptions updated"
    );
    speech::sync_streams(state, session).await;

    let media_after =
        state.subscriptions.has_media_subscriptions(&session.session_id).await;
    if media_before != media_after {
        microphone::request_mic_state(state, session, media_after).await;
    }
}

async fn send_json(
    ws_tx: &mut SplitSink<WebSocket, Message>,
    msg: &CloudToTpaMessage,
) -> Result<(), axum::Error> {
    let json = serde_json::to_string(msg).unwrap_or_default();
    ws_tx.send(Message::Text(json.into())).await
}

async fn send_error(ws_tx: &mut SplitSink<WebSocket, Message>, message: &str) {
    let frame = CloudToTpaMessage::TpaConnectionError { message: message.to_owned() };
    let _ = send_json(ws_tx, &frame).await;
    let _ = ws_tx.close().await;
}
