// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! TPA lifecycle controller.
//!
//! Per package in a session: `Idle → Loading → Active → Stopping → Idle`.
//! `Loading` is bounded by the loading timeout; the commit point either way
//! is removal from `loading_apps`, so a bind racing the timeout resolves to
//! exactly one of Active or Idle.

use std::net::IpAddr;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::apps::webhook::WebhookPayload;
use crate::catalog::AppKind;
use crate::display;
use crate::error::CloudError;
use crate::microphone;
use crate::protocol::{CloudToGlassesMessage, CloudToTpaMessage};
use crate::session::registry;
use crate::session::{TpaOutbound, UserSession};
use crate::speech;
use crate::state::{epoch_ms, CloudState};

/// Result of a successful TPA channel bind.
pub struct BindOutcome {
    pub session: Arc<UserSession>,
    pub composite_id: String,
    pub settings: Vec<serde_json::Value>,
}

/// Start an app for the session.
///
/// A no-op returning the stable composite id when the package is already
/// active or loading.
pub async fn start_app(
    state: &Arc<CloudState>,
    session: &Arc<UserSession>,
    package: &str,
) -> Result<String, CloudError> {
    if session.is_ended().await {
        return Err(CloudError::SessionEnded);
    }
    let composite = session.composite_id(package);

    if session.loading_apps.read().await.contains(package) {
        return Ok(composite);
    }
    if session.active_apps.read().await.contains(package) {
        return Ok(composite);
    }

    let record = state.catalog.get(package).await.ok_or(CloudError::AppNotFound)?;

    // STANDARD apps demand exclusive tenancy among STANDARD apps.
    if record.kind == AppKind::Standard {
        let others: Vec<String> = session
            .active_apps
            .read()
            .await
            .iter()
            .filter(|p| p.as_str() != package)
            .cloned()
            .collect();
        for other in others {
            let is_standard = state
                .catalog
                .get(&other)
                .await
                .is_some_and(|r| r.kind == AppKind::Standard);
            if is_standard {
                tracing::info!(
                    session_id = %session.session_id,
                    stopping = %other,
                    starting = %package,
                    "displacing standard app"
                );
                let _ = stop_app(state, session, &other, "replaced_by_standard_app").await;
            }
        }
    }

    session.loading_apps.write().await.insert(package.to_owned());
    display::show_boot_screen(state, session, package).await;

    let websocket_url = if record.is_system {
        state.config.internal_tpa_websocket_url()
    } else {
        state.config.tpa_websocket_url()
    };
    let payload = WebhookPayload::SessionRequest {
        session_id: composite.clone(),
        user_id: session.user_id.clone(),
        timestamp: epoch_ms(),
        websocket_url,
    };
    {
        // Dispatch off the session path; a slow TPA server must not block it.
        let state = Arc::clone(state);
        let session_id = session.session_id.clone();
        let package = package.to_owned();
        let url = crate::apps::webhook::WebhookClient::webhook_url(&record.public_url);
        tokio::spawn(async move {
            if let Err(e) = state.webhooks.post(&url, &payload).await {
                tracing::warn!(
                    session_id = %session_id,
                    package,
                    err = %e,
                    "session-request webhook failed"
                );
            }
        });
    }

    spawn_loading_timer(state, session, package);
    notify_app_state(state, session).await;

    tracing::info!(session_id = %session.session_id, package, "app loading");
    Ok(composite)
}

/// Stop an app: unsubscribe, unbind, withdraw displays, settle the mic.
pub async fn stop_app(
    state: &Arc<CloudState>,
    session: &Arc<UserSession>,
    package: &str,
    reason: &str,
) -> Result<(), CloudError> {
    let media_before =
        state.subscriptions.has_media_subscriptions(&session.session_id).await;
    state.subscriptions.remove(&session.session_id, package).await;
    speech::sync_streams(state, session).await;

    let was_active = session.active_apps.write().await.shift_remove(package);
    let was_loading = session.loading_apps.write().await.remove(package);
    if !(was_active || was_loading) {
        tracing::debug!(session_id = %session.session_id, package, "stop for idle package");
    }

    if was_active || was_loading {
        if let Some(record) = state.catalog.get(package).await {
            let payload = WebhookPayload::StopRequest {
                session_id: session.composite_id(package),
                user_id: session.user_id.clone(),
                reason: reason.to_owned(),
                timestamp: epoch_ms(),
            };
            let state = Arc::clone(state);
            let session_id = session.session_id.clone();
            let package = package.to_owned();
            let url = crate::apps::webhook::WebhookClient::webhook_url(&record.public_url);
            tokio::spawn(async move {
                // Best-effort: cleanup continues whatever this returns.
                if let Err(e) = state.webhooks.post(&url, &payload).await {
                    tracing::warn!(
                        session_id = %session_id,
                        package,
                        err = %e,
                        "stop webhook failed"
                    );
                }
            });
        }
    }

    if let Some(tx) = session.app_channels.write().await.remove(package) {
        let _ = tx.try_send(TpaOutbound::Message(CloudToTpaMessage::AppStopped {
            reason: reason.to_owned(),
        }));
    }

    let apps: Vec<String> = session.active_apps.read().await.iter().cloned().collect();
    state.store.set_running_apps(&session.user_id, apps).await;

    display::withdraw_package(state, session, package).await;

    let media_after =
        state.subscriptions.has_media_subscriptions(&session.session_id).await;
    if media_before && !media_after {
        microphone::request_mic_state(state, session, false).await;
    }

    notify_app_state(state, session).await;
    tracing::info!(session_id = %session.session_id, package, reason, "app stopped");
    Ok(())
}

/// Bind an authenticated TPA channel to its session.
///
/// Accepts only packages in `loading_apps` or already active; system apps
/// may bind cold but must come from an internal address.
pub async fn bind_tpa(
    state: &Arc<CloudState>,
    package: &str,
    init_session_id: &str,
    api_key: &str,
    remote_ip: Option<IpAddr>,
    tx: mpsc::Sender<TpaOutbound>,
) -> Result<BindOutcome, CloudError> {
    // The webhook hands TPAs the composite `sessionId-packageName`; a bare
    // session id is tolerated.
    let session_id = init_session_id
        .strip_suffix(&format!("-{package}"))
        .unwrap_or(init_session_id);

    let session = state.sessions.get(session_id).await.ok_or(CloudError::SessionNotFound)?;
    if session.is_ended().await {
        return Err(CloudError::SessionEnded);
    }

    let record = state.catalog.get(package).await.ok_or(CloudError::AppNotFound)?;
    if !state.catalog.verify_api_key(package, api_key).await {
        return Err(CloudError::AuthFailure);
    }
    if record.is_system && !remote_ip.is_some_and(is_internal_ip) {
        return Err(CloudError::AuthFailure);
    }

    let bound = {
        let mut loading = session.loading_apps.write().await;
        if loading.remove(package) {
            session.active_apps.write().await.insert(package.to_owned());
            true
        } else {
            drop(loading);
            let already_active = session.active_apps.read().await.contains(package);
            if already_active {
                true
            } else if record.is_system {
                session.active_apps.write().await.insert(package.to_owned());
                true
            } else {
                false
            }
        }
    };
    if !bound {
        return Err(CloudError::BadRequest);
    }

    session.app_channels.write().await.insert(package.to_owned(), tx);
    display::clear_boot_screen(state, &session, package).await;

    let apps: Vec<String> = session.active_apps.read().await.iter().cloned().collect();
    state.store.set_running_apps(&session.user_id, apps).await;

    notify_app_state(state, &session).await;
    tracing::info!(session_id = %session.session_id, package, "TPA channel bound");

    let composite_id = session.composite_id(package);
    Ok(BindOutcome { session, composite_id, settings: record.settings })
}

/// Push the current app state to the glasses.
pub async fn notify_app_state(state: &Arc<CloudState>, session: &Arc<UserSession>) {
    let user_session = session.snapshot().await;
    let delivered = session
        .send_to_glasses(CloudToGlassesMessage::AppStateChange {
            session_id: session.session_id.clone(),
            user_session,
            timestamp: epoch_ms(),
        })
        .await;
    if !delivered {
        registry::mark_disconnected(state, session).await;
    }
}

/// Abandon the start if the TPA has not bound within the loading timeout.
fn spawn_loading_timer(state: &Arc<CloudState>, session: &Arc<UserSession>, package: &str) {
    let timeout = state.config.loading_timeout();
    let state = Arc::clone(state);
    let session = Arc::clone(session);
    let package = package.to_owned();
    tokio::spawn(async move {
        tokio::select! {
            _ = session.cancel.cancelled() => {}
            _ = tokio::time::sleep(timeout) => {
                let timed_out = session.loading_apps.write().await.remove(&package);
                if timed_out {
                    tracing::warn!(
                        session_id = %session.session_id,
                        package,
                        timeout_ms = timeout.as_millis() as u64,
                        "TPA never bound, abandoning start"
                    );
                    display::clear_boot_screen(&state, &session, &package).await;
                    notify_app_state(&state, &session).await;
                }
            }
        }
    });
}

fn is_internal_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_loopback() || v4.is_private(),
        IpAddr::V6(v6) => v6.is_loopback(),
    }
}

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod tests;
