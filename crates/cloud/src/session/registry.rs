// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session registry and session lifecycle transitions.
//!
//! Sessions key on a stable opaque id; a second index maps `user_id` to the
//! live session so a reconnecting companion adopts its existing session
//! inside the grace window instead of starting cold.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::RwLock;

use crate::apps;
use crate::protocol::CloudToTpaMessage;
use crate::session::{GlassesConn, SessionState, TpaOutbound, UserSession};
use crate::state::CloudState;

/// Process-wide session index.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<UserSession>>>,
    by_user: RwLock<HashMap<String, String>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Non-blocking lookup by session id.
    pub async fn get(&self, session_id: &str) -> Option<Arc<UserSession>> {
        self.sessions.read().await.get(session_id).map(Arc::clone)
    }

    /// The user's live session, if any.
    pub async fn get_by_user(&self, user_id: &str) -> Option<Arc<UserSession>> {
        let session_id = self.by_user.read().await.get(user_id).cloned()?;
        self.get(&session_id).await
    }

    /// Snapshot of every registered session.
    pub async fn snapshot(&self) -> Vec<Arc<UserSession>> {
        self.sessions.read().await.values().map(Arc::clone).collect()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    async fn insert(&self, session: &Arc<UserSession>) {
        self.sessions.write().await.insert(session.session_id.clone(), Arc::clone(session));
        self.by_user.write().await.insert(session.user_id.clone(), session.session_id.clone());
    }

    async fn remove(&self, session: &UserSession) {
        self.sessions.write().await.remove(&session.session_id);
        let mut by_user = self.by_user.write().await;
        if by_user.get(&session.user_id) == Some(&session.session_id) {
            by_user.remove(&session.user_id);
        }
    }
}

/// Bind a freshly authenticated glasses connection to a session.
///
/// Inside the grace window the user's existing session is adopted with its
/// apps, subscriptions, and recognizer streams intact; past the deadline the
/// stale session ends and a fresh one starts. Returns the session and
/// whether it was adopted.
pub async fn connect_glasses(
    state: &Arc<CloudState>,
    user_id: &str,
    conn: GlassesConn,
) -> (Arc<UserSession>, bool) {
    if let Some(existing) = state.sessions.get_by_user(user_id).await {
        let expired = match *existing.state.read().await {
            SessionState::Ended => true,
            SessionState::Disconnected { grace_deadline } => Instant::now() >= grace_deadline,
            SessionState::Connecting | SessionState::Active => false,
        };
        if expired {
            end_session(state, &existing).await;
        } else {
            if let Some(old) = existing.glasses_conn.write().await.replace(conn) {
                old.cancel.cancel();
            }
            *existing.state.write().await = SessionState::Active;
            tracing::info!(
                session_id = %existing.session_id,
                user_id,
                "glasses reconnected, session adopted"
            );
            return (existing, true);
        }
    }

    let session_id = uuid::Uuid::new_v4().to_string();
    let session = Arc::new(UserSession::new(
        session_id,
        user_id.to_owned(),
        state.config.transcript_retention(),
    ));
    *session.glasses_conn.write().await = Some(conn);
    *session.state.write().await = SessionState::Active;
    state.sessions.insert(&session).await;
    tracing::info!(session_id = %session.session_id, user_id, "session created");

    restore_running_apps(state, &session);
    (session, false)
}

/// Restart the apps persisted for this user, best-effort.
fn restore_running_apps(state: &Arc<CloudState>, session: &Arc<UserSession>) {
    let state = Arc::clone(state);
    let session = Arc::clone(session);
    tokio::spawn(async move {
        for package in state.store.running_apps(&session.user_id).await {
            if let Err(e) = apps::lifecycle::start_app(&state, &session, &package).await {
                tracing::warn!(
                    session_id = %session.session_id,
                    package,
                    err = %e,
                    "failed to restore persisted app"
                );
            }
        }
    });
}

/// Transition to `Disconnected` with a grace deadline.
///
/// Channel errors land here, never in immediate teardown; the health sweep
/// ends the session once the deadline passes with the channel still down.
pub async fn mark_disconnected(state: &Arc<CloudState>, session: &Arc<UserSession>) {
    {
        let mut st = session.state.write().await;
        match *st {
            SessionState::Ended | SessionState::Disconnected { .. } => return,
            SessionState::Connecting | SessionState::Active => {}
        }
        *st = SessionState::Disconnected {
            grace_deadline: Instant::now() + state.config.reconnect_grace(),
        };
    }
    if let Some(conn) = session.glasses_conn.write().await.take() {
        conn.cancel.cancel();
    }
    tracing::info!(
        session_id = %session.session_id,
        grace_ms = state.config.reconnect_grace_ms,
        "glasses disconnected, grace window open"
    );
}

/// End a session: close every TPA channel, tear down every recognizer
/// stream, and drop it from the registry. Idempotent.
pub async fn end_session(state: &Arc<CloudState>, session: &Arc<UserSession>) {
    {
        let mut st = session.state.write().await;
        if matches!(*st, SessionState::Ended) {
            return;
        }
        *st = SessionState::Ended;
    }

    session.cancel.cancel();

    let channels: Vec<_> = session.app_channels.write().await.drain().collect();
    for (package, tx) in channels {
        let _ = tx.try_send(TpaOutbound::Message(CloudToTpaMessage::AppStopped {
            reason: "session_ended".to_owned(),
        }));
        tracing::debug!(session_id = %session.session_id, package, "closed TPA channel");
    }

    session.streams.shutdown().await;
    state.subscriptions.remove_session(&session.session_id).await;
    state.sessions.remove(session).await;

    if let Some(conn) = session.glasses_conn.write().await.take() {
        conn.cancel.cancel();
    }

    tracing::info!(session_id = %session.session_id, user_id = %session.user_id, "session ended");
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
