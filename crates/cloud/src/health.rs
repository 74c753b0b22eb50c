// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Background health sweep for all registered sessions.

use std::sync::Arc;
use std::time::Instant;

use crate::session::registry::end_session;
use crate::session::SessionState;
use crate::state::CloudState;

/// Spawn a single background task that ends sessions whose reconnection
/// grace has expired with the glasses channel still down.
///
/// Adoption checks the deadline itself, so this sweep only bounds how long
/// an expired session lingers in the registry.
pub fn spawn_session_sweeper(state: Arc<CloudState>) {
    let interval = state.config.health_sweep_interval();

    tokio::spawn(async move {
        let mut timer = tokio::time::interval(interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = state.shutdown.cancelled() => break,
                _ = timer.tick() => {}
            }

            let now = Instant::now();
            for session in state.sessions.snapshot().await {
                let expired = matches!(
                    *session.state.read().await,
                    SessionState::Disconnected { grace_deadline } if now >= grace_deadline
                );
                if expired {
                    tracing::info!(
                        session_id = %session.session_id,
                        user_id = %session.user_id,
                        "grace expired, ending session"
                    );
                    end_session(&state, &session).await;
                }
            }
        }
    });
}
