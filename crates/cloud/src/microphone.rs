// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Microphone-state debouncer.
//!
//! Subscription churn can flip the desired mic state several times within a
//! second; the glasses should see at most the first flip immediately and one
//! settling flip afterwards. The state machine here is pure; the async
//! driver below owns the timer and the outbound sends.

use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};

use crate::protocol::CloudToGlassesMessage;
use crate::session::registry::mark_disconnected;
use crate::session::UserSession;
use crate::speech;
use crate::state::CloudState;

/// Outcome of a mic-state request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MicRequest {
    /// No debounce in flight: send now, then wait out the window.
    SendNow { enabled: bool, generation: u64 },
    /// A window is already open: desired state recorded, timer restarted.
    Deferred { generation: u64 },
}

/// Actions to take when a debounce window settles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MicSettled {
    /// State to send, when the last-sent state no longer matches desired.
    pub send: Option<bool>,
    /// Transcription state to apply unconditionally.
    pub transcribe_enabled: bool,
}

#[derive(Debug, Clone, Copy)]
struct MicPending {
    desired: bool,
    last_sent: bool,
}

/// Pure debounce state machine. One per session.
#[derive(Debug, Default)]
pub struct MicDebounce {
    pending: Option<MicPending>,
    generation: u64,
}

impl MicDebounce {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a desired mic state. Each call restarts the settle timer; the
    /// returned generation invalidates earlier timers.
    pub fn request(&mut self, desired: bool) -> MicRequest {
        self.generation += 1;
        match self.pending.as_mut() {
            None => {
                self.pending = Some(MicPending { desired, last_sent: desired });
                MicRequest::SendNow { enabled: desired, generation: self.generation }
            }
            Some(pending) => {
                pending.desired = desired;
                MicRequest::Deferred { generation: self.generation }
            }
        }
    }

    /// Settle the window opened by `generation`. Returns `None` when a later
    /// request restarted the timer or no window is open.
    pub fn settle(&mut self, generation: u64) -> Option<MicSettled> {
        if generation != self.generation {
            return None;
        }
        let pending = self.pending.take()?;
        let send = (pending.desired != pending.last_sent).then_some(pending.desired);
        Some(MicSettled { send, transcribe_enabled: pending.desired })
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }
}

/// Async wrapper owned by the session.
#[derive(Debug, Default)]
pub struct MicDebouncer {
    inner: Mutex<MicDebounce>,
}

impl MicDebouncer {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self) -> MutexGuard<'_, MicDebounce> {
        self.inner.lock().await
    }
}

/// Request a mic state for the session, debounced.
pub async fn request_mic_state(state: &Arc<CloudState>, session: &Arc<UserSession>, enabled: bool) {
    let outcome = session.mic.lock().await.request(enabled);
    let generation = match outcome {
        MicRequest::SendNow { enabled, generation } => {
            send_mic_state(state, session, enabled).await;
            generation
        }
        MicRequest::Deferred { generation } => generation,
    };

    let state = Arc::clone(state);
    let session = Arc::clone(session);
    let window = state.config.mic_debounce();
    tokio::spawn(async move {
        tokio::select! {
            _ = session.cancel.cancelled() => {}
            _ = tokio::time::sleep(window) => {
                settle_mic_state(&state, &session, generation).await;
            }
        }
    });
}

async fn settle_mic_state(state: &Arc<CloudState>, session: &Arc<UserSession>, generation: u64) {
    let Some(settled) = session.mic.lock().await.settle(generation) else {
        return;
    };
    if let Some(enabled) = settled.send {
        send_mic_state(state, session, enabled).await;
    }
    speech::set_transcribing(state, session, settled.transcribe_enabled).await;
}

/// Mic commands are control frames: an unsendable one opens the grace
/// window.
async fn send_mic_state(state: &Arc<CloudState>, session: &Arc<UserSession>, enabled: bool) {
    tracing::info!(
        session_id = %session.session_id,
        enabled,
        "microphone state change"
    );
    let delivered = session
        .send_to_glasses(CloudToGlassesMessage::MicrophoneStateChange {
            is_microphone_enabled: enabled,
        })
        .await;
    if !delivered {
        mark_disconnected(state, session).await;
    }
}

#[cfg(test)]
#[path = "microphone_tests.rs"]
mod tests;
