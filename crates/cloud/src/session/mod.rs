// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-user session state.
//!
//! A [`UserSession`] is the single owner of everything scoped to one user:
//! the glasses channel, running-app membership, bound TPA channels, ASR
//! streams, transcript buffer, display state, and the mic debouncer slot.
//! All mutation for one session is serialized behind that session's inbound
//! dispatchers; cross-session state lives in the process-wide registries.

pub mod registry;
pub mod transcript;

pub use registry::SessionRegistry;
pub use transcript::{TranscriptBuffer, TranscriptSegment};

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use bytes::Bytes;
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;

use crate::display::DisplayState;
use crate::microphone::MicDebouncer;
use crate::protocol::{CloudToGlassesMessage, CloudToTpaMessage, UserSessionSnapshot};
use crate::speech::SessionStreams;

/// Outbound queue depth for the glasses channel.
pub const GLASSES_OUT_CAPACITY: usize = 256;
/// Outbound queue depth per TPA channel.
pub const TPA_OUT_CAPACITY: usize = 256;

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Active,
    Disconnected { grace_deadline: Instant },
    Ended,
}

/// The currently bound glasses connection.
///
/// Replaced wholesale on reconnect adoption; the previous connection's token
/// is cancelled so its socket task winds down.
pub struct GlassesConn {
    pub tx: mpsc::Sender<CloudToGlassesMessage>,
    pub cancel: CancellationToken,
}

/// A frame queued for delivery to one TPA channel.
#[derive(Debug, Clone)]
pub enum TpaOutbound {
    Message(CloudToTpaMessage),
    Audio(Bytes),
}

/// Cached location from the glasses.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub lat: f64,
    pub lng: f64,
    pub timestamp: u64,
}

/// One authenticated user's session.
pub struct UserSession {
    pub session_id: String,
    pub user_id: String,
    pub started_at: Instant,
    pub state: RwLock<SessionState>,
    pub glasses_conn: RwLock<Option<GlassesConn>>,
    pub active_apps: RwLock<IndexSet<String>>,
    pub loading_apps: RwLock<HashSet<String>>,
    pub app_channels: RwLock<HashMap<String, mpsc::Sender<TpaOutbound>>>,
    pub transcript: RwLock<TranscriptBuffer>,
    pub location: RwLock<Option<Location>>,
    pub is_transcribing: AtomicBool,
    pub streams: SessionStreams,
    pub display: DisplayState,
    pub mic: MicDebouncer,
    pub cancel: CancellationToken,
}

impl UserSession {
    pub fn new(session_id: String, user_id: String, retention: std::time::Duration) -> Self {
        Self {
            session_id,
            user_id,
            started_at: Instant::now(),
            state: RwLock::new(SessionState::Connecting),
            glasses_conn: RwLock::new(None),
            active_apps: RwLock::new(IndexSet::new()),
            loading_apps: RwLock::new(HashSet::new()),
            app_channels: RwLock::new(HashMap::new()),
            transcript: RwLock::new(TranscriptBuffer::new(retention)),
            location: RwLock::new(None),
            is_transcribing: AtomicBool::new(false),
            streams: SessionStreams::new(),
            display: DisplayState::new(),
            mic: MicDebouncer::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Composite id handed to a TPA: `sessionId-packageName`.
    pub fn composite_id(&self, package: &str) -> String {
        format!("{}-{package}", self.session_id)
    }

    /// Milliseconds since the session started; transcript times are relative
    /// to this origin.
    pub fn elapsed_ms(&self) -> u64 {
        self.started_at.elapsed().as_millis() as u64
    }

    pub async fn is_ended(&self) -> bool {
        matches!(*self.state.read().await, SessionState::Ended)
    }

    /// Serializable snapshot for acks and `app_state_change` frames.
    pub async fn snapshot(&self) -> UserSessionSnapshot {
        let active_apps = self.active_apps.read().await.iter().cloned().collect();
        let mut loading_apps: Vec<String> =
            self.loading_apps.read().await.iter().cloned().collect();
        loading_apps.sort();
        UserSessionSnapshot {
            user_id: self.user_id.clone(),
            active_apps,
            loading_apps,
            is_transcribing: self.is_transcribing.load(Ordering::Relaxed),
        }
    }

    /// Queue a frame for the glasses. Returns `false` when the frame could
    /// not be queued (no connection bound, channel closed, or queue
    /// saturated); the caller MUST treat that as a channel error and run the
    /// disconnect transition.
    pub async fn send_to_glasses(&self, msg: CloudToGlassesMessage) -> bool {
        let guard = self.glasses_conn.read().await;
        let Some(conn) = guard.as_ref() else {
            return false;
        };
        match conn.tx.try_send(msg) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(session_id = %self.session_id, "glasses outbound queue full");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Queue a non-critical frame (sensor data, audio) for one TPA.
    /// Dropped silently when the channel is saturated or gone.
    pub async fn send_data_to_app(&self, package: &str, frame: TpaOutbound) {
        let channels = self.app_channels.read().await;
        if let Some(tx) = channels.get(package) {
            if let Err(mpsc::error::TrySendError::Full(_)) = tx.try_send(frame) {
                tracing::debug!(
                    session_id = %self.session_id,
                    package,
                    "dropping frame for saturated TPA channel"
                );
            }
        }
    }

    /// Queue a control frame for one TPA. Returns `false` when the channel
    /// is gone or saturated; the caller MUST unbind the dead channel.
    pub async fn send_control_to_app(&self, package: &str, msg: CloudToTpaMessage) -> bool {
        let channels = self.app_channels.read().await;
        match channels.get(package) {
            Some(tx) => tx.try_send(TpaOutbound::Message(msg)).is_ok(),
            None => false,
        }
    }

    /// Whether the package currently has a bound TPA channel.
    pub async fn has_app_channel(&self, package: &str) -> bool {
        self.app_channels.read().await.contains_key(package)
    }
}
