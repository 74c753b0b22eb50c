// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Display arbiter: at most one effective layout per view.
//!
//! Every package's most recent request per view is retained; the newest
//! non-expired one wins the view. When the winner expires or its package
//! stops, the next-newest surviving request takes over, so the glasses never
//! show a stale layout from a stopped app.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use tokio::sync::Mutex;

use crate::error::CloudError;
use crate::protocol::CloudToGlassesMessage;
use crate::session::registry::mark_disconnected;
use crate::session::UserSession;
use crate::state::CloudState;

/// View reserved for the TPA loading boot-screen; TPA requests for it are
/// rejected.
pub const BOOT_VIEW: &str = "boot";

/// Layout shown when a view has no surviving request.
pub fn empty_layout() -> serde_json::Value {
    serde_json::json!({ "layoutType": "empty" })
}

fn boot_layout(package: &str) -> serde_json::Value {
    serde_json::json!({
        "layoutType": "reference_card",
        "title": "Starting app",
        "text": package,
    })
}

#[derive(Debug, Clone)]
struct ViewRequest {
    layout: serde_json::Value,
    duration_ms: Option<u64>,
    expires_at: Option<Instant>,
    seq: u64,
}

#[derive(Debug, Default)]
struct DisplayInner {
    /// view → package → that package's latest request for the view.
    views: HashMap<String, IndexMap<String, ViewRequest>>,
    /// view → seq of the request currently on the glasses.
    shown: HashMap<String, u64>,
    next_seq: u64,
}

impl DisplayInner {
    /// Re-derive the effective layout for a view. Returns a frame only when
    /// the effective request actually changed.
    fn recompute(&mut self, view: &str, now: Instant) -> Option<CloudToGlassesMessage> {
        if let Some(requests) = self.views.get_mut(view) {
            requests.retain(|_, r| r.expires_at.is_none_or(|at| at > now));
            if requests.is_empty() {
                self.views.remove(view);
            }
        }

        let effective = self
            .views
            .get(view)
            .and_then(|requests| requests.values().max_by_key(|r| r.seq));

        match effective {
            Some(request) => {
                if self.shown.get(view) == Some(&request.seq) {
                    return None;
                }
                self.shown.insert(view.to_owned(), request.seq);
                Some(CloudToGlassesMessage::DisplayEvent {
                    view: view.to_owned(),
                    layout: request.layout.clone(),
                    duration_ms: request.duration_ms,
                })
            }
            None => {
                self.shown.remove(view)?;
                Some(CloudToGlassesMessage::DisplayEvent {
                    view: view.to_owned(),
                    layout: empty_layout(),
                    duration_ms: None,
                })
            }
        }
    }
}

/// Per-session display arbitration state.
#[derive(Debug, Default)]
pub struct DisplayState {
    inner: Mutex<DisplayInner>,
}

impl DisplayState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a display request and return the frame to forward, if the
    /// effective layout changed.
    pub async fn show(
        &self,
        package: &str,
        view: &str,
        layout: serde_json::Value,
        duration_ms: Option<u64>,
        now: Instant,
    ) -> Option<CloudToGlassesMessage> {
        let mut inner = self.inner.lock().await;
        inner.next_seq += 1;
        let seq = inner.next_seq;
        let request = ViewRequest {
            layout,
            duration_ms,
            expires_at: duration_ms.map(|ms| now + Duration::from_millis(ms)),
            seq,
        };
        inner.views.entry(view.to_owned()).or_default().insert(package.to_owned(), request);
        inner.recompute(view, now)
    }

    /// Drop expired requests for a view and re-derive its layout.
    pub async fn expire_tick(&self, view: &str, now: Instant) -> Option<CloudToGlassesMessage> {
        self.inner.lock().await.recompute(view, now)
    }

    /// Remove one package's request for one view.
    pub async fn retract(
        &self,
        package: &str,
        view: &str,
        now: Instant,
    ) -> Option<CloudToGlassesMessage> {
        let mut inner = self.inner.lock().await;
        if let Some(requests) = inner.views.get_mut(view) {
            requests.shift_remove(package);
        }
        inner.recompute(view, now)
    }

    /// Withdraw every request from a package and re-derive affected views.
    pub async fn withdraw(&self, package: &str, now: Instant) -> Vec<CloudToGlassesMessage> {
        let mut inner = self.inner.lock().await;
        let affected: Vec<String> = inner
            .views
            .iter()
            .filter(|(_, requests)| requests.contains_key(package))
            .map(|(view, _)| view.clone())
            .collect();

        let mut frames = Vec::new();
        for view in affected {
            if let Some(requests) = inner.views.get_mut(&view) {
                requests.shift_remove(package);
            }
            if let Some(frame) = inner.recompute(&view, now) {
                frames.push(frame);
            }
        }
        frames
    }
}

/// Handle a TPA `display_event`. The boot view is reserved.
pub async fn show_from_tpa(
    state: &Arc<CloudState>,
    session: &Arc<UserSession>,
    package: &str,
    view: &str,
    layout: serde_json::Value,
    duration_ms: Option<u64>,
) -> Result<(), CloudError> {
    if view == BOOT_VIEW {
        return Err(CloudError::ProtocolError);
    }
    let now = Instant::now();
    if let Some(frame) = session.display.show(package, view, layout, duration_ms, now).await {
        deliver_frame(state, session, frame).await;
    }
    if let Some(ms) = duration_ms {
        schedule_expiry(state, session, view, Duration::from_millis(ms));
    }
    Ok(())
}

/// Render the boot-screen while a package loads.
pub async fn show_boot_screen(state: &Arc<CloudState>, session: &Arc<UserSession>, package: &str) {
    let frame = session
        .display
        .show(package, BOOT_VIEW, boot_layout(package), None, Instant::now())
        .await;
    if let Some(frame) = frame {
        deliver_frame(state, session, frame).await;
    }
}

/// Tear the boot-screen down after bind, timeout, or abandoned start.
pub async fn clear_boot_screen(state: &Arc<CloudState>, session: &Arc<UserSession>, package: &str) {
    if let Some(frame) = session.display.retract(package, BOOT_VIEW, Instant::now()).await {
        deliver_frame(state, session, frame).await;
    }
}

/// Withdraw a stopping package's displays.
pub async fn withdraw_package(state: &Arc<CloudState>, session: &Arc<UserSession>, package: &str) {
    for frame in session.display.withdraw(package, Instant::now()).await {
        deliver_frame(state, session, frame).await;
    }
}

/// Display frames are control frames: an unsendable one means the glasses
/// channel is dead and the session enters its grace window.
async fn deliver_frame(
    state: &Arc<CloudState>,
    session: &Arc<UserSession>,
    frame: CloudToGlassesMessage,
) {
    if !session.send_to_glasses(frame).await {
        mark_disconnected(state, session).await;
    }
}

fn schedule_expiry(
    state: &Arc<CloudState>,
    session: &Arc<UserSession>,
    view: &str,
    after: Duration,
) {
    let state = Arc::clone(state);
    let session = Arc::clone(session);
    let view = view.to_owned();
    tokio::spawn(async move {
        tokio::select! {
            _ = session.cancel.cancelled() => {}
            _ = tokio::time::sleep(after) => {
                if let Some(frame) = session.display.expire_tick(&view, Instant::now()).await {
                    deliver_frame(&state, &session, frame).await;
                }
            }
        }
    });
}

#[cfg(test)]
#[path = "display_tests.rs"]
mod tests;
