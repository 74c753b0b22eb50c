// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Router: deliver typed payloads to subscribed TPAs.
//!
//! Every non-control glasses event maps to an effective stream key and is
//! forwarded as a `data_stream` frame to each subscriber, in the session's
//! package insertion order. Audio fans out as binary frames. Command
//! activation scans final English transcripts against active packages'
//! command phrases.

use std::sync::Arc;

use bytes::Bytes;

use crate::protocol::{CloudToTpaMessage, GlassesMessage, StreamKey};
use crate::session::{TpaOutbound, UserSession};
use crate::state::CloudState;

/// Effective stream key for an inbound glasses event; `None` for control
/// messages that are handled, not routed.
pub fn effective_key(msg: &GlassesMessage) -> Option<StreamKey> {
    match msg {
        GlassesMessage::Vad { .. } => Some(StreamKey::Vad),
        GlassesMessage::LocationUpdate { .. } => Some(StreamKey::LocationUpdate),
        GlassesMessage::CalendarEvent { .. } => Some(StreamKey::CalendarEvent),
        GlassesMessage::HeadPosition { .. } => Some(StreamKey::HeadPosition),
        GlassesMessage::ButtonPress { .. } => Some(StreamKey::ButtonPress),
        GlassesMessage::PhoneNotification { .. } => Some(StreamKey::PhoneNotification),
        GlassesMessage::NotificationDismissed { .. } => Some(StreamKey::NotificationDismissed),
        GlassesMessage::GlassesBatteryUpdate { .. } => Some(StreamKey::GlassesBattery),
        GlassesMessage::PhoneBatteryUpdate { .. } => Some(StreamKey::PhoneBattery),
        GlassesMessage::ConnectionInit
        | GlassesMessage::StartApp { .. }
        | GlassesMessage::StopApp { .. }
        | GlassesMessage::GlassesConnectionState { .. } => None,
    }
}

/// Strip the discriminant off a glasses event, leaving the payload TPAs see.
pub fn payload_of(msg: &GlassesMessage) -> serde_json::Value {
    let mut value = serde_json::to_value(msg).unwrap_or(serde_json::Value::Null);
    if let Some(object) = value.as_object_mut() {
        object.remove("type");
    }
    value
}

/// Route one inbound glasses event to its subscribers.
pub async fn route_glasses_event(
    state: &Arc<CloudState>,
    session: &Arc<UserSession>,
    msg: &GlassesMessage,
) {
    let Some(key) = effective_key(msg) else {
        return;
    };
    deliver(state, session, &key, payload_of(msg)).await;
}

/// Deliver a payload under an effective key to every subscriber.
pub async fn deliver(
    state: &Arc<CloudState>,
    session: &Arc<UserSession>,
    key: &StreamKey,
    data: serde_json::Value,
) {
    let subscribers = state.subscriptions.subscribers_of(&session.session_id, key).await;
    for package in subscribers {
        session
            .send_data_to_app(
                &package,
                TpaOutbound::Message(CloudToTpaMessage::DataStream {
                    stream_type: key.clone(),
                    data: data.clone(),
                }),
            )
            .await;
    }
}

/// Fan one binary audio chunk out to `audio_chunk` subscribers.
pub async fn route_audio(state: &Arc<CloudState>, session: &Arc<UserSession>, bytes: &Bytes) {
    let subscribers =
        state.subscriptions.subscribers_of(&session.session_id, &StreamKey::AudioChunk).await;
    for package in subscribers {
        session.send_data_to_app(&package, TpaOutbound::Audio(bytes.clone())).await;
    }
}

/// Scan a final English transcript against active packages' commands.
///
/// At most one activation per package: the first command whose phrase is a
/// substring of the lower-cased text wins and the rest of that package's
/// commands are skipped.
pub async fn match_commands(state: &Arc<CloudState>, session: &Arc<UserSession>, text: &str) {
    let lowered = text.to_lowercase();
    let active: Vec<String> = session.active_apps.read().await.iter().cloned().collect();

    for package in active {
        let Some(record) = state.catalog.get(&package).await else {
            continue;
        };
        for command in &record.commands {
            if command.phrase.is_empty() {
                continue;
            }
            if lowered.contains(&command.phrase.to_lowercase()) {
                tracing::info!(
                    session_id = %session.session_id,
                    package,
                    command_id = %command.id,
                    "command activated"
                );
                let delivered = session
                    .send_control_to_app(
                        &package,
                        CloudToTpaMessage::CommandActivate {
                            command_id: command.id.clone(),
                            spoken_phrase: command.phrase.clone(),
                            parameters: None,
                            session_id: session.composite_id(&package),
                        },
                    )
                    .await;
                if !delivered {
                    // A control frame that cannot be queued means the
                    // channel is dead; unbind it so recovery can re-bind.
                    if session.app_channels.write().await.remove(&package).is_some() {
                        tracing::warn!(
                            session_id = %session.session_id,
                            package,
                            "unbound TPA channel after failed control send"
                        );
                    }
                }
                break;
            }
        }
    }
}

#[cfg(test)]
#[path = "router_tests.rs"]
mod tests;
