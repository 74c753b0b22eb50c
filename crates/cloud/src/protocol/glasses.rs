// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Glasses↔cloud message vocabulary.
//!
//! Inbound messages arrive on the glasses WebSocket from the mobile
//! companion; outbound messages are the only frames the cloud ever pushes to
//! the glasses. Field names are camelCase on the wire, variant tags are
//! snake_case.

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

/// VAD status flag — companions send both `true` and `"true"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VadStatus(pub bool);

impl Serialize for VadStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bool(self.0)
    }
}

impl<'de> Deserialize<'de> for VadStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct Visitor;

        impl de::Visitor<'_> for Visitor {
            type Value = VadStatus;

            fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str("a boolean or the strings \"true\"/\"false\"")
            }

            fn visit_bool<E: de::Error>(self, v: bool) -> Result<Self::Value, E> {
                Ok(VadStatus(v))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                match v {
                    "true" => Ok(VadStatus(true)),
                    "false" => Ok(VadStatus(false)),
                    other => Err(E::custom(format!("invalid vad status: {other:?}"))),
                }
            }
        }

        deserializer.deserialize_any(Visitor)
    }
}

/// Messages the glasses companion sends to the cloud.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum GlassesMessage {
    ConnectionInit,
    StartApp {
        package_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },
    StopApp {
        package_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },
    GlassesConnectionState {
        status: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        model_name: Option<String>,
    },
    Vad {
        status: VadStatus,
    },
    LocationUpdate {
        lat: f64,
        lng: f64,
        timestamp: u64,
    },
    CalendarEvent {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        event_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        dt_start: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        dt_end: Option<u64>,
    },
    HeadPosition {
        position: String,
    },
    ButtonPress {
        button_id: String,
        press_type: String,
    },
    PhoneNotification {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        app_name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
    },
    NotificationDismissed {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        notification_id: Option<String>,
    },
    GlassesBatteryUpdate {
        level: i32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        charging: Option<bool>,
    },
    PhoneBatteryUpdate {
        level: i32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        charging: Option<bool>,
    },
}

/// Serializable snapshot of a session, embedded in acks and state changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSessionSnapshot {
    pub user_id: String,
    pub active_apps: Vec<String>,
    pub loading_apps: Vec<String>,
    pub is_transcribing: bool,
}

/// Messages the cloud pushes to the glasses companion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum CloudToGlassesMessage {
    ConnectionAck {
        session_id: String,
        user_session: UserSessionSnapshot,
        timestamp: u64,
    },
    ConnectionError {
        message: String,
    },
    AuthError {
        message: String,
    },
    AppStateChange {
        session_id: String,
        user_session: UserSessionSnapshot,
        timestamp: u64,
    },
    DisplayEvent {
        view: String,
        layout: serde_json::Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration_ms: Option<u64>,
    },
    MicrophoneStateChange {
        is_microphone_enabled: bool,
    },
}

#[cfg(test)]
#[path = "glasses_tests.rs"]
mod tests;
