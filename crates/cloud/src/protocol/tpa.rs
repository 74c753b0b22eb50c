// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! TPA↔cloud message vocabulary.
//!
//! A TPA channel is authenticated by its first frame, `tpa_connection_init`;
//! every later inbound frame is a subscription or display request. Outbound
//! frames carry acks, lifecycle notices, and routed data streams. Binary
//! frames (audio) bypass this vocabulary.

use serde::{Deserialize, Serialize};

use crate::protocol::stream::StreamKey;

/// Messages a TPA sends to the cloud.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum TpaMessage {
    TpaConnectionInit {
        package_name: String,
        /// Composite id from the session-request webhook: `sessionId-packageName`.
        session_id: String,
        api_key: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },
    SubscriptionUpdate {
        package_name: String,
        session_id: String,
        subscriptions: Vec<StreamKey>,
    },
    DisplayEvent {
        package_name: String,
        session_id: String,
        view: String,
        layout: serde_json::Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration_ms: Option<u64>,
    },
}

/// Messages the cloud pushes to a TPA.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum CloudToTpaMessage {
    TpaConnectionAck {
        session_id: String,
        settings: Vec<serde_json::Value>,
    },
    TpaConnectionError {
        message: String,
    },
    AppStopped {
        reason: String,
    },
    SettingsUpdate {
        package_name: String,
        settings: Vec<serde_json::Value>,
    },
    DataStream {
        stream_type: StreamKey,
        data: serde_json::Value,
    },
    CommandActivate {
        command_id: String,
        spoken_phrase: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parameters: Option<serde_json::Value>,
        session_id: String,
    },
}

#[cfg(test)]
#[path = "tpa_tests.rs"]
mod tests;
