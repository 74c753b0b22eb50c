// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP client for TPA server webhooks.

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};

/// Payloads posted to `<public_url>/webhook`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum WebhookPayload {
    /// Ask the TPA server to open a channel for a new app session.
    SessionRequest {
        session_id: String,
        user_id: String,
        timestamp: u64,
        #[serde(rename = "augmentOSWebsocketUrl")]
        websocket_url: String,
    },
    /// Tell the TPA server an app session is going away.
    StopRequest {
        session_id: String,
        user_id: String,
        reason: String,
        timestamp: u64,
    },
    /// Ask a restarted TPA server to re-bind a still-live app session.
    SessionRecovery {
        session_id: String,
        user_id: String,
        timestamp: u64,
        #[serde(rename = "augmentOSWebsocketUrl")]
        websocket_url: String,
    },
}

/// Client for outbound webhook calls, bounded by the configured budget so a
/// slow TPA server never blocks session progression.
pub struct WebhookClient {
    client: Client,
}

impl WebhookClient {
    pub fn new(timeout: Duration) -> Self {
        let client = Client::builder().timeout(timeout).build().unwrap_or_default();
        Self { client }
    }

    /// Webhook endpoint for a TPA server base URL.
    pub fn webhook_url(base_url: &str) -> String {
        format!("{}/webhook", base_url.trim_end_matches('/'))
    }

    /// POST one payload to a webhook URL.
    pub async fn post(&self, url: &str, payload: &WebhookPayload) -> anyhow::Result<()> {
        let resp = self.client.post(url).json(payload).send().await?;
        resp.error_for_status()?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "webhook_tests.rs"]
mod tests;
