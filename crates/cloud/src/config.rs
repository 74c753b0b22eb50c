// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the lumencloud broker.
#[derive(Debug, Clone, clap::Parser)]
pub struct CloudConfig {
    /// Host to bind on.
    #[arg(long, default_value = "127.0.0.1", env = "LUMEN_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 8002, env = "LUMEN_PORT")]
    pub port: u16,

    /// HMAC secret shared with the identity provider; glasses bearer tokens
    /// are verified against it.
    #[arg(long, env = "LUMEN_JWT_SECRET")]
    pub jwt_secret: String,

    /// Public hostname handed to TPAs in webhook payloads.
    #[arg(long, default_value = "localhost:8002", env = "LUMEN_PUBLIC_HOST")]
    pub public_host: String,

    /// Internal hostname handed to system apps instead of the public one.
    #[arg(long, env = "LUMEN_INTERNAL_HOST")]
    pub internal_host: Option<String>,

    /// WebSocket endpoint of the streaming ASR provider.
    #[arg(long, env = "LUMEN_ASR_ENDPOINT")]
    pub asr_endpoint: Option<String>,

    /// ASR provider API key.
    #[arg(long, env = "LUMEN_ASR_KEY")]
    pub asr_key: Option<String>,

    /// ASR provider region.
    #[arg(long, env = "LUMEN_ASR_REGION")]
    pub asr_region: Option<String>,

    /// Path to the app catalog JSON file.
    #[arg(long, env = "LUMEN_APP_CATALOG")]
    pub app_catalog: Option<PathBuf>,

    /// Directory for persisted state (registrations, running-app membership).
    #[arg(long, default_value = ".lumen", env = "LUMEN_STATE_DIR")]
    pub state_dir: PathBuf,

    /// How long a TPA may stay in `Loading` before the start is abandoned.
    #[arg(long, default_value_t = 5000, env = "LUMEN_LOADING_TIMEOUT_MS")]
    pub loading_timeout_ms: u64,

    /// Grace window after a glasses disconnect before the session ends.
    #[arg(long, default_value_t = 60_000, env = "LUMEN_RECONNECT_GRACE_MS")]
    pub reconnect_grace_ms: u64,

    /// Debounce window for microphone state changes.
    #[arg(long, default_value_t = 1000, env = "LUMEN_MIC_DEBOUNCE_MS")]
    pub mic_debounce_ms: u64,

    /// Rolling transcript retention in minutes.
    #[arg(long, default_value_t = 30, env = "LUMEN_TRANSCRIPT_RETENTION_MIN")]
    pub transcript_retention_min: u64,

    /// Registrations silent for longer than this are stale.
    #[arg(long, default_value_t = 90_000, env = "LUMEN_HEARTBEAT_DEAD_MS")]
    pub heartbeat_dead_ms: u64,

    /// Budget for a single outbound webhook call.
    #[arg(long, default_value_t = 5000, env = "LUMEN_WEBHOOK_TIMEOUT_MS")]
    pub webhook_timeout_ms: u64,

    /// Interval of the background session health sweep.
    #[arg(long, default_value_t = 1000, env = "LUMEN_HEALTH_SWEEP_MS")]
    pub health_sweep_ms: u64,
}

impl CloudConfig {
    pub fn loading_timeout(&self) -> Duration {
        Duration::from_millis(self.loading_timeout_ms)
    }

    pub fn reconnect_grace(&self) -> Duration {
        Duration::from_millis(self.reconnect_grace_ms)
    }

    pub fn mic_debounce(&self) -> Duration {
        Duration::from_millis(self.mic_debounce_ms)
    }

    pub fn transcript_retention(&self) -> Duration {
        Duration::from_secs(self.transcript_retention_min * 60)
    }

    pub fn heartbeat_dead(&self) -> Duration {
        Duration::from_millis(self.heartbeat_dead_ms)
    }

    pub fn webhook_timeout(&self) -> Duration {
        Duration::from_millis(self.webhook_timeout_ms)
    }

    pub fn health_sweep_interval(&self) -> Duration {
        Duration::from_millis(self.health_sweep_ms)
    }

    /// WebSocket URL TPAs should connect back to, as sent in webhooks.
    pub fn tpa_websocket_url(&self) -> String {
        format!("ws://{}/tpa", self.public_host)
    }

    /// WebSocket URL for system apps, preferring the internal hostname.
    pub fn internal_tpa_websocket_url(&self) -> String {
        match &self.internal_host {
            Some(host) => format!("ws://{host}/tpa"),
            None => self.tpa_websocket_url(),
        }
    }
}
