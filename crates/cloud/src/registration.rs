// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! TPA-server registration & recovery.
//!
//! TPA servers register once, heartbeat while alive, and call `restart`
//! after a redeploy so every live session running their package gets a
//! `session_recovery` webhook and the server can re-bind its channels.
//! Registrations persist to JSON so a cloud restart does not orphan them.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::apps::webhook::WebhookPayload;
use crate::error::CloudError;
use crate::state::{epoch_ms, CloudState};
use crate::transport::auth;

/// One registered TPA server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TpaRegistration {
    pub registration_id: String,
    pub package_name: String,
    pub webhook_url: String,
    #[serde(default)]
    pub server_urls: Vec<String>,
    pub api_key_hash: String,
    pub last_heartbeat_ms: u64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedRegistrations {
    registrations: Vec<TpaRegistration>,
}

/// Registration request fields, validated at the HTTP layer.
#[derive(Debug, Clone)]
pub struct RegisterParams {
    pub package_name: String,
    pub api_key: String,
    pub webhook_url: String,
    pub server_urls: Vec<String>,
}

/// Process-wide TPA-server registry.
#[derive(Debug)]
pub struct TpaRegistrationService {
    entries: RwLock<HashMap<String, TpaRegistration>>,
    path: PathBuf,
}

impl TpaRegistrationService {
    /// Open the registry, reloading persisted entries.
    ///
    /// Heartbeats are refreshed to load time so surviving registrations are
    /// not instantly stale after a cloud restart.
    pub fn open(path: PathBuf) -> Self {
        let mut entries = HashMap::new();
        match load(&path) {
            Ok(persisted) => {
                let now = epoch_ms();
                for mut reg in persisted.registrations {
                    reg.last_heartbeat_ms = now;
                    entries.insert(reg.registration_id.clone(), reg);
                }
            }
            Err(e) => {
                if path.exists() {
                    tracing::warn!(path = %path.display(), err = %e, "failed to load registrations");
                }
            }
        }
        if !entries.is_empty() {
            tracing::info!(count = entries.len(), "reloaded TPA registrations");
        }
        Self { entries: RwLock::new(entries), path }
    }

    /// Register a TPA server. Idempotent per `(package, webhook_url)`.
    pub async fn register(
        &self,
        state: &CloudState,
        params: RegisterParams,
    ) -> Result<String, CloudError> {
        if !state.catalog.verify_api_key(&params.package_name, &params.api_key).await {
            return Err(CloudError::AuthFailure);
        }

        let mut entries = self.entries.write().await;
        let existing = entries
            .values_mut()
            .find(|r| r.package_name == params.package_name && r.webhook_url == params.webhook_url);
        let registration_id = match existing {
            Some(reg) => {
                reg.last_heartbeat_ms = epoch_ms();
                reg.server_urls = params.server_urls;
                reg.registration_id.clone()
            }
            None => {
                let registration_id = uuid::Uuid::new_v4().to_string();
                tracing::info!(
                    registration_id = %registration_id,
                    package = %params.package_name,
                    "TPA server registered"
                );
                entries.insert(
                    registration_id.clone(),
                    TpaRegistration {
                        registration_id: registration_id.clone(),
                        package_name: params.package_name,
                        webhook_url: params.webhook_url,
                        server_urls: params.server_urls,
                        api_key_hash: auth::hash_api_key(&params.api_key),
                        last_heartbeat_ms: epoch_ms(),
                    },
                );
                registration_id
            }
        };

        self.persist(&entries);
        Ok(registration_id)
    }

    /// Refresh a registration's heartbeat.
    pub async fn heartbeat(&self, registration_id: &str) -> Result<(), CloudError> {
        let mut entries = self.entries.write().await;
        let reg = entries
            .get_mut(registration_id)
            .ok_or(CloudError::RegistrationNotFound)?;
        reg.last_heartbeat_ms = epoch_ms();
        Ok(())
    }

    pub async fn get(&self, registration_id: &str) -> Option<TpaRegistration> {
        self.entries.read().await.get(registration_id).cloned()
    }

    fn persist(&self, entries: &HashMap<String, TpaRegistration>) {
        let persisted = PersistedRegistrations {
            registrations: entries.values().cloned().collect(),
        };
        if let Err(e) = save(&self.path, &persisted) {
            tracing::warn!(path = %self.path.display(), err = %e, "failed to persist registrations");
        }
    }
}

/// Whether a registration has missed its heartbeat window.
pub fn is_stale(reg: &TpaRegistration, now_ms: u64, dead_after: Duration) -> bool {
    now_ms.saturating_sub(reg.last_heartbeat_ms) > dead_after.as_millis() as u64
}

/// Restart-driven recovery: re-send a `session_recovery` webhook for every
/// live session running the package whose TPA channel is down. Sessions with
/// an open channel are untouched. Returns the recovered-session count.
pub async fn restart(state: &Arc<CloudState>, registration_id: &str) -> Result<usize, CloudError> {
    let reg = state
        .registrations
        .get(registration_id)
        .await
        .ok_or(CloudError::RegistrationNotFound)?;

    if is_stale(&reg, epoch_ms(), state.config.heartbeat_dead()) {
        tracing::warn!(
            registration_id,
            package = %reg.package_name,
            "stale registration excluded from recovery"
        );
        return Ok(0);
    }

    let mut recovered = 0usize;
    for session in state.sessions.snapshot().await {
        if session.is_ended().await {
            continue;
        }
        if !session.active_apps.read().await.contains(&reg.package_name) {
            continue;
        }
        if session.has_app_channel(&reg.package_name).await {
            continue;
        }

        let payload = WebhookPayload::SessionRecovery {
            session_id: session.composite_id(&reg.package_name),
            user_id: session.user_id.clone(),
            timestamp: epoch_ms(),
            websocket_url: state.config.tpa_websocket_url(),
        };
        match state.webhooks.post(&reg.webhook_url, &payload).await {
            Ok(()) => recovered += 1,
            Err(e) => {
                tracing::warn!(
                    registration_id,
                    session_id = %session.session_id,
                    err = %e,
                    "session-recovery webhook failed"
                );
            }
        }
    }

    tracing::info!(registration_id, package = %reg.package_name, recovered, "restart recovery");
    Ok(recovered)
}

fn load(path: &Path) -> anyhow::Result<PersistedRegistrations> {
    let contents = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}

/// Atomic write: tmp file then rename.
fn save(path: &Path, persisted: &PersistedRegistrations) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(persisted)?;
    let tmp_path = path.with_extension("tmp");
    std::fs::write(&tmp_path, json)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
#[path = "registration_tests.rs"]
mod tests;
