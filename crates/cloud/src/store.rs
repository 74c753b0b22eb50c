// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-user running-app persistence: load/save to JSON with atomic writes.
//!
//! Best-effort by design — a failed save is logged and forgotten, never
//! surfaced into session handling.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct PersistedProfiles {
    users: HashMap<String, Vec<String>>,
}

/// Persisted per-user running-app membership.
#[derive(Debug)]
pub struct ProfileStore {
    path: PathBuf,
    users: RwLock<HashMap<String, Vec<String>>>,
}

impl ProfileStore {
    /// Open the store, loading existing state if the file is present.
    pub fn open(path: PathBuf) -> Self {
        let users = match load(&path) {
            Ok(profiles) => profiles.users,
            Err(e) => {
                if path.exists() {
                    tracing::warn!(path = %path.display(), err = %e, "failed to load profiles");
                }
                HashMap::new()
            }
        };
        Self { path, users: RwLock::new(users) }
    }

    /// Running apps recorded for a user.
    pub async fn running_apps(&self, user_id: &str) -> Vec<String> {
        self.users.read().await.get(user_id).cloned().unwrap_or_default()
    }

    /// Record a user's running apps and persist, best-effort.
    pub async fn set_running_apps(&self, user_id: &str, apps: Vec<String>) {
        let snapshot = {
            let mut users = self.users.write().await;
            if apps.is_empty() {
                users.remove(user_id);
            } else {
                users.insert(user_id.to_owned(), apps);
            }
            users.clone()
        };
        if let Err(e) = save(&self.path, &PersistedProfiles { users: snapshot }) {
            tracing::warn!(path = %self.path.display(), err = %e, "failed to persist profiles");
        }
    }
}

fn load(path: &Path) -> anyhow::Result<PersistedProfiles> {
    let contents = std::fs::read_to_string(path)?;
    let profiles: PersistedProfiles = serde_json::from_str(&contents)?;
    Ok(profiles)
}

/// Atomic write: tmp file then rename.
fn save(path: &Path, profiles: &PersistedProfiles) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(profiles)?;
    let tmp_path = path.with_extension("tmp");
    std::fs::write(&tmp_path, json)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
