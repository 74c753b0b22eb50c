// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! App catalog seam.
//!
//! The developer portal owns the real catalog; this process reads a JSON
//! snapshot of it. Records carry everything the lifecycle controller and
//! registration service need: app kind, webhook base URL, hashed API key,
//! and voice commands.

use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::transport::auth;

/// App kind. STANDARD apps demand exclusive foreground tenancy among
/// STANDARD apps; background apps coexist freely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppKind {
    Standard,
    Background,
}

/// A voice command the app responds to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppCommand {
    pub id: String,
    pub phrase: String,
}

/// One catalog record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppRecord {
    pub package_name: String,
    pub kind: AppKind,
    /// Base URL of the TPA server; webhooks go to `<public_url>/webhook`.
    pub public_url: String,
    /// Sha-256 hex digest of the app's API key.
    pub api_key_hash: String,
    #[serde(default)]
    pub is_system: bool,
    #[serde(default)]
    pub commands: Vec<AppCommand>,
    #[serde(default)]
    pub settings: Vec<serde_json::Value>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CatalogFile {
    apps: Vec<AppRecord>,
}

/// In-process view of the app catalog.
#[derive(Debug, Default)]
pub struct AppCatalog {
    apps: RwLock<IndexMap<String, AppRecord>>,
}

impl AppCatalog {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Load a catalog snapshot from a JSON file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let file: CatalogFile = serde_json::from_str(&contents)?;
        let mut apps = IndexMap::new();
        for record in file.apps {
            apps.insert(record.package_name.clone(), record);
        }
        tracing::info!(count = apps.len(), path = %path.display(), "loaded app catalog");
        Ok(Self { apps: RwLock::new(apps) })
    }

    /// Look up one app record.
    pub async fn get(&self, package: &str) -> Option<AppRecord> {
        self.apps.read().await.get(package).cloned()
    }

    /// Verify a raw API key against the record's stored digest.
    pub async fn verify_api_key(&self, package: &str, api_key: &str) -> bool {
        let Some(record) = self.get(package).await else {
            return false;
        };
        auth::constant_time_eq(&auth::hash_api_key(api_key), &record.api_key_hash)
    }

    /// Insert or replace a record. Test seams and future catalog refresh.
    pub async fn insert(&self, record: AppRecord) {
        self.apps.write().await.insert(record.package_name.clone(), record);
    }
}
