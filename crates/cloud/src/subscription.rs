// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Subscription registry: the authoritative `(session, package) → stream
//! keys` index.
//!
//! Reads come from the router, the speech pipeline, and the lifecycle
//! controller; writes come only from the owning session's dispatchers, so a
//! whole `update` is one linearization point — the diff takes effect before
//! any later event is routed for that session.

use std::collections::HashMap;

use indexmap::{IndexMap, IndexSet};
use tokio::sync::RwLock;

use crate::protocol::StreamKey;

/// Outcome of a subscription replace: which keys appeared and disappeared.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubscriptionDiff {
    pub added: Vec<StreamKey>,
    pub removed: Vec<StreamKey>,
}

impl SubscriptionDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Process-wide subscription index.
///
/// Per-session package maps preserve insertion order so fan-out delivery is
/// deterministic within a session.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    entries: RwLock<HashMap<String, IndexMap<String, IndexSet<StreamKey>>>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically replace the key set for `(session, package)`.
    ///
    /// Re-sending an identical set yields an empty diff.
    pub async fn update(
        &self,
        session_id: &str,
        package: &str,
        keys: Vec<StreamKey>,
    ) -> SubscriptionDiff {
        let next: IndexSet<StreamKey> = keys.into_iter().collect();
        let mut entries = self.entries.write().await;
        let packages = entries.entry(session_id.to_owned()).or_default();
        let prev = packages.insert(package.to_owned(), next.clone()).unwrap_or_default();

        SubscriptionDiff {
            added: next.difference(&prev).cloned().collect(),
            removed: prev.difference(&next).cloned().collect(),
        }
    }

    /// Current keys for `(session, package)`.
    pub async fn keys_of(&self, session_id: &str, package: &str) -> IndexSet<StreamKey> {
        let entries = self.entries.read().await;
        entries
            .get(session_id)
            .and_then(|packages| packages.get(package))
            .cloned()
            .unwrap_or_default()
    }

    /// Packages subscribed to an effective key, in package insertion order.
    pub async fn subscribers_of(&self, session_id: &str, key: &StreamKey) -> Vec<String> {
        let entries = self.entries.read().await;
        let Some(packages) = entries.get(session_id) else {
            return Vec::new();
        };
        packages
            .iter()
            .filter(|(_, keys)| keys.contains(key))
            .map(|(package, _)| package.clone())
            .collect()
    }

    /// Union of all language-parameterized keys across this session's
    /// packages — the minimal set of ASR streams the session needs.
    pub async fn minimal_language_set(&self, session_id: &str) -> IndexSet<StreamKey> {
        let entries = self.entries.read().await;
        let Some(packages) = entries.get(session_id) else {
            return IndexSet::new();
        };
        let mut set = IndexSet::new();
        for keys in packages.values() {
            for key in keys {
                if key.is_language_stream() {
                    set.insert(key.clone());
                }
            }
        }
        set
    }

    /// Whether any package subscribes to a key that requires microphone
    /// capture.
    pub async fn has_media_subscriptions(&self, session_id: &str) -> bool {
        let entries = self.entries.read().await;
        entries.get(session_id).is_some_and(|packages| {
            packages.values().any(|keys| keys.iter().any(StreamKey::requires_media))
        })
    }

    /// Drop one package's entries. Returns the removed keys.
    pub async fn remove(&self, session_id: &str, package: &str) -> Vec<StreamKey> {
        let mut entries = self.entries.write().await;
        let Some(packages) = entries.get_mut(session_id) else {
            return Vec::new();
        };
        let removed = packages
            .shift_remove(package)
            .map(|keys| keys.into_iter().collect())
            .unwrap_or_default();
        if packages.is_empty() {
            entries.remove(session_id);
        }
        removed
    }

    /// Drop every entry for a session.
    pub async fn remove_session(&self, session_id: &str) {
        self.entries.write().await.remove(session_id);
    }
}

#[cfg(test)]
#[path = "subscription_tests.rs"]
mod tests;
