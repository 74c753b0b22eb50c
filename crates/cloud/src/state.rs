// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::apps::webhook::WebhookClient;
use crate::catalog::AppCatalog;
use crate::config::CloudConfig;
use crate::registration::TpaRegistrationService;
use crate::session::SessionRegistry;
use crate::speech::AsrProvider;
use crate::store::ProfileStore;
use crate::subscription::SubscriptionRegistry;

/// Shared cloud state: the process-wide registries plus injectable seams.
pub struct CloudState {
    pub config: CloudConfig,
    pub sessions: SessionRegistry,
    pub subscriptions: SubscriptionRegistry,
    pub registrations: TpaRegistrationService,
    pub catalog: AppCatalog,
    pub store: ProfileStore,
    pub webhooks: WebhookClient,
    pub asr: Arc<dyn AsrProvider>,
    pub shutdown: CancellationToken,
}

impl CloudState {
    pub fn new(
        config: CloudConfig,
        asr: Arc<dyn AsrProvider>,
        shutdown: CancellationToken,
    ) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&config.state_dir)?;

        let catalog = match &config.app_catalog {
            Some(path) => AppCatalog::load(path)?,
            None => AppCatalog::empty(),
        };
        let registrations =
            TpaRegistrationService::open(config.state_dir.join("registrations.json"));
        let store = ProfileStore::open(config.state_dir.join("profiles.json"));
        let webhooks = WebhookClient::new(config.webhook_timeout());

        Ok(Self {
            config,
            sessions: SessionRegistry::new(),
            subscriptions: SubscriptionRegistry::new(),
            registrations,
            catalog,
            store,
            webhooks,
            asr,
            shutdown,
        })
    }
}

/// Return current epoch millis.
pub fn epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
