// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Lumencloud: real-time broker between smart-glasses companions and
//! third-party applications.
//!
//! One process hosts the per-user session registry, the subscription index,
//! the TPA lifecycle controller, the speech pipeline multiplexer, the
//! display arbiter, and the TPA-server registration service. Glasses and
//! TPAs both connect over WebSocket; TPA servers register and recover over
//! a small HTTP surface.

pub mod apps;
pub mod catalog;
pub mod config;
pub mod display;
pub mod error;
pub mod health;
pub mod microphone;
pub mod protocol;
pub mod registration;
pub mod router;
pub mod session;
pub mod speech;
pub mod state;
pub mod store;
pub mod subscription;
pub mod transport;


use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::config::CloudConfig;
use crate::speech::{AsrProvider, DisabledAsrProvider, StreamingWsProvider};
use crate::state::CloudState;

/// Run the cloud server until shutdown.
pub async fn run(config: CloudConfig) -> anyhow::Result<()> {
    let _ = rustls::crypto::ring::default_provider().install_default();

    let shutdown = CancellationToken::new();
    let asr: Arc<dyn AsrProvider> = match &config.asr_endpoint {
        Some(endpoint) => Arc::new(StreamingWsProvider::new(
            endpoint.clone(),
            config.asr_key.clone(),
            config.asr_region.clone(),
        )),
        None => {
            tracing::warn!("no ASR endpoint configured; transcription is disabled");
            Arc::new(DisabledAsrProvider)
        }
    };

    let addr = format!("{}:{}", config.host, config.port);
    let state = Arc::new(CloudState::new(config, asr, shutdown.clone())?);

    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown requested");
            shutdown.cancel();
        });
    }

    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("lumencloud listening on {addr}");
    serve(state, listener).await
}

/// Serve an already-built state on an already-bound listener.
///
/// Split out of [`run`] so tests can bind an ephemeral port and inject their
/// own provider and catalog.
pub async fn serve(state: Arc<CloudState>, listener: TcpListener) -> anyhow::Result<()> {
    health::spawn_session_sweeper(Arc::clone(&state));
    let shutdown = state.shutdown.clone();
    let router = transport::build_router(state);
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown.cancelled_owned())
    .await?;
    Ok(())
}
