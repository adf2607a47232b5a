// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Hubsync: CRM marketplace token lifecycle and install-state reconciliation.

pub mod cascade;
pub mod config;
pub mod error;
pub mod events;
pub mod install;
pub mod platform;
pub mod reconcile;
pub mod state;
pub mod store;
pub mod test_support;
pub mod token;
pub mod transport;
pub mod webhook;

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::config::SyncConfig;
use crate::events::Reporter;
use crate::state::AppState;
use crate::store::{MemoryStore, Store};
use crate::transport::build_router;

/// Run the sync server until ctrl-c.
pub async fn run(config: SyncConfig) -> anyhow::Result<()> {
    config.validate()?;
    let addr = format!("{}:{}", config.host, config.port);
    let shutdown = CancellationToken::new();

    let store: Arc<dyn Store> = match config.state_path {
        Some(ref path) => Arc::new(MemoryStore::with_snapshot(path.clone())?),
        None => Arc::new(MemoryStore::new()),
    };
    if config.tasks_project.is_none() {
        tracing::warn!("no task queue configured; reconcile attempts will not be scheduled");
    }

    let state = Arc::new(AppState::new(config, store, Reporter::new()));
    let router = build_router(state);

    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown requested");
            }
            shutdown.cancel();
        });
    }

    tracing::info!("hubsync listening on {addr}");
    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, router).with_graceful_shutdown(shutdown.cancelled_owned()).await?;

    Ok(())
}
