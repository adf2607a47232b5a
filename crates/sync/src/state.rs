// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;
use std::time::Instant;

use crate::cascade::CascadeEngine;
use crate::config::SyncConfig;
use crate::events::Reporter;
use crate::install::InstallHandler;
use crate::platform::PlatformClient;
use crate::reconcile::{ReconcileQueue, ReconcileWorker};
use crate::store::Store;
use crate::token::TokenResolver;

/// Shared service state. Every component is stateless over the store.
pub struct AppState {
    pub config: SyncConfig,
    pub store: Arc<dyn Store>,
    pub reporter: Reporter,
    pub resolver: TokenResolver,
    pub install: InstallHandler,
    pub cascade: CascadeEngine,
    pub queue: ReconcileQueue,
    pub worker: ReconcileWorker,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(config: SyncConfig, store: Arc<dyn Store>, reporter: Reporter) -> Self {
        let platform = PlatformClient::new(&config);
        let resolver = TokenResolver::new(
            Arc::clone(&store),
            platform.clone(),
            reporter.clone(),
            config.token_skew_secs,
        );
        let install = InstallHandler::new(
            &config,
            Arc::clone(&store),
            platform.clone(),
            resolver.clone(),
            reporter.clone(),
        );
        let cascade = CascadeEngine::new(&config, Arc::clone(&store), reporter.clone());
        let queue = ReconcileQueue::new(&config, reporter.clone());
        let worker = ReconcileWorker::new(
            &config,
            Arc::clone(&store),
            resolver.clone(),
            platform,
            queue.clone(),
            reporter.clone(),
        );
        Self {
            config,
            store,
            reporter,
            resolver,
            install,
            cascade,
            queue,
            worker,
            started_at: Instant::now(),
        }
    }
}
