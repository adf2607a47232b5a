// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP transport for the sync service.

pub mod auth;
pub mod http;

use std::sync::Arc;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Build the axum `Router` with all routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health (no auth)
        .route("/api/v1/health", get(http::health))
        // Marketplace install
        .route("/oauth/callback", get(http::oauth_callback))
        // Platform webhooks
        .route("/webhooks/uninstall", post(http::uninstall))
        .route("/webhooks/record-delete", post(http::record_delete))
        // Cached record ingestion
        .route("/api/v1/locations/{id}/records", post(http::ingest_record))
        // Task queue deliveries
        .route("/tasks/reconcile", post(http::reconcile))
        // Middleware
        .layer(middleware::from_fn_with_state(state.clone(), auth::auth_layer))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
