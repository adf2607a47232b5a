// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::error::ErrorCode;
use crate::state::AppState;

/// Header the task queue sends with every worker delivery.
pub const RECONCILE_TOKEN_HEADER: &str = "x-reconcile-token";

/// Constant-time string comparison to prevent timing side-channel attacks.
fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    if a.len() != b.len() {
        return false;
    }
    let mut acc = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        acc |= x ^ y;
    }
    acc == 0
}

/// Validate a shared-secret header. No expected secret means no check.
pub fn validate_shared_secret(
    headers: &HeaderMap,
    header: &str,
    expected: Option<&str>,
) -> Result<(), ErrorCode> {
    let expected = match expected {
        Some(tok) => tok,
        None => return Ok(()),
    };

    let provided =
        headers.get(header).and_then(|v| v.to_str().ok()).ok_or(ErrorCode::Unauthorized)?;
    if constant_time_eq(provided, expected) {
        Ok(())
    } else {
        Err(ErrorCode::Unauthorized)
    }
}

/// Axum middleware guarding the task endpoints with `X-Reconcile-Token`.
///
/// Webhooks, the OAuth callback, and health are called by the platform or
/// a browser and skip the check.
pub async fn auth_layer(
    state: State<Arc<AppState>>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    if !req.uri().path().starts_with("/tasks/") {
        return next.run(req).await;
    }

    if let Err(code) = validate_shared_secret(
        req.headers(),
        RECONCILE_TOKEN_HEADER,
        state.config.reconcile_token.as_deref(),
    ) {
        tracing::warn!(path = req.uri().path(), "rejected task delivery without valid token");
        return code.to_http_response("invalid or missing reconcile token").into_response();
    }

    next.run(req).await
}

#[cfg(test)]
#[path = "auth_tests.rs"]
mod tests;
