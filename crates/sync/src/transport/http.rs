// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP handlers for the sync service.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::ErrorCode;
use crate::events::SyncEvent;
use crate::install::{InstallError, InstallOutcome};
use crate::reconcile::{ReconcileError, ReconcileTask};
use crate::state::AppState;
use crate::token::TokenError;
use crate::webhook::{self, RecordDeletePayload, UninstallPayload, WebhookError};

// -- Request/Response types ---------------------------------------------------

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Webhook reply when a valid event could not be applied.
///
/// Still a 200: the platform does not redeliver on our internal failures.
#[derive(Debug, Serialize)]
pub struct WebhookFailure {
    pub action: &'static str,
    pub error: String,
}

/// Worker reply when the sub-account has no usable token.
#[derive(Debug, Serialize)]
pub struct TokenUnavailableReport {
    pub outcome: &'static str,
    pub code: &'static str,
    pub message: String,
}

// -- Helpers ------------------------------------------------------------------

/// Parse a JSON body, answering 400 with the error envelope when it is unusable.
fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, Box<Response>> {
    serde_json::from_slice(body).map_err(|e| {
        Box::new(ErrorCode::BadRequest.to_http_response(format!("invalid body: {e}")).into_response())
    })
}

fn webhook_error(s: &AppState, webhook: &str, err: WebhookError) -> Response {
    if err.is_bad_request() {
        return ErrorCode::BadRequest.to_http_response(err.to_string()).into_response();
    }
    s.reporter.emit(SyncEvent::WebhookFailed { webhook: webhook.to_owned(), error: err.to_string() });
    Json(WebhookFailure { action: "failed", error: err.to_string() }).into_response()
}

fn urlencoding(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char);
            }
            _ => {
                out.push('%');
                out.push(char::from(HEX[(b >> 4) as usize]));
                out.push(char::from(HEX[(b & 0xf) as usize]));
            }
        }
    }
    out
}

const HEX: &[u8; 16] = b"0123456789ABCDEF";

/// UI URL with the installed tenant ids appended.
pub fn redirect_target(ui_url: &str, outcome: &InstallOutcome) -> String {
    let params: Vec<String> = [("companyId", &outcome.company_id), ("locationId", &outcome.location_id)]
        .into_iter()
        .filter_map(|(k, v)| v.as_deref().map(|v| format!("{k}={}", urlencoding(v))))
        .collect();
    if params.is_empty() {
        return ui_url.to_owned();
    }
    let sep = if ui_url.contains('?') { '&' } else { '?' };
    format!("{ui_url}{sep}{}", params.join("&"))
}

// -- Handlers -----------------------------------------------------------------

/// `GET /api/v1/health`
pub async fn health(State(s): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "running".to_owned(),
        version: env!("CARGO_PKG_VERSION").to_owned(),
        uptime_secs: s.started_at.elapsed().as_secs(),
    })
}

/// `GET /oauth/callback`: finish a marketplace install and send the browser to the UI.
pub async fn oauth_callback(
    State(s): State<Arc<AppState>>,
    Query(query): Query<CallbackQuery>,
) -> Response {
    let code = match query.code.as_deref().map(str::trim) {
        Some(code) if !code.is_empty() => code.to_owned(),
        _ => {
            let message = match query.error {
                Some(e) => format!("authorization failed: {e}"),
                None => "missing code".to_owned(),
            };
            return ErrorCode::BadRequest.to_http_response(message).into_response();
        }
    };

    match s.install.handle(&code).await {
        Ok(outcome) => {
            let location = redirect_target(&s.config.ui_url, &outcome);
            (StatusCode::SEE_OTHER, [(header::LOCATION, location)]).into_response()
        }
        Err(e @ InstallError::Exchange(_)) | Err(e @ InstallError::MissingTenant(_)) => {
            tracing::warn!(err = %e, "install failed");
            ErrorCode::UpstreamError.to_http_response(e.to_string()).into_response()
        }
        Err(e @ InstallError::Store(_)) => {
            tracing::error!(err = %e, "install failed");
            ErrorCode::Internal.to_http_response(e.to_string()).into_response()
        }
    }
}

/// `POST /webhooks/uninstall`
pub async fn uninstall(State(s): State<Arc<AppState>>, body: Bytes) -> Response {
    let payload: UninstallPayload = match parse_body(&body) {
        Ok(p) => p,
        Err(resp) => return *resp,
    };
    match webhook::handle_uninstall(&s, payload).await {
        Ok(outcome) => Json(outcome).into_response(),
        Err(e) => webhook_error(&s, "uninstall", e),
    }
}

/// `POST /webhooks/record-delete`
pub async fn record_delete(State(s): State<Arc<AppState>>, body: Bytes) -> Response {
    let payload: RecordDeletePayload = match parse_body(&body) {
        Ok(p) => p,
        Err(resp) => return *resp,
    };
    match webhook::handle_record_delete(&s, payload).await {
        Ok(outcome) => Json(outcome).into_response(),
        Err(e) => webhook_error(&s, "record-delete", e),
    }
}

/// `POST /api/v1/locations/{id}/records`: ingest a cached record in any legacy shape.
pub async fn ingest_record(
    State(s): State<Arc<AppState>>,
    Path(location_id): Path<String>,
    body: Bytes,
) -> Response {
    let value: serde_json::Value = match parse_body(&body) {
        Ok(v) => v,
        Err(resp) => return *resp,
    };
    match webhook::ingest_record(&s, &location_id, &value).await {
        Ok(record) => (StatusCode::CREATED, Json(record)).into_response(),
        Err(e) if e.is_bad_request() => {
            ErrorCode::BadRequest.to_http_response(e.to_string()).into_response()
        }
        Err(e) => {
            tracing::warn!(location_id, err = %e, "record ingestion failed");
            ErrorCode::Retryable.to_http_response(e.to_string()).into_response()
        }
    }
}

/// `POST /tasks/reconcile`: one reconcile attempt, delivered by the task queue.
///
/// 503 asks the queue to redeliver the same attempt.
pub async fn reconcile(State(s): State<Arc<AppState>>, body: Bytes) -> Response {
    let task: ReconcileTask = match parse_body(&body) {
        Ok(t) => t,
        Err(resp) => return *resp,
    };
    match s.worker.run(&task).await {
        Ok(outcome) => Json(outcome).into_response(),
        Err(ReconcileError::Token(TokenError::Unavailable { id, reason })) => {
            Json(TokenUnavailableReport {
                outcome: "token_unavailable",
                code: ErrorCode::TokenUnavailable.as_str(),
                message: format!("no usable token for {id}: {reason}"),
            })
            .into_response()
        }
        Err(e) => {
            tracing::warn!(
                sub_account_id = %task.sub_account_id,
                group_key = %task.group_key,
                attempt = task.attempt,
                err = %e,
                "reconcile attempt failed, asking for redelivery"
            );
            ErrorCode::Retryable.to_http_response(e.to_string()).into_response()
        }
    }
}

#[cfg(test)]
#[path = "http_tests.rs"]
mod tests;
