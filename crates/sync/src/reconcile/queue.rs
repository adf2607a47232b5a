// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Task queue client for scheduling reconcile attempts.
//!
//! Tasks are created through the Cloud Tasks v2 REST API with an HTTP target
//! pointing back at this service's worker endpoint. The task id is derived
//! from `(sub-account, group, attempt)`, so a duplicate enqueue is rejected by
//! the queue itself and reported as deduplicated.

use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{SecondsFormat, Utc};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::SyncConfig;
use crate::events::{Reporter, SyncEvent};
use crate::reconcile::ReconcileTask;

/// Result of an enqueue call. Enqueue never fails the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EnqueueOutcome {
    /// A task for this attempt exists on the queue.
    pub queued: bool,
    /// The task already existed.
    pub deduped: bool,
}

#[derive(Debug, Clone)]
struct QueueTarget {
    project: String,
    worker_url: String,
}

#[derive(Debug, Deserialize)]
struct IdentityToken {
    access_token: String,
}

/// Deterministic task id for one attempt of one group.
pub fn task_id(sub_account_id: &str, group_key: &str, attempt: u32) -> String {
    let sanitized: String = sub_account_id
        .chars()
        .take(64)
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    let mut hasher = Sha256::new();
    hasher.update(sub_account_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(group_key.as_bytes());
    let digest: String = hasher.finalize().iter().take(8).map(|b| format!("{b:02x}")).collect();
    format!("rc-{sanitized}-{digest}-a{attempt}")
}

/// Client for the reconcile queue.
#[derive(Debug, Clone)]
pub struct ReconcileQueue {
    http: Client,
    tasks_url: String,
    metadata_url: String,
    location: String,
    queue: String,
    target: Option<QueueTarget>,
    reconcile_token: Option<String>,
    max_attempts: u32,
    reporter: Reporter,
}

impl ReconcileQueue {
    pub fn new(config: &SyncConfig, reporter: Reporter) -> Self {
        let http = Client::builder().timeout(Duration::from_secs(15)).build().unwrap_or_default();
        let target = match (&config.tasks_project, &config.worker_url) {
            (Some(project), Some(worker_url)) => {
                Some(QueueTarget { project: project.clone(), worker_url: worker_url.clone() })
            }
            _ => None,
        };
        Self {
            http,
            tasks_url: config.tasks_url.trim_end_matches('/').to_owned(),
            metadata_url: config.metadata_url.trim_end_matches('/').to_owned(),
            location: config.tasks_location.clone(),
            queue: config.tasks_queue.clone(),
            target,
            reconcile_token: config.reconcile_token.clone(),
            max_attempts: config.reconcile_max_attempts,
            reporter,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    fn queue_path(&self, project: &str) -> String {
        format!("projects/{project}/locations/{}/queues/{}", self.location, self.queue)
    }

    /// Schedule `attempt` for the group, `delay` from now.
    pub async fn enqueue(
        &self,
        sub_account_id: &str,
        group_key: &str,
        attempt: u32,
        delay: Duration,
    ) -> EnqueueOutcome {
        if attempt >= self.max_attempts {
            tracing::debug!(sub_account_id, group_key, attempt, "attempt cap reached, not enqueued");
            return EnqueueOutcome::default();
        }
        match self.create_task(sub_account_id, group_key, attempt, delay).await {
            Ok(outcome) => {
                tracing::info!(
                    sub_account_id,
                    group_key,
                    attempt,
                    deduped = outcome.deduped,
                    "reconcile attempt enqueued"
                );
                outcome
            }
            Err(error) => {
                self.reporter.emit(SyncEvent::EnqueueFailed {
                    sub_account: sub_account_id.to_owned(),
                    group_key: group_key.to_owned(),
                    attempt,
                    error,
                });
                EnqueueOutcome::default()
            }
        }
    }

    async fn create_task(
        &self,
        sub_account_id: &str,
        group_key: &str,
        attempt: u32,
        delay: Duration,
    ) -> Result<EnqueueOutcome, String> {
        let target = self.target.as_ref().ok_or("task queue not configured")?;
        let bearer = self.identity_token().await?;

        let payload = ReconcileTask {
            sub_account_id: sub_account_id.to_owned(),
            group_key: group_key.to_owned(),
            attempt,
        };
        let payload = serde_json::to_vec(&payload).map_err(|e| e.to_string())?;
        let mut headers = serde_json::Map::new();
        headers.insert("Content-Type".into(), "application/json".into());
        if let Some(ref token) = self.reconcile_token {
            headers.insert("X-Reconcile-Token".into(), token.clone().into());
        }
        let delay = chrono::Duration::from_std(delay).map_err(|e| e.to_string())?;
        let schedule_time = (Utc::now() + delay).to_rfc3339_opts(SecondsFormat::Secs, true);
        let queue_path = self.queue_path(&target.project);
        let body = serde_json::json!({
            "task": {
                "name": format!("{queue_path}/tasks/{}", task_id(sub_account_id, group_key, attempt)),
                "scheduleTime": schedule_time,
                "httpRequest": {
                    "httpMethod": "POST",
                    "url": target.worker_url,
                    "headers": headers,
                    "body": STANDARD.encode(payload),
                },
            }
        });

        let resp = self
            .http
            .post(format!("{}/v2/{queue_path}/tasks", self.tasks_url))
            .bearer_auth(bearer)
            .json(&body)
            .send()
            .await
            .map_err(|e| format!("task create failed: {e}"))?;
        let status = resp.status();
        if status.is_success() {
            return Ok(EnqueueOutcome { queued: true, deduped: false });
        }
        if status == StatusCode::CONFLICT {
            return Ok(EnqueueOutcome { queued: true, deduped: true });
        }
        let text = resp.text().await.unwrap_or_default();
        Err(format!("task create returned {status}: {text}"))
    }

    /// Fetch an access token for the default service account.
    async fn identity_token(&self) -> Result<String, String> {
        let resp = self
            .http
            .get(format!(
                "{}/computeMetadata/v1/instance/service-accounts/default/token",
                self.metadata_url
            ))
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .map_err(|e| format!("metadata request failed: {e}"))?;
        if !resp.status().is_success() {
            return Err(format!("metadata server returned {}", resp.status()));
        }
        let token: IdentityToken =
            resp.json().await.map_err(|e| format!("metadata token unreadable: {e}"))?;
        Ok(token.access_token)
    }
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
