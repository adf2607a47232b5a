// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Platform webhook intake: uninstalls, record deletions, and record ingestion.
//!
//! Payloads are parsed permissively (camelCase or snake_case) and rejected
//! only when the identifiers needed to act are missing.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::cascade::{CascadeError, CascadeReport};
use crate::events::SyncEvent;
use crate::reconcile::record::{canonicalize, RecordError};
use crate::state::AppState;
use crate::store::{
    BatchWriter, CachedRecord, GroupUpdate, RecordFilter, StoreError, SubAccountUpdate, WriteOp,
};

#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("missing {0}")]
    Missing(&'static str),
    #[error(transparent)]
    Record(#[from] RecordError),
    #[error(transparent)]
    Cascade(#[from] CascadeError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl WebhookError {
    /// Payload problems the sender cannot fix by retrying.
    pub fn is_bad_request(&self) -> bool {
        matches!(self, Self::Missing(_) | Self::Record(_))
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_owned()).filter(|v| !v.is_empty())
}

/// App uninstall notification.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UninstallPayload {
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default, alias = "app_id")]
    pub app_id: Option<String>,
    #[serde(default, alias = "company_id")]
    pub company_id: Option<String>,
    #[serde(default, alias = "location_id")]
    pub location_id: Option<String>,
}

/// What an uninstall did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum UninstallOutcome {
    /// The sub-account and its dependents were deleted.
    SubAccountDeleted { location_id: String, report: CascadeReport },
    /// No owning account on record; the sub-account was only marked uninstalled.
    MarkedUninstalled { location_id: String },
    /// The account and all of its sub-accounts were deleted.
    AccountDeleted { company_id: String, report: CascadeReport },
}

pub async fn handle_uninstall(
    state: &AppState,
    payload: UninstallPayload,
) -> Result<UninstallOutcome, WebhookError> {
    let company_id = non_empty(payload.company_id);
    let location_id = non_empty(payload.location_id);
    if let Some(ref app_id) = payload.app_id {
        if !state.config.app_id.is_empty() && *app_id != state.config.app_id {
            tracing::debug!(app_id, "uninstall names a different app id");
        }
    }
    tracing::info!(
        kind = payload.kind.as_deref().unwrap_or(""),
        company_id = company_id.as_deref().unwrap_or(""),
        location_id = location_id.as_deref().unwrap_or(""),
        "uninstall received"
    );

    match (location_id, company_id) {
        (Some(location_id), company_id) => {
            let existing = state.store.get_sub_account(&location_id).await?;
            if existing.is_some() {
                state
                    .store
                    .merge_sub_account(
                        &location_id,
                        SubAccountUpdate { installed: Some(false), ..Default::default() },
                    )
                    .await?;
            }
            let owner = existing.and_then(|s| s.account_id).or(company_id);
            let owner = match owner {
                Some(id) if state.store.get_account(&id).await?.is_some() => Some(id),
                _ => None,
            };
            match owner {
                Some(owner) => {
                    let report = state
                        .cascade
                        .delete_sub_account(&location_id, Some(&owner))
                        .await?;
                    Ok(UninstallOutcome::SubAccountDeleted { location_id, report })
                }
                None => {
                    state
                        .reporter
                        .emit(SyncEvent::OrphanUninstall { sub_account: location_id.clone() });
                    Ok(UninstallOutcome::MarkedUninstalled { location_id })
                }
            }
        }
        (None, Some(company_id)) => {
            let report = state
                .cascade
                .delete_account(&company_id)
                .await?;
            Ok(UninstallOutcome::AccountDeleted { company_id, report })
        }
        (None, None) => Err(WebhookError::Missing("companyId or locationId")),
    }
}

/// Platform record deletion notification.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordDeletePayload {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default, alias = "contact_id")]
    pub contact_id: Option<String>,
    #[serde(default, alias = "location_id")]
    pub location_id: Option<String>,
}

/// What a record deletion did locally.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordDeleteOutcome {
    /// Ungrouped records deleted because no reference remained.
    pub deleted: usize,
    /// Ungrouped records that dropped the reference but kept others.
    pub updated: usize,
    /// Grouped records flagged for reconciliation.
    pub flagged: usize,
    /// Groups that started a new reconcile cycle.
    pub groups: Vec<String>,
    /// Tasks newly created on the queue.
    pub enqueued: usize,
}

pub async fn handle_record_delete(
    state: &AppState,
    payload: RecordDeletePayload,
) -> Result<RecordDeleteOutcome, WebhookError> {
    let external_id =
        non_empty(payload.id).or(non_empty(payload.contact_id)).ok_or(WebhookError::Missing("id"))?;
    let location_id = non_empty(payload.location_id).ok_or(WebhookError::Missing("locationId"))?;

    let records =
        state.store.list_cached_records(&location_id, RecordFilter::ExternalId(&external_id)).await?;
    let mut outcome = RecordDeleteOutcome::default();
    let mut touched_groups = BTreeSet::new();
    let mut writer = BatchWriter::new(state.store.as_ref(), state.config.batch_cap);
    for mut record in records {
        match record.group_key.clone() {
            None => {
                record.external_ids.remove(&external_id);
                if record.external_ids.is_empty() {
                    writer.push(WriteOp::DeleteCachedRecord(record.id)).await?;
                    outcome.deleted += 1;
                } else {
                    writer.push(WriteOp::PutCachedRecord(record)).await?;
                    outcome.updated += 1;
                }
            }
            Some(group) => {
                touched_groups.insert(group);
                record.reconcile_pending = true;
                writer.push(WriteOp::PutCachedRecord(record)).await?;
                outcome.flagged += 1;
            }
        }
    }
    writer.finish().await?;

    for group in touched_groups {
        // A pending cycle is re-enqueued at its current attempt. The task id
        // dedupes a live task and recovers one whose enqueue was lost.
        let pending = state.store.get_group(&location_id, &group).await?.filter(|g| g.pending);
        let attempt = match pending {
            Some(marker) => {
                tracing::debug!(
                    location_id,
                    group_key = %group,
                    attempt = marker.attempt,
                    "reconcile cycle already pending"
                );
                marker.attempt
            }
            None => {
                state
                    .store
                    .merge_group(
                        &location_id,
                        &group,
                        GroupUpdate { pending: Some(true), ..Default::default() },
                    )
                    .await?;
                outcome.groups.push(group.clone());
                0
            }
        };
        let enqueue =
            state.queue.enqueue(&location_id, &group, attempt, state.config.reconcile_delay()).await;
        if enqueue.queued && !enqueue.deduped {
            outcome.enqueued += 1;
        }
    }
    tracing::info!(
        location_id,
        external_id,
        deleted = outcome.deleted,
        flagged = outcome.flagged,
        groups = outcome.groups.len(),
        "record deletion applied"
    );
    Ok(outcome)
}

/// Store a legacy-shaped record in canonical form.
pub async fn ingest_record(
    state: &AppState,
    location_id: &str,
    value: &serde_json::Value,
) -> Result<CachedRecord, WebhookError> {
    let location_id = location_id.trim();
    if location_id.is_empty() {
        return Err(WebhookError::Missing("locationId"));
    }
    let record = canonicalize(location_id, value)?;
    state.store.put_cached_record(record.clone()).await?;
    tracing::debug!(
        location_id,
        record_id = %record.id,
        references = record.external_ids.len(),
        "record ingested"
    );
    Ok(record)
}

#[cfg(test)]
#[path = "webhook_tests.rs"]
mod tests;
