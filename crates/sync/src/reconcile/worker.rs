// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Reconcile worker: re-count a group against the platform and act on it.
//!
//! Safe to run more than once for the same attempt. Every write is either a
//! delete, a full-record put, or a monotonic marker merge.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::config::SyncConfig;
use crate::events::{Reporter, SyncEvent};
use crate::platform::{Lookup, PlatformClient};
use crate::reconcile::{EnqueueOutcome, ReconcileError, ReconcileQueue, ReconcileTask};
use crate::store::{
    epoch_secs, BatchWriter, CachedRecord, GroupUpdate, RecordFilter, Store, WriteOp,
};
use crate::token::TokenResolver;

/// What one attempt did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReconcileOutcome {
    /// Nothing left on the platform; records and marker deleted.
    Resolved { deleted: usize },
    /// Some ids still exist; the next attempt was scheduled.
    Rescheduled { attempt: u32, remaining: usize, enqueue: EnqueueOutcome },
    /// Attempt cap reached; records kept and unflagged.
    Exhausted { attempt: u32, remaining: usize },
    /// The group had no cached records.
    Empty,
}

#[derive(Clone)]
pub struct ReconcileWorker {
    store: Arc<dyn Store>,
    resolver: TokenResolver,
    platform: PlatformClient,
    queue: ReconcileQueue,
    reporter: Reporter,
    batch_cap: usize,
    delay: Duration,
}

impl ReconcileWorker {
    pub fn new(
        config: &SyncConfig,
        store: Arc<dyn Store>,
        resolver: TokenResolver,
        platform: PlatformClient,
        queue: ReconcileQueue,
        reporter: Reporter,
    ) -> Self {
        Self {
            store,
            resolver,
            platform,
            queue,
            reporter,
            batch_cap: config.batch_cap,
            delay: config.reconcile_delay(),
        }
    }

    pub async fn run(&self, task: &ReconcileTask) -> Result<ReconcileOutcome, ReconcileError> {
        let sub = task.sub_account_id.as_str();
        let group = task.group_key.as_str();
        let records = self.store.list_cached_records(sub, RecordFilter::Group(group)).await?;

        if records.is_empty() {
            self.delete_group(sub, group, &[]).await?;
            tracing::debug!(sub_account_id = sub, group_key = group, "reconcile group empty");
            return Ok(ReconcileOutcome::Empty);
        }

        let ids: BTreeSet<&str> =
            records.iter().flat_map(|r| r.external_ids.iter().map(String::as_str)).collect();
        let remaining = self.count_remaining(sub, &ids).await?;
        tracing::info!(
            sub_account_id = sub,
            group_key = group,
            attempt = task.attempt,
            referenced = ids.len(),
            remaining,
            "reconcile count"
        );

        if remaining == 0 {
            let deleted = records.len();
            self.delete_group(sub, group, &records).await?;
            self.reporter.emit(SyncEvent::ReconcileResolved {
                sub_account: sub.to_owned(),
                group_key: group.to_owned(),
                deleted,
            });
            return Ok(ReconcileOutcome::Resolved { deleted });
        }

        let max_attempts = self.queue.max_attempts();
        if task.attempt.saturating_add(1) < max_attempts {
            let next = task.attempt + 1;
            self.store
                .merge_group(
                    sub,
                    group,
                    GroupUpdate {
                        pending: Some(true),
                        attempt: Some(next),
                        last_count: Some(remaining),
                        last_reconciled_at: Some(epoch_secs()),
                    },
                )
                .await?;
            self.rewrite_records(records, true, remaining).await?;
            let enqueue = self.queue.enqueue(sub, group, next, self.delay).await;
            return Ok(ReconcileOutcome::Rescheduled { attempt: next, remaining, enqueue });
        }

        self.rewrite_records(records, false, remaining).await?;
        self.delete_group(sub, group, &[]).await?;
        self.reporter.emit(SyncEvent::ReconcileExhausted {
            sub_account: sub.to_owned(),
            group_key: group.to_owned(),
            attempt: task.attempt,
            remaining,
        });
        Ok(ReconcileOutcome::Exhausted { attempt: task.attempt, remaining })
    }

    /// Number of referenced ids that still exist on the platform.
    async fn count_remaining(&self, sub: &str, ids: &BTreeSet<&str>) -> Result<usize, ReconcileError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let token = self.resolver.resolve(sub).await?;
        let mut remaining = 0;
        for id in ids {
            if self.platform.lookup_record(&token, id).await? == Lookup::Found {
                remaining += 1;
            }
        }
        Ok(remaining)
    }

    async fn rewrite_records(
        &self,
        records: Vec<CachedRecord>,
        pending: bool,
        count: usize,
    ) -> Result<(), ReconcileError> {
        let mut writer = BatchWriter::new(self.store.as_ref(), self.batch_cap);
        for mut record in records {
            record.reconcile_pending = pending;
            record.reconcile_count = Some(count);
            writer.push(WriteOp::PutCachedRecord(record)).await?;
        }
        writer.finish().await?;
        Ok(())
    }

    /// Delete the given records and the group marker.
    async fn delete_group(
        &self,
        sub: &str,
        group: &str,
        records: &[CachedRecord],
    ) -> Result<(), ReconcileError> {
        let mut writer = BatchWriter::new(self.store.as_ref(), self.batch_cap);
        for record in records {
            writer.push(WriteOp::DeleteCachedRecord(record.id.clone())).await?;
        }
        writer
            .push(WriteOp::DeleteGroup {
                sub_account_id: sub.to_owned(),
                group_key: group.to_owned(),
            })
            .await?;
        writer.finish().await?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "worker_tests.rs"]
mod tests;
