// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cascade deletes for uninstalled sub-accounts and accounts.
//!
//! Both operations are idempotent: every step deletes whatever is still
//! there, so a retried or duplicated uninstall converges on the same state.

use std::sync::Arc;

use serde::Serialize;

use crate::config::SyncConfig;
use crate::events::{Reporter, SyncEvent};
use crate::store::batch::commit_with_retry;
use crate::store::{BatchWriter, RecordFilter, Store, StoreError, WriteBatch, WriteOp};

#[derive(Debug, thiserror::Error)]
pub enum CascadeError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Counts of what a cascade removed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CascadeReport {
    pub sub_accounts: usize,
    pub memberships: usize,
    pub users: usize,
    pub orphans: usize,
    pub records: usize,
    pub groups: usize,
    pub batches: usize,
    /// Sub-accounts whose cascade failed during an account-wide delete.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failed: Vec<String>,
}

impl CascadeReport {
    fn absorb(&mut self, other: CascadeReport) {
        self.sub_accounts += other.sub_accounts;
        self.memberships += other.memberships;
        self.users += other.users;
        self.orphans += other.orphans;
        self.records += other.records;
        self.groups += other.groups;
        self.batches += other.batches;
        self.failed.extend(other.failed);
    }
}

/// Deletes a tenant and everything that hangs off it.
#[derive(Clone)]
pub struct CascadeEngine {
    store: Arc<dyn Store>,
    reporter: Reporter,
    batch_cap: usize,
    page_size: usize,
}

impl CascadeEngine {
    pub fn new(config: &SyncConfig, store: Arc<dyn Store>, reporter: Reporter) -> Self {
        Self {
            store,
            reporter,
            batch_cap: config.batch_cap,
            page_size: config.cascade_page_size.max(1),
        }
    }

    /// Delete a sub-account with its memberships, users, cached records, and mirror.
    ///
    /// `parent_id` names the account whose mirror should go; when absent the
    /// owner is read from the sub-account record.
    pub async fn delete_sub_account(
        &self,
        sub_account_id: &str,
        parent_id: Option<&str>,
    ) -> Result<CascadeReport, CascadeError> {
        let parent = match parent_id {
            Some(p) => Some(p.to_owned()),
            None => self.store.get_sub_account(sub_account_id).await?.and_then(|r| r.account_id),
        };
        let mut report = CascadeReport::default();
        let mut writer = BatchWriter::new(self.store.as_ref(), self.batch_cap);

        // Memberships and the users they link.
        let mut after: Option<String> = None;
        loop {
            let page =
                self.store.list_memberships(sub_account_id, after.as_deref(), self.page_size).await?;
            for m in page.items {
                writer
                    .push(WriteOp::DeleteMembership {
                        sub_account_id: sub_account_id.to_owned(),
                        user_id: m.user_id.clone(),
                    })
                    .await?;
                writer.push(WriteOp::DeleteUser(m.user_id)).await?;
                report.memberships += 1;
                report.users += 1;
            }
            match page.next_cursor {
                Some(cursor) => after = Some(cursor),
                None => break,
            }
        }
        // Member users must be gone before the orphan scan sees them.
        writer.flush().await?;

        let mut after: Option<String> = None;
        loop {
            let page = self
                .store
                .list_users_by_sub_account(sub_account_id, after.as_deref(), self.page_size)
                .await?;
            for user in page.items {
                writer.push(WriteOp::DeleteUser(user.id)).await?;
                report.orphans += 1;
            }
            match page.next_cursor {
                Some(cursor) => after = Some(cursor),
                None => break,
            }
        }

        for record in self.store.list_cached_records(sub_account_id, RecordFilter::All).await? {
            writer.push(WriteOp::DeleteCachedRecord(record.id)).await?;
            report.records += 1;
        }
        for group in self.store.list_groups(sub_account_id).await? {
            writer
                .push(WriteOp::DeleteGroup {
                    sub_account_id: sub_account_id.to_owned(),
                    group_key: group.group_key,
                })
                .await?;
            report.groups += 1;
        }

        if let Some(ref account_id) = parent {
            writer
                .push(WriteOp::DeleteMirror {
                    account_id: account_id.clone(),
                    sub_account_id: sub_account_id.to_owned(),
                })
                .await?;
        }
        writer.push(WriteOp::DeleteSubAccount(sub_account_id.to_owned())).await?;
        report.sub_accounts = 1;

        let stats = writer.finish().await?;
        report.batches = stats.batches;
        tracing::info!(
            sub_account_id,
            memberships = report.memberships,
            orphans = report.orphans,
            records = report.records,
            batches = report.batches,
            "sub-account deleted"
        );
        Ok(report)
    }

    /// Delete every sub-account of an account, then the account itself.
    ///
    /// A failed sub-account is reported and skipped; the walk continues.
    pub async fn delete_account(&self, account_id: &str) -> Result<CascadeReport, CascadeError> {
        let mut report = CascadeReport::default();
        let mut after: Option<String> = None;
        loop {
            let page =
                self.store.list_sub_accounts(account_id, after.as_deref(), self.page_size).await?;
            for sub in page.items {
                match self.delete_sub_account(&sub.id, Some(account_id)).await {
                    Ok(sub_report) => report.absorb(sub_report),
                    Err(e) => {
                        self.reporter.emit(SyncEvent::CascadeItemFailed {
                            account: account_id.to_owned(),
                            sub_account: sub.id.clone(),
                            error: e.to_string(),
                        });
                        report.failed.push(sub.id);
                    }
                }
            }
            match page.next_cursor {
                Some(cursor) => after = Some(cursor),
                None => break,
            }
        }

        let mut batch = WriteBatch::new();
        batch.push(WriteOp::DeleteAccount(account_id.to_owned()));
        commit_with_retry(self.store.as_ref(), batch).await?;
        report.batches += 1;
        tracing::info!(
            account_id,
            sub_accounts = report.sub_accounts,
            failed = report.failed.len(),
            "account deleted"
        );
        Ok(report)
    }
}

#[cfg(test)]
#[path = "cascade_tests.rs"]
mod tests;
