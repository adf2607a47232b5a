// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory [`Store`] with optional JSON snapshot persistence.
//!
//! Each operation takes the collection lock for the duration of one document
//! write or one batch commit, which gives per-document and per-batch
//! atomicity. When a snapshot path is configured the full state is written
//! after every mutation.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::store::persist::{self, StoreSnapshot};
use crate::store::{
    epoch_secs, AccountRecord, AccountUpdate, CachedRecord, GroupUpdate, MembershipRecord, Page,
    ReconcileGroup, RecordFilter, Store, StoreError, StoreResult, SubAccountMirror,
    SubAccountRecord, SubAccountUpdate, TokenCache, UserRecord, WriteBatch, WriteOp,
    HARD_BATCH_LIMIT,
};

/// Injected commit failures.
#[derive(Debug, Default)]
struct Faults {
    fail_next: u32,
    sub_accounts: BTreeSet<String>,
}

/// In-memory store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: RwLock<StoreSnapshot>,
    commits: RwLock<Vec<usize>>,
    faults: RwLock<Faults>,
    snapshot_path: Option<PathBuf>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a store backed by a snapshot file, loading it if present.
    pub fn with_snapshot(path: PathBuf) -> StoreResult<Self> {
        let data = if path.exists() {
            let snapshot = persist::load(&path)?;
            tracing::info!(
                path = %path.display(),
                accounts = snapshot.accounts.len(),
                sub_accounts = snapshot.sub_accounts.len(),
                "loaded store snapshot"
            );
            snapshot
        } else {
            StoreSnapshot::default()
        };
        Ok(Self { data: RwLock::new(data), snapshot_path: Some(path), ..Self::default() })
    }

    /// Copy of the full store state.
    pub async fn snapshot(&self) -> StoreSnapshot {
        self.data.read().await.clone()
    }

    /// Number of writes in each committed batch, in commit order.
    pub async fn commit_sizes(&self) -> Vec<usize> {
        self.commits.read().await.clone()
    }

    /// Fail the next `n` commits with a transient error.
    pub async fn fail_next_commits(&self, n: u32) {
        self.faults.write().await.fail_next = n;
    }

    /// Fail every commit that writes to the given sub-account.
    pub async fn fail_commits_for(&self, sub_account_id: &str) {
        self.faults.write().await.sub_accounts.insert(sub_account_id.to_owned());
    }

    /// Write the snapshot if a path is configured. A failed write fails the mutation.
    fn persist(&self, data: &StoreSnapshot) -> StoreResult<()> {
        let Some(ref path) = self.snapshot_path else {
            return Ok(());
        };
        persist::save(path, data).inspect_err(|e| {
            tracing::error!(path = %path.display(), err = %e, "failed to persist store snapshot");
        })
    }

    async fn check_faults(&self, batch: &WriteBatch) -> StoreResult<()> {
        let mut faults = self.faults.write().await;
        if faults.fail_next > 0 {
            faults.fail_next -= 1;
            return Err(StoreError::Unavailable("injected commit failure".to_owned()));
        }
        if let Some(id) = batch
            .ops()
            .iter()
            .filter_map(WriteOp::sub_account_id)
            .find(|id| faults.sub_accounts.contains(*id))
        {
            return Err(StoreError::Unavailable(format!("injected failure for {id}")));
        }
        Ok(())
    }
}

/// Take up to `limit` entries with keys strictly after `after`.
fn keyset_page<'a, T: Clone + 'a>(
    entries: impl Iterator<Item = (&'a String, &'a T)>,
    after: Option<&str>,
    limit: usize,
) -> Page<T> {
    let limit = limit.max(1);
    let mut items = Vec::new();
    let mut last = None;
    let mut more = false;
    for (key, value) in entries.filter(|(k, _)| after.is_none_or(|a| k.as_str() > a)) {
        if items.len() == limit {
            more = true;
            break;
        }
        last = Some(key.clone());
        items.push(value.clone());
    }
    Page { items, next_cursor: if more { last } else { None } }
}

fn remove_nested<V>(map: &mut BTreeMap<String, BTreeMap<String, V>>, outer: &str, inner: &str) {
    if let Some(children) = map.get_mut(outer) {
        children.remove(inner);
        if children.is_empty() {
            map.remove(outer);
        }
    }
}

fn apply(data: &mut StoreSnapshot, op: WriteOp) {
    match op {
        WriteOp::DeleteAccount(id) => {
            data.accounts.remove(&id);
        }
        WriteOp::DeleteSubAccount(id) => {
            data.sub_accounts.remove(&id);
        }
        WriteOp::DeleteMirror { account_id, sub_account_id } => {
            remove_nested(&mut data.mirrors, &account_id, &sub_account_id);
        }
        WriteOp::DeleteMembership { sub_account_id, user_id } => {
            remove_nested(&mut data.memberships, &sub_account_id, &user_id);
        }
        WriteOp::DeleteUser(id) => {
            data.users.remove(&id);
        }
        WriteOp::DeleteCachedRecord(id) => {
            data.records.remove(&id);
        }
        WriteOp::DeleteGroup { sub_account_id, group_key } => {
            remove_nested(&mut data.groups, &sub_account_id, &group_key);
        }
        WriteOp::PutCachedRecord(record) => {
            data.records.insert(record.id.clone(), record);
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_account(&self, id: &str) -> StoreResult<Option<AccountRecord>> {
        Ok(self.data.read().await.accounts.get(id).cloned())
    }

    async fn merge_account(&self, id: &str, update: AccountUpdate) -> StoreResult<AccountRecord> {
        let mut data = self.data.write().await;
        let record = data.accounts.entry(id.to_owned()).or_insert_with(|| AccountRecord {
            id: id.to_owned(),
            provider: String::new(),
            scopes: String::new(),
            refresh_token: None,
            installed_at: epoch_secs(),
            token: None,
        });
        if let Some(provider) = update.provider {
            record.provider = provider;
        }
        if let Some(scopes) = update.scopes {
            record.scopes = scopes;
        }
        if update.refresh_token.is_some() {
            record.refresh_token = update.refresh_token;
        }
        if update.token.is_some() {
            record.token = update.token;
        }
        let merged = record.clone();
        self.persist(&data)?;
        Ok(merged)
    }

    async fn update_account_token(
        &self,
        id: &str,
        token: TokenCache,
        refresh_token: Option<String>,
    ) -> StoreResult<bool> {
        let mut data = self.data.write().await;
        let Some(record) = data.accounts.get_mut(id) else {
            return Ok(false);
        };
        record.token = Some(token);
        if refresh_token.is_some() {
            record.refresh_token = refresh_token;
        }
        self.persist(&data)?;
        Ok(true)
    }

    async fn get_sub_account(&self, id: &str) -> StoreResult<Option<SubAccountRecord>> {
        Ok(self.data.read().await.sub_accounts.get(id).cloned())
    }

    async fn merge_sub_account(
        &self,
        id: &str,
        update: SubAccountUpdate,
    ) -> StoreResult<SubAccountRecord> {
        let mut data = self.data.write().await;
        let record = data
            .sub_accounts
            .entry(id.to_owned())
            .or_insert_with(|| SubAccountRecord { id: id.to_owned(), ..Default::default() });
        if update.account_id.is_some() {
            record.account_id = update.account_id;
        }
        if update.refresh_token.is_some() {
            record.refresh_token = update.refresh_token;
        }
        if let Some(installed) = update.installed {
            record.installed = installed;
        }
        if update.name.is_some() {
            record.name = update.name;
        }
        if update.token.is_some() {
            record.token = update.token;
        }
        let merged = record.clone();
        self.persist(&data)?;
        Ok(merged)
    }

    async fn update_sub_account_token(
        &self,
        id: &str,
        token: TokenCache,
        refresh_token: Option<String>,
    ) -> StoreResult<bool> {
        let mut data = self.data.write().await;
        let Some(record) = data.sub_accounts.get_mut(id) else {
            return Ok(false);
        };
        record.token = Some(token);
        if refresh_token.is_some() {
            record.refresh_token = refresh_token;
        }
        self.persist(&data)?;
        Ok(true)
    }

    async fn list_sub_accounts(
        &self,
        account_id: &str,
        after: Option<&str>,
        limit: usize,
    ) -> StoreResult<Page<SubAccountRecord>> {
        let data = self.data.read().await;
        let owned =
            data.sub_accounts.iter().filter(|(_, r)| r.account_id.as_deref() == Some(account_id));
        Ok(keyset_page(owned, after, limit))
    }

    async fn put_mirror(&self, mirror: SubAccountMirror) -> StoreResult<()> {
        let mut data = self.data.write().await;
        data.mirrors
            .entry(mirror.account_id.clone())
            .or_default()
            .insert(mirror.sub_account_id.clone(), mirror);
        self.persist(&data)?;
        Ok(())
    }

    async fn get_mirror(
        &self,
        account_id: &str,
        sub_account_id: &str,
    ) -> StoreResult<Option<SubAccountMirror>> {
        let data = self.data.read().await;
        Ok(data.mirrors.get(account_id).and_then(|m| m.get(sub_account_id)).cloned())
    }

    async fn put_membership(&self, membership: MembershipRecord) -> StoreResult<()> {
        let mut data = self.data.write().await;
        data.memberships
            .entry(membership.sub_account_id.clone())
            .or_default()
            .insert(membership.user_id.clone(), membership);
        self.persist(&data)?;
        Ok(())
    }

    async fn list_memberships(
        &self,
        sub_account_id: &str,
        after: Option<&str>,
        limit: usize,
    ) -> StoreResult<Page<MembershipRecord>> {
        let data = self.data.read().await;
        let page = match data.memberships.get(sub_account_id) {
            Some(members) => keyset_page(members.iter(), after, limit),
            None => Page { items: Vec::new(), next_cursor: None },
        };
        Ok(page)
    }

    async fn put_user(&self, user: UserRecord) -> StoreResult<()> {
        let mut data = self.data.write().await;
        data.users.insert(user.id.clone(), user);
        self.persist(&data)?;
        Ok(())
    }

    async fn list_users_by_sub_account(
        &self,
        sub_account_id: &str,
        after: Option<&str>,
        limit: usize,
    ) -> StoreResult<Page<UserRecord>> {
        let data = self.data.read().await;
        let referencing =
            data.users.iter().filter(|(_, u)| u.sub_account_id.as_deref() == Some(sub_account_id));
        Ok(keyset_page(referencing, after, limit))
    }

    async fn put_cached_record(&self, record: CachedRecord) -> StoreResult<()> {
        let mut data = self.data.write().await;
        data.records.insert(record.id.clone(), record);
        self.persist(&data)?;
        Ok(())
    }

    async fn get_cached_record(&self, id: &str) -> StoreResult<Option<CachedRecord>> {
        Ok(self.data.read().await.records.get(id).cloned())
    }

    async fn list_cached_records(
        &self,
        sub_account_id: &str,
        filter: RecordFilter<'_>,
    ) -> StoreResult<Vec<CachedRecord>> {
        let data = self.data.read().await;
        Ok(data
            .records
            .values()
            .filter(|r| r.sub_account_id == sub_account_id)
            .filter(|r| match filter {
                RecordFilter::All => true,
                RecordFilter::Group(key) => r.group_key.as_deref() == Some(key),
                RecordFilter::ExternalId(id) => r.external_ids.contains(id),
            })
            .cloned()
            .collect())
    }

    async fn get_group(
        &self,
        sub_account_id: &str,
        group_key: &str,
    ) -> StoreResult<Option<ReconcileGroup>> {
        let data = self.data.read().await;
        Ok(data.groups.get(sub_account_id).and_then(|g| g.get(group_key)).cloned())
    }

    async fn merge_group(
        &self,
        sub_account_id: &str,
        group_key: &str,
        update: GroupUpdate,
    ) -> StoreResult<ReconcileGroup> {
        let mut data = self.data.write().await;
        let group = data
            .groups
            .entry(sub_account_id.to_owned())
            .or_default()
            .entry(group_key.to_owned())
            .or_insert_with(|| ReconcileGroup {
                sub_account_id: sub_account_id.to_owned(),
                group_key: group_key.to_owned(),
                pending: true,
                attempt: 0,
                last_count: None,
                last_reconciled_at: None,
            });
        if let Some(pending) = update.pending {
            group.pending = pending;
        }
        if let Some(attempt) = update.attempt {
            group.attempt = group.attempt.max(attempt);
        }
        if update.last_count.is_some() {
            group.last_count = update.last_count;
        }
        if update.last_reconciled_at.is_some() {
            group.last_reconciled_at = update.last_reconciled_at;
        }
        let merged = group.clone();
        self.persist(&data)?;
        Ok(merged)
    }

    async fn list_groups(&self, sub_account_id: &str) -> StoreResult<Vec<ReconcileGroup>> {
        let data = self.data.read().await;
        Ok(data.groups.get(sub_account_id).map(|g| g.values().cloned().collect()).unwrap_or_default())
    }

    async fn commit(&self, batch: WriteBatch) -> StoreResult<()> {
        if batch.len() > HARD_BATCH_LIMIT {
            return Err(StoreError::BatchTooLarge { size: batch.len(), limit: HARD_BATCH_LIMIT });
        }
        self.check_faults(&batch).await?;
        let size = batch.len();
        let mut data = self.data.write().await;
        for op in batch.into_ops() {
            apply(&mut data, op);
        }
        self.persist(&data)?;
        drop(data);
        self.commits.write().await.push(size);
        Ok(())
    }
}

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;
