// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Local data store: records, merge-write updates, and batched deletes.
//!
//! Every single-document write is a merge: fields left `None` on an update
//! keep their stored value, so concurrent writers from different flows never
//! erase each other's tokens. Multi-document work goes through [`WriteBatch`],
//! which the store refuses above [`HARD_BATCH_LIMIT`] operations.

pub mod batch;
pub mod memory;
pub mod persist;

use std::collections::BTreeSet;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use batch::BatchWriter;
pub use memory::MemoryStore;

/// Per-batch write limit enforced by the store.
pub const HARD_BATCH_LIMIT: usize = 500;

/// Default cap used by callers, leaving headroom below [`HARD_BATCH_LIMIT`].
pub const DEFAULT_BATCH_CAP: usize = 450;

/// Errors raised by store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("batch of {size} writes exceeds the limit of {limit}")]
    BatchTooLarge { size: usize, limit: usize },
    /// Transient backend failure; idempotent writes may be retried.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("snapshot persistence failed: {0}")]
    Persist(#[from] std::io::Error),
    #[error("snapshot encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Which credential a cached token belongs to.
///
/// Serialized with the platform's `userType` spelling.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenScope {
    #[default]
    Location,
    Company,
}

/// Cached access token.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenCache {
    pub access_token: String,
    /// Expiry as epoch seconds.
    pub expires_at: u64,
    /// Space-delimited OAuth scopes.
    #[serde(default)]
    pub scopes: String,
    #[serde(default)]
    pub scope: TokenScope,
}

impl TokenCache {
    /// True when the token is usable for at least `skew_secs` more seconds.
    pub fn is_fresh(&self, now: u64, skew_secs: u64) -> bool {
        !self.access_token.is_empty() && self.expires_at > now.saturating_add(skew_secs)
    }
}

/// Parent tenant (agency).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountRecord {
    pub id: String,
    pub provider: String,
    #[serde(default)]
    pub scopes: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Epoch seconds of the first install.
    pub installed_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<TokenCache>,
}

/// Child tenant (location).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubAccountRecord {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub installed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<TokenCache>,
}

/// The parent account's denormalized copy of a sub-account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubAccountMirror {
    pub account_id: String,
    pub sub_account_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Link between a local user and a sub-account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MembershipRecord {
    pub sub_account_id: String,
    pub user_id: String,
    #[serde(default)]
    pub admin: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform_user_id: Option<String>,
}

/// Local authenticated user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_account_id: Option<String>,
}

/// Locally cached child record in canonical form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedRecord {
    pub id: String,
    pub sub_account_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_key: Option<String>,
    /// Every platform identifier this record references.
    #[serde(default)]
    pub external_ids: BTreeSet<String>,
    #[serde(default)]
    pub reconcile_pending: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reconcile_count: Option<usize>,
}

/// Durable marker for a group whose deletion state is not yet known.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileGroup {
    pub sub_account_id: String,
    pub group_key: String,
    pub pending: bool,
    pub attempt: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_reconciled_at: Option<u64>,
}

/// Merge update for an [`AccountRecord`]. `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct AccountUpdate {
    pub provider: Option<String>,
    pub scopes: Option<String>,
    pub refresh_token: Option<String>,
    pub token: Option<TokenCache>,
}

/// Merge update for a [`SubAccountRecord`]. `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct SubAccountUpdate {
    pub account_id: Option<String>,
    pub refresh_token: Option<String>,
    pub installed: Option<bool>,
    pub name: Option<String>,
    pub token: Option<TokenCache>,
}

/// Merge update for a [`ReconcileGroup`].
///
/// `attempt` is applied as a maximum so the stored counter never decreases.
#[derive(Debug, Clone, Default)]
pub struct GroupUpdate {
    pub pending: Option<bool>,
    pub attempt: Option<u32>,
    pub last_count: Option<usize>,
    pub last_reconciled_at: Option<u64>,
}

/// Selector for cached-record queries within one sub-account.
#[derive(Debug, Clone, Copy)]
pub enum RecordFilter<'a> {
    All,
    Group(&'a str),
    ExternalId(&'a str),
}

/// One page of a keyset-paginated listing.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Pass back as `after` to continue; `None` when exhausted.
    pub next_cursor: Option<String>,
}

/// A single write inside a [`WriteBatch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    DeleteAccount(String),
    DeleteSubAccount(String),
    DeleteMirror { account_id: String, sub_account_id: String },
    DeleteMembership { sub_account_id: String, user_id: String },
    DeleteUser(String),
    DeleteCachedRecord(String),
    DeleteGroup { sub_account_id: String, group_key: String },
    PutCachedRecord(CachedRecord),
}

impl WriteOp {
    /// Sub-account the write belongs to, where the op names one.
    pub fn sub_account_id(&self) -> Option<&str> {
        match self {
            Self::DeleteSubAccount(id) => Some(id),
            Self::DeleteMirror { sub_account_id, .. }
            | Self::DeleteMembership { sub_account_id, .. }
            | Self::DeleteGroup { sub_account_id, .. } => Some(sub_account_id),
            Self::PutCachedRecord(r) => Some(&r.sub_account_id),
            Self::DeleteAccount(_) | Self::DeleteUser(_) | Self::DeleteCachedRecord(_) => None,
        }
    }
}

/// Ordered set of writes committed atomically.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, op: WriteOp) {
        self.ops.push(op);
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }
}

/// Backing store for accounts, tokens, memberships, and reconciliation state.
#[async_trait]
pub trait Store: Send + Sync {
    async fn get_account(&self, id: &str) -> StoreResult<Option<AccountRecord>>;

    /// Create or merge an account. `installed_at` is set only on creation.
    async fn merge_account(&self, id: &str, update: AccountUpdate) -> StoreResult<AccountRecord>;

    /// Write a token to an existing account. Returns `false` if it does not exist.
    async fn update_account_token(
        &self,
        id: &str,
        token: TokenCache,
        refresh_token: Option<String>,
    ) -> StoreResult<bool>;

    async fn get_sub_account(&self, id: &str) -> StoreResult<Option<SubAccountRecord>>;

    /// Create or merge a sub-account.
    async fn merge_sub_account(
        &self,
        id: &str,
        update: SubAccountUpdate,
    ) -> StoreResult<SubAccountRecord>;

    /// Write a token to an existing sub-account. Returns `false` if it does not exist.
    async fn update_sub_account_token(
        &self,
        id: &str,
        token: TokenCache,
        refresh_token: Option<String>,
    ) -> StoreResult<bool>;

    /// Sub-accounts owned by `account_id`, ordered by id, strictly after `after`.
    async fn list_sub_accounts(
        &self,
        account_id: &str,
        after: Option<&str>,
        limit: usize,
    ) -> StoreResult<Page<SubAccountRecord>>;

    async fn put_mirror(&self, mirror: SubAccountMirror) -> StoreResult<()>;

    async fn get_mirror(
        &self,
        account_id: &str,
        sub_account_id: &str,
    ) -> StoreResult<Option<SubAccountMirror>>;

    async fn put_membership(&self, membership: MembershipRecord) -> StoreResult<()>;

    /// Memberships of a sub-account, ordered by user id, strictly after `after`.
    async fn list_memberships(
        &self,
        sub_account_id: &str,
        after: Option<&str>,
        limit: usize,
    ) -> StoreResult<Page<MembershipRecord>>;

    async fn put_user(&self, user: UserRecord) -> StoreResult<()>;

    /// Users whose `sub_account_id` references the sub-account.
    async fn list_users_by_sub_account(
        &self,
        sub_account_id: &str,
        after: Option<&str>,
        limit: usize,
    ) -> StoreResult<Page<UserRecord>>;

    async fn put_cached_record(&self, record: CachedRecord) -> StoreResult<()>;

    async fn get_cached_record(&self, id: &str) -> StoreResult<Option<CachedRecord>>;

    async fn list_cached_records(
        &self,
        sub_account_id: &str,
        filter: RecordFilter<'_>,
    ) -> StoreResult<Vec<CachedRecord>>;

    async fn get_group(
        &self,
        sub_account_id: &str,
        group_key: &str,
    ) -> StoreResult<Option<ReconcileGroup>>;

    /// Create or merge a group marker. New markers start at attempt 0, pending.
    async fn merge_group(
        &self,
        sub_account_id: &str,
        group_key: &str,
        update: GroupUpdate,
    ) -> StoreResult<ReconcileGroup>;

    async fn list_groups(&self, sub_account_id: &str) -> StoreResult<Vec<ReconcileGroup>>;

    /// Apply every op in the batch, or none of them.
    async fn commit(&self, batch: WriteBatch) -> StoreResult<()>;
}

/// Current time as epoch seconds.
pub fn epoch_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}
