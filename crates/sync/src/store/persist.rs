// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Store snapshot persistence: load/save to a JSON file with atomic writes.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::store::{
    AccountRecord, CachedRecord, MembershipRecord, ReconcileGroup, StoreResult, SubAccountMirror,
    SubAccountRecord, UserRecord,
};

/// Every collection of the store. Nested maps are keyed parent-first.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSnapshot {
    #[serde(default)]
    pub accounts: BTreeMap<String, AccountRecord>,
    #[serde(default)]
    pub sub_accounts: BTreeMap<String, SubAccountRecord>,
    /// account id -> sub-account id -> mirror.
    #[serde(default)]
    pub mirrors: BTreeMap<String, BTreeMap<String, SubAccountMirror>>,
    /// sub-account id -> user id -> membership.
    #[serde(default)]
    pub memberships: BTreeMap<String, BTreeMap<String, MembershipRecord>>,
    #[serde(default)]
    pub users: BTreeMap<String, UserRecord>,
    #[serde(default)]
    pub records: BTreeMap<String, CachedRecord>,
    /// sub-account id -> group key -> marker.
    #[serde(default)]
    pub groups: BTreeMap<String, BTreeMap<String, ReconcileGroup>>,
}

/// Load a snapshot from a JSON file.
pub fn load(path: &Path) -> StoreResult<StoreSnapshot> {
    let contents = std::fs::read_to_string(path)?;
    let snapshot: StoreSnapshot = serde_json::from_str(&contents)?;
    Ok(snapshot)
}

/// Save a snapshot atomically (write tmp + rename).
///
/// The temp name carries PID + counter so concurrent saves never share a
/// `.tmp` file.
pub fn save(path: &Path, snapshot: &StoreSnapshot) -> StoreResult<()> {
    use std::sync::atomic::{AtomicU32, Ordering};
    static COUNTER: AtomicU32 = AtomicU32::new(0);

    let json = serde_json::to_string_pretty(snapshot)?;
    let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
    let tmp_name = format!(
        "{}.{}.{}.tmp",
        path.file_name().unwrap_or_default().to_string_lossy(),
        std::process::id(),
        seq,
    );
    let tmp_path = path.with_file_name(tmp_name);
    std::fs::write(&tmp_path, json)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}
