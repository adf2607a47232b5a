// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::store::{BatchWriter, TokenScope};

fn token(access: &str, expires_at: u64) -> TokenCache {
    TokenCache {
        access_token: access.to_owned(),
        expires_at,
        scopes: "contacts.readonly".to_owned(),
        scope: TokenScope::Location,
    }
}

#[tokio::test]
async fn merge_account_keeps_unset_fields() -> anyhow::Result<()> {
    let store = MemoryStore::new();
    let created = store
        .merge_account(
            "co_1",
            AccountUpdate {
                provider: Some("leadconnector".into()),
                refresh_token: Some("rt-1".into()),
                ..Default::default()
            },
        )
        .await?;
    let merged = store
        .merge_account("co_1", AccountUpdate { scopes: Some("a b".into()), ..Default::default() })
        .await?;

    assert_eq!(merged.provider, "leadconnector");
    assert_eq!(merged.refresh_token.as_deref(), Some("rt-1"));
    assert_eq!(merged.scopes, "a b");
    assert_eq!(merged.installed_at, created.installed_at);
    Ok(())
}

#[tokio::test]
async fn token_update_does_not_create_records() -> anyhow::Result<()> {
    let store = MemoryStore::new();
    assert!(!store.update_sub_account_token("ghost", token("t", 10), None).await?);
    assert!(!store.update_account_token("ghost", token("t", 10), None).await?);
    assert!(store.get_sub_account("ghost").await?.is_none());
    assert!(store.get_account("ghost").await?.is_none());
    Ok(())
}

#[tokio::test]
async fn token_update_keeps_refresh_token_when_none_given() -> anyhow::Result<()> {
    let store = MemoryStore::new();
    store
        .merge_sub_account(
            "loc_1",
            SubAccountUpdate { refresh_token: Some("rt-old".into()), ..Default::default() },
        )
        .await?;
    assert!(store.update_sub_account_token("loc_1", token("new", 99), None).await?);

    let rec = store.get_sub_account("loc_1").await?;
    let rec = rec.ok_or_else(|| anyhow::anyhow!("missing"))?;
    assert_eq!(rec.refresh_token.as_deref(), Some("rt-old"));
    assert_eq!(rec.token.map(|t| t.access_token), Some("new".to_owned()));
    Ok(())
}

#[tokio::test]
async fn list_sub_accounts_paginates_by_cursor() -> anyhow::Result<()> {
    let store = MemoryStore::new();
    for i in 0..5 {
        store
            .merge_sub_account(
                &format!("loc_{i}"),
                SubAccountUpdate { account_id: Some("co_1".into()), ..Default::default() },
            )
            .await?;
    }
    store
        .merge_sub_account(
            "other",
            SubAccountUpdate { account_id: Some("co_2".into()), ..Default::default() },
        )
        .await?;

    let first = store.list_sub_accounts("co_1", None, 2).await?;
    assert_eq!(first.items.len(), 2);
    let cursor = first.next_cursor.clone();
    assert_eq!(cursor.as_deref(), Some("loc_1"));

    let second = store.list_sub_accounts("co_1", cursor.as_deref(), 2).await?;
    let third = store.list_sub_accounts("co_1", second.next_cursor.as_deref(), 2).await?;
    assert_eq!(third.items.len(), 1);
    assert!(third.next_cursor.is_none());
    Ok(())
}

#[tokio::test]
async fn group_attempt_never_decreases() -> anyhow::Result<()> {
    let store = MemoryStore::new();
    store.merge_group("loc_1", "g1", GroupUpdate { attempt: Some(3), ..Default::default() }).await?;
    let group = store
        .merge_group("loc_1", "g1", GroupUpdate { attempt: Some(1), ..Default::default() })
        .await?;
    assert_eq!(group.attempt, 3);
    assert!(group.pending);
    Ok(())
}

#[tokio::test]
async fn commit_rejects_oversized_batch() {
    let store = MemoryStore::new();
    let mut batch = WriteBatch::new();
    for i in 0..=HARD_BATCH_LIMIT {
        batch.push(WriteOp::DeleteUser(format!("u{i}")));
    }
    let result = store.commit(batch).await;
    assert!(matches!(result, Err(StoreError::BatchTooLarge { size: 501, limit: 500 })));
}

#[tokio::test]
async fn batch_writer_flushes_at_cap_and_retries_transient_failures() -> anyhow::Result<()> {
    let store = MemoryStore::new();
    for i in 0..7 {
        store.put_user(UserRecord { id: format!("u{i}"), email: None, sub_account_id: None }).await?;
    }
    store.fail_next_commits(1).await;

    let mut writer = BatchWriter::new(&store, 3);
    for i in 0..7 {
        writer.push(WriteOp::DeleteUser(format!("u{i}"))).await?;
    }
    let stats = writer.finish().await?;

    assert_eq!(stats.batches, 3);
    assert_eq!(stats.writes, 7);
    assert_eq!(store.commit_sizes().await, vec![3, 3, 1]);
    assert!(store.snapshot().await.users.is_empty());
    Ok(())
}

#[tokio::test]
async fn snapshot_round_trips_through_file() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("store.json");
    {
        let store = MemoryStore::with_snapshot(path.clone())?;
        store
            .merge_sub_account(
                "loc_1",
                SubAccountUpdate {
                    account_id: Some("co_1".into()),
                    installed: Some(true),
                    ..Default::default()
                },
            )
            .await?;
    }

    let reopened = MemoryStore::with_snapshot(path)?;
    let rec = reopened.get_sub_account("loc_1").await?;
    assert_eq!(rec.map(|r| r.installed), Some(true));
    Ok(())
}

#[tokio::test]
async fn failed_snapshot_write_fails_the_mutation() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("missing").join("store.json");
    let store = MemoryStore::with_snapshot(path)?;

    let merged = store.merge_sub_account("loc_1", SubAccountUpdate::default()).await;
    assert!(matches!(merged, Err(StoreError::Persist(_))));

    let updated = store.update_sub_account_token("loc_1", token("rotated", 10), Some("rt-2".into())).await;
    assert!(matches!(updated, Err(StoreError::Persist(_))));

    let mut batch = WriteBatch::new();
    batch.push(WriteOp::DeleteSubAccount("loc_1".into()));
    assert!(matches!(store.commit(batch).await, Err(StoreError::Persist(_))));
    Ok(())
}
