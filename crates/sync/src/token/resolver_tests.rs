// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use serde_json::json;

use super::*;
use crate::events::drain;
use crate::store::{AccountUpdate, MemoryStore, SubAccountUpdate, TokenCache};
use crate::test_support::{test_config, MockPlatform};

struct Harness {
    platform: MockPlatform,
    store: Arc<MemoryStore>,
    reporter: Reporter,
    resolver: TokenResolver,
}

async fn harness() -> anyhow::Result<Harness> {
    let platform = MockPlatform::start().await?;
    let store = Arc::new(MemoryStore::new());
    let reporter = Reporter::new();
    let client = PlatformClient::new(&test_config(&platform.url(), None));
    let dyn_store: Arc<dyn Store> = store.clone();
    let resolver = TokenResolver::new(dyn_store, client, reporter.clone(), 60);
    Ok(Harness { platform, store, reporter, resolver })
}

fn cache(access: &str, expires_at: u64, scope: TokenScope) -> TokenCache {
    TokenCache { access_token: access.to_owned(), expires_at, scopes: String::new(), scope }
}

async fn seed_sub_account(
    store: &MemoryStore,
    id: &str,
    account_id: Option<&str>,
    refresh_token: Option<&str>,
    token: Option<TokenCache>,
) -> anyhow::Result<()> {
    store
        .merge_sub_account(
            id,
            SubAccountUpdate {
                account_id: account_id.map(str::to_owned),
                refresh_token: refresh_token.map(str::to_owned),
                installed: Some(true),
                name: None,
                token,
            },
        )
        .await?;
    Ok(())
}

async fn seed_account(
    store: &MemoryStore,
    id: &str,
    refresh_token: Option<&str>,
    token: Option<TokenCache>,
) -> anyhow::Result<()> {
    store
        .merge_account(
            id,
            AccountUpdate {
                provider: Some("leadconnector".into()),
                refresh_token: refresh_token.map(str::to_owned),
                token,
                ..Default::default()
            },
        )
        .await?;
    Ok(())
}

#[tokio::test]
async fn fresh_cached_token_makes_no_network_calls() -> anyhow::Result<()> {
    let h = harness().await?;
    let expires = epoch_secs() + 3600;
    seed_sub_account(
        &h.store,
        "loc_1",
        Some("co_1"),
        Some("rt-1"),
        Some(cache("cached", expires, TokenScope::Location)),
    )
    .await?;

    assert_eq!(h.resolver.resolve("loc_1").await?, "cached");
    assert_eq!(h.platform.total_calls().await, 0);
    Ok(())
}

#[tokio::test]
async fn token_inside_skew_window_is_refreshed() -> anyhow::Result<()> {
    let h = harness().await?;
    h.platform
        .push_token_response(
            200,
            json!({ "access_token": "fresh", "refresh_token": "rt-2", "expires_in": 86399 }),
        )
        .await;
    let almost_expired = epoch_secs() + 30;
    seed_sub_account(
        &h.store,
        "loc_1",
        None,
        Some("rt-1"),
        Some(cache("stale", almost_expired, TokenScope::Location)),
    )
    .await?;

    assert_eq!(h.resolver.resolve("loc_1").await?, "fresh");
    Ok(())
}

#[tokio::test]
async fn expired_token_refresh_persists_rotated_refresh_token() -> anyhow::Result<()> {
    let h = harness().await?;
    let mut rx = h.reporter.subscribe();
    h.platform
        .push_token_response(
            200,
            json!({
                "access_token": "at-new",
                "refresh_token": "rt-rotated",
                "expires_in": 86399,
                "scope": "contacts.readonly",
                "userType": "Location",
            }),
        )
        .await;
    seed_sub_account(
        &h.store,
        "loc_1",
        Some("co_1"),
        Some("rt-original"),
        Some(cache("expired", 1, TokenScope::Location)),
    )
    .await?;

    assert_eq!(h.resolver.resolve("loc_1").await?, "at-new");

    let stored = h.store.get_sub_account("loc_1").await?.ok_or_else(|| anyhow::anyhow!("gone"))?;
    assert_eq!(stored.refresh_token.as_deref(), Some("rt-rotated"));
    let token = stored.token.ok_or_else(|| anyhow::anyhow!("no token"))?;
    assert_eq!(token.access_token, "at-new");
    assert!(token.expires_at > epoch_secs() + 86000);

    let forms = h.platform.token_forms().await;
    assert_eq!(forms.len(), 1);
    assert_eq!(forms[0].get("refresh_token").map(String::as_str), Some("rt-original"));
    assert!(h.platform.mint_calls().await.is_empty());
    assert!(drain(&mut rx)
        .contains(&SyncEvent::TokenRefreshed { sub_account: "loc_1".into() }));

    // Second call is served from the cache.
    assert_eq!(h.resolver.resolve("loc_1").await?, "at-new");
    assert_eq!(h.platform.token_forms().await.len(), 1);
    Ok(())
}

#[tokio::test]
async fn transient_refresh_failure_is_retried_once() -> anyhow::Result<()> {
    let h = harness().await?;
    h.platform.push_token_response(503, json!({ "error": "unavailable" })).await;
    h.platform
        .push_token_response(200, json!({ "access_token": "second-try", "expires_in": 600 }))
        .await;
    seed_sub_account(&h.store, "loc_1", None, Some("rt-1"), None).await?;

    assert_eq!(h.resolver.resolve("loc_1").await?, "second-try");
    assert_eq!(h.platform.token_forms().await.len(), 2);

    // No rotated refresh token in the response: the original is kept.
    let stored = h.store.get_sub_account("loc_1").await?.ok_or_else(|| anyhow::anyhow!("gone"))?;
    assert_eq!(stored.refresh_token.as_deref(), Some("rt-1"));
    Ok(())
}

#[tokio::test]
async fn missing_refresh_token_mints_from_parent() -> anyhow::Result<()> {
    let h = harness().await?;
    let expires = epoch_secs() + 3600;
    seed_account(&h.store, "co_1", Some("co-rt"), Some(cache("parent-token", expires, TokenScope::Company)))
        .await?;
    seed_sub_account(&h.store, "loc_1", Some("co_1"), None, None).await?;

    let token = h.resolver.resolve("loc_1").await?;
    assert_eq!(token, "minted-loc_1");
    assert_ne!(token, "parent-token");

    let mints = h.platform.mint_calls().await;
    assert_eq!(mints.len(), 1);
    assert_eq!(mints[0].bearer, "parent-token");
    assert_eq!(mints[0].company_id, "co_1");
    assert_eq!(mints[0].location_id, "loc_1");
    assert!(h.platform.token_forms().await.is_empty());

    let stored = h.store.get_sub_account("loc_1").await?.ok_or_else(|| anyhow::anyhow!("gone"))?;
    assert_eq!(stored.token.map(|t| t.access_token), Some("minted-loc_1".to_owned()));
    Ok(())
}

#[tokio::test]
async fn rejected_refresh_falls_back_to_mint_and_keeps_old_state() -> anyhow::Result<()> {
    let h = harness().await?;
    // First exchange: sub-account refresh rejected. Second: parent refresh succeeds.
    h.platform.push_token_response(400, json!({ "error": "invalid_grant" })).await;
    h.platform
        .push_token_response(
            200,
            json!({
                "access_token": "parent-fresh",
                "refresh_token": "co-rt-rotated",
                "expires_in": 86399,
                "userType": "Company",
            }),
        )
        .await;
    seed_account(&h.store, "co_1", Some("co-rt"), None).await?;
    seed_sub_account(
        &h.store,
        "loc_1",
        Some("co_1"),
        Some("revoked-rt"),
        Some(cache("expired", 1, TokenScope::Location)),
    )
    .await?;

    assert_eq!(h.resolver.resolve("loc_1").await?, "minted-loc_1");

    let forms = h.platform.token_forms().await;
    assert_eq!(forms.len(), 2, "invalid_grant must not be retried");
    assert_eq!(forms[1].get("user_type").map(String::as_str), Some("Company"));

    let account = h.store.get_account("co_1").await?.ok_or_else(|| anyhow::anyhow!("gone"))?;
    assert_eq!(account.refresh_token.as_deref(), Some("co-rt-rotated"));
    assert_eq!(h.platform.mint_calls().await[0].bearer, "parent-fresh");

    // The rejected refresh never overwrote the sub-account's refresh token;
    // the mint response carried none either.
    let stored = h.store.get_sub_account("loc_1").await?.ok_or_else(|| anyhow::anyhow!("gone"))?;
    assert_eq!(stored.refresh_token.as_deref(), Some("revoked-rt"));
    Ok(())
}

#[tokio::test]
async fn failed_refresh_without_parent_leaves_store_untouched() -> anyhow::Result<()> {
    let h = harness().await?;
    let mut rx = h.reporter.subscribe();
    h.platform.push_token_response(401, json!({ "error": "invalid_grant" })).await;
    let original = cache("expired", 1, TokenScope::Location);
    seed_sub_account(&h.store, "loc_1", None, Some("rt-1"), Some(original.clone())).await?;

    let result = h.resolver.resolve("loc_1").await;
    match result {
        Err(TokenError::Unavailable { ref id, ref reason }) => {
            assert_eq!(id, "loc_1");
            assert!(reason.contains("no parent account"), "reason: {reason}");
        }
        ref other => anyhow::bail!("expected unavailable, got {other:?}"),
    }

    let stored = h.store.get_sub_account("loc_1").await?.ok_or_else(|| anyhow::anyhow!("gone"))?;
    assert_eq!(stored.token, Some(original));
    assert_eq!(stored.refresh_token.as_deref(), Some("rt-1"));
    let events = drain(&mut rx);
    assert!(events.iter().any(|e| matches!(e, SyncEvent::TokenUnavailable { sub_account, .. } if sub_account == "loc_1")));
    Ok(())
}

#[tokio::test]
async fn mint_failure_is_unavailable() -> anyhow::Result<()> {
    let h = harness().await?;
    let expires = epoch_secs() + 3600;
    seed_account(&h.store, "co_1", None, Some(cache("parent", expires, TokenScope::Company))).await?;
    seed_sub_account(&h.store, "loc_1", Some("co_1"), None, None).await?;
    h.platform.set_mint_response("loc_1", 403, json!({ "message": "forbidden" })).await;

    let result = h.resolver.resolve("loc_1").await;
    assert!(matches!(result, Err(ref e) if e.is_unavailable()));
    Ok(())
}

#[tokio::test]
async fn unknown_sub_account_is_unavailable() -> anyhow::Result<()> {
    let h = harness().await?;
    crate::assert_err_contains!(h.resolver.resolve("nope").await, "not on record");
    assert_eq!(h.platform.total_calls().await, 0);
    Ok(())
}

#[tokio::test]
async fn company_scoped_cache_on_sub_account_is_not_returned() -> anyhow::Result<()> {
    let h = harness().await?;
    let expires = epoch_secs() + 3600;
    seed_account(&h.store, "co_1", None, Some(cache("parent", expires, TokenScope::Company))).await?;
    seed_sub_account(
        &h.store,
        "loc_1",
        Some("co_1"),
        Some("rt-1"),
        Some(cache("legacy-agency-token", 1, TokenScope::Company)),
    )
    .await?;

    assert_eq!(h.resolver.resolve("loc_1").await?, "minted-loc_1");
    assert!(h.platform.token_forms().await.is_empty(), "company-scoped cache must not be refreshed");
    Ok(())
}
