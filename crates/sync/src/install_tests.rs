// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use serde_json::{json, Value};

use super::*;
use crate::events::drain;
use crate::store::MemoryStore;
use crate::test_support::{test_config, MockPlatform};

fn handler_for(config: &SyncConfig, store: &Arc<MemoryStore>, reporter: &Reporter) -> InstallHandler {
    let dyn_store: Arc<dyn Store> = store.clone();
    let platform = PlatformClient::new(config);
    let resolver = TokenResolver::new(
        Arc::clone(&dyn_store),
        platform.clone(),
        reporter.clone(),
        config.token_skew_secs,
    );
    InstallHandler::new(config, dyn_store, platform, resolver, reporter.clone())
}

fn company_token() -> Value {
    json!({
        "access_token": "agency-at",
        "refresh_token": "agency-rt",
        "expires_in": 86399,
        "scope": "locations.readonly oauth.write",
        "userType": "Company",
        "companyId": "co_1",
    })
}

fn locations(ids: &[&str]) -> Value {
    let items: Vec<Value> =
        ids.iter().map(|id| json!({ "id": id, "name": format!("Name {id}") })).collect();
    json!({ "locations": items })
}

#[tokio::test]
async fn account_install_discovers_and_mints_each_sub_account() -> anyhow::Result<()> {
    let platform = MockPlatform::start().await?;
    platform.push_token_response(200, company_token()).await;
    platform.push_installed(200, locations(&["loc_1", "loc_2", "loc_3"])).await;
    let config = test_config(&platform.url(), None);
    let store = Arc::new(MemoryStore::new());
    let reporter = Reporter::new();
    let mut rx = reporter.subscribe();

    let outcome = handler_for(&config, &store, &reporter).handle("code-1").await?;
    assert_eq!(outcome.stage, InstallStage::Minted);
    assert_eq!(outcome.company_id.as_deref(), Some("co_1"));
    assert_eq!((outcome.discovered, outcome.minted, outcome.failed), (3, 3, 0));

    let account = store.get_account("co_1").await?.ok_or_else(|| anyhow::anyhow!("no account"))?;
    assert_eq!(account.refresh_token.as_deref(), Some("agency-rt"));
    assert_eq!(account.provider, "leadconnector");
    assert_eq!(account.token.map(|t| t.scope), Some(TokenScope::Company));

    for id in ["loc_1", "loc_2", "loc_3"] {
        let sub = store.get_sub_account(id).await?.ok_or_else(|| anyhow::anyhow!("no {id}"))?;
        assert!(sub.installed);
        assert_eq!(sub.account_id.as_deref(), Some("co_1"));
        assert_eq!(sub.name, Some(format!("Name {id}")));
        assert_eq!(sub.token.map(|t| t.access_token), Some(format!("minted-{id}")));
        assert!(store.get_mirror("co_1", id).await?.is_some());
    }

    let mints = platform.mint_calls().await;
    assert_eq!(mints.len(), 3);
    assert!(mints.iter().all(|m| m.bearer == "agency-at" && m.company_id == "co_1"));
    let minted =
        drain(&mut rx).iter().filter(|e| matches!(e, SyncEvent::TokenMinted { .. })).count();
    assert_eq!(minted, 3);
    Ok(())
}

#[tokio::test]
async fn empty_installed_index_is_retried_before_listing() -> anyhow::Result<()> {
    let platform = MockPlatform::start().await?;
    platform.push_token_response(200, company_token()).await;
    platform.push_installed(200, json!({ "locations": [] })).await;
    platform.push_installed(200, json!({ "locations": [] })).await;
    platform.push_installed(200, locations(&["loc_7"])).await;
    let config = test_config(&platform.url(), None);
    let store = Arc::new(MemoryStore::new());

    let outcome = handler_for(&config, &store, &Reporter::new()).handle("code-1").await?;
    assert_eq!(outcome.discovered, 1);
    assert_eq!(platform.installed_calls().await, 3);
    assert_eq!(platform.search_calls().await, 0);
    Ok(())
}

#[tokio::test]
async fn listing_fallback_stops_on_short_page() -> anyhow::Result<()> {
    let platform = MockPlatform::start().await?;
    platform.push_token_response(200, company_token()).await;
    platform
        .set_locations((0..5).map(|i| json!({ "id": format!("loc_{i}") })).collect())
        .await;
    let mut config = test_config(&platform.url(), None);
    config.discovery_page_size = 2;
    let store = Arc::new(MemoryStore::new());

    let outcome = handler_for(&config, &store, &Reporter::new()).handle("code-1").await?;
    assert_eq!(outcome.discovered, 5);
    assert_eq!(outcome.minted, 5);
    // 1 initial lookup + 3 retries, then pages 1..=3.
    assert_eq!(platform.installed_calls().await, 4);
    assert_eq!(platform.search_calls().await, 3);
    Ok(())
}

#[tokio::test]
async fn listing_fallback_respects_page_ceiling() -> anyhow::Result<()> {
    let platform = MockPlatform::start().await?;
    platform
        .set_locations((0..10).map(|i| json!({ "id": format!("loc_{i:02}") })).collect())
        .await;
    let mut config = test_config(&platform.url(), None);
    config.discovery_page_size = 2;
    config.discovery_max_pages = 2;
    config.discovery_retries = 0;
    let store = Arc::new(MemoryStore::new());

    let found = handler_for(&config, &store, &Reporter::new()).discover("tok", "co_1").await?;
    assert_eq!(found.len(), 4);
    assert_eq!(platform.search_calls().await, 2);
    Ok(())
}

#[tokio::test]
async fn one_failed_mint_does_not_block_siblings() -> anyhow::Result<()> {
    let platform = MockPlatform::start().await?;
    platform.push_token_response(200, company_token()).await;
    platform.push_installed(200, locations(&["loc_1", "loc_2", "loc_3"])).await;
    platform.set_mint_response("loc_2", 500, json!({ "message": "boom" })).await;
    let config = test_config(&platform.url(), None);
    let store = Arc::new(MemoryStore::new());
    let reporter = Reporter::new();
    let mut rx = reporter.subscribe();

    let outcome = handler_for(&config, &store, &reporter).handle("code-1").await?;
    assert_eq!((outcome.minted, outcome.failed), (2, 1));

    let failed = store.get_sub_account("loc_2").await?.ok_or_else(|| anyhow::anyhow!("no loc_2"))?;
    assert!(failed.installed);
    assert!(failed.token.is_none());
    assert!(drain(&mut rx).iter().any(|e| matches!(
        e,
        SyncEvent::MintFailed { sub_account, .. } if sub_account == "loc_2"
    )));
    Ok(())
}

#[tokio::test]
async fn discovery_failure_keeps_account_and_reports() -> anyhow::Result<()> {
    let platform = MockPlatform::start().await?;
    platform.push_token_response(200, company_token()).await;
    let mut config = test_config(&platform.url(), None);
    config.discovery_retries = 1;
    let store = Arc::new(MemoryStore::new());
    let reporter = Reporter::new();
    let mut rx = reporter.subscribe();

    let outcome = handler_for(&config, &store, &reporter).handle("code-1").await?;
    assert_eq!(outcome.stage, InstallStage::Persisted);
    assert!(store.get_account("co_1").await?.is_some());
    assert!(drain(&mut rx).iter().any(|e| matches!(e, SyncEvent::DiscoveryFailed { .. })));
    Ok(())
}

#[tokio::test]
async fn sub_account_install_persists_refresh_token_and_parent_stub() -> anyhow::Result<()> {
    let platform = MockPlatform::start().await?;
    platform
        .push_token_response(
            200,
            json!({
                "access_token": "loc-at",
                "refresh_token": "loc-rt",
                "expires_in": 86399,
                "userType": "Location",
                "companyId": "co_1",
                "locationId": "loc_1",
            }),
        )
        .await;
    let config = test_config(&platform.url(), None);
    let store = Arc::new(MemoryStore::new());

    let outcome = handler_for(&config, &store, &Reporter::new()).handle("code-1").await?;
    assert_eq!(outcome.stage, InstallStage::Persisted);
    assert_eq!(outcome.location_id.as_deref(), Some("loc_1"));

    let sub = store.get_sub_account("loc_1").await?.ok_or_else(|| anyhow::anyhow!("no loc_1"))?;
    assert_eq!(sub.refresh_token.as_deref(), Some("loc-rt"));
    assert_eq!(sub.account_id.as_deref(), Some("co_1"));
    assert!(sub.installed);
    assert!(store.get_account("co_1").await?.is_some());
    assert!(store.get_mirror("co_1", "loc_1").await?.is_some());
    assert_eq!(platform.installed_calls().await, 0);
    Ok(())
}

#[tokio::test]
async fn sub_account_reinstall_keeps_parent_tokens() -> anyhow::Result<()> {
    let platform = MockPlatform::start().await?;
    platform
        .push_token_response(
            200,
            json!({
                "access_token": "loc-at",
                "expires_in": 86399,
                "userType": "Location",
                "companyId": "co_1",
                "locationId": "loc_1",
            }),
        )
        .await;
    let config = test_config(&platform.url(), None);
    let store = Arc::new(MemoryStore::new());
    store
        .merge_account(
            "co_1",
            AccountUpdate { refresh_token: Some("agency-rt".into()), ..Default::default() },
        )
        .await?;

    handler_for(&config, &store, &Reporter::new()).handle("code-1").await?;
    let account = store.get_account("co_1").await?.ok_or_else(|| anyhow::anyhow!("no account"))?;
    assert_eq!(account.refresh_token.as_deref(), Some("agency-rt"));
    Ok(())
}

#[tokio::test]
async fn failed_exchange_is_an_error() -> anyhow::Result<()> {
    let platform = MockPlatform::start().await?;
    platform.push_token_response(400, json!({ "error": "invalid_grant" })).await;
    let config = test_config(&platform.url(), None);
    let store = Arc::new(MemoryStore::new());

    let result = handler_for(&config, &store, &Reporter::new()).handle("stale").await;
    assert!(matches!(result, Err(InstallError::Exchange(_))));
    assert!(store.snapshot().await.accounts.is_empty());
    Ok(())
}
