// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Marketplace install flow: code exchange, persistence, discovery, mint fan-out.
//!
//! Only the code exchange can fail the install. Everything after it is
//! best-effort and reported through [`Reporter`].

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{self, StreamExt};
use serde::Serialize;

use crate::config::SyncConfig;
use crate::events::{Reporter, SyncEvent};
use crate::platform::oauth::{Grant, TokenResponse};
use crate::platform::{LocationSummary, PlatformClient, PlatformError};
use crate::store::{
    epoch_secs, AccountUpdate, Store, StoreError, SubAccountMirror, SubAccountUpdate, TokenScope,
};
use crate::token::TokenResolver;

/// Errors that abort an install before anything is persisted.
#[derive(Debug, thiserror::Error)]
pub enum InstallError {
    #[error("code exchange failed: {0}")]
    Exchange(#[from] PlatformError),
    #[error("token response names no {0}")]
    MissingTenant(&'static str),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Furthest point the install reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallStage {
    Exchanged,
    Persisted,
    Discovered,
    Minted,
}

/// Summary of a completed install.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallOutcome {
    pub stage: InstallStage,
    pub scope: TokenScope,
    pub company_id: Option<String>,
    pub location_id: Option<String>,
    pub discovered: usize,
    pub minted: usize,
    pub failed: usize,
}

/// Handles the OAuth callback for both parent and sub-account installs.
#[derive(Clone)]
pub struct InstallHandler {
    store: Arc<dyn Store>,
    platform: PlatformClient,
    resolver: TokenResolver,
    reporter: Reporter,
    provider: String,
    discovery_retries: u32,
    discovery_retry_delay: Duration,
    page_size: u32,
    max_pages: u32,
    mint_concurrency: usize,
}

impl InstallHandler {
    pub fn new(
        config: &SyncConfig,
        store: Arc<dyn Store>,
        platform: PlatformClient,
        resolver: TokenResolver,
        reporter: Reporter,
    ) -> Self {
        Self {
            store,
            platform,
            resolver,
            reporter,
            provider: config.provider.clone(),
            discovery_retries: config.discovery_retries,
            discovery_retry_delay: config.discovery_retry_delay(),
            page_size: config.discovery_page_size,
            max_pages: config.discovery_max_pages,
            mint_concurrency: config.mint_concurrency.max(1),
        }
    }

    /// Run the install for an authorization code.
    pub async fn handle(&self, code: &str) -> Result<InstallOutcome, InstallError> {
        let resp = self.platform.token(Grant::AuthorizationCode(code), None).await?;
        let scope = resp.token_scope();
        tracing::info!(
            user_type = ?scope,
            company_id = resp.company_id.as_deref().unwrap_or(""),
            location_id = resp.location_id.as_deref().unwrap_or(""),
            "authorization code exchanged"
        );
        match scope {
            TokenScope::Company => self.install_account(resp).await,
            TokenScope::Location => self.install_sub_account(resp).await,
        }
    }

    async fn install_account(&self, resp: TokenResponse) -> Result<InstallOutcome, InstallError> {
        let company_id = resp.company_id.clone().ok_or(InstallError::MissingTenant("companyId"))?;
        let mut outcome = InstallOutcome {
            stage: InstallStage::Exchanged,
            scope: TokenScope::Company,
            company_id: Some(company_id.clone()),
            location_id: None,
            discovered: 0,
            minted: 0,
            failed: 0,
        };

        let update = AccountUpdate {
            provider: Some(self.provider.clone()),
            scopes: Some(resp.scope.clone()),
            refresh_token: resp.refresh_token(),
            token: Some(resp.to_cache(epoch_secs(), TokenScope::Company)),
        };
        if let Err(e) = self.store.merge_account(&company_id, update).await {
            tracing::warn!(company_id, err = %e, "failed to persist account");
            return Ok(outcome);
        }
        outcome.stage = InstallStage::Persisted;

        let parent_token = resp.access_token;
        let found = match self.discover(&parent_token, &company_id).await {
            Ok(found) if !found.is_empty() => found,
            Ok(_) => {
                self.reporter.emit(SyncEvent::DiscoveryFailed {
                    account: company_id.clone(),
                    error: "no sub-accounts found".to_owned(),
                });
                return Ok(outcome);
            }
            Err(e) => {
                self.reporter.emit(SyncEvent::DiscoveryFailed {
                    account: company_id.clone(),
                    error: e.to_string(),
                });
                return Ok(outcome);
            }
        };
        outcome.discovered = found.len();
        outcome.stage = InstallStage::Discovered;
        tracing::info!(company_id, discovered = found.len(), "sub-accounts discovered");

        let results: Vec<Result<(), String>> = stream::iter(found)
            .map(|location| self.provision(&parent_token, &company_id, location))
            .buffer_unordered(self.mint_concurrency)
            .collect()
            .await;
        for result in results {
            match result {
                Ok(()) => outcome.minted += 1,
                Err(_) => outcome.failed += 1,
            }
        }
        outcome.stage = InstallStage::Minted;
        tracing::info!(
            company_id,
            minted = outcome.minted,
            failed = outcome.failed,
            "account install complete"
        );
        Ok(outcome)
    }

    /// Persist one discovered sub-account and mint its token.
    async fn provision(
        &self,
        parent_token: &str,
        company_id: &str,
        location: LocationSummary,
    ) -> Result<(), String> {
        let result = async {
            let update = SubAccountUpdate {
                account_id: Some(company_id.to_owned()),
                installed: Some(true),
                name: location.name.clone(),
                ..Default::default()
            };
            self.store.merge_sub_account(&location.id, update).await.map_err(|e| e.to_string())?;
            self.store
                .put_mirror(SubAccountMirror {
                    account_id: company_id.to_owned(),
                    sub_account_id: location.id.clone(),
                    name: location.name.clone(),
                })
                .await
                .map_err(|e| e.to_string())?;
            self.resolver
                .mint_with_parent(parent_token, company_id, &location.id)
                .await
                .map_err(|e| e.to_string())?;
            Ok::<(), String>(())
        }
        .await;
        if let Err(ref error) = result {
            self.reporter.emit(SyncEvent::MintFailed {
                account: company_id.to_owned(),
                sub_account: location.id.clone(),
                error: error.clone(),
            });
        }
        result
    }

    async fn install_sub_account(
        &self,
        resp: TokenResponse,
    ) -> Result<InstallOutcome, InstallError> {
        let location_id =
            resp.location_id.clone().ok_or(InstallError::MissingTenant("locationId"))?;
        let company_id = resp.company_id.clone();
        let mut outcome = InstallOutcome {
            stage: InstallStage::Exchanged,
            scope: TokenScope::Location,
            company_id: company_id.clone(),
            location_id: Some(location_id.clone()),
            discovered: 0,
            minted: 0,
            failed: 0,
        };

        let update = SubAccountUpdate {
            account_id: company_id.clone(),
            refresh_token: resp.refresh_token(),
            installed: Some(true),
            name: None,
            token: Some(resp.to_cache(epoch_secs(), TokenScope::Location)),
        };
        if let Err(e) = self.store.merge_sub_account(&location_id, update).await {
            tracing::warn!(location_id, err = %e, "failed to persist sub-account");
            return Ok(outcome);
        }
        outcome.stage = InstallStage::Persisted;

        if let Some(ref company_id) = company_id {
            let stub = AccountUpdate { provider: Some(self.provider.clone()), ..Default::default() };
            let linked = async {
                self.store.merge_account(company_id, stub).await?;
                self.store
                    .put_mirror(SubAccountMirror {
                        account_id: company_id.clone(),
                        sub_account_id: location_id.clone(),
                        name: None,
                    })
                    .await
            }
            .await;
            if let Err(e) = linked {
                tracing::warn!(company_id, location_id, err = %e, "failed to link parent account");
            }
        }
        tracing::info!(location_id, "sub-account install complete");
        Ok(outcome)
    }

    /// Find every sub-account under the parent account.
    ///
    /// Asks the installed-locations index first, retrying with a fixed delay
    /// while it is empty, then falls back to the paginated listing.
    pub async fn discover(
        &self,
        parent_token: &str,
        company_id: &str,
    ) -> Result<Vec<LocationSummary>, PlatformError> {
        for attempt in 0..=self.discovery_retries {
            if attempt > 0 {
                tokio::time::sleep(self.discovery_retry_delay).await;
            }
            match self.platform.installed_locations(parent_token, company_id).await {
                Ok(found) if !found.is_empty() => return Ok(dedupe(found)),
                Ok(_) => tracing::debug!(company_id, attempt, "installed-locations empty"),
                Err(e) => {
                    tracing::warn!(company_id, attempt, err = %e, "installed-locations failed");
                    break;
                }
            }
        }

        let mut found = Vec::new();
        for page in 1..=self.max_pages {
            let batch =
                self.platform.search_locations(parent_token, company_id, page, self.page_size).await?;
            let short = (batch.len() as u64) < u64::from(self.page_size);
            found.extend(batch);
            if short {
                break;
            }
        }
        Ok(dedupe(found))
    }
}

fn dedupe(found: Vec<LocationSummary>) -> Vec<LocationSummary> {
    let mut by_id = BTreeMap::new();
    for location in found {
        by_id.entry(location.id.clone()).or_insert(location);
    }
    by_id.into_values().collect()
}

#[cfg(test)]
#[path = "install_tests.rs"]
mod tests;
