// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Token resolver: cached token → refresh → mint from the parent account.
//!
//! The resolver holds no mutable state of its own. Every token it obtains is
//! written to the store (merge write, existing records only) before it is
//! returned, so concurrent callers converge on the stored value.

use std::sync::Arc;

use crate::events::{Reporter, SyncEvent};
use crate::platform::oauth::{Grant, TokenResponse};
use crate::platform::{PlatformClient, PlatformError};
use crate::store::{epoch_secs, Store, TokenScope};
use crate::token::TokenError;

/// Resolves access tokens for sub-accounts and parent accounts.
#[derive(Clone)]
pub struct TokenResolver {
    store: Arc<dyn Store>,
    platform: PlatformClient,
    reporter: Reporter,
    skew_secs: u64,
}

impl TokenResolver {
    pub fn new(
        store: Arc<dyn Store>,
        platform: PlatformClient,
        reporter: Reporter,
        skew_secs: u64,
    ) -> Self {
        Self { store, platform, reporter, skew_secs }
    }

    /// Return a valid sub-account scoped access token.
    ///
    /// Never returns the parent account's token.
    pub async fn resolve(&self, sub_account_id: &str) -> Result<String, TokenError> {
        let result = self.resolve_inner(sub_account_id).await;
        if let Err(TokenError::Unavailable { ref reason, .. }) = result {
            self.reporter.emit(SyncEvent::TokenUnavailable {
                sub_account: sub_account_id.to_owned(),
                error: reason.clone(),
            });
        }
        result
    }

    async fn resolve_inner(&self, sub_account_id: &str) -> Result<String, TokenError> {
        let record = self
            .store
            .get_sub_account(sub_account_id)
            .await?
            .ok_or_else(|| TokenError::unavailable(sub_account_id, "sub-account not on record"))?;

        if let Some(ref token) = record.token {
            if token.is_fresh(epoch_secs(), self.skew_secs) {
                return Ok(token.access_token.clone());
            }
        }

        let mut reasons = Vec::new();

        let direct = record.token.as_ref().is_none_or(|t| t.scope == TokenScope::Location);
        let refresh_token = record.refresh_token.as_deref().filter(|t| !t.is_empty());
        match (direct, refresh_token) {
            (true, Some(refresh_token)) => {
                match self.refresh(refresh_token, TokenScope::Location).await {
                    Ok(resp) => {
                        let cache = resp.to_cache(epoch_secs(), TokenScope::Location);
                        let written = self
                            .store
                            .update_sub_account_token(sub_account_id, cache, resp.refresh_token())
                            .await?;
                        if !written {
                            tracing::debug!(sub_account_id, "sub-account removed during refresh");
                        }
                        self.reporter.emit(SyncEvent::TokenRefreshed {
                            sub_account: sub_account_id.to_owned(),
                        });
                        return Ok(resp.access_token);
                    }
                    Err(e) => {
                        tracing::warn!(sub_account_id, err = %e, "sub-account refresh failed");
                        reasons.push(format!("refresh failed: {e}"));
                    }
                }
            }
            (true, None) => reasons.push("no sub-account refresh token".to_owned()),
            (false, _) => reasons.push("cached token is not sub-account scoped".to_owned()),
        }

        match record.account_id.as_deref() {
            Some(account_id) => match self.mint_from_parent(account_id, sub_account_id).await {
                Ok(token) => return Ok(token),
                Err(TokenError::Unavailable { id, reason }) => {
                    reasons.push(format!("{id}: {reason}"));
                }
                Err(e) => return Err(e),
            },
            None => reasons.push("no parent account on record".to_owned()),
        }

        Err(TokenError::unavailable(sub_account_id, reasons.join("; ")))
    }

    async fn mint_from_parent(
        &self,
        account_id: &str,
        sub_account_id: &str,
    ) -> Result<String, TokenError> {
        let parent = self.resolve_account(account_id).await?;
        self.mint_with_parent(&parent, account_id, sub_account_id).await
    }

    /// Return a valid parent-account scoped access token (cache, then refresh).
    pub async fn resolve_account(&self, account_id: &str) -> Result<String, TokenError> {
        let account = self
            .store
            .get_account(account_id)
            .await?
            .ok_or_else(|| TokenError::unavailable(account_id, "account not on record"))?;

        if let Some(ref token) = account.token {
            if token.scope == TokenScope::Company && token.is_fresh(epoch_secs(), self.skew_secs) {
                return Ok(token.access_token.clone());
            }
        }

        let refresh_token = account
            .refresh_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| TokenError::unavailable(account_id, "no account refresh token"))?;

        let resp = self.refresh(refresh_token, TokenScope::Company).await.map_err(|e| {
            tracing::warn!(account_id, err = %e, "account refresh failed");
            TokenError::unavailable(account_id, format!("refresh failed: {e}"))
        })?;
        let cache = resp.to_cache(epoch_secs(), TokenScope::Company);
        self.store.update_account_token(account_id, cache, resp.refresh_token()).await?;
        tracing::debug!(account_id, "account token refreshed");
        Ok(resp.access_token)
    }

    /// Mint and persist a sub-account token using an already-resolved parent token.
    pub async fn mint_with_parent(
        &self,
        parent_token: &str,
        account_id: &str,
        sub_account_id: &str,
    ) -> Result<String, TokenError> {
        let resp = self
            .platform
            .mint_location_token(parent_token, account_id, sub_account_id)
            .await
            .map_err(|e| TokenError::unavailable(sub_account_id, format!("mint failed: {e}")))?;
        if resp.access_token.is_empty() || resp.access_token == parent_token {
            return Err(TokenError::unavailable(
                sub_account_id,
                "mint returned no sub-account token",
            ));
        }
        let cache = resp.to_cache(epoch_secs(), TokenScope::Location);
        self.store.update_sub_account_token(sub_account_id, cache, resp.refresh_token()).await?;
        self.reporter.emit(SyncEvent::TokenMinted { sub_account: sub_account_id.to_owned() });
        Ok(resp.access_token)
    }

    /// One refresh exchange, retried once on a transient failure.
    ///
    /// A failed exchange does not rotate the refresh token, so retrying with
    /// the same one is safe.
    async fn refresh(
        &self,
        refresh_token: &str,
        scope: TokenScope,
    ) -> Result<TokenResponse, PlatformError> {
        match self.platform.token(Grant::RefreshToken(refresh_token), Some(scope)).await {
            Err(e) if e.is_transient() => {
                tracing::debug!(err = %e, "refresh attempt failed, retrying once");
                self.platform.token(Grant::RefreshToken(refresh_token), Some(scope)).await
            }
            other => other,
        }
    }
}

#[cfg(test)]
#[path = "resolver_tests.rs"]
mod tests;
