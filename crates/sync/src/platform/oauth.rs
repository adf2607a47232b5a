// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! OAuth token endpoint types.

use serde::{Deserialize, Serialize};

use crate::store::{TokenCache, TokenScope};

/// Lifetime assumed when a response omits `expires_in`.
///
/// Shorter than any lifetime the platform issues, so the token is refreshed early.
pub const DEFAULT_EXPIRES_IN_SECS: u64 = 3600;

fn default_expires_in() -> u64 {
    DEFAULT_EXPIRES_IN_SECS
}

/// Token endpoint and mint endpoint response.
///
/// The platform mixes snake_case token fields with camelCase tenant fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default = "default_expires_in")]
    pub expires_in: u64,
    #[serde(default)]
    pub scope: String,
    #[serde(default, rename = "userType", alias = "user_type", skip_serializing_if = "Option::is_none")]
    pub user_type: Option<String>,
    #[serde(default, rename = "companyId", alias = "company_id", skip_serializing_if = "Option::is_none")]
    pub company_id: Option<String>,
    #[serde(default, rename = "locationId", alias = "location_id", skip_serializing_if = "Option::is_none")]
    pub location_id: Option<String>,
}

impl TokenResponse {
    /// Scope this token was issued for. Anything but `Company` is sub-account scoped.
    pub fn token_scope(&self) -> TokenScope {
        match self.user_type.as_deref() {
            Some(t) if t.eq_ignore_ascii_case("company") => TokenScope::Company,
            _ => TokenScope::Location,
        }
    }

    /// Build the cache entry, with expiry relative to `now` (epoch seconds).
    pub fn to_cache(&self, now: u64, scope: TokenScope) -> TokenCache {
        TokenCache {
            access_token: self.access_token.clone(),
            expires_at: now.saturating_add(self.expires_in),
            scopes: self.scope.clone(),
            scope,
        }
    }

    /// Refresh token, treating an empty string as absent.
    pub fn refresh_token(&self) -> Option<String> {
        self.refresh_token.clone().filter(|t| !t.is_empty())
    }
}

/// Grant sent to the token endpoint.
#[derive(Debug, Clone, Copy)]
pub enum Grant<'a> {
    AuthorizationCode(&'a str),
    RefreshToken(&'a str),
}

impl Grant<'_> {
    pub fn grant_type(&self) -> &'static str {
        match self {
            Self::AuthorizationCode(_) => "authorization_code",
            Self::RefreshToken(_) => "refresh_token",
        }
    }
}

/// `user_type` form value for a scope.
pub fn user_type_param(scope: TokenScope) -> &'static str {
    match scope {
        TokenScope::Company => "Company",
        TokenScope::Location => "Location",
    }
}
