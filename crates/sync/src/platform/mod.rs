// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP client for the CRM platform API.

pub mod oauth;

use std::time::Duration;

use reqwest::{Client, RequestBuilder};
use serde::Deserialize;

use crate::config::SyncConfig;
use crate::platform::oauth::{user_type_param, Grant, TokenResponse};
use crate::store::TokenScope;

/// Errors from platform API calls.
#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("platform returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("unexpected response body: {0}")]
    Decode(String),
}

impl PlatformError {
    /// Network failures, 429, and 5xx are worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => !e.is_decode() && !e.is_builder(),
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::Decode(_) => false,
        }
    }
}

/// Minimal sub-account listing entry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LocationSummary {
    #[serde(alias = "_id")]
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LocationsEnvelope {
    #[serde(default)]
    locations: Vec<LocationSummary>,
}

/// Result of a single-record lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    Found,
    NotFound,
}

/// Phrases that name the looked-up record itself, not the caller or location.
const RECORD_NOT_FOUND: [&str; 2] = ["contact not found", "record not found"];

/// True when a lookup response says the record itself is gone.
///
/// Besides a plain 404, the platform sometimes reports a missing record with
/// a 400 or 422 and a body such as `{"statusCode":400,"message":"Contact not found"}`.
/// Auth, rate-limit, and server errors never count, whatever their body says.
pub fn is_record_not_found(status: u16, body: &str) -> bool {
    if status == 404 {
        return true;
    }
    if matches!(status, 401 | 403 | 429) || status >= 500 {
        return false;
    }
    let Ok(value) = serde_json::from_str::<serde_json::Value>(body) else {
        return false;
    };
    if value.get("statusCode").and_then(|v| v.as_u64()) == Some(404) {
        return true;
    }
    let names_record = |s: &str| {
        let s = s.to_lowercase();
        RECORD_NOT_FOUND.iter().any(|phrase| s.contains(phrase))
    };
    ["message", "error", "msg"].iter().any(|field| match value.get(*field) {
        Some(serde_json::Value::String(s)) => names_record(s.as_str()),
        Some(serde_json::Value::Array(items)) => {
            items.iter().filter_map(|v| v.as_str()).any(names_record)
        }
        _ => false,
    })
}

/// Platform API client. Cheap to clone.
#[derive(Debug, Clone)]
pub struct PlatformClient {
    base_url: String,
    api_version: String,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    app_id: String,
    http: Client,
}

impl PlatformClient {
    pub fn new(config: &SyncConfig) -> Self {
        let http = Client::builder().timeout(Duration::from_secs(30)).build().unwrap_or_default();
        Self {
            base_url: config.platform_url.trim_end_matches('/').to_owned(),
            api_version: config.platform_api_version.clone(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            redirect_uri: config.redirect_uri.clone(),
            app_id: config.app_id.clone(),
            http,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authed(&self, req: RequestBuilder, token: &str) -> RequestBuilder {
        req.bearer_auth(token).header("Version", &self.api_version).header("Accept", "application/json")
    }

    async fn read_json<T: serde::de::DeserializeOwned>(
        resp: reqwest::Response,
    ) -> Result<T, PlatformError> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(PlatformError::Status { status: status.as_u16(), body });
        }
        let bytes = resp.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| PlatformError::Decode(e.to_string()))
    }

    /// Call the OAuth token endpoint.
    pub async fn token(
        &self,
        grant: Grant<'_>,
        user_type: Option<TokenScope>,
    ) -> Result<TokenResponse, PlatformError> {
        let mut form = vec![
            ("grant_type", grant.grant_type()),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ];
        match grant {
            Grant::AuthorizationCode(code) => {
                form.push(("code", code));
                form.push(("redirect_uri", self.redirect_uri.as_str()));
            }
            Grant::RefreshToken(token) => form.push(("refresh_token", token)),
        }
        if let Some(scope) = user_type {
            form.push(("user_type", user_type_param(scope)));
        }
        let resp = self
            .http
            .post(self.url("/oauth/token"))
            .header("Accept", "application/json")
            .form(&form)
            .send()
            .await?;
        Self::read_json(resp).await
    }

    /// Mint a sub-account token from a parent-scoped token.
    pub async fn mint_location_token(
        &self,
        parent_token: &str,
        company_id: &str,
        location_id: &str,
    ) -> Result<TokenResponse, PlatformError> {
        let body = serde_json::json!({ "companyId": company_id, "locationId": location_id });
        let req = self.http.post(self.url("/oauth/locationToken")).json(&body);
        let resp = self.authed(req, parent_token).send().await?;
        Self::read_json(resp).await
    }

    /// Sub-accounts with this integration installed, per the platform's index.
    pub async fn installed_locations(
        &self,
        parent_token: &str,
        company_id: &str,
    ) -> Result<Vec<LocationSummary>, PlatformError> {
        let req = self.http.get(self.url("/oauth/installedLocations")).query(&[
            ("companyId", company_id),
            ("appId", self.app_id.as_str()),
            ("isInstalled", "true"),
        ]);
        let resp = self.authed(req, parent_token).send().await?;
        let env: LocationsEnvelope = Self::read_json(resp).await?;
        Ok(env.locations)
    }

    /// One page of every sub-account under the parent account. `page` is 1-based.
    pub async fn search_locations(
        &self,
        parent_token: &str,
        company_id: &str,
        page: u32,
        limit: u32,
    ) -> Result<Vec<LocationSummary>, PlatformError> {
        let req = self.http.get(self.url("/locations/search")).query(&[
            ("companyId", company_id.to_owned()),
            ("page", page.to_string()),
            ("limit", limit.to_string()),
        ]);
        let resp = self.authed(req, parent_token).send().await?;
        let env: LocationsEnvelope = Self::read_json(resp).await?;
        Ok(env.locations)
    }

    /// Look up a single record. 404 and structured not-found bodies both map to `NotFound`.
    pub async fn lookup_record(&self, token: &str, id: &str) -> Result<Lookup, PlatformError> {
        let req = self.http.get(self.url(&format!("/contacts/{id}")));
        let resp = self.authed(req, token).send().await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(Lookup::Found);
        }
        let body = resp.text().await.unwrap_or_default();
        if is_record_not_found(status.as_u16(), &body) {
            return Ok(Lookup::NotFound);
        }
        Err(PlatformError::Status { status: status.as_u16(), body })
    }
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
