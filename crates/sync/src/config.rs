// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

/// Configuration for the hubsync service.
#[derive(Debug, Clone, clap::Parser)]
#[command(name = "hubsync", version, about = "CRM marketplace install and reconciliation service")]
pub struct SyncConfig {
    /// Host to bind on.
    #[arg(long, default_value = "127.0.0.1", env = "HUBSYNC_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 8080, env = "HUBSYNC_PORT")]
    pub port: u16,

    /// Log output format.
    #[arg(long, value_enum, default_value = "text", env = "HUBSYNC_LOG_FORMAT")]
    pub log_format: LogFormat,

    /// Platform API base URL.
    #[arg(long, default_value = "https://services.leadconnectorhq.com", env = "HUBSYNC_PLATFORM_URL")]
    pub platform_url: String,

    /// Value sent in the `Version` header on platform API calls.
    #[arg(long, default_value = "2021-07-28", env = "HUBSYNC_PLATFORM_API_VERSION")]
    pub platform_api_version: String,

    /// OAuth client ID for the marketplace app.
    #[arg(long, default_value = "", env = "HUBSYNC_CLIENT_ID")]
    pub client_id: String,

    /// OAuth client secret for the marketplace app.
    #[arg(long, default_value = "", env = "HUBSYNC_CLIENT_SECRET", hide_env_values = true)]
    pub client_secret: String,

    /// OAuth redirect URI registered with the platform.
    #[arg(long, default_value = "", env = "HUBSYNC_REDIRECT_URI")]
    pub redirect_uri: String,

    /// Marketplace app ID (used for installed-location discovery).
    #[arg(long, default_value = "", env = "HUBSYNC_APP_ID")]
    pub app_id: String,

    /// Provider name recorded on account records.
    #[arg(long, default_value = "leadconnector", env = "HUBSYNC_PROVIDER")]
    pub provider: String,

    /// UI URL the OAuth callback redirects to after a successful install.
    #[arg(long, default_value = "/", env = "HUBSYNC_UI_URL")]
    pub ui_url: String,

    /// Seconds before expiry at which a cached token is treated as expired.
    #[arg(long, default_value_t = 60, env = "HUBSYNC_TOKEN_SKEW_SECS")]
    pub token_skew_secs: u64,

    /// Retries of the installed-locations lookup when it returns nothing.
    #[arg(long, default_value_t = 3, env = "HUBSYNC_DISCOVERY_RETRIES")]
    pub discovery_retries: u32,

    /// Fixed delay between installed-locations retries in milliseconds.
    #[arg(long, default_value_t = 1500, env = "HUBSYNC_DISCOVERY_RETRY_MS")]
    pub discovery_retry_ms: u64,

    /// Page size for the paginated location listing fallback.
    #[arg(long, default_value_t = 100, env = "HUBSYNC_DISCOVERY_PAGE_SIZE")]
    pub discovery_page_size: u32,

    /// Hard ceiling on pages fetched by the location listing fallback.
    #[arg(long, default_value_t = 50, env = "HUBSYNC_DISCOVERY_MAX_PAGES")]
    pub discovery_max_pages: u32,

    /// Concurrent token mints during install fan-out.
    #[arg(long, default_value_t = 4, env = "HUBSYNC_MINT_CONCURRENCY")]
    pub mint_concurrency: usize,

    /// Max uncommitted writes per store batch during cascade deletes.
    #[arg(long, default_value_t = 450, env = "HUBSYNC_BATCH_CAP")]
    pub batch_cap: usize,

    /// Page size used when walking sub-accounts and memberships.
    #[arg(long, default_value_t = 200, env = "HUBSYNC_CASCADE_PAGE_SIZE")]
    pub cascade_page_size: usize,

    /// Fixed delay between reconciliation attempts in seconds.
    #[arg(long, default_value_t = 30, env = "HUBSYNC_RECONCILE_DELAY_SECS")]
    pub reconcile_delay_secs: u64,

    /// Maximum reconciliation attempts per group.
    #[arg(long, default_value_t = 6, env = "HUBSYNC_RECONCILE_MAX_ATTEMPTS")]
    pub reconcile_max_attempts: u32,

    /// Shared secret expected in `X-Reconcile-Token` on the worker endpoint.
    #[arg(long, env = "HUBSYNC_RECONCILE_TOKEN", hide_env_values = true)]
    pub reconcile_token: Option<String>,

    /// Cloud Tasks API base URL.
    #[arg(long, default_value = "https://cloudtasks.googleapis.com", env = "HUBSYNC_TASKS_URL")]
    pub tasks_url: String,

    /// Cloud project that owns the reconciliation queue. Unset disables enqueueing.
    #[arg(long, env = "HUBSYNC_TASKS_PROJECT")]
    pub tasks_project: Option<String>,

    /// Cloud region of the reconciliation queue.
    #[arg(long, default_value = "us-central1", env = "HUBSYNC_TASKS_LOCATION")]
    pub tasks_location: String,

    /// Queue name.
    #[arg(long, default_value = "reconcile", env = "HUBSYNC_TASKS_QUEUE")]
    pub tasks_queue: String,

    /// Public URL of this service's `/tasks/reconcile` endpoint.
    #[arg(long, env = "HUBSYNC_WORKER_URL")]
    pub worker_url: Option<String>,

    /// Metadata server base URL (identity token source for the task queue).
    #[arg(long, default_value = "http://metadata.google.internal", env = "HUBSYNC_METADATA_URL")]
    pub metadata_url: String,

    /// Path of the JSON store snapshot. Unset keeps the store in memory only.
    #[arg(long, env = "HUBSYNC_STATE_PATH")]
    pub state_path: Option<PathBuf>,
}

impl SyncConfig {
    pub fn discovery_retry_delay(&self) -> Duration {
        Duration::from_millis(self.discovery_retry_ms)
    }

    pub fn reconcile_delay(&self) -> Duration {
        Duration::from_secs(self.reconcile_delay_secs)
    }

    /// Check cross-field constraints clap cannot express.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.batch_cap == 0 || self.batch_cap > crate::store::HARD_BATCH_LIMIT {
            anyhow::bail!(
                "--batch-cap must be between 1 and {}",
                crate::store::HARD_BATCH_LIMIT
            );
        }
        if self.cascade_page_size == 0 {
            anyhow::bail!("--cascade-page-size must be at least 1");
        }
        if self.discovery_page_size == 0 || self.discovery_max_pages == 0 {
            anyhow::bail!("--discovery-page-size and --discovery-max-pages must be at least 1");
        }
        if self.reconcile_max_attempts == 0 {
            anyhow::bail!("--reconcile-max-attempts must be at least 1");
        }
        if self.mint_concurrency == 0 {
            anyhow::bail!("--mint-concurrency must be at least 1");
        }
        if self.tasks_project.is_some() && self.worker_url.is_none() {
            anyhow::bail!("--worker-url is required when --tasks-project is set");
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
