// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test infrastructure: mock upstream servers, builders, and assertion helpers.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Once};

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use clap::Parser;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::Mutex;

use crate::config::SyncConfig;
use crate::events::Reporter;
use crate::state::AppState;
use crate::store::{MemoryStore, Store};

/// Assert that an expression evaluates to `Err` whose Display output
/// contains the given substring.
#[macro_export]
macro_rules! assert_err_contains {
    ($expr:expr, $substr:expr) => {{
        let result = $expr;
        let err = result.expect_err(concat!("expected Err for: ", stringify!($expr)));
        let msg = err.to_string();
        assert!(msg.contains($substr), "expected error containing {:?}, got: {msg:?}", $substr);
    }};
}

async fn serve(app: Router) -> anyhow::Result<SocketAddr> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });
    Ok(addr)
}

fn reply(status: u16, body: &Value) -> axum::response::Response {
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(body.clone())).into_response()
}

// -- Mock platform -----------------------------------------------------------

/// A mint request as seen by the mock platform.
#[derive(Debug, Clone)]
pub struct MintCall {
    pub bearer: String,
    pub company_id: String,
    pub location_id: String,
}

#[derive(Default)]
struct PlatformState {
    token_responses: VecDeque<(u16, Value)>,
    last_token_response: Option<(u16, Value)>,
    token_forms: Vec<HashMap<String, String>>,
    mint_responses: HashMap<String, (u16, Value)>,
    mint_calls: Vec<MintCall>,
    installed_responses: VecDeque<(u16, Value)>,
    installed_calls: u32,
    locations: Vec<Value>,
    search_calls: u32,
    records: HashMap<String, (u16, Value)>,
    lookups: Vec<String>,
}

/// Scriptable stand-in for the platform API.
#[derive(Clone)]
pub struct MockPlatform {
    pub addr: SocketAddr,
    state: Arc<Mutex<PlatformState>>,
}

impl MockPlatform {
    pub async fn start() -> anyhow::Result<Self> {
        let state = Arc::new(Mutex::new(PlatformState::default()));
        let app = Router::new()
            .route("/oauth/token", post(platform_token))
            .route("/oauth/locationToken", post(platform_mint))
            .route("/oauth/installedLocations", get(platform_installed))
            .route("/locations/search", get(platform_search))
            .route("/contacts/{id}", get(platform_lookup))
            .with_state(Arc::clone(&state));
        let addr = serve(app).await?;
        Ok(Self { addr, state })
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Queue a token endpoint response. The last one repeats once the queue drains.
    pub async fn push_token_response(&self, status: u16, body: Value) {
        self.state.lock().await.token_responses.push_back((status, body));
    }

    pub async fn set_mint_response(&self, location_id: &str, status: u16, body: Value) {
        self.state.lock().await.mint_responses.insert(location_id.to_owned(), (status, body));
    }

    /// Queue an installed-locations response. An empty list repeats once drained.
    pub async fn push_installed(&self, status: u16, body: Value) {
        self.state.lock().await.installed_responses.push_back((status, body));
    }

    /// Set the full location listing served page by page.
    pub async fn set_locations(&self, locations: Vec<Value>) {
        self.state.lock().await.locations = locations;
    }

    pub async fn set_record(&self, id: &str, status: u16, body: Value) {
        self.state.lock().await.records.insert(id.to_owned(), (status, body));
    }

    pub async fn token_forms(&self) -> Vec<HashMap<String, String>> {
        self.state.lock().await.token_forms.clone()
    }

    pub async fn mint_calls(&self) -> Vec<MintCall> {
        self.state.lock().await.mint_calls.clone()
    }

    pub async fn installed_calls(&self) -> u32 {
        self.state.lock().await.installed_calls
    }

    pub async fn search_calls(&self) -> u32 {
        self.state.lock().await.search_calls
    }

    pub async fn lookups(&self) -> Vec<String> {
        self.state.lock().await.lookups.clone()
    }

    /// Total requests that reached any endpoint.
    pub async fn total_calls(&self) -> usize {
        let s = self.state.lock().await;
        s.token_forms.len()
            + s.mint_calls.len()
            + s.installed_calls as usize
            + s.search_calls as usize
            + s.lookups.len()
    }
}

async fn platform_token(
    State(state): State<Arc<Mutex<PlatformState>>>,
    Form(form): Form<HashMap<String, String>>,
) -> axum::response::Response {
    let mut s = state.lock().await;
    s.token_forms.push(form);
    let next = match s.token_responses.pop_front() {
        Some(r) => {
            s.last_token_response = Some(r.clone());
            r
        }
        None => s.last_token_response.clone().unwrap_or((500, json!({"error": "unscripted"}))),
    };
    reply(next.0, &next.1)
}

async fn platform_mint(
    State(state): State<Arc<Mutex<PlatformState>>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> axum::response::Response {
    let bearer = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or_default()
        .to_owned();
    let company_id = body["companyId"].as_str().unwrap_or_default().to_owned();
    let location_id = body["locationId"].as_str().unwrap_or_default().to_owned();
    let mut s = state.lock().await;
    s.mint_calls.push(MintCall { bearer, company_id, location_id: location_id.clone() });
    let (status, body) = s.mint_responses.get(&location_id).cloned().unwrap_or_else(|| {
        (
            200,
            json!({
                "access_token": format!("minted-{location_id}"),
                "expires_in": 86399,
                "scope": "contacts.readonly",
                "userType": "Location",
                "locationId": location_id,
            }),
        )
    });
    reply(status, &body)
}

async fn platform_installed(
    State(state): State<Arc<Mutex<PlatformState>>>,
) -> axum::response::Response {
    let mut s = state.lock().await;
    s.installed_calls += 1;
    let (status, body) =
        s.installed_responses.pop_front().unwrap_or((200, json!({ "locations": [] })));
    reply(status, &body)
}

async fn platform_search(
    State(state): State<Arc<Mutex<PlatformState>>>,
    Query(params): Query<HashMap<String, String>>,
) -> axum::response::Response {
    let mut s = state.lock().await;
    s.search_calls += 1;
    let page: usize = params.get("page").and_then(|p| p.parse().ok()).unwrap_or(1);
    let limit: usize = params.get("limit").and_then(|p| p.parse().ok()).unwrap_or(100);
    let start = page.saturating_sub(1).saturating_mul(limit);
    let items: Vec<Value> = s.locations.iter().skip(start).take(limit).cloned().collect();
    reply(200, &json!({ "locations": items }))
}

async fn platform_lookup(
    State(state): State<Arc<Mutex<PlatformState>>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let mut s = state.lock().await;
    s.lookups.push(id.clone());
    let (status, body) = s.records.get(&id).cloned().unwrap_or((200, json!({ "contact": { "id": id } })));
    reply(status, &body)
}

// -- Mock task queue + metadata server ---------------------------------------

/// A task accepted by the mock queue.
#[derive(Debug, Clone)]
pub struct QueuedTask {
    pub name: String,
    pub bearer: String,
    pub body: Value,
}

#[derive(Default)]
struct QueueState {
    names: BTreeSet<String>,
    tasks: Vec<QueuedTask>,
    metadata_status: Option<u16>,
    create_status: Option<u16>,
}

/// Stand-in for both the task queue API and the metadata identity server.
#[derive(Clone)]
pub struct MockQueue {
    pub addr: SocketAddr,
    state: Arc<Mutex<QueueState>>,
}

impl MockQueue {
    pub async fn start() -> anyhow::Result<Self> {
        let state = Arc::new(Mutex::new(QueueState::default()));
        let app = Router::new()
            .route(
                "/computeMetadata/v1/instance/service-accounts/default/token",
                get(metadata_token),
            )
            .route(
                "/v2/projects/{project}/locations/{location}/queues/{queue}/tasks",
                post(create_task),
            )
            .with_state(Arc::clone(&state));
        let addr = serve(app).await?;
        Ok(Self { addr, state })
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Make the metadata server answer with this status.
    pub async fn fail_metadata(&self, status: u16) {
        self.state.lock().await.metadata_status = Some(status);
    }

    /// Make task creation answer with this status.
    pub async fn fail_create(&self, status: u16) {
        self.state.lock().await.create_status = Some(status);
    }

    /// Stop answering with scripted failures.
    pub async fn clear_failures(&self) {
        let mut s = self.state.lock().await;
        s.metadata_status = None;
        s.create_status = None;
    }

    pub async fn tasks(&self) -> Vec<QueuedTask> {
        self.state.lock().await.tasks.clone()
    }
}

async fn metadata_token(
    State(state): State<Arc<Mutex<QueueState>>>,
    headers: HeaderMap,
) -> axum::response::Response {
    let s = state.lock().await;
    if let Some(status) = s.metadata_status {
        return reply(status, &json!({ "error": "metadata unavailable" }));
    }
    if headers.get("metadata-flavor").and_then(|v| v.to_str().ok()) != Some("Google") {
        return reply(403, &json!({ "error": "missing Metadata-Flavor" }));
    }
    reply(200, &json!({ "access_token": "identity-token", "expires_in": 3599 }))
}

async fn create_task(
    State(state): State<Arc<Mutex<QueueState>>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> axum::response::Response {
    let mut s = state.lock().await;
    if let Some(status) = s.create_status {
        return reply(status, &json!({ "error": { "message": "scripted failure" } }));
    }
    let name = body["task"]["name"].as_str().unwrap_or_default().to_owned();
    if !s.names.insert(name.clone()) {
        return reply(409, &json!({ "error": { "code": 409, "status": "ALREADY_EXISTS" } }));
    }
    let bearer = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or_default()
        .to_owned();
    s.tasks.push(QueuedTask { name: name.clone(), bearer, body: body.clone() });
    reply(200, &json!({ "name": name }))
}

// -- Builders ----------------------------------------------------------------

static INIT: Once = Once::new();

/// Install the rustls crypto provider (needed for reqwest even on plain HTTP).
pub fn ensure_crypto_provider() {
    INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// Config pointing at the given mock servers, with short discovery delays.
pub fn test_config(platform_url: &str, queue_url: Option<&str>) -> SyncConfig {
    ensure_crypto_provider();
    let mut config = SyncConfig::parse_from(["hubsync"]);
    config.platform_url = platform_url.to_owned();
    config.client_id = "client-1".to_owned();
    config.client_secret = "secret-1".to_owned();
    config.redirect_uri = "https://app.example/oauth/callback".to_owned();
    config.app_id = "app-1".to_owned();
    config.ui_url = "https://app.example/dashboard".to_owned();
    config.discovery_retry_ms = 5;
    if let Some(url) = queue_url {
        config.tasks_url = url.to_owned();
        config.metadata_url = url.to_owned();
        config.tasks_project = Some("proj".to_owned());
        config.worker_url = Some("https://hubsync.example/tasks/reconcile".to_owned());
    }
    config
}

/// App state over a fresh in-memory store.
pub fn test_state(config: SyncConfig) -> (Arc<AppState>, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let dyn_store: Arc<dyn Store> = store.clone();
    let state = AppState::new(config, dyn_store, Reporter::new());
    (Arc::new(state), store)
}
