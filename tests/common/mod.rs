#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::{delete, post},
    Json, Router,
};
use serde_json::{json, Value};

use tenantdb::config::ProviderConfig;
use tenantdb::crypto::{CredentialCipher, KdfSettings};
use tenantdb::database::{PoolError, PoolFactory};
use tenantdb::schema::{SchemaApplicator, SchemaError};
use tenantdb::types::TenantId;

pub const PROVIDER_TOKEN: &str = "test-provider-token";

/// What the mock provider answers to the next create
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateBehavior {
    Succeed,
    Reject,
    Fail,
    NoConnectionUri,
}

#[derive(Default)]
struct ProviderState {
    created: Mutex<Vec<String>>,
    deleted: Mutex<Vec<String>>,
    create_behavior: Mutex<Option<CreateBehavior>>,
    unauthorized: AtomicUsize,
}

/// Hosted-Postgres API stand-in, served on a free local port
pub struct MockProvider {
    pub base_url: String,
    state: Arc<ProviderState>,
}

impl MockProvider {
    pub async fn start() -> Result<Self> {
        let port = portpicker::pick_unused_port().context("failed to pick free port")?;
        let state = Arc::new(ProviderState::default());

        let router = Router::new()
            .route("/api/v2/projects", post(create_project))
            .route("/api/v2/projects/:id", delete(delete_project))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind(("127.0.0.1", port)).await?;
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });

        Ok(Self {
            base_url: format!("http://127.0.0.1:{}/api/v2", port),
            state,
        })
    }

    pub fn config(&self) -> ProviderConfig {
        ProviderConfig {
            api_url: self.base_url.clone(),
            api_token: Some(PROVIDER_TOKEN.to_string()),
            region: Some("aws-eu-central-1".to_string()),
            request_timeout_secs: 5,
        }
    }

    pub fn set_create_behavior(&self, behavior: CreateBehavior) {
        *self.state.create_behavior.lock().unwrap() = Some(behavior);
    }

    pub fn created(&self) -> Vec<String> {
        self.state.created.lock().unwrap().clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.state.deleted.lock().unwrap().clone()
    }

    pub fn unauthorized_calls(&self) -> usize {
        self.state.unauthorized.load(Ordering::SeqCst)
    }
}

fn authorized(state: &ProviderState, headers: &HeaderMap) -> bool {
    let expected = format!("Bearer {}", PROVIDER_TOKEN);
    let ok = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == expected);
    if !ok {
        state.unauthorized.fetch_add(1, Ordering::SeqCst);
    }
    ok
}

async fn create_project(
    State(state): State<Arc<ProviderState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    if !authorized(&state, &headers) {
        return (StatusCode::UNAUTHORIZED, Json(json!({"message": "bad token"})));
    }

    let name = body["project"]["name"].as_str().unwrap_or_default().to_string();
    let behavior = (*state.create_behavior.lock().unwrap()).unwrap_or(CreateBehavior::Succeed);

    match behavior {
        CreateBehavior::Reject => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({"message": "project limit exceeded"})),
        ),
        CreateBehavior::Fail => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"message": "control plane overloaded"})),
        ),
        CreateBehavior::NoConnectionUri => (
            StatusCode::CREATED,
            Json(json!({"project": {"id": format!("prj-{name}")}, "connection_uris": []})),
        ),
        CreateBehavior::Succeed => {
            state.created.lock().unwrap().push(name.clone());
            (
                StatusCode::CREATED,
                Json(json!({
                    "project": {"id": format!("prj-{name}"), "name": name},
                    "connection_uris": [
                        {"connection_uri": format!("postgres://owner:pw@{name}.db.example.net/neondb")}
                    ]
                })),
            )
        }
    }
}

async fn delete_project(
    State(state): State<Arc<ProviderState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> (StatusCode, Json<Value>) {
    if !authorized(&state, &headers) {
        return (StatusCode::UNAUTHORIZED, Json(json!({"message": "bad token"})));
    }
    if id.starts_with("missing") {
        return (StatusCode::NOT_FOUND, Json(json!({"message": "not found"})));
    }
    state.deleted.lock().unwrap().push(id.clone());
    (StatusCode::OK, Json(json!({"project": {"id": id}})))
}

pub fn test_cipher() -> CredentialCipher {
    let kdf = KdfSettings {
        salt: "integration-salt".to_string(),
        memory_kib: 64,
        iterations: 1,
    };
    CredentialCipher::from_master_secret("integration-master-secret", &kdf).expect("cipher")
}

/// Schema applicator that records targets instead of connecting
#[derive(Clone, Default)]
pub struct RecordingSchema {
    applied: Arc<Mutex<Vec<String>>>,
    fail: Arc<AtomicBool>,
}

impl RecordingSchema {
    pub fn fail_from_now_on(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    pub fn applied(&self) -> Vec<String> {
        self.applied.lock().unwrap().clone()
    }
}

#[async_trait]
impl SchemaApplicator for RecordingSchema {
    async fn apply(&self, connection_string: &str) -> Result<(), SchemaError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(SchemaError::Timeout(Duration::from_secs(1)));
        }
        self.applied.lock().unwrap().push(connection_string.to_string());
        Ok(())
    }
}

/// Pools that only remember where they point
#[derive(Clone, Default)]
pub struct StubPoolFactory {
    opened: Arc<AtomicUsize>,
}

impl StubPoolFactory {
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PoolFactory for StubPoolFactory {
    type Pool = Arc<String>;

    async fn open(&self, _tenant_id: &TenantId, connection_string: &str) -> Result<Arc<String>, PoolError> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(connection_string.to_string()))
    }

    fn is_alive(&self, _pool: &Arc<String>) -> bool {
        true
    }

    async fn ping(&self, _pool: &Arc<String>) -> Result<(), PoolError> {
        Ok(())
    }

    async fn close(&self, _pool: Arc<String>) {}
}
