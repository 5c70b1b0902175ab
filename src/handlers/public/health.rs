// handlers/public/health.rs - GET /health handler

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

use crate::database::PoolFactory;
use crate::server::AppState;

pub async fn health<F: PoolFactory>(State(state): State<AppState<F>>) -> impl IntoResponse {
    let now = chrono::Utc::now();
    let cached_tenants = state.connections.cached_tenants().await.len();

    match state.directory.health_check().await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "data": {
                    "status": "ok",
                    "timestamp": now,
                    "directory": "ok",
                    "cached_tenant_pools": cached_tenants
                }
            })),
        ),
        Err(e) => {
            tracing::error!("Control-plane health check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "success": false,
                    "error": "directory unavailable",
                    "data": {
                        "status": "degraded",
                        "timestamp": now
                    }
                })),
            )
        }
    }
}
