// handlers/tenant/show.rs - GET /api/tenant handler

use axum::{extract::State, Extension};
use serde::Serialize;

use crate::database::PoolFactory;
use crate::error::ApiError;
use crate::middleware::{ApiResponse, ApiResult, RequestTenant};
use crate::server::AppState;
use crate::types::TenantId;

#[derive(Debug, Serialize)]
pub struct TenantDatabaseStatus {
    pub tenant_id: TenantId,
    pub database: &'static str,
}

/// Resolve the tenant's pool and prove it answers
pub async fn show<F: PoolFactory>(
    State(state): State<AppState<F>>,
    Extension(tenant): Extension<RequestTenant>,
) -> ApiResult<TenantDatabaseStatus> {
    let tenant_id = tenant.require()?;
    let handle = state.connections.get_connection(tenant_id).await?;

    state.connections.ping(&handle).await.map_err(|e| {
        tracing::error!("Tenant {} database did not answer: {}", tenant_id, e);
        ApiError::internal_server_error("An error occurred while processing your request")
    })?;

    Ok(ApiResponse::success(TenantDatabaseStatus {
        tenant_id: tenant_id.clone(),
        database: "ok",
    }))
}
