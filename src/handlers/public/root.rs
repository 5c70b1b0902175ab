// handlers/public/root.rs - GET / handler

use axum::Extension;
use serde_json::{json, Value};

use crate::middleware::{ApiResponse, RequestTenant};

/// Service banner, plus which tenant (if any) the host addressed
pub async fn root(Extension(tenant): Extension<RequestTenant>) -> ApiResponse<Value> {
    ApiResponse::success(json!({
        "name": "tenantdb",
        "version": env!("CARGO_PKG_VERSION"),
        "tenant": tenant.tenant_id(),
        "endpoints": {
            "signup": "POST /api/signup (public)",
            "tenant": "GET /api/tenant (tenant host)",
            "health": "GET /health (public)",
        }
    }))
}
