// handlers/public/signup.rs - POST /api/signup handler

use axum::{extract::rejection::JsonRejection, extract::State, Json};

use crate::database::PoolFactory;
use crate::middleware::{ApiResponse, ApiResult};
use crate::server::AppState;
use crate::services::{OnboardedTenant, ProvisioningRequest};

/// Onboard a new organization into its own database.
///
/// ```json
/// {
///   "organization_name": "Acme Co",
///   "tenant_id": "acme",
///   "admin_email": "ada@acme.example",
///   "admin_name": "Ada Lovelace"
/// }
/// ```
///
/// Answers 201 once the tenant is active and routable.
pub async fn signup<F: PoolFactory>(
    State(state): State<AppState<F>>,
    body: Result<Json<ProvisioningRequest>, JsonRejection>,
) -> ApiResult<OnboardedTenant> {
    let Json(request) = body?;
    let tenant = state.onboarding.onboard(request).await?;
    Ok(ApiResponse::created(tenant))
}
