use axum::{
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::config::AddressingMode;
use crate::database::{PoolFactory, TenantConnectionManager};
use crate::directory::TenantDirectory;
use crate::handlers::{public, tenant};
use crate::middleware::resolve_tenant_middleware;
use crate::services::ProvisioningOrchestrator;

/// Shared state handed to every handler
pub struct AppState<F: PoolFactory> {
    pub directory: Arc<dyn TenantDirectory>,
    pub connections: Arc<TenantConnectionManager<F>>,
    pub onboarding: ProvisioningOrchestrator,
}

impl<F: PoolFactory> Clone for AppState<F> {
    fn clone(&self) -> Self {
        Self {
            directory: Arc::clone(&self.directory),
            connections: Arc::clone(&self.connections),
            onboarding: self.onboarding.clone(),
        }
    }
}

pub fn app<F: PoolFactory>(state: AppState<F>, addressing: AddressingMode) -> Router {
    Router::new()
        // Public
        .route("/", get(public::root))
        .route("/health", get(public::health::<F>))
        .route("/api/signup", post(public::signup::<F>))
        // Tenant-scoped
        .route("/api/tenant", get(tenant::show::<F>))
        // Global middleware, outermost first
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(from_fn_with_state(addressing, resolve_tenant_middleware)),
        )
        .with_state(state)
}
