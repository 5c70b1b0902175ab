use axum::{
    extract::{Request, State},
    http::header::HOST,
    middleware::Next,
    response::Response,
};

use crate::config::AddressingMode;
use crate::error::ApiError;
use crate::types::TenantId;

/// Tenant the request's host resolved to, if any. `None` is the public site.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestTenant(pub Option<TenantId>);

impl RequestTenant {
    pub fn tenant_id(&self) -> Option<&TenantId> {
        self.0.as_ref()
    }

    /// Tenant-scoped routes answer 404 when no tenant was addressed
    pub fn require(&self) -> Result<&TenantId, ApiError> {
        self.0.as_ref().ok_or_else(ApiError::tenant_not_found)
    }
}

/// Extract the tenant id from a host name.
///
/// Development: `acme.localhost:3000` gives `acme`.
/// Production: `acme.example.com` gives `acme`; the apex and `www` give nothing.
pub fn resolve_tenant(host: &str, mode: AddressingMode) -> Option<TenantId> {
    let host = host.trim().to_ascii_lowercase();
    // IP literals never carry a tenant
    if host.starts_with('[') {
        return None;
    }
    let hostname = host.split(':').next().unwrap_or_default();
    let hostname = hostname.strip_suffix('.').unwrap_or(hostname);
    let labels: Vec<&str> = hostname.split('.').collect();

    let candidate = match mode {
        AddressingMode::Development => match labels.as_slice() {
            [first, second] if second.starts_with("localhost") => *first,
            _ => return None,
        },
        AddressingMode::Production => {
            if labels.len() <= 2 || labels[0] == "www" {
                return None;
            }
            labels[0]
        }
    };

    TenantId::parse(candidate).ok()
}

/// Middleware that attaches a `RequestTenant` to every request. Does no I/O.
pub async fn resolve_tenant_middleware(
    State(mode): State<AddressingMode>,
    mut request: Request,
    next: Next,
) -> Response {
    let host = request
        .headers()
        .get(HOST)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .or_else(|| request.uri().authority().map(|authority| authority.to_string()));

    let tenant = host.as_deref().and_then(|host| resolve_tenant(host, mode));
    tracing::debug!("Host {:?} resolved to tenant {:?}", host, tenant);

    request.extensions_mut().insert(RequestTenant(tenant));
    next.run(request).await
}
