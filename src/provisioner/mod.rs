//! Database provisioner: creates and deletes isolated tenant databases at an
//! external hosting provider. Never touches the tenant directory.

pub mod http;

use async_trait::async_trait;
use thiserror::Error;

use crate::types::TenantId;

pub use http::HttpProvisioner;

#[derive(Debug, Error)]
pub enum ProvisionerError {
    /// Transport failure, timeout or 5xx. Safe to retry later.
    #[error("Database provider unavailable: {0}")]
    Unavailable(String),

    /// 4xx. The request itself is wrong, retrying will not help.
    #[error("Database provider rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Database provider is misconfigured: {0}")]
    Misconfigured(String),
}

impl ProvisionerError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProvisionerError::Unavailable(_))
    }
}

/// A freshly created tenant database
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionedDatabase {
    /// Provider handle, needed to delete the database again
    pub external_project_id: String,
    pub connection_string: String,
}

#[async_trait]
pub trait DatabaseProvisioner: Send + Sync {
    async fn provision(&self, tenant_id: &TenantId) -> Result<ProvisionedDatabase, ProvisionerError>;

    /// Delete a database created by `provision`. Deleting one that is already gone succeeds.
    async fn delete(&self, external_project_id: &str) -> Result<(), ProvisionerError>;
}

/// Provider-side name for a tenant's database
pub fn project_name(tenant_id: &TenantId) -> String {
    format!("tenant-{}", tenant_id)
}
