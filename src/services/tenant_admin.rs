use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::database::{PoolFactory, TenantConnectionManager};
use crate::directory::{DirectoryError, TenantDirectory};
use crate::provisioner::DatabaseProvisioner;
use crate::types::{TenantId, TenantRecord};

/// Outcome of one orphan sweep
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub attempted: usize,
    pub cleaned: Vec<String>,
    pub pending: Vec<String>,
}

/// Operator actions on existing tenants
pub struct TenantAdminService<F: PoolFactory> {
    directory: Arc<dyn TenantDirectory>,
    provisioner: Arc<dyn DatabaseProvisioner>,
    connections: Option<Arc<TenantConnectionManager<F>>>,
    provider_timeout: Duration,
}

impl<F: PoolFactory> TenantAdminService<F> {
    pub fn new(
        directory: Arc<dyn TenantDirectory>,
        provisioner: Arc<dyn DatabaseProvisioner>,
        provider_timeout: Duration,
    ) -> Self {
        Self {
            directory,
            provisioner,
            connections: None,
            provider_timeout,
        }
    }

    /// Also drop cached pools of tenants that get suspended
    pub fn with_connections(mut self, connections: Arc<TenantConnectionManager<F>>) -> Self {
        self.connections = Some(connections);
        self
    }

    pub async fn show(&self, tenant_id: &TenantId) -> Result<TenantRecord, DirectoryError> {
        self.directory
            .lookup(tenant_id)
            .await?
            .ok_or_else(|| DirectoryError::NotFound(tenant_id.clone()))
    }

    /// Stop routing to a tenant. Immediate for an attached manager; other
    /// processes drop their pool once its revalidation window passes.
    pub async fn suspend(&self, tenant_id: &TenantId) -> Result<(), DirectoryError> {
        self.directory.suspend(tenant_id).await?;
        if let Some(connections) = &self.connections {
            connections.invalidate(tenant_id).await;
        }
        info!("Suspended tenant {}", tenant_id);
        Ok(())
    }

    pub async fn reactivate(&self, tenant_id: &TenantId) -> Result<(), DirectoryError> {
        self.directory.reactivate(tenant_id).await?;
        info!("Reactivated tenant {}", tenant_id);
        Ok(())
    }

    /// Retry the provider delete for every database a failed onboarding left behind
    pub async fn sweep_orphans(&self) -> Result<SweepReport, DirectoryError> {
        let orphaned = self.directory.list_orphaned().await?;
        let mut report = SweepReport::default();

        for record in orphaned {
            let Some(project_id) = record.orphaned_project_id.as_deref() else {
                continue;
            };
            report.attempted += 1;

            let deleted = tokio::time::timeout(self.provider_timeout, self.provisioner.delete(project_id)).await;
            match deleted {
                Ok(Ok(())) => {
                    self.directory.clear_orphaned_database(&record.tenant_id).await?;
                    info!("Cleaned up orphaned database {} of tenant {}", project_id, record.tenant_id);
                    report.cleaned.push(project_id.to_string());
                }
                Ok(Err(e)) => {
                    warn!("Orphaned database {} of tenant {} still pending: {}", project_id, record.tenant_id, e);
                    report.pending.push(project_id.to_string());
                }
                Err(_) => {
                    warn!("Orphaned database {} of tenant {} still pending: timed out", project_id, record.tenant_id);
                    report.pending.push(project_id.to_string());
                }
            }
        }

        Ok(report)
    }
}
