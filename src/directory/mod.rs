//! Tenant directory: the control-plane table mapping tenant ids to their
//! encrypted connection secret and lifecycle status.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use thiserror::Error;

use crate::types::{TenantId, TenantRecord, TenantStatus};

pub use memory::MemoryTenantDirectory;
pub use postgres::PgTenantDirectory;

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("Tenant not found: {0}")]
    NotFound(TenantId),

    #[error("Tenant id already taken: {0}")]
    DuplicateTenantId(TenantId),

    #[error("Tenant {tenant_id} cannot move from {from} to {to}")]
    InvalidStateTransition {
        tenant_id: TenantId,
        from: TenantStatus,
        to: TenantStatus,
    },

    #[error("Corrupt directory row: {0}")]
    CorruptRecord(String),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

/// Single-row, strongly consistent operations on the tenant directory
#[async_trait]
pub trait TenantDirectory: Send + Sync {
    /// `Ok(None)` means the tenant id is unknown
    async fn lookup(&self, tenant_id: &TenantId) -> Result<Option<TenantRecord>, DirectoryError>;

    /// Claim a tenant id. The uniqueness constraint is the only lock on tenant-id claims.
    async fn insert_provisioning(
        &self,
        tenant_id: &TenantId,
        organization_name: &str,
    ) -> Result<TenantRecord, DirectoryError>;

    /// `Provisioning -> Active`, storing the encrypted connection secret
    async fn mark_active(&self, tenant_id: &TenantId, encrypted_secret: &[u8]) -> Result<(), DirectoryError>;

    /// `Provisioning -> Failed`, idempotent once failed
    async fn mark_failed(&self, tenant_id: &TenantId) -> Result<(), DirectoryError>;

    /// `Active -> Suspended`, idempotent once suspended
    async fn suspend(&self, tenant_id: &TenantId) -> Result<(), DirectoryError>;

    /// `Suspended -> Active`
    async fn reactivate(&self, tenant_id: &TenantId) -> Result<(), DirectoryError>;

    /// Record an external database whose compensating delete did not go through
    async fn flag_orphaned_database(
        &self,
        tenant_id: &TenantId,
        external_project_id: &str,
    ) -> Result<(), DirectoryError>;

    async fn clear_orphaned_database(&self, tenant_id: &TenantId) -> Result<(), DirectoryError>;

    async fn list_orphaned(&self) -> Result<Vec<TenantRecord>, DirectoryError>;

    async fn health_check(&self) -> Result<(), DirectoryError>;
}

/// Status changes the directory performs, with the statuses each may start from.
/// A source equal to the target makes the transition idempotent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Transition {
    Activate,
    Fail,
    Suspend,
    Reactivate,
}

impl Transition {
    pub(crate) fn target(self) -> TenantStatus {
        match self {
            Transition::Activate | Transition::Reactivate => TenantStatus::Active,
            Transition::Fail => TenantStatus::Failed,
            Transition::Suspend => TenantStatus::Suspended,
        }
    }

    pub(crate) fn sources(self) -> &'static [TenantStatus] {
        match self {
            Transition::Activate => &[TenantStatus::Provisioning],
            Transition::Fail => &[TenantStatus::Provisioning, TenantStatus::Failed],
            Transition::Suspend => &[TenantStatus::Active, TenantStatus::Suspended],
            Transition::Reactivate => &[TenantStatus::Suspended, TenantStatus::Active],
        }
    }

    pub(crate) fn allows(self, from: TenantStatus) -> bool {
        self.sources().contains(&from)
    }

    /// Work out why a conditional transition matched no row
    pub(crate) fn rejection(self, tenant_id: &TenantId, current: Option<TenantStatus>) -> DirectoryError {
        match current {
            None => DirectoryError::NotFound(tenant_id.clone()),
            Some(from) => DirectoryError::InvalidStateTransition {
                tenant_id: tenant_id.clone(),
                from,
                to: self.target(),
            },
        }
    }
}
