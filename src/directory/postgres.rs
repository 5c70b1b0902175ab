use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{Executor, FromRow, PgPool};
use std::time::Duration;
use tracing::info;

use super::{DirectoryError, TenantDirectory, Transition};
use crate::types::{TenantId, TenantRecord, TenantStatus};

const CONTROL_PLANE_SCHEMA: &str = include_str!("../../schema/control_plane.sql");

const RECORD_COLUMNS: &str = "tenant_id, organization_name, encrypted_connection_secret, status, \
     orphaned_project_id, created_at, updated_at";

#[derive(Debug, FromRow)]
struct TenantRow {
    tenant_id: String,
    organization_name: String,
    encrypted_connection_secret: Option<Vec<u8>>,
    status: String,
    orphaned_project_id: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<TenantRow> for TenantRecord {
    type Error = DirectoryError;

    fn try_from(row: TenantRow) -> Result<Self, Self::Error> {
        let tenant_id = TenantId::parse(&row.tenant_id)
            .map_err(|e| DirectoryError::CorruptRecord(format!("tenant_id '{}': {}", row.tenant_id, e)))?;
        let status = row
            .status
            .parse::<TenantStatus>()
            .map_err(|e| DirectoryError::CorruptRecord(format!("tenant '{}': {}", row.tenant_id, e)))?;

        Ok(TenantRecord {
            tenant_id,
            organization_name: row.organization_name,
            encrypted_connection_secret: row.encrypted_connection_secret,
            status,
            orphaned_project_id: row.orphaned_project_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Tenant directory backed by the control-plane PostgreSQL database
#[derive(Clone)]
pub struct PgTenantDirectory {
    pool: PgPool,
}

impl PgTenantDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> Result<Self, DirectoryError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect(database_url)
            .await?;
        info!("Connected to control-plane database");
        Ok(Self::new(pool))
    }

    /// Create the directory table if it does not exist yet
    pub async fn migrate(&self) -> Result<(), DirectoryError> {
        self.pool.execute(CONTROL_PLANE_SCHEMA).await?;
        info!("Control-plane schema is up to date");
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn current_status(&self, tenant_id: &TenantId) -> Result<Option<TenantStatus>, DirectoryError> {
        let status: Option<(String,)> = sqlx::query_as("SELECT status FROM tenants WHERE tenant_id = $1")
            .bind(tenant_id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        status
            .map(|(s,)| {
                s.parse::<TenantStatus>()
                    .map_err(|e| DirectoryError::CorruptRecord(e.to_string()))
            })
            .transpose()
    }

    async fn transition(
        &self,
        tenant_id: &TenantId,
        transition: Transition,
        encrypted_secret: Option<&[u8]>,
    ) -> Result<(), DirectoryError> {
        let sources: Vec<&str> = transition.sources().iter().map(|s| s.as_str()).collect();

        let updated: Option<(String,)> = sqlx::query_as(
            r#"
            UPDATE tenants
            SET status = $2,
                encrypted_connection_secret = COALESCE($4, encrypted_connection_secret),
                updated_at = NOW()
            WHERE tenant_id = $1 AND status = ANY($3)
            RETURNING tenant_id
            "#,
        )
        .bind(tenant_id.as_str())
        .bind(transition.target().as_str())
        .bind(sources)
        .bind(encrypted_secret)
        .fetch_optional(&self.pool)
        .await?;

        match updated {
            Some(_) => Ok(()),
            None => {
                let current = self.current_status(tenant_id).await?;
                Err(transition.rejection(tenant_id, current))
            }
        }
    }
}

#[async_trait]
impl TenantDirectory for PgTenantDirectory {
    async fn lookup(&self, tenant_id: &TenantId) -> Result<Option<TenantRecord>, DirectoryError> {
        let row = sqlx::query_as::<_, TenantRow>(&format!(
            "SELECT {RECORD_COLUMNS} FROM tenants WHERE tenant_id = $1"
        ))
        .bind(tenant_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(TenantRecord::try_from).transpose()
    }

    async fn insert_provisioning(
        &self,
        tenant_id: &TenantId,
        organization_name: &str,
    ) -> Result<TenantRecord, DirectoryError> {
        let row = sqlx::query_as::<_, TenantRow>(&format!(
            r#"
            INSERT INTO tenants (tenant_id, organization_name, status)
            VALUES ($1, $2, 'provisioning')
            ON CONFLICT (tenant_id) DO NOTHING
            RETURNING {RECORD_COLUMNS}
            "#
        ))
        .bind(tenant_id.as_str())
        .bind(organization_name)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => TenantRecord::try_from(row),
            None => Err(DirectoryError::DuplicateTenantId(tenant_id.clone())),
        }
    }

    async fn mark_active(&self, tenant_id: &TenantId, encrypted_secret: &[u8]) -> Result<(), DirectoryError> {
        self.transition(tenant_id, Transition::Activate, Some(encrypted_secret)).await
    }

    async fn mark_failed(&self, tenant_id: &TenantId) -> Result<(), DirectoryError> {
        self.transition(tenant_id, Transition::Fail, None).await
    }

    async fn suspend(&self, tenant_id: &TenantId) -> Result<(), DirectoryError> {
        self.transition(tenant_id, Transition::Suspend, None).await
    }

    async fn reactivate(&self, tenant_id: &TenantId) -> Result<(), DirectoryError> {
        self.transition(tenant_id, Transition::Reactivate, None).await
    }

    async fn flag_orphaned_database(
        &self,
        tenant_id: &TenantId,
        external_project_id: &str,
    ) -> Result<(), DirectoryError> {
        let result = sqlx::query(
            "UPDATE tenants SET orphaned_project_id = $2, updated_at = NOW() WHERE tenant_id = $1",
        )
        .bind(tenant_id.as_str())
        .bind(external_project_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DirectoryError::NotFound(tenant_id.clone()));
        }
        Ok(())
    }

    async fn clear_orphaned_database(&self, tenant_id: &TenantId) -> Result<(), DirectoryError> {
        let result = sqlx::query(
            "UPDATE tenants SET orphaned_project_id = NULL, updated_at = NOW() WHERE tenant_id = $1",
        )
        .bind(tenant_id.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DirectoryError::NotFound(tenant_id.clone()));
        }
        Ok(())
    }

    async fn list_orphaned(&self) -> Result<Vec<TenantRecord>, DirectoryError> {
        let rows = sqlx::query_as::<_, TenantRow>(&format!(
            "SELECT {RECORD_COLUMNS} FROM tenants WHERE orphaned_project_id IS NOT NULL ORDER BY created_at"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TenantRecord::try_from).collect()
    }

    async fn health_check(&self) -> Result<(), DirectoryError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
