use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{DirectoryError, TenantDirectory, Transition};
use crate::types::{TenantId, TenantRecord};

/// In-process directory with the same semantics as the control-plane table.
/// Used by tests and local tooling.
#[derive(Default)]
pub struct MemoryTenantDirectory {
    records: RwLock<HashMap<TenantId, TenantRecord>>,
}

impl MemoryTenantDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a record as-is, bypassing lifecycle checks
    pub async fn insert_record(&self, record: TenantRecord) {
        self.records.write().await.insert(record.tenant_id.clone(), record);
    }

    async fn transition(
        &self,
        tenant_id: &TenantId,
        transition: Transition,
        encrypted_secret: Option<&[u8]>,
    ) -> Result<(), DirectoryError> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(tenant_id)
            .ok_or_else(|| transition.rejection(tenant_id, None))?;

        if !transition.allows(record.status) {
            return Err(transition.rejection(tenant_id, Some(record.status)));
        }

        record.status = transition.target();
        if let Some(secret) = encrypted_secret {
            record.encrypted_connection_secret = Some(secret.to_vec());
        }
        record.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl TenantDirectory for MemoryTenantDirectory {
    async fn lookup(&self, tenant_id: &TenantId) -> Result<Option<TenantRecord>, DirectoryError> {
        Ok(self.records.read().await.get(tenant_id).cloned())
    }

    async fn insert_provisioning(
        &self,
        tenant_id: &TenantId,
        organization_name: &str,
    ) -> Result<TenantRecord, DirectoryError> {
        let mut records = self.records.write().await;
        if records.contains_key(tenant_id) {
            return Err(DirectoryError::DuplicateTenantId(tenant_id.clone()));
        }
        let record = TenantRecord::provisioning(tenant_id.clone(), organization_name);
        records.insert(tenant_id.clone(), record.clone());
        Ok(record)
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
        let mut records = self.records.write().await;
        let record = records
            .get_mut(tenant_id)
            .ok_or_else(|| DirectoryError::NotFound(tenant_id.clone()))?;
        record.orphaned_project_id = Some(external_project_id.to_string());
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn clear_orphaned_database(&self, tenant_id: &TenantId) -> Result<(), DirectoryError> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(tenant_id)
            .ok_or_else(|| DirectoryError::NotFound(tenant_id.clone()))?;
        record.orphaned_project_id = None;
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn list_orphaned(&self) -> Result<Vec<TenantRecord>, DirectoryError> {
        let records = self.records.read().await;
        let mut orphaned: Vec<TenantRecord> = records
            .values()
            .filter(|record| record.orphaned_project_id.is_some())
            .cloned()
            .collect();
        orphaned.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(orphaned)
    }

    async fn health_check(&self) -> Result<(), DirectoryError> {
        Ok(())
    }
}
