//! In-crate fakes for unit tests

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::crypto::{CredentialCipher, KdfSettings};
use crate::database::{PoolError, PoolFactory};
use crate::directory::{DirectoryError, MemoryTenantDirectory, TenantDirectory};
use crate::provisioner::{project_name, DatabaseProvisioner, ProvisionedDatabase, ProvisionerError};
use crate::schema::{SchemaApplicator, SchemaError};
use crate::types::{TenantId, TenantRecord, TenantStatus};

/// Cheapest Argon2id settings the crate accepts
pub fn fast_kdf() -> KdfSettings {
    KdfSettings {
        salt: "test-salt-0123".to_string(),
        memory_kib: 64,
        iterations: 1,
    }
}

pub fn test_cipher() -> CredentialCipher {
    CredentialCipher::from_master_secret("test-master-secret", &fast_kdf()).unwrap()
}

pub fn connection_string_for(tenant_id: &str) -> String {
    format!("postgres://{tenant_id}:pw@db.example.net/{tenant_id}")
}

/// An `Active` record whose secret decrypts with `cipher`
pub fn active_record(cipher: &CredentialCipher, tenant_id: &str) -> TenantRecord {
    let mut record = TenantRecord::provisioning(TenantId::parse(tenant_id).unwrap(), format!("{tenant_id} Inc"));
    record.status = TenantStatus::Active;
    record.encrypted_connection_secret = Some(cipher.encrypt(&connection_string_for(tenant_id)).unwrap());
    record
}

#[derive(Debug, Clone)]
pub struct FakePool {
    pub connection_string: String,
    closed: Arc<AtomicBool>,
}

impl FakePool {
    /// Simulate the driver losing the pool
    pub fn kill(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
struct PoolFactoryState {
    opened: AtomicUsize,
    closed: AtomicUsize,
    fail_next_open: AtomicBool,
    open_delay: Mutex<Option<Duration>>,
}

/// Pool factory that counts opens and closes
#[derive(Clone, Default)]
pub struct FakePoolFactory {
    state: Arc<PoolFactoryState>,
}

impl FakePoolFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn opened(&self) -> usize {
        self.state.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.state.closed.load(Ordering::SeqCst)
    }

    pub fn fail_next_open(&self) {
        self.state.fail_next_open.store(true, Ordering::SeqCst);
    }

    pub fn set_open_delay(&self, delay: Duration) {
        *self.state.open_delay.lock().unwrap() = Some(delay);
    }
}

#[async_trait]
impl PoolFactory for FakePoolFactory {
    type Pool = FakePool;

    async fn open(&self, _tenant_id: &TenantId, connection_string: &str) -> Result<FakePool, PoolError> {
        let delay = *self.state.open_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.state.opened.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_next_open.swap(false, Ordering::SeqCst) {
            return Err(PoolError::Unavailable("connection refused".to_string()));
        }
        Ok(FakePool {
            connection_string: connection_string.to_string(),
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    fn is_alive(&self, pool: &FakePool) -> bool {
        !pool.is_closed()
    }

    async fn ping(&self, pool: &FakePool) -> Result<(), PoolError> {
        if pool.is_closed() {
            return Err(PoolError::Unavailable("pool closed".to_string()));
        }
        Ok(())
    }

    async fn close(&self, pool: FakePool) {
        pool.kill();
        self.state.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// How the next fake provider call should fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderFailure {
    Unavailable,
    Rejected,
}

impl ProviderFailure {
    fn to_error(self) -> ProvisionerError {
        match self {
            ProviderFailure::Unavailable => ProvisionerError::Unavailable("provider returned 503".to_string()),
            ProviderFailure::Rejected => ProvisionerError::Rejected {
                status: 422,
                message: "project limit reached".to_string(),
            },
        }
    }
}

#[derive(Default)]
struct ProvisionerState {
    provision_calls: AtomicUsize,
    delete_calls: AtomicUsize,
    provision_failure: Mutex<Option<ProviderFailure>>,
    delete_failure: Mutex<Option<ProviderFailure>>,
    provision_delay: Mutex<Option<Duration>>,
    deleted: Mutex<Vec<String>>,
}

/// Provider that hands out `project-<tenant>` databases
#[derive(Clone, Default)]
pub struct FakeProvisioner {
    state: Arc<ProvisionerState>,
}

impl FakeProvisioner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn provision_calls(&self) -> usize {
        self.state.provision_calls.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> usize {
        self.state.delete_calls.load(Ordering::SeqCst)
    }

    pub fn deleted(&self) -> Vec<String> {
        self.state.deleted.lock().unwrap().clone()
    }

    pub fn fail_provision(&self, failure: ProviderFailure) {
        *self.state.provision_failure.lock().unwrap() = Some(failure);
    }

    pub fn fail_delete(&self, failure: Option<ProviderFailure>) {
        *self.state.delete_failure.lock().unwrap() = failure;
    }

    pub fn set_provision_delay(&self, delay: Duration) {
        *self.state.provision_delay.lock().unwrap() = Some(delay);
    }
}

#[async_trait]
impl DatabaseProvisioner for FakeProvisioner {
    async fn provision(&self, tenant_id: &TenantId) -> Result<ProvisionedDatabase, ProvisionerError> {
        self.state.provision_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.state.provision_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let failure = *self.state.provision_failure.lock().unwrap();
        if let Some(failure) = failure {
            return Err(failure.to_error());
        }
        Ok(ProvisionedDatabase {
            external_project_id: format!("project-{}", project_name(tenant_id)),
            connection_string: connection_string_for(tenant_id.as_str()),
        })
    }

    async fn delete(&self, external_project_id: &str) -> Result<(), ProvisionerError> {
        self.state.delete_calls.fetch_add(1, Ordering::SeqCst);
        let failure = *self.state.delete_failure.lock().unwrap();
        if let Some(failure) = failure {
            return Err(failure.to_error());
        }
        self.state.deleted.lock().unwrap().push(external_project_id.to_string());
        Ok(())
    }
}

#[derive(Default)]
struct SchemaState {
    applied: Mutex<Vec<String>>,
    fail: AtomicBool,
    delay: Mutex<Option<Duration>>,
}

#[derive(Clone, Default)]
pub struct FakeSchemaApplicator {
    state: Arc<SchemaState>,
}

impl FakeSchemaApplicator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        let applicator = Self::default();
        applicator.state.fail.store(true, Ordering::SeqCst);
        applicator
    }

    pub fn applied(&self) -> Vec<String> {
        self.state.applied.lock().unwrap().clone()
    }

    pub fn set_apply_delay(&self, delay: Duration) {
        *self.state.delay.lock().unwrap() = Some(delay);
    }
}

#[async_trait]
impl SchemaApplicator for FakeSchemaApplicator {
    async fn apply(&self, connection_string: &str) -> Result<(), SchemaError> {
        let delay = *self.state.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.state.fail.load(Ordering::SeqCst) {
            return Err(SchemaError::Apply(sqlx::Error::Protocol(
                "relation \"users\" already exists".to_string(),
            )));
        }
        self.state.applied.lock().unwrap().push(connection_string.to_string());
        Ok(())
    }
}

/// Memory directory whose activation can be made to fail
#[derive(Default)]
pub struct FlakyDirectory {
    inner: MemoryTenantDirectory,
    fail_mark_active: AtomicBool,
}

impl FlakyDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_mark_active(&self) {
        self.fail_mark_active.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl TenantDirectory for FlakyDirectory {
    async fn lookup(&self, tenant_id: &TenantId) -> Result<Option<TenantRecord>, DirectoryError> {
        self.inner.lookup(tenant_id).await
    }

    async fn insert_provisioning(
        &self,
        tenant_id: &TenantId,
        organization_name: &str,
    ) -> Result<TenantRecord, DirectoryError> {
        self.inner.insert_provisioning(tenant_id, organization_name).await
    }

    async fn mark_active(&self, tenant_id: &TenantId, encrypted_secret: &[u8]) -> Result<(), DirectoryError> {
        if self.fail_mark_active.load(Ordering::SeqCst) {
            return Err(DirectoryError::Sqlx(sqlx::Error::PoolTimedOut));
        }
        self.inner.mark_active(tenant_id, encrypted_secret).await
    }

    async fn mark_failed(&self, tenant_id: &TenantId) -> Result<(), DirectoryError> {
        self.inner.mark_failed(tenant_id).await
    }

    async fn suspend(&self, tenant_id: &TenantId) -> Result<(), DirectoryError> {
        self.inner.suspend(tenant_id).await
    }

    async fn reactivate(&self, tenant_id: &TenantId) -> Result<(), DirectoryError> {
        self.inner.reactivate(tenant_id).await
    }

    async fn flag_orphaned_database(
        &self,
        tenant_id: &TenantId,
        external_project_id: &str,
    ) -> Result<(), DirectoryError> {
        self.inner.flag_orphaned_database(tenant_id, external_project_id).await
    }

    async fn clear_orphaned_database(&self, tenant_id: &TenantId) -> Result<(), DirectoryError> {
        self.inner.clear_orphaned_database(tenant_id).await
    }

    async fn list_orphaned(&self) -> Result<Vec<TenantRecord>, DirectoryError> {
        self.inner.list_orphaned().await
    }

    async fn health_check(&self) -> Result<(), DirectoryError> {
        self.inner.health_check().await
    }
}
