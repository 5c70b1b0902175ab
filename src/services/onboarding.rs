use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::crypto::{CipherError, CredentialCipher};
use crate::directory::{DirectoryError, TenantDirectory};
use crate::provisioner::{DatabaseProvisioner, ProvisionedDatabase, ProvisionerError};
use crate::schema::{SchemaApplicator, SchemaError};
use crate::types::{TenantId, TenantStatus};

const MAX_ORGANIZATION_NAME_LEN: usize = 200;

/// Signup form as submitted by a new organization
#[derive(Debug, Clone, Deserialize)]
pub struct ProvisioningRequest {
    pub organization_name: String,
    pub tenant_id: String,
    pub admin_email: String,
    pub admin_name: String,
}

/// First administrator of a new tenant, handed back for credential issuance
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdminIdentity {
    pub email: String,
    pub name: String,
}

struct ValidatedRequest {
    tenant_id: TenantId,
    organization_name: String,
    admin: AdminIdentity,
}

impl ProvisioningRequest {
    fn validate(&self) -> Result<ValidatedRequest, OnboardingError> {
        let tenant_id = TenantId::parse(&self.tenant_id.trim().to_ascii_lowercase())
            .map_err(|e| OnboardingError::InvalidRequest(format!("tenant_id: {e}")))?;

        let organization_name = self.organization_name.trim();
        if organization_name.is_empty() {
            return Err(OnboardingError::InvalidRequest("organization_name is required".to_string()));
        }
        if organization_name.chars().count() > MAX_ORGANIZATION_NAME_LEN {
            return Err(OnboardingError::InvalidRequest(format!(
                "organization_name is longer than {MAX_ORGANIZATION_NAME_LEN} characters"
            )));
        }

        let email = self.admin_email.trim();
        if !is_plausible_email(email) {
            return Err(OnboardingError::InvalidRequest("admin_email is not an email address".to_string()));
        }

        let name = self.admin_name.trim();
        if name.is_empty() {
            return Err(OnboardingError::InvalidRequest("admin_name is required".to_string()));
        }

        Ok(ValidatedRequest {
            tenant_id,
            organization_name: organization_name.to_string(),
            admin: AdminIdentity {
                email: email.to_ascii_lowercase(),
                name: name.to_string(),
            },
        })
    }
}

fn is_plausible_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.chars().any(char::is_whitespace)
        }
        None => false,
    }
}

/// A tenant that made it all the way to `Active`
#[derive(Debug, Clone, Serialize)]
pub struct OnboardedTenant {
    pub tenant_id: TenantId,
    pub organization_name: String,
    pub status: TenantStatus,
    pub admin: AdminIdentity,
}

/// Saga states, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OnboardingStep {
    Start,
    DirectoryReserved,
    ExternalDbProvisioned,
    SchemaApplied,
    SecretEncrypted,
    DirectoryActivated,
}

impl OnboardingStep {
    /// The step an attempt from this state is trying to reach
    pub fn next(self) -> Self {
        match self {
            OnboardingStep::Start => OnboardingStep::DirectoryReserved,
            OnboardingStep::DirectoryReserved => OnboardingStep::ExternalDbProvisioned,
            OnboardingStep::ExternalDbProvisioned => OnboardingStep::SchemaApplied,
            OnboardingStep::SchemaApplied => OnboardingStep::SecretEncrypted,
            OnboardingStep::SecretEncrypted | OnboardingStep::DirectoryActivated => {
                OnboardingStep::DirectoryActivated
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OnboardingStep::Start => "start",
            OnboardingStep::DirectoryReserved => "directory_reserved",
            OnboardingStep::ExternalDbProvisioned => "external_db_provisioned",
            OnboardingStep::SchemaApplied => "schema_applied",
            OnboardingStep::SecretEncrypted => "secret_encrypted",
            OnboardingStep::DirectoryActivated => "directory_activated",
        }
    }
}

impl std::fmt::Display for OnboardingStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Undo actions, run in the listed order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compensation {
    MarkDirectoryFailed,
    DeleteExternalDatabase,
}

/// What a failure while trying to reach `failed_at` has to undo
pub fn compensation_plan(failed_at: OnboardingStep) -> &'static [Compensation] {
    match failed_at {
        OnboardingStep::Start | OnboardingStep::DirectoryReserved => &[],
        OnboardingStep::ExternalDbProvisioned => &[Compensation::MarkDirectoryFailed],
        OnboardingStep::SchemaApplied | OnboardingStep::SecretEncrypted | OnboardingStep::DirectoryActivated => {
            &[Compensation::MarkDirectoryFailed, Compensation::DeleteExternalDatabase]
        }
    }
}

/// What the person signing up should do next
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    PickAnotherId,
    RetryLater,
    ContactSupport,
}

#[derive(Debug, Error)]
pub enum OnboardingError {
    #[error("Invalid signup request: {0}")]
    InvalidRequest(String),

    #[error("Tenant id already taken: {0}")]
    DuplicateTenantId(TenantId),

    #[error("Database provider unavailable")]
    ProvisionerUnavailable(#[source] ProvisionerError),

    #[error("Database provider rejected the request")]
    ProvisionerRejected(#[source] ProvisionerError),

    #[error("Applying the tenant schema failed")]
    SchemaApplication(#[source] SchemaError),

    #[error("Encrypting the connection secret failed")]
    Cipher(#[source] CipherError),

    #[error("Activating the tenant failed")]
    ActivationFailed(#[source] DirectoryError),

    #[error("Onboarding timed out reaching {step}")]
    Timeout { step: OnboardingStep },

    #[error("Tenant directory error")]
    Directory(#[source] DirectoryError),

    #[error("Onboarding aborted: {0}")]
    Aborted(String),
}

impl OnboardingError {
    pub fn class(&self) -> FailureClass {
        match self {
            OnboardingError::InvalidRequest(_) | OnboardingError::DuplicateTenantId(_) => FailureClass::PickAnotherId,
            OnboardingError::ProvisionerUnavailable(_)
            | OnboardingError::Timeout { .. }
            | OnboardingError::Directory(_) => FailureClass::RetryLater,
            OnboardingError::ProvisionerRejected(_)
            | OnboardingError::SchemaApplication(_)
            | OnboardingError::Cipher(_)
            | OnboardingError::ActivationFailed(_)
            | OnboardingError::Aborted(_) => FailureClass::ContactSupport,
        }
    }
}

impl From<ProvisionerError> for OnboardingError {
    fn from(err: ProvisionerError) -> Self {
        if err.is_retryable() {
            OnboardingError::ProvisionerUnavailable(err)
        } else {
            OnboardingError::ProvisionerRejected(err)
        }
    }
}

impl From<SchemaError> for OnboardingError {
    fn from(err: SchemaError) -> Self {
        match err {
            SchemaError::Timeout(_) => OnboardingError::Timeout {
                step: OnboardingStep::SchemaApplied,
            },
            other => OnboardingError::SchemaApplication(other),
        }
    }
}

impl From<CipherError> for OnboardingError {
    fn from(err: CipherError) -> Self {
        OnboardingError::Cipher(err)
    }
}

/// Bounds on the external calls of one attempt
#[derive(Debug, Clone, Copy)]
pub struct StepTimeouts {
    pub provider: Duration,
    pub schema: Duration,
}

impl From<&AppConfig> for StepTimeouts {
    fn from(config: &AppConfig) -> Self {
        Self {
            provider: config.provider.request_timeout(),
            schema: config.schema.apply_timeout(),
        }
    }
}

/// Turns a signup into an isolated, schema-bearing, routable tenant database
#[derive(Clone)]
pub struct ProvisioningOrchestrator {
    directory: Arc<dyn TenantDirectory>,
    provisioner: Arc<dyn DatabaseProvisioner>,
    schema: Arc<dyn SchemaApplicator>,
    cipher: Arc<CredentialCipher>,
    timeouts: StepTimeouts,
}

impl ProvisioningOrchestrator {
    pub fn new(
        directory: Arc<dyn TenantDirectory>,
        provisioner: Arc<dyn DatabaseProvisioner>,
        schema: Arc<dyn SchemaApplicator>,
        cipher: Arc<CredentialCipher>,
        timeouts: StepTimeouts,
    ) -> Self {
        Self {
            directory,
            provisioner,
            schema,
            cipher,
            timeouts,
        }
    }

    /// Run one onboarding attempt to a terminal state.
    ///
    /// The saga runs on its own task: dropping this future stops the wait,
    /// not the saga, so a half-provisioned tenant is always either activated
    /// or compensated.
    pub async fn onboard(&self, request: ProvisioningRequest) -> Result<OnboardedTenant, OnboardingError> {
        let request = request.validate()?;
        let saga = Saga::new(request.tenant_id.clone());
        info!(
            "[onboard {}] Starting onboarding of tenant {} for '{}'",
            saga.attempt, request.tenant_id, request.organization_name
        );

        let orchestrator = self.clone();
        let organization_name = request.organization_name.clone();
        let task = tokio::spawn(async move { saga.run(&orchestrator, &organization_name).await });

        task.await
            .map_err(|e| OnboardingError::Aborted(e.to_string()))??;

        Ok(OnboardedTenant {
            tenant_id: request.tenant_id,
            organization_name: request.organization_name,
            status: TenantStatus::Active,
            admin: request.admin,
        })
    }
}

/// One onboarding attempt: where it got to and what it has to undo
struct Saga {
    attempt: Uuid,
    tenant_id: TenantId,
    step: OnboardingStep,
    provisioned: Option<ProvisionedDatabase>,
}

impl Saga {
    fn new(tenant_id: TenantId) -> Self {
        Self {
            attempt: Uuid::new_v4(),
            tenant_id,
            step: OnboardingStep::Start,
            provisioned: None,
        }
    }

    async fn run(mut self, deps: &ProvisioningOrchestrator, organization_name: &str) -> Result<(), OnboardingError> {
        match self.advance(deps, organization_name).await {
            Ok(()) => {
                info!("[onboard {}] Tenant {} is active", self.attempt, self.tenant_id);
                Ok(())
            }
            Err(err) => {
                let failed_at = self.step.next();
                warn!(
                    "[onboard {}] Tenant {} failed reaching {}: {}",
                    self.attempt, self.tenant_id, failed_at, err
                );
                self.compensate(deps, failed_at).await;
                Err(err)
            }
        }
    }

    async fn advance(&mut self, deps: &ProvisioningOrchestrator, organization_name: &str) -> Result<(), OnboardingError> {
        deps.directory
            .insert_provisioning(&self.tenant_id, organization_name)
            .await
            .map_err(|e| match e {
                DirectoryError::DuplicateTenantId(id) => OnboardingError::DuplicateTenantId(id),
                other => OnboardingError::Directory(other),
            })?;
        self.step = OnboardingStep::DirectoryReserved;

        let provisioned = bounded(
            OnboardingStep::ExternalDbProvisioned,
            deps.timeouts.provider,
            deps.provisioner.provision(&self.tenant_id),
        )
        .await?;
        info!(
            "[onboard {}] Provisioned external database {}",
            self.attempt, provisioned.external_project_id
        );
        let connection_string = provisioned.connection_string.clone();
        self.provisioned = Some(provisioned);
        self.step = OnboardingStep::ExternalDbProvisioned;

        bounded(
            OnboardingStep::SchemaApplied,
            deps.timeouts.schema,
            deps.schema.apply(&connection_string),
        )
        .await?;
        self.step = OnboardingStep::SchemaApplied;

        let encrypted = deps.cipher.encrypt(&connection_string)?;
        self.step = OnboardingStep::SecretEncrypted;

        deps.directory
            .mark_active(&self.tenant_id, &encrypted)
            .await
            .map_err(OnboardingError::ActivationFailed)?;
        self.step = OnboardingStep::DirectoryActivated;
        Ok(())
    }

    async fn compensate(&self, deps: &ProvisioningOrchestrator, failed_at: OnboardingStep) {
        for action in compensation_plan(failed_at) {
            match action {
                Compensation::MarkDirectoryFailed => {
                    if let Err(e) = deps.directory.mark_failed(&self.tenant_id).await {
                        error!(
                            "[onboard {}] Could not mark tenant {} failed: {}",
                            self.attempt, self.tenant_id, e
                        );
                    }
                }
                Compensation::DeleteExternalDatabase => {
                    if let Some(provisioned) = &self.provisioned {
                        self.delete_external(deps, &provisioned.external_project_id).await;
                    }
                }
            }
        }
    }

    /// One delete attempt; a failure leaves a marker for the orphan sweep
    async fn delete_external(&self, deps: &ProvisioningOrchestrator, external_project_id: &str) {
        let deleted = tokio::time::timeout(deps.timeouts.provider, deps.provisioner.delete(external_project_id)).await;
        let failure = match deleted {
            Ok(Ok(())) => {
                info!(
                    "[onboard {}] Deleted external database {}",
                    self.attempt, external_project_id
                );
                return;
            }
            Ok(Err(e)) => e.to_string(),
            Err(_) => "timed out".to_string(),
        };

        warn!(
            "[onboard {}] Could not delete external database {} ({}), flagging it for cleanup",
            self.attempt, external_project_id, failure
        );
        if let Err(e) = deps
            .directory
            .flag_orphaned_database(&self.tenant_id, external_project_id)
            .await
        {
            error!(
                "[onboard {}] External database {} is orphaned and could not be flagged: {}",
                self.attempt, external_project_id, e
            );
        }
    }
}

async fn bounded<T, E>(
    step: OnboardingStep,
    limit: Duration,
    call: impl Future<Output = Result<T, E>>,
) -> Result<T, OnboardingError>
where
    E: Into<OnboardingError>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result.map_err(Into::into),
        Err(_) => Err(OnboardingError::Timeout { step }),
    }
}
