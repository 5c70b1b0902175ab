use anyhow::Context as _;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::crypto::CredentialCipher;
use crate::database::PgPoolFactory;
use crate::directory::PgTenantDirectory;
use crate::provisioner::HttpProvisioner;
use crate::schema::PgSchemaApplicator;
use crate::services::{ProvisioningOrchestrator, StepTimeouts, TenantAdminService};

/// Connections shared by every tenantctl command
pub struct Context {
    pub config: &'static AppConfig,
    pub directory: Arc<PgTenantDirectory>,
}

impl Context {
    pub async fn connect(config: &'static AppConfig) -> anyhow::Result<Self> {
        let url = config
            .database
            .control_plane_url
            .as_deref()
            .context("CONTROL_PLANE_DATABASE_URL is not set")?;

        let directory = PgTenantDirectory::connect(url, 2, config.database.connection_timeout())
            .await
            .context("Failed to connect to the control-plane database")?;

        Ok(Self {
            config,
            directory: Arc::new(directory),
        })
    }

    pub fn provisioner(&self) -> anyhow::Result<Arc<HttpProvisioner>> {
        Ok(Arc::new(HttpProvisioner::new(&self.config.provider)?))
    }

    pub fn admin(&self) -> anyhow::Result<TenantAdminService<PgPoolFactory>> {
        Ok(TenantAdminService::new(
            self.directory.clone(),
            self.provisioner()?,
            self.config.provider.request_timeout(),
        ))
    }

    pub fn orchestrator(&self) -> anyhow::Result<ProvisioningOrchestrator> {
        let cipher = CredentialCipher::from_config(&self.config.security)
            .context("Cannot derive the credential key")?;
        let schema = PgSchemaApplicator::from_config(&self.config.schema)?;

        Ok(ProvisioningOrchestrator::new(
            self.directory.clone(),
            self.provisioner()?,
            Arc::new(schema),
            Arc::new(cipher),
            StepTimeouts::from(self.config),
        ))
    }

    pub async fn close(&self) {
        self.directory.close().await;
    }
}
