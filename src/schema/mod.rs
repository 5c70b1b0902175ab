//! Schema applicator: runs the tenant snapshot script against a freshly
//! provisioned database.

use async_trait::async_trait;
use sqlx::{Connection, Executor, PgConnection};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::SchemaConfig;
use crate::database::redact_connection_string;

const EMBEDDED_SNAPSHOT: &str = include_str!("../../schema/tenant.sql");

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("Could not connect to tenant database: {0}")]
    Connect(#[source] sqlx::Error),

    #[error("Schema script failed: {0}")]
    Apply(#[source] sqlx::Error),

    #[error("Schema application timed out after {0:?}")]
    Timeout(Duration),

    #[error("Could not read schema snapshot {path}: {source}")]
    Snapshot {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[async_trait]
pub trait SchemaApplicator: Send + Sync {
    async fn apply(&self, connection_string: &str) -> Result<(), SchemaError>;
}

/// Applies one snapshot script over a single short-lived connection
#[derive(Clone)]
pub struct PgSchemaApplicator {
    script: Arc<str>,
    timeout: Duration,
}

impl PgSchemaApplicator {
    pub fn new(script: impl Into<Arc<str>>, timeout: Duration) -> Self {
        Self {
            script: script.into(),
            timeout,
        }
    }

    /// Snapshot from `snapshot_path` if configured, the embedded one otherwise
    pub fn from_config(config: &SchemaConfig) -> Result<Self, SchemaError> {
        let script = match &config.snapshot_path {
            Some(path) => load_snapshot(path)?,
            None => EMBEDDED_SNAPSHOT.to_string(),
        };
        Ok(Self::new(script, config.apply_timeout()))
    }

    pub fn script(&self) -> &str {
        &self.script
    }

    async fn run(&self, connection_string: &str) -> Result<(), SchemaError> {
        let mut conn = PgConnection::connect(connection_string)
            .await
            .map_err(SchemaError::Connect)?;

        // Simple protocol, so a multi-statement script runs as one batch
        let result = conn.execute(&*self.script).await;

        if let Err(e) = conn.close().await {
            warn!("Failed to close schema connection cleanly: {}", e);
        }

        result.map(|_| ()).map_err(SchemaError::Apply)
    }
}

#[async_trait]
impl SchemaApplicator for PgSchemaApplicator {
    async fn apply(&self, connection_string: &str) -> Result<(), SchemaError> {
        tokio::time::timeout(self.timeout, self.run(connection_string))
            .await
            .map_err(|_| SchemaError::Timeout(self.timeout))??;

        info!(
            "Applied tenant schema to {}",
            redact_connection_string(connection_string)
        );
        Ok(())
    }
}

fn load_snapshot(path: &Path) -> Result<String, SchemaError> {
    std::fs::read_to_string(path).map_err(|source| SchemaError::Snapshot {
        path: path.display().to_string(),
        source,
    })
}
