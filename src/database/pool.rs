use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;
use thiserror::Error;
use tracing::info;
use url::Url;

use crate::config::DatabaseConfig;
use crate::types::TenantId;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error("Connection pool unavailable: {0}")]
    Unavailable(String),
}

/// Opens and closes the driver pools the connection manager caches.
/// The manager is the only caller; nothing else opens long-lived tenant connections.
#[async_trait]
pub trait PoolFactory: Send + Sync + 'static {
    type Pool: Clone + Send + Sync + 'static;

    async fn open(&self, tenant_id: &TenantId, connection_string: &str) -> Result<Self::Pool, PoolError>;

    /// Cheap local check, no round trip
    fn is_alive(&self, pool: &Self::Pool) -> bool;

    /// Round trip to the tenant database
    async fn ping(&self, pool: &Self::Pool) -> Result<(), PoolError>;

    /// Close gracefully, waiting for checked-out connections to come back
    async fn close(&self, pool: Self::Pool);
}

/// sqlx Postgres pools for tenant databases
#[derive(Debug, Clone)]
pub struct PgPoolFactory {
    max_connections: u32,
    acquire_timeout: Duration,
}

impl PgPoolFactory {
    pub fn new(max_connections: u32, acquire_timeout: Duration) -> Self {
        Self {
            max_connections,
            acquire_timeout,
        }
    }
}

impl From<&DatabaseConfig> for PgPoolFactory {
    fn from(config: &DatabaseConfig) -> Self {
        Self::new(config.max_connections, config.connection_timeout())
    }
}

#[async_trait]
impl PoolFactory for PgPoolFactory {
    type Pool = PgPool;

    async fn open(&self, tenant_id: &TenantId, connection_string: &str) -> Result<PgPool, PoolError> {
        let pool = PgPoolOptions::new()
            .max_connections(self.max_connections)
            .acquire_timeout(self.acquire_timeout)
            .connect(connection_string)
            .await?;

        info!(
            "Created database pool for tenant {} at {}",
            tenant_id,
            redact_connection_string(connection_string)
        );
        Ok(pool)
    }

    fn is_alive(&self, pool: &PgPool) -> bool {
        !pool.is_closed()
    }

    async fn ping(&self, pool: &PgPool) -> Result<(), PoolError> {
        sqlx::query("SELECT 1").execute(pool).await?;
        Ok(())
    }

    async fn close(&self, pool: PgPool) {
        pool.close().await;
    }
}

/// Connection string with the password masked, safe for logs
pub fn redact_connection_string(connection_string: &str) -> String {
    match Url::parse(connection_string) {
        Ok(mut url) => {
            if url.password().is_some() {
                let _ = url.set_password(Some("***"));
            }
            url.into()
        }
        Err(_) => "<unparseable connection string>".to_string(),
    }
}
