use anyhow::Context;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tenantdb::config::config;
use tenantdb::crypto::CredentialCipher;
use tenantdb::database::{PgPoolFactory, TenantConnectionManager};
use tenantdb::directory::PgTenantDirectory;
use tenantdb::provisioner::HttpProvisioner;
use tenantdb::schema::PgSchemaApplicator;
use tenantdb::server::{app, AppState};
use tenantdb::services::{ProvisioningOrchestrator, StepTimeouts};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present so cargo run picks up CONTROL_PLANE_DATABASE_URL, TENANT_MASTER_SECRET, etc.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug")),
        )
        .init();

    // Initialize configuration (this loads the config singleton)
    let config = config();
    info!("Starting tenantdb in {:?} mode", config.environment);

    // Key derivation doubles as the startup check for the master secret
    let cipher = Arc::new(
        CredentialCipher::from_config(&config.security).context("Cannot derive the credential key")?,
    );

    let control_plane_url = config
        .database
        .control_plane_url
        .as_deref()
        .context("CONTROL_PLANE_DATABASE_URL is not set")?;
    let directory = Arc::new(
        PgTenantDirectory::connect(
            control_plane_url,
            config.database.max_connections,
            config.database.connection_timeout(),
        )
        .await
        .context("Failed to connect to the control-plane database")?,
    );
    if tenantdb::is_development!() {
        directory.migrate().await?;
    }

    let provisioner = Arc::new(HttpProvisioner::new(&config.provider)?);
    let schema = Arc::new(PgSchemaApplicator::from_config(&config.schema)?);

    let connections = Arc::new(
        TenantConnectionManager::new(
            directory.clone(),
            cipher.clone(),
            PgPoolFactory::from(&config.database),
            config.database.idle_timeout(),
        )
        .with_revalidate_after(config.database.revalidate_after()),
    );
    let reaper = connections.spawn_reaper(config.database.reaper_interval());

    let onboarding = ProvisioningOrchestrator::new(
        directory.clone(),
        provisioner,
        schema,
        cipher,
        StepTimeouts::from(config),
    );

    let state = AppState {
        directory: directory.clone(),
        connections: connections.clone(),
        onboarding,
    };

    let bind_addr = format!("0.0.0.0:{}", config.server.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", bind_addr))?;

    info!(
        "tenantdb listening on http://{} ({:?} addressing)",
        bind_addr, config.server.addressing
    );

    axum::serve(listener, app(state, config.server.addressing))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    reaper.abort();
    connections.close_all().await;
    directory.close().await;
    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
