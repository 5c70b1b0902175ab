mod common;

use std::time::Duration;

use anyhow::Result;
use tenantdb::directory::{DirectoryError, PgTenantDirectory, TenantDirectory};
use tenantdb::types::{TenantId, TenantStatus};

/// Control-plane directory, or None when no database is configured
async fn directory() -> Result<Option<PgTenantDirectory>> {
    let _ = dotenvy::dotenv();
    let Ok(url) = std::env::var("CONTROL_PLANE_DATABASE_URL") else {
        eprintln!("CONTROL_PLANE_DATABASE_URL not set, skipping");
        return Ok(None);
    };
    let directory = PgTenantDirectory::connect(&url, 2, Duration::from_secs(5)).await?;
    directory.migrate().await?;
    Ok(Some(directory))
}

fn unique_id(prefix: &str) -> Result<TenantId> {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    Ok(TenantId::parse(&format!("{}-{}", prefix, &suffix[..12]))?)
}

#[tokio::test]
async fn lifecycle_round_trip() -> Result<()> {
    let Some(directory) = directory().await? else {
        return Ok(());
    };
    let id = unique_id("life")?;

    let record = directory.insert_provisioning(&id, "Lifecycle Inc").await?;
    assert_eq!(record.status, TenantStatus::Provisioning);
    assert!(matches!(
        directory.insert_provisioning(&id, "Again").await,
        Err(DirectoryError::DuplicateTenantId(_))
    ));

    directory.mark_active(&id, b"sealed-secret").await?;
    let record = directory.lookup(&id).await?.expect("record");
    assert_eq!(record.status, TenantStatus::Active);
    assert_eq!(record.encrypted_connection_secret.as_deref(), Some(&b"sealed-secret"[..]));

    assert!(matches!(
        directory.mark_failed(&id).await,
        Err(DirectoryError::InvalidStateTransition { from: TenantStatus::Active, .. })
    ));

    directory.suspend(&id).await?;
    directory.reactivate(&id).await?;
    assert_eq!(directory.lookup(&id).await?.expect("record").status, TenantStatus::Active);
    Ok(())
}

#[tokio::test]
async fn orphan_markers() -> Result<()> {
    let Some(directory) = directory().await? else {
        return Ok(());
    };
    let id = unique_id("orphan")?;

    directory.insert_provisioning(&id, "Orphan Inc").await?;
    directory.mark_failed(&id).await?;
    directory.mark_failed(&id).await?;
    directory.flag_orphaned_database(&id, "prj-orphan").await?;

    let orphaned = directory.list_orphaned().await?;
    assert!(orphaned.iter().any(|r| r.tenant_id == id));

    directory.clear_orphaned_database(&id).await?;
    let orphaned = directory.list_orphaned().await?;
    assert!(!orphaned.iter().any(|r| r.tenant_id == id));

    assert!(matches!(
        directory.mark_failed(&unique_id("ghost")?).await,
        Err(DirectoryError::NotFound(_))
    ));
    directory.health_check().await?;
    Ok(())
}
