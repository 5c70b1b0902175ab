use serde_json::json;

use crate::cli::context::Context;
use crate::cli::utils::output_success;
use crate::cli::OutputFormat;
use crate::types::TenantId;

pub async fn show(context: &Context, tenant_id: &str, output_format: &OutputFormat) -> anyhow::Result<()> {
    let tenant_id = TenantId::parse(tenant_id)?;
    let record = context.admin()?.show(&tenant_id).await?;

    match output_format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&json!({ "tenant": record }))?),
        OutputFormat::Text => {
            println!("{:<22} {}", "TENANT", record.tenant_id);
            println!("{:<22} {}", "ORGANIZATION", record.organization_name);
            println!("{:<22} {}", "STATUS", record.status);
            println!(
                "{:<22} {}",
                "SECRET",
                if record.encrypted_connection_secret.is_some() { "stored" } else { "none" }
            );
            if let Some(project_id) = &record.orphaned_project_id {
                println!("{:<22} {}", "ORPHANED DATABASE", project_id);
            }
            println!("{:<22} {}", "CREATED", record.created_at.format("%Y-%m-%d %H:%M"));
            println!("{:<22} {}", "UPDATED", record.updated_at.format("%Y-%m-%d %H:%M"));
        }
    }
    Ok(())
}

pub async fn suspend(context: &Context, tenant_id: &str, output_format: &OutputFormat) -> anyhow::Result<()> {
    let tenant_id = TenantId::parse(tenant_id)?;
    context.admin()?.suspend(&tenant_id).await?;
    output_success(
        output_format,
        &format!("Tenant {} suspended", tenant_id),
        Some(json!({ "tenant_id": tenant_id })),
    )
}

pub async fn reactivate(context: &Context, tenant_id: &str, output_format: &OutputFormat) -> anyhow::Result<()> {
    let tenant_id = TenantId::parse(tenant_id)?;
    context.admin()?.reactivate(&tenant_id).await?;
    output_success(
        output_format,
        &format!("Tenant {} reactivated", tenant_id),
        Some(json!({ "tenant_id": tenant_id })),
    )
}
