use clap::Args;
use serde_json::json;

use crate::cli::context::Context;
use crate::cli::utils::output_success;
use crate::cli::OutputFormat;
use crate::services::ProvisioningRequest;

#[derive(Args, Debug)]
pub struct OnboardArgs {
    #[arg(long = "organization", help = "Organization display name")]
    pub organization_name: String,

    #[arg(long, help = "Desired tenant id (becomes the subdomain)")]
    pub tenant_id: String,

    #[arg(long, help = "Email of the first administrator")]
    pub admin_email: String,

    #[arg(long, help = "Name of the first administrator")]
    pub admin_name: String,
}

impl From<OnboardArgs> for ProvisioningRequest {
    fn from(args: OnboardArgs) -> Self {
        ProvisioningRequest {
            organization_name: args.organization_name,
            tenant_id: args.tenant_id,
            admin_email: args.admin_email,
            admin_name: args.admin_name,
        }
    }
}

pub async fn handle(context: &Context, args: OnboardArgs, output_format: &OutputFormat) -> anyhow::Result<()> {
    let orchestrator = context.orchestrator()?;

    match orchestrator.onboard(args.into()).await {
        Ok(tenant) => output_success(
            output_format,
            &format!("Tenant {} is active", tenant.tenant_id),
            Some(json!({ "tenant": tenant })),
        ),
        Err(e) => Err(anyhow::anyhow!("Onboarding failed ({:?}): {}", e.class(), e)),
    }
}
