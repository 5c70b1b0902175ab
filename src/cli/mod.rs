pub mod commands;
pub mod context;
pub mod utils;

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};

use context::Context;

#[derive(Parser)]
#[command(name = "tenantctl")]
#[command(about = "tenantctl - operator tooling for the tenant directory")]
#[command(version)]
pub struct Cli {
    #[arg(long, global = true, help = "Output in JSON format")]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Create or update the control-plane schema")]
    Migrate,

    #[command(about = "Show a tenant's directory record")]
    Show {
        #[arg(help = "Tenant id")]
        tenant_id: String,
    },

    #[command(about = "Provision a new tenant database end to end")]
    Onboard(commands::onboard::OnboardArgs),

    #[command(about = "Stop routing requests to a tenant")]
    Suspend {
        #[arg(help = "Tenant id")]
        tenant_id: String,
    },

    #[command(about = "Resume routing requests to a suspended tenant")]
    Reactivate {
        #[arg(help = "Tenant id")]
        tenant_id: String,
    },

    #[command(about = "Retry deletion of databases left behind by failed onboardings")]
    Sweep,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    pub fn from_cli(cli: &Cli) -> Self {
        if cli.json {
            OutputFormat::Json
        } else {
            OutputFormat::Text
        }
    }
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let output_format = OutputFormat::from_cli(&cli);
    let context = Context::connect(crate::config::config()).await?;

    let result = match cli.command {
        Commands::Migrate => commands::migrate::handle(&context, &output_format).await,
        Commands::Show { tenant_id } => commands::tenant::show(&context, &tenant_id, &output_format).await,
        Commands::Onboard(args) => commands::onboard::handle(&context, args, &output_format).await,
        Commands::Suspend { tenant_id } => commands::tenant::suspend(&context, &tenant_id, &output_format).await,
        Commands::Reactivate { tenant_id } => {
            commands::tenant::reactivate(&context, &tenant_id, &output_format).await
        }
        Commands::Sweep => commands::sweep::handle(&context, &output_format).await,
    };

    context.close().await;
    result
}
