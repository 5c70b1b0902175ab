use serde_json::json;

use crate::cli::context::Context;
use crate::cli::utils::output_success;
use crate::cli::OutputFormat;

pub async fn handle(context: &Context, output_format: &OutputFormat) -> anyhow::Result<()> {
    let report = context.admin()?.sweep_orphans().await?;

    if let OutputFormat::Text = output_format {
        for project_id in &report.pending {
            println!("  pending: {}", project_id);
        }
    }

    output_success(
        output_format,
        &format!(
            "Swept {} orphaned databases: {} cleaned, {} still pending",
            report.attempted,
            report.cleaned.len(),
            report.pending.len()
        ),
        Some(json!({ "report": report })),
    )
}
