use crate::cli::context::Context;
use crate::cli::utils::output_success;
use crate::cli::OutputFormat;

pub async fn handle(context: &Context, output_format: &OutputFormat) -> anyhow::Result<()> {
    context.directory.migrate().await?;
    output_success(output_format, "Control-plane schema is up to date", None)
}
