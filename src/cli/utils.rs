use serde_json::{json, Value};
use crate::cli::OutputFormat;

fn render_success(message: &str, data: Option<Value>) -> anyhow::Result<String> {
    let mut response = json!({
        "success": true,
        "message": message
    });

    if let (Some(object), Some(Value::Object(extra))) = (response.as_object_mut(), data) {
        object.extend(extra);
    }

    Ok(serde_json::to_string_pretty(&response)?)
}

/// Output a success message in the appropriate format
pub fn output_success(
    output_format: &OutputFormat,
    message: &str,
    data: Option<Value>,
) -> anyhow::Result<()> {
    match output_format {
        OutputFormat::Json => println!("{}", render_success(message, data)?),
        OutputFormat::Text => println!("✓ {}", message),
    }
    Ok(())
}

/// Output an error message in the appropriate format
pub fn output_error(
    output_format: &OutputFormat,
    message: &str,
    error_code: Option<&str>,
) -> anyhow::Result<()> {
    match output_format {
        OutputFormat::Json => {
            let mut response = json!({
                "success": false,
                "error": message
            });

            if let Some(code) = error_code {
                response["error_code"] = json!(code);
            }

            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        OutputFormat::Text => {
            eprintln!("Error: {}", message);
        }
    }
    Ok(())
}
