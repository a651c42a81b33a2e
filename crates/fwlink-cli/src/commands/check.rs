//! Check command - validate an image without touching the device

use anyhow::{Context, Result};
use fwlink_client::{format_size, ImageValidator, UpdateConfig, UpdateImage};
use serde::Serialize;
use std::path::Path;

use crate::output::{OutputContext, OutputFormat};

#[derive(Debug, Serialize)]
struct CheckResult<'a> {
    name: &'a str,
    size: u64,
    valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
}

/// Check that an image would be accepted for upload
pub fn check(config: &UpdateConfig, file_path: &Path, ctx: &OutputContext) -> Result<()> {
    let image = UpdateImage::from_file(file_path)
        .with_context(|| format!("Failed to read firmware file: {}", file_path.display()))?;

    let validator = ImageValidator::from_config(config);
    let verdict = validator.validate(&image);

    let result = CheckResult {
        name: image.name(),
        size: image.size(),
        valid: verdict.is_ok(),
        code: verdict.as_ref().err().map(|r| r.code()),
        reason: verdict.as_ref().err().map(ToString::to_string),
    };

    match ctx.format {
        OutputFormat::Json => ctx.print_json(&result),
        OutputFormat::Text => ctx.print_kv(&[
            ("Name", image.name().to_string()),
            ("Size", format_size(image.size())),
            ("Limit", format_size(validator.max_size())),
        ]),
    }

    match verdict {
        Ok(()) => {
            ctx.success("Image is valid");
            Ok(())
        }
        Err(rejection) => Err(anyhow::anyhow!(rejection)).context("Firmware image rejected"),
    }
}
