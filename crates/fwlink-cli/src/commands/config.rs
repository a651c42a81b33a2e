//! Config command - show the effective configuration

use anyhow::Result;
use fwlink_client::UpdateConfig;

use crate::config::Config;
use crate::output::{OutputContext, OutputFormat};

/// Print the configuration an update would run with
pub fn show(config: &UpdateConfig, ctx: &OutputContext) -> Result<()> {
    let mut config = config.clone();
    if config.connection.api_key.is_some() {
        config.connection.api_key = Some("********".to_string());
    }

    match ctx.format {
        OutputFormat::Json => ctx.print_json(&config),
        OutputFormat::Text => {
            if let Ok(path) = Config::config_path() {
                ctx.info(&format!("# CLI config: {}", path.display()));
            }
            print!("{}", config.to_yaml()?);
        }
    }
    Ok(())
}
