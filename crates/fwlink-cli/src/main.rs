//! fwlink - Command-line tool for flashing firmware to embedded devices
//!
//! Uploads an image over HTTP, reports whether the device accepted it and
//! waits for the device to come back after its reboot.

mod commands;
mod config;
mod guard;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::{CliOverrides, Config};
use crate::output::{OutputContext, OutputFormat};

#[derive(Parser)]
#[command(name = "fwlink")]
#[command(author, version, about = "Firmware update tool for embedded devices")]
#[command(propagate_version = true)]
struct Cli {
    /// Device URL [default: http://192.168.4.1]
    #[arg(short, long, env = "FWLINK_SERVER")]
    server: Option<String>,

    /// CLI configuration file path
    #[arg(short, long, env = "FWLINK_CONFIG")]
    config: Option<PathBuf>,

    /// Device configuration file (YAML: endpoints, limits, timeouts)
    #[arg(short, long, env = "FWLINK_DEVICE_CONFIG")]
    device_config: Option<PathBuf>,

    /// API key sent with every request
    #[arg(long, env = "FWLINK_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Output format
    #[arg(short, long, value_enum)]
    output: Option<OutputFormat>,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,

    /// Minimal output (for scripting)
    #[arg(short, long)]
    quiet: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Flash a firmware image to the device
    Flash {
        /// Firmware file path
        file: PathBuf,

        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// Check a firmware image without uploading it
    Check {
        /// Firmware file path
        file: PathBuf,
    },

    /// Wait until the device answers its health endpoint
    Wait,

    /// Show the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();

    // Load config file
    let config = if let Some(config_path) = &cli.config {
        Config::load_from(config_path)?
    } else {
        Config::load().unwrap_or_default()
    };

    // Merge CLI args with config
    let merged = config.merge_with_args(CliOverrides {
        server: cli.server.as_deref(),
        output: cli.output,
        no_color: cli.no_color,
        api_key: cli.api_key.as_deref(),
        device_config: cli.device_config.as_deref(),
    });
    let update_config = merged.update_config()?;
    debug!(
        server = %update_config.connection.base_url,
        device_config = ?merged.device_config,
        "Resolved configuration"
    );

    // Create output context
    let ctx = OutputContext::new(merged.output, merged.no_color, cli.quiet);

    // Execute command
    let result = match &cli.command {
        Commands::Flash { file, yes } => commands::flash(&update_config, file, *yes, &ctx).await,
        Commands::Check { file } => commands::check(&update_config, file, &ctx),
        Commands::Wait => commands::wait(&update_config, &ctx).await,
        Commands::Config => commands::config::show(&update_config, &ctx),
    };

    if let Err(e) = result {
        ctx.error(&format!("Error: {:#}", e));
        std::process::exit(1);
    }

    Ok(())
}
