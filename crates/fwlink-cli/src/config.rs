//! Configuration file handling for fwlink

use anyhow::{Context, Result};
use fwlink_client::UpdateConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::output::OutputFormat;

/// Address of a device running in access-point mode
pub const DEFAULT_SERVER: &str = "http://192.168.4.1";

/// Configuration for the CLI tool
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Default device URL
    pub server: Option<String>,
    /// Default output format
    pub output: Option<String>,
    /// Disable colored output
    pub no_color: Option<bool>,
    /// API key sent with every request
    pub api_key: Option<String>,
    /// Device configuration file (YAML)
    pub device_config: Option<PathBuf>,
}

impl Config {
    /// Load configuration from the default config file
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Get the default config file path
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Could not determine config directory")?
            .join("fwlink");

        Ok(config_dir.join("config.toml"))
    }

    /// Merge CLI arguments over config file values
    pub fn merge_with_args(&self, args: CliOverrides<'_>) -> MergedConfig {
        let output = args
            .output
            .or_else(|| self.output.as_deref().and_then(OutputFormat::parse))
            .unwrap_or_default();

        MergedConfig {
            server_override: args
                .server
                .map(String::from)
                .or_else(|| self.server.clone()),
            output,
            no_color: args.no_color || self.no_color.unwrap_or(false),
            api_key: args
                .api_key
                .map(String::from)
                .or_else(|| self.api_key.clone()),
            device_config: args
                .device_config
                .map(Path::to_path_buf)
                .or_else(|| self.device_config.clone()),
        }
    }
}

/// Values given on the command line or through the environment
#[derive(Debug, Default, Clone, Copy)]
pub struct CliOverrides<'a> {
    pub server: Option<&'a str>,
    pub output: Option<OutputFormat>,
    pub no_color: bool,
    pub api_key: Option<&'a str>,
    pub device_config: Option<&'a Path>,
}

/// Fully resolved configuration after merging CLI args
#[derive(Debug, Clone)]
pub struct MergedConfig {
    server_override: Option<String>,
    pub output: OutputFormat,
    pub no_color: bool,
    pub api_key: Option<String>,
    pub device_config: Option<PathBuf>,
}

impl MergedConfig {
    /// URL of the device
    pub fn server(&self) -> &str {
        self.server_override.as_deref().unwrap_or(DEFAULT_SERVER)
    }

    /// Build the update configuration
    ///
    /// Starts from the device configuration file when one is set, then
    /// applies the server URL and API key on top.
    pub fn update_config(&self) -> Result<UpdateConfig> {
        let mut config = match &self.device_config {
            Some(path) => UpdateConfig::from_yaml_file(path).with_context(|| {
                format!("Failed to load device config: {}", path.display())
            })?,
            None => UpdateConfig::builder(DEFAULT_SERVER).build(),
        };

        if self.device_config.is_none() || self.server_override.is_some() {
            config.connection.base_url = self.server().to_string();
        }
        if let Some(key) = &self.api_key {
            config.connection.api_key = Some(key.clone());
        }

        Ok(config)
    }
}
