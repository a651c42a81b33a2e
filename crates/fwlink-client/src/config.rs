//! Update client configuration with YAML support

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Firmware update configuration
///
/// Can be loaded from YAML, JSON, or constructed programmatically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateConfig {
    /// Connection settings
    pub connection: ConnectionConfig,

    /// Endpoint paths on the device
    #[serde(default)]
    pub endpoints: EndpointsConfig,

    /// Image acceptance rules
    #[serde(default)]
    pub image: ImageConfig,

    /// Transfer timeouts
    #[serde(default)]
    pub timeouts: TimeoutsConfig,

    /// Post-update reconnect polling
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

/// Connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Base URL of the device
    pub base_url: String,

    /// API key for authentication (optional)
    #[serde(default)]
    pub api_key: Option<String>,

    /// API key header name (default: X-API-Key)
    #[serde(default = "default_api_key_header")]
    pub api_key_header: String,
}

fn default_api_key_header() -> String {
    "X-API-Key".to_string()
}

/// Endpoint paths configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointsConfig {
    /// Multipart upload endpoint: POST
    #[serde(default = "default_upload_path")]
    pub upload: String,

    /// Form field carrying the image
    #[serde(default = "default_form_field")]
    pub form_field: String,

    /// Liveness endpoint: GET
    #[serde(default = "default_health_path")]
    pub health: String,
}

impl Default for EndpointsConfig {
    fn default() -> Self {
        Self {
            upload: default_upload_path(),
            form_field: default_form_field(),
            health: default_health_path(),
        }
    }
}

fn default_upload_path() -> String {
    "/api/firmware/upload".to_string()
}

fn default_form_field() -> String {
    "file".to_string()
}

fn default_health_path() -> String {
    "/api/health/status".to_string()
}

/// Image acceptance rules applied before any network activity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageConfig {
    /// Accepted file extension, with or without the leading dot
    #[serde(default = "default_extension")]
    pub extension: String,

    /// Maximum image size in bytes (default: 2 MiB)
    #[serde(default = "default_max_size")]
    pub max_size: u64,

    /// Chunk size used when streaming the image (default: 4 KiB)
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            extension: default_extension(),
            max_size: default_max_size(),
            chunk_size: default_chunk_size(),
        }
    }
}

fn default_extension() -> String {
    "bin".to_string()
}

fn default_max_size() -> u64 {
    2 * 1024 * 1024
}

fn default_chunk_size() -> usize {
    4096
}

/// Timeout configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutsConfig {
    /// Overall transfer timeout in milliseconds (default: 3 minutes)
    #[serde(default = "default_transfer_timeout")]
    pub transfer_ms: u64,

    /// Connect timeout in milliseconds (default: 10s)
    #[serde(default = "default_connect_timeout")]
    pub connect_ms: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            transfer_ms: default_transfer_timeout(),
            connect_ms: default_connect_timeout(),
        }
    }
}

fn default_transfer_timeout() -> u64 {
    180_000 // 3 minutes
}

fn default_connect_timeout() -> u64 {
    10_000 // 10 seconds
}

/// Reconnect polling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Number of liveness probes before giving up (default: 20)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Timeout of a single probe in milliseconds (default: 5s)
    #[serde(default = "default_attempt_timeout")]
    pub attempt_timeout_ms: u64,

    /// Delay before each probe in milliseconds (default: 3s)
    #[serde(default = "default_interval")]
    pub interval_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            attempt_timeout_ms: default_attempt_timeout(),
            interval_ms: default_interval(),
        }
    }
}

fn default_max_attempts() -> u32 {
    20
}

fn default_attempt_timeout() -> u64 {
    5_000
}

fn default_interval() -> u64 {
    3_000
}

impl TimeoutsConfig {
    pub fn transfer(&self) -> Duration {
        Duration::from_millis(self.transfer_ms)
    }

    pub fn connect(&self) -> Duration {
        Duration::from_millis(self.connect_ms)
    }
}

impl ReconnectConfig {
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl UpdateConfig {
    /// Load configuration from a YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::IoError(e.to_string()))?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(yaml).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Parse configuration from JSON string
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Serialize configuration to YAML
    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        serde_yaml::to_string(self).map_err(|e| ConfigError::SerializeError(e.to_string()))
    }

    /// Serialize configuration to JSON
    pub fn to_json(&self) -> Result<String, ConfigError> {
        serde_json::to_string_pretty(self).map_err(|e| ConfigError::SerializeError(e.to_string()))
    }

    /// Create a builder for programmatic configuration
    pub fn builder(base_url: impl Into<String>) -> UpdateConfigBuilder {
        UpdateConfigBuilder::new(base_url)
    }
}

/// Builder for UpdateConfig
pub struct UpdateConfigBuilder {
    config: UpdateConfig,
}

impl UpdateConfigBuilder {
    /// Create a new builder with the given base URL
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            config: UpdateConfig {
                connection: ConnectionConfig {
                    base_url: base_url.into(),
                    api_key: None,
                    api_key_header: default_api_key_header(),
                },
                endpoints: EndpointsConfig::default(),
                image: ImageConfig::default(),
                timeouts: TimeoutsConfig::default(),
                reconnect: ReconnectConfig::default(),
            },
        }
    }

    /// Set the API key
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config.connection.api_key = Some(key.into());
        self
    }

    /// Set the API key header name
    pub fn api_key_header(mut self, header: impl Into<String>) -> Self {
        self.config.connection.api_key_header = header.into();
        self
    }

    /// Set the upload endpoint path
    pub fn upload_path(mut self, path: impl Into<String>) -> Self {
        self.config.endpoints.upload = path.into();
        self
    }

    /// Set the liveness endpoint path
    pub fn health_path(mut self, path: impl Into<String>) -> Self {
        self.config.endpoints.health = path.into();
        self
    }

    /// Set the accepted image extension
    pub fn extension(mut self, extension: impl Into<String>) -> Self {
        self.config.image.extension = extension.into();
        self
    }

    /// Set the maximum image size in bytes
    pub fn max_image_size(mut self, bytes: u64) -> Self {
        self.config.image.max_size = bytes;
        self
    }

    /// Set the upload chunk size in bytes
    pub fn chunk_size(mut self, bytes: usize) -> Self {
        self.config.image.chunk_size = bytes;
        self
    }

    /// Set the overall transfer timeout in milliseconds
    pub fn transfer_timeout_ms(mut self, ms: u64) -> Self {
        self.config.timeouts.transfer_ms = ms;
        self
    }

    /// Set the reconnect attempt budget
    pub fn reconnect_attempts(mut self, attempts: u32) -> Self {
        self.config.reconnect.max_attempts = attempts;
        self
    }

    /// Set the per-probe timeout in milliseconds
    pub fn reconnect_attempt_timeout_ms(mut self, ms: u64) -> Self {
        self.config.reconnect.attempt_timeout_ms = ms;
        self
    }

    /// Set the delay before each probe in milliseconds
    pub fn reconnect_interval_ms(mut self, ms: u64) -> Self {
        self.config.reconnect.interval_ms = ms;
        self
    }

    /// Build the configuration
    pub fn build(self) -> UpdateConfig {
        self.config
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yaml_parsing() {
        let yaml = r#"
connection:
  base_url: "http://192.168.4.1"
  api_key: "secret123"

image:
  max_size: 4194304

reconnect:
  max_attempts: 5
  interval_ms: 1000
"#;

        let config = UpdateConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.connection.base_url, "http://192.168.4.1");
        assert_eq!(config.connection.api_key, Some("secret123".to_string()));
        assert_eq!(config.image.max_size, 4 * 1024 * 1024);
        assert_eq!(config.image.extension, "bin");
        assert_eq!(config.reconnect.max_attempts, 5);
        assert_eq!(config.reconnect.interval_ms, 1000);
        assert_eq!(config.reconnect.attempt_timeout_ms, 5_000);
        assert_eq!(config.endpoints.upload, "/api/firmware/upload");
        assert_eq!(config.timeouts.transfer_ms, 180_000);
    }

    #[test]
    fn test_defaults() {
        let config = UpdateConfig::builder("http://device.local").build();
        assert_eq!(config.image.max_size, 2_097_152);
        assert_eq!(config.endpoints.form_field, "file");
        assert_eq!(config.endpoints.health, "/api/health/status");
        assert_eq!(config.reconnect.max_attempts, 20);
        assert_eq!(config.reconnect.interval(), Duration::from_secs(3));
        assert_eq!(config.timeouts.transfer(), Duration::from_secs(180));
    }

    #[test]
    fn test_builder() {
        let config = UpdateConfig::builder("http://10.0.0.7")
            .api_key("my-secret")
            .upload_path("/update")
            .health_path("/ping")
            .extension(".BIN")
            .max_image_size(1024)
            .transfer_timeout_ms(60_000)
            .reconnect_attempts(3)
            .build();

        assert_eq!(config.connection.api_key, Some("my-secret".to_string()));
        assert_eq!(config.endpoints.upload, "/update");
        assert_eq!(config.endpoints.health, "/ping");
        assert_eq!(config.image.max_size, 1024);
        assert_eq!(config.timeouts.transfer_ms, 60_000);
        assert_eq!(config.reconnect.max_attempts, 3);
        assert_eq!(config.image.extension, ".BIN");
    }

    #[test]
    fn test_json_parsing() {
        let json = r#"{"connection": {"base_url": "http://device"}, "timeouts": {"transfer_ms": 240000}}"#;
        let config = UpdateConfig::from_json(json).unwrap();
        assert_eq!(config.timeouts.transfer_ms, 240_000);
        assert_eq!(config.timeouts.connect_ms, 10_000);
    }

    #[test]
    fn test_missing_base_url_is_rejected() {
        let err = UpdateConfig::from_yaml("image:\n  max_size: 10\n").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn test_to_yaml() {
        let config = UpdateConfig::builder("http://192.168.4.1").build();

        let yaml = config.to_yaml().unwrap();
        assert!(yaml.contains("base_url"));
        assert!(yaml.contains("/api/firmware/upload"));
    }
}
