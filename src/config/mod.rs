//! Configuration module for the RTVI client
//!
//! This module handles client configuration from various sources: .env files, YAML files,
//! and environment variables. Priority: YAML > ENV vars > .env values > defaults.
//! The configuration is split into logical submodules for maintainability.
//!
//! # Modules
//! - `yaml`: YAML configuration file loading
//! - `env`: Environment variable loading
//! - `merge`: Merging YAML and environment configurations
//! - `validation`: Configuration validation logic
//!
//! # Example
//! ```rust,no_run
//! use rtvi_client::config::ClientConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = ClientConfig::from_env()?;
//!
//! // Load from YAML file with environment variable overrides
//! let config_path = PathBuf::from("client.yaml");
//! let config = ClientConfig::from_file(&config_path)?;
//!
//! println!("Connect endpoint: {:?}", config.connect_url());
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde_json::{Map, Value};

use crate::core::service_config::RtviConfig;
use crate::core::transport::TransportOptions;
use crate::errors::{RtviError, RtviResult};
use crate::utils::url_validation::join_endpoint;

mod env;
mod merge;
mod validation;
mod yaml;

pub use yaml::YamlConfig;

/// Default path of the connect endpoint
pub const DEFAULT_CONNECT_ENDPOINT: &str = "/connect";

/// Default path of the action endpoint
pub const DEFAULT_ACTION_ENDPOINT: &str = "/action";

/// Default capacity of the broadcast event stream
pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Endpoint paths appended to the base URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub connect: String,
    pub action: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            connect: DEFAULT_CONNECT_ENDPOINT.to_string(),
            action: DEFAULT_ACTION_ENDPOINT.to_string(),
        }
    }
}

/// Parameters of the out-of-band HTTP channel
///
/// `request_data` is merged into every connect and action request body,
/// alongside `config` and `services` for the connect request.
#[derive(Debug, Clone, Default)]
pub struct ConnectParams {
    /// Base URL of the connect/action endpoints. `None` disables the HTTP handshake.
    pub base_url: Option<String>,
    pub endpoints: Endpoints,
    /// Extra headers sent with every HTTP request
    pub headers: HashMap<String, String>,
    pub request_data: Map<String, Value>,
    /// Service name to provider name
    pub services: HashMap<String, String>,
    /// Initial per-service configuration
    pub config: RtviConfig,
}

/// Client configuration
///
/// Contains everything needed to run an RTVI session:
/// - Connect/action endpoint parameters
/// - Handshake and per-request timeouts
/// - Initial media settings
/// - Optional static transport auth bundle
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub params: ConnectParams,

    /// Timeout covering handshake, transport join and bot-ready
    pub timeout_ms: Option<u64>,
    /// Timeout for a single correlated request
    pub request_timeout_ms: Option<u64>,

    pub enable_mic: bool,
    pub enable_cam: bool,

    /// Auth bundle handed straight to the transport when no base URL is set
    pub transport_auth: Option<Value>,

    pub event_channel_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            params: ConnectParams::default(),
            timeout_ms: None,
            request_timeout_ms: None,
            enable_mic: true,
            enable_cam: false,
            transport_auth: None,
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables
    ///
    /// Reads the `RTVI_*` variables and falls back to defaults for anything unset.
    /// The `.env` file, if any, is loaded by the binary before this is called.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let config = merge::merge_config(None)?;
        validation::validate_all(&config)?;
        Ok(config)
    }

    /// Load configuration from a YAML file with environment variable fallback
    ///
    /// Priority order (highest to lowest):
    /// 1. YAML file values
    /// 2. Environment variables (actual ENV vars override .env values)
    /// 3. .env file values
    /// 4. Default values
    ///
    /// After loading and merging, performs validation on the final configuration.
    ///
    /// # Errors
    /// Returns an error if:
    /// - The YAML file cannot be read or is malformed
    /// - Environment variables have invalid formats
    /// - Configuration validation fails
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let yaml_config = yaml::YamlConfig::from_file(path)?;

        let config = merge::merge_config(Some(yaml_config))?;

        validation::validate_all(&config)?;

        Ok(config)
    }

    /// Validate a programmatically built configuration.
    pub fn validate(&self) -> RtviResult<()> {
        validation::validate_all(self).map_err(RtviError::Configuration)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.params.base_url = Some(base_url.into());
        self
    }

    pub fn with_config(mut self, config: RtviConfig) -> Self {
        self.params.config = config;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn with_transport_auth(mut self, auth: Value) -> Self {
        self.transport_auth = Some(auth);
        self
    }

    /// Whether the HTTP handshake is configured
    pub fn has_base_url(&self) -> bool {
        self.params.base_url.is_some()
    }

    /// Full URL of the connect endpoint, if a base URL is configured
    pub fn connect_url(&self) -> Option<String> {
        self.params
            .base_url
            .as_deref()
            .map(|base| join_endpoint(base, &self.params.endpoints.connect))
    }

    /// Full URL of the action endpoint, if a base URL is configured
    pub fn action_url(&self) -> Option<String> {
        self.params
            .base_url
            .as_deref()
            .map(|base| join_endpoint(base, &self.params.endpoints.action))
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }

    /// Media settings handed to the transport on initialization
    pub fn transport_options(&self) -> TransportOptions {
        TransportOptions {
            enable_mic: self.enable_mic,
            enable_cam: self.enable_cam,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use serial_test::serial;
    use std::env;
    use std::fs;
    use tempfile::TempDir;

    // Helper to clean up environment variables
    fn cleanup_env_vars() {
        unsafe {
            env::remove_var("RTVI_BASE_URL");
            env::remove_var("RTVI_CONNECT_ENDPOINT");
            env::remove_var("RTVI_ACTION_ENDPOINT");
            env::remove_var("RTVI_HEADERS_JSON");
            env::remove_var("RTVI_REQUEST_DATA_JSON");
            env::remove_var("RTVI_SERVICES_JSON");
            env::remove_var("RTVI_CONFIG_JSON");
            env::remove_var("RTVI_TIMEOUT_MS");
            env::remove_var("RTVI_REQUEST_TIMEOUT_MS");
            env::remove_var("RTVI_ENABLE_MIC");
            env::remove_var("RTVI_ENABLE_CAM");
            env::remove_var("RTVI_TRANSPORT_AUTH_JSON");
            env::remove_var("RTVI_EVENT_CHANNEL_CAPACITY");
        }
    }

    #[test]
    fn test_urls() {
        let config = ClientConfig::default().with_base_url("https://api.example.com/rtvi/");
        assert_eq!(
            config.connect_url().as_deref(),
            Some("https://api.example.com/rtvi/connect")
        );
        assert_eq!(
            config.action_url().as_deref(),
            Some("https://api.example.com/rtvi/action")
        );

        let config = ClientConfig::default();
        assert!(config.connect_url().is_none());
        assert!(!config.has_base_url());
    }

    #[test]
    fn test_builder_timeouts() {
        let config = ClientConfig::default()
            .with_timeout(Duration::from_secs(5))
            .with_request_timeout(Duration::from_millis(250));
        assert_eq!(config.timeout(), Some(Duration::from_secs(5)));
        assert_eq!(config.request_timeout(), Some(Duration::from_millis(250)));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_url() {
        let config = ClientConfig::default().with_base_url("not a url");
        let err = config.validate().unwrap_err();
        assert!(matches!(err, RtviError::Configuration(_)));
    }

    #[test]
    fn test_transport_options() {
        let config = ClientConfig {
            enable_mic: false,
            enable_cam: true,
            ..Default::default()
        };
        let options = config.transport_options();
        assert!(!options.enable_mic);
        assert!(options.enable_cam);
    }

    #[test]
    #[serial]
    fn test_from_env() {
        cleanup_env_vars();

        unsafe {
            env::set_var("RTVI_BASE_URL", "http://localhost:7860");
            env::set_var("RTVI_TIMEOUT_MS", "12000");
            env::set_var("RTVI_SERVICES_JSON", r#"{"llm": "together"}"#);
        }

        let config = ClientConfig::from_env().unwrap();
        assert_eq!(
            config.connect_url().as_deref(),
            Some("http://localhost:7860/connect")
        );
        assert_eq!(config.timeout(), Some(Duration::from_millis(12000)));
        assert_eq!(config.params.services["llm"], "together");

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_env_invalid_capacity() {
        cleanup_env_vars();

        unsafe {
            env::set_var("RTVI_EVENT_CHANNEL_CAPACITY", "0");
        }

        let result = ClientConfig::from_env();
        assert!(result.is_err());

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_file_yaml_only() {
        cleanup_env_vars();

        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("client.yaml");

        let yaml_content = r#"
params:
  base_url: "https://api.example.com"
  endpoints:
    connect: "/v1/connect"
  config:
    - service: "tts"
      options:
        - name: "voice"
          value: "warm"

session:
  request_timeout_ms: 3000
  enable_cam: true
"#;

        fs::write(&config_path, yaml_content).unwrap();

        let config = ClientConfig::from_file(&config_path).unwrap();

        assert_eq!(
            config.connect_url().as_deref(),
            Some("https://api.example.com/v1/connect")
        );
        assert_eq!(
            config.action_url().as_deref(),
            Some("https://api.example.com/action")
        );
        assert_eq!(
            config.params.config.get_value("tts", "voice"),
            Some(&json!("warm"))
        );
        assert_eq!(config.request_timeout(), Some(Duration::from_secs(3)));
        assert!(config.enable_cam);
        assert!(config.enable_mic);

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_file_yaml_overrides_env() {
        cleanup_env_vars();

        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("client.yaml");

        let yaml_content = r#"
params:
  base_url: "https://yaml.example.com"
"#;

        fs::write(&config_path, yaml_content).unwrap();

        unsafe {
            env::set_var("RTVI_BASE_URL", "https://env.example.com");
            env::set_var("RTVI_ENABLE_MIC", "false");
        }

        let config = ClientConfig::from_file(&config_path).unwrap();

        // YAML overrides ENV
        assert_eq!(
            config.params.base_url.as_deref(),
            Some("https://yaml.example.com")
        );
        // ENV value
        assert!(!config.enable_mic);

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_file_missing_file() {
        cleanup_env_vars();

        let config_path = PathBuf::from("/nonexistent/client.yaml");
        let result = ClientConfig::from_file(&config_path);

        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Failed to read config file")
        );

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_file_invalid_yaml() {
        cleanup_env_vars();

        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("invalid.yaml");

        fs::write(&config_path, "invalid: yaml: [content").unwrap();

        let result = ClientConfig::from_file(&config_path);

        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Failed to parse YAML")
        );

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_file_invalid_endpoint() {
        cleanup_env_vars();

        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("client.yaml");

        fs::write(
            &config_path,
            "params:\n  base_url: \"http://localhost:7860\"\n  endpoints:\n    action: \"action\"\n",
        )
        .unwrap();

        let result = ClientConfig::from_file(&config_path);
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Invalid action endpoint")
        );

        cleanup_env_vars();
    }
}
