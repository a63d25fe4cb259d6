use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;

use crate::core::service_config::ServiceConfig;

/// Complete YAML configuration structure
///
/// This structure represents the full configuration that can be loaded from a YAML file.
/// All fields are optional to allow partial configuration. Values given here override
/// the ones taken from environment variables.
///
/// # Example YAML structure
/// ```yaml
/// params:
///   base_url: "https://api.example.com/rtvi"
///   endpoints:
///     connect: "/connect"
///     action: "/action"
///   headers:
///     Authorization: "Bearer secret"
///   request_data:
///     room: "demo"
///   services:
///     llm: "together"
///     tts: "cartesia"
///   config:
///     - service: "llm"
///       options:
///         - name: "model"
///           value: "llama-3"
///
/// session:
///   timeout_ms: 15000
///   request_timeout_ms: 5000
///   enable_mic: true
///   enable_cam: false
///   event_channel_capacity: 512
///
/// transport:
///   auth:
///     url: "wss://agent.example.com/session/abc"
///     token: "session-token"
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub params: Option<ParamsYaml>,
    pub session: Option<SessionYaml>,
    pub transport: Option<TransportYaml>,
}

/// Connect/action endpoint parameters from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ParamsYaml {
    pub base_url: Option<String>,
    pub endpoints: Option<EndpointsYaml>,
    pub headers: Option<HashMap<String, String>>,
    /// Extra fields merged into every connect/action request body
    pub request_data: Option<serde_json::Map<String, serde_json::Value>>,
    /// Service name to provider name (e.g. `llm: together`)
    pub services: Option<HashMap<String, String>>,
    /// Initial per-service configuration sent with the connect request
    pub config: Option<Vec<ServiceConfig>>,
}

/// Endpoint paths appended to the base URL
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct EndpointsYaml {
    pub connect: Option<String>,
    pub action: Option<String>,
}

/// Session behaviour from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SessionYaml {
    /// Timeout covering handshake, transport join and bot-ready (ms)
    pub timeout_ms: Option<u64>,
    /// Timeout for a single correlated request (ms)
    pub request_timeout_ms: Option<u64>,
    pub enable_mic: Option<bool>,
    pub enable_cam: Option<bool>,
    pub event_channel_capacity: Option<usize>,
}

/// Transport settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TransportYaml {
    /// Static auth bundle handed to the transport when no base URL is configured
    pub auth: Option<serde_json::Value>,
}

impl YamlConfig {
    /// Load configuration from a YAML file
    ///
    /// # Arguments
    /// * `path` - Path to the YAML configuration file
    ///
    /// # Returns
    /// * `Result<YamlConfig, Box<dyn std::error::Error>>` - The loaded configuration or an error
    ///
    /// # Errors
    /// Returns an error if:
    /// - The file cannot be read
    /// - The YAML is malformed
    /// - Required fields have invalid types
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {e}", path.display()))?;

        let config: YamlConfig = serde_yaml::from_str(&contents)
            .map_err(|e| format!("Failed to parse YAML config: {e}"))?;

        Ok(config)
    }
}
