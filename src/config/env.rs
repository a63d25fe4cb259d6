//! Environment variable loading
//!
//! Every client option can be supplied through an `RTVI_*` variable. Structured
//! values (headers, request data, services, service config, transport auth)
//! are given as JSON strings.

use std::collections::HashMap;
use std::env;

use serde::de::DeserializeOwned;

use crate::core::service_config::ServiceConfig;

pub(super) const ENV_BASE_URL: &str = "RTVI_BASE_URL";
pub(super) const ENV_CONNECT_ENDPOINT: &str = "RTVI_CONNECT_ENDPOINT";
pub(super) const ENV_ACTION_ENDPOINT: &str = "RTVI_ACTION_ENDPOINT";
pub(super) const ENV_HEADERS_JSON: &str = "RTVI_HEADERS_JSON";
pub(super) const ENV_REQUEST_DATA_JSON: &str = "RTVI_REQUEST_DATA_JSON";
pub(super) const ENV_SERVICES_JSON: &str = "RTVI_SERVICES_JSON";
pub(super) const ENV_CONFIG_JSON: &str = "RTVI_CONFIG_JSON";
pub(super) const ENV_TIMEOUT_MS: &str = "RTVI_TIMEOUT_MS";
pub(super) const ENV_REQUEST_TIMEOUT_MS: &str = "RTVI_REQUEST_TIMEOUT_MS";
pub(super) const ENV_ENABLE_MIC: &str = "RTVI_ENABLE_MIC";
pub(super) const ENV_ENABLE_CAM: &str = "RTVI_ENABLE_CAM";
pub(super) const ENV_TRANSPORT_AUTH_JSON: &str = "RTVI_TRANSPORT_AUTH_JSON";
pub(super) const ENV_EVENT_CHANNEL_CAPACITY: &str = "RTVI_EVENT_CHANNEL_CAPACITY";

/// Raw values read from the environment, all optional.
#[derive(Debug, Clone, Default)]
pub(super) struct EnvConfig {
    pub base_url: Option<String>,
    pub connect_endpoint: Option<String>,
    pub action_endpoint: Option<String>,
    pub headers: Option<HashMap<String, String>>,
    pub request_data: Option<serde_json::Map<String, serde_json::Value>>,
    pub services: Option<HashMap<String, String>>,
    pub config: Option<Vec<ServiceConfig>>,
    pub timeout_ms: Option<u64>,
    pub request_timeout_ms: Option<u64>,
    pub enable_mic: Option<bool>,
    pub enable_cam: Option<bool>,
    pub transport_auth: Option<serde_json::Value>,
    pub event_channel_capacity: Option<usize>,
}

impl EnvConfig {
    /// Read all `RTVI_*` variables.
    ///
    /// Empty values are treated as unset.
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        Ok(Self {
            base_url: read_string(ENV_BASE_URL),
            connect_endpoint: read_string(ENV_CONNECT_ENDPOINT),
            action_endpoint: read_string(ENV_ACTION_ENDPOINT),
            headers: read_json(ENV_HEADERS_JSON)?,
            request_data: read_json(ENV_REQUEST_DATA_JSON)?,
            services: read_json(ENV_SERVICES_JSON)?,
            config: read_json(ENV_CONFIG_JSON)?,
            timeout_ms: read_parsed(ENV_TIMEOUT_MS)?,
            request_timeout_ms: read_parsed(ENV_REQUEST_TIMEOUT_MS)?,
            enable_mic: read_bool(ENV_ENABLE_MIC)?,
            enable_cam: read_bool(ENV_ENABLE_CAM)?,
            transport_auth: read_json(ENV_TRANSPORT_AUTH_JSON)?,
            event_channel_capacity: read_parsed(ENV_EVENT_CHANNEL_CAPACITY)?,
        })
    }
}

fn read_string(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn read_parsed<T>(key: &str) -> Result<Option<T>, Box<dyn std::error::Error>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match read_string(key) {
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| format!("Invalid value for {key}: {e}").into()),
        None => Ok(None),
    }
}

pub(super) fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn read_bool(key: &str) -> Result<Option<bool>, Box<dyn std::error::Error>> {
    match read_string(key) {
        Some(raw) => parse_bool(&raw)
            .map(Some)
            .ok_or_else(|| format!("Invalid boolean for {key}: {raw}").into()),
        None => Ok(None),
    }
}

fn read_json<T: DeserializeOwned>(key: &str) -> Result<Option<T>, Box<dyn std::error::Error>> {
    match read_string(key) {
        Some(raw) => serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| format!("Failed to parse {key} as JSON: {e}").into()),
        None => Ok(None),
    }
}
