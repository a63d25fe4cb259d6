//! Configuration validation logic

use crate::utils::url_validation::{validate_base_url, validate_endpoint_path};

use super::ClientConfig;

/// Validate the connect/action endpoint settings.
///
/// The base URL is optional: without it the client skips the HTTP handshake
/// and uses the static transport auth bundle instead.
pub(super) fn validate_params(
    base_url: Option<&str>,
    connect_endpoint: &str,
    action_endpoint: &str,
) -> Result<(), String> {
    if let Some(base_url) = base_url {
        validate_base_url(base_url).map_err(|e| format!("Invalid base URL '{base_url}': {e}"))?;
    }

    validate_endpoint_path(connect_endpoint)
        .map_err(|e| format!("Invalid connect endpoint: {e}"))?;
    validate_endpoint_path(action_endpoint).map_err(|e| format!("Invalid action endpoint: {e}"))?;

    Ok(())
}

/// Timeouts, when set, must be non-zero.
pub(super) fn validate_timeouts(
    timeout_ms: Option<u64>,
    request_timeout_ms: Option<u64>,
) -> Result<(), String> {
    if timeout_ms == Some(0) {
        return Err("Connect timeout must be greater than zero".to_string());
    }
    if request_timeout_ms == Some(0) {
        return Err("Request timeout must be greater than zero".to_string());
    }
    Ok(())
}

pub(super) fn validate_event_channel_capacity(capacity: usize) -> Result<(), String> {
    if capacity == 0 {
        return Err("Event channel capacity must be greater than zero".to_string());
    }
    Ok(())
}

/// A static transport auth bundle must be a JSON object.
pub(super) fn validate_transport_auth(auth: Option<&serde_json::Value>) -> Result<(), String> {
    match auth {
        Some(value) if !value.is_object() => {
            Err("Transport auth bundle must be a JSON object".to_string())
        }
        _ => Ok(()),
    }
}

/// Run every check against a merged configuration.
pub(super) fn validate_all(config: &ClientConfig) -> Result<(), String> {
    validate_params(
        config.params.base_url.as_deref(),
        &config.params.endpoints.connect,
        &config.params.endpoints.action,
    )?;
    validate_timeouts(config.timeout_ms, config.request_timeout_ms)?;
    validate_event_channel_capacity(config.event_channel_capacity)?;
    validate_transport_auth(config.transport_auth.as_ref())?;
    Ok(())
}
