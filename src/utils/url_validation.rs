//! URL validation utilities for client endpoints
//!
//! This module validates the URLs the client talks to:
//! - Base URL of the connect/action HTTP endpoints (`http` or `https`)
//! - Endpoint paths appended to the base URL
//! - Transport session URLs handed over in auth bundles (`ws` or `wss`)

use thiserror::Error;
use tracing::warn;
use url::Url;

/// Errors that can occur during URL validation
#[derive(Debug, Error, PartialEq)]
pub enum UrlValidationError {
    #[error("Invalid URL format: {0}")]
    InvalidFormat(#[from] url::ParseError),

    #[error("Unsupported URL scheme '{found}', expected one of: {expected}")]
    UnsupportedScheme { found: String, expected: String },

    #[error("URL must have a host")]
    MissingHost,

    #[error("URL must not carry a query or fragment: {0}")]
    UnexpectedSuffix(String),

    #[error("Endpoint path must start with '/': {0}")]
    InvalidPath(String),
}

/// Whether a parsed URL points at the local machine.
pub fn is_loopback(url: &Url) -> bool {
    match url.host() {
        Some(url::Host::Domain(domain)) => domain == "localhost",
        Some(url::Host::Ipv4(ip)) => ip.is_loopback(),
        Some(url::Host::Ipv6(ip)) => ip.is_loopback(),
        None => false,
    }
}

fn check_scheme(parsed: &Url, allowed: &[&str]) -> Result<(), UrlValidationError> {
    if allowed.contains(&parsed.scheme()) {
        Ok(())
    } else {
        Err(UrlValidationError::UnsupportedScheme {
            found: parsed.scheme().to_string(),
            expected: allowed.join(", "),
        })
    }
}

/// Validates the base URL of the connect/action endpoints
///
/// This function performs the following checks:
/// 1. URL must be valid and parseable
/// 2. URL scheme must be `http` or `https`
/// 3. URL must have a hostname
/// 4. URL must not carry a query string or fragment
///
/// Plain `http` to a non-loopback host is accepted with a warning.
///
/// # Example
/// ```rust,ignore
/// use rtvi_client::utils::url_validation::validate_base_url;
///
/// assert!(validate_base_url("https://api.example.com/rtvi").is_ok());
/// assert!(validate_base_url("ftp://api.example.com").is_err());
/// ```
pub fn validate_base_url(url: &str) -> Result<Url, UrlValidationError> {
    let parsed = Url::parse(url)?;
    check_scheme(&parsed, &["http", "https"])?;

    if parsed.host().is_none() {
        return Err(UrlValidationError::MissingHost);
    }

    if parsed.query().is_some() || parsed.fragment().is_some() {
        return Err(UrlValidationError::UnexpectedSuffix(url.to_string()));
    }

    if parsed.scheme() == "http" && !is_loopback(&parsed) {
        warn!(url = %url, "Base URL uses plain HTTP");
    }

    Ok(parsed)
}

/// Validates an endpoint path such as `/connect`
pub fn validate_endpoint_path(path: &str) -> Result<(), UrlValidationError> {
    if !path.starts_with('/') || path.contains(char::is_whitespace) {
        return Err(UrlValidationError::InvalidPath(path.to_string()));
    }
    Ok(())
}

/// Validates a transport session URL (`ws` or `wss`)
pub fn validate_transport_url(url: &str) -> Result<Url, UrlValidationError> {
    let parsed = Url::parse(url)?;
    check_scheme(&parsed, &["ws", "wss"])?;

    if parsed.host().is_none() {
        return Err(UrlValidationError::MissingHost);
    }

    if parsed.scheme() == "ws" && !is_loopback(&parsed) {
        warn!(url = %url, "Transport URL uses unencrypted WebSocket");
    }

    Ok(parsed)
}

/// Join a base URL and an endpoint path, normalizing the slash between them.
///
/// ```rust,ignore
/// assert_eq!(
///     join_endpoint("https://api.example.com/v1/", "/connect"),
///     "https://api.example.com/v1/connect"
/// );
/// ```
pub fn join_endpoint(base_url: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_base_url_invalid_format() {
        assert!(matches!(
            validate_base_url("not-a-url"),
            Err(UrlValidationError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_validate_base_url_schemes() {
        assert!(validate_base_url("https://api.example.com").is_ok());
        assert!(validate_base_url("http://localhost:7860/api").is_ok());
        assert!(validate_base_url("http://agent.internal").is_ok());
        assert!(matches!(
            validate_base_url("wss://api.example.com"),
            Err(UrlValidationError::UnsupportedScheme { .. })
        ));
    }

    #[test]
    fn test_validate_base_url_rejects_query() {
        assert!(matches!(
            validate_base_url("https://api.example.com/?token=abc"),
            Err(UrlValidationError::UnexpectedSuffix(_))
        ));
        assert!(matches!(
            validate_base_url("https://api.example.com/#frag"),
            Err(UrlValidationError::UnexpectedSuffix(_))
        ));
    }

    #[test]
    fn test_validate_endpoint_path() {
        assert!(validate_endpoint_path("/connect").is_ok());
        assert!(validate_endpoint_path("/v1/action").is_ok());
        assert!(validate_endpoint_path("connect").is_err());
        assert!(validate_endpoint_path("/bad path").is_err());
    }

    #[test]
    fn test_validate_transport_url() {
        assert!(validate_transport_url("wss://agent.example.com/session/1").is_ok());
        assert!(validate_transport_url("ws://127.0.0.1:9000").is_ok());
        assert!(validate_transport_url("ws://[::1]:9000").is_ok());

        let err = validate_transport_url("https://agent.example.com").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Unsupported URL scheme 'https', expected one of: ws, wss"
        );
    }

    #[test]
    fn test_is_loopback() {
        assert!(is_loopback(&Url::parse("http://localhost:8080").unwrap()));
        assert!(is_loopback(&Url::parse("ws://127.0.0.1").unwrap()));
        assert!(is_loopback(&Url::parse("ws://[::1]").unwrap()));
        assert!(!is_loopback(&Url::parse("https://example.com").unwrap()));
    }

    #[test]
    fn test_join_endpoint() {
        assert_eq!(
            join_endpoint("https://api.example.com/v1/", "/connect"),
            "https://api.example.com/v1/connect"
        );
        assert_eq!(
            join_endpoint("http://localhost:7860", "action"),
            "http://localhost:7860/action"
        );
    }
}
