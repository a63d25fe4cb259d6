//! RTVI client error types
//!
//! Every error carries an optional HTTP-like status so callers can treat
//! out-of-band (HTTP) and in-band failures uniformly.

use thiserror::Error;

/// Result type for RTVI client operations
pub type RtviResult<T> = Result<T, RtviError>;

/// Errors surfaced by the RTVI session layer
#[derive(Error, Debug, Clone)]
pub enum RtviError {
    // ─────────────────────────────────────────────────────────────────────────────
    // Connection Errors
    // ─────────────────────────────────────────────────────────────────────────────
    /// Handshake or bot-ready wait exceeded the configured timeout
    #[error("Bot did not enter ready state within the specified timeout")]
    ConnectionTimeout,

    /// Connect endpoint returned a non-success status
    #[error("Failed to connect / invalid auth bundle from base url (status {status}): {body}")]
    StartBot { status: u16, body: String },

    /// Underlying media transport failed to join
    #[error("Unable to connect to transport: {0}")]
    TransportStart(String),

    /// The connect attempt was cancelled before it completed
    #[error("Connect attempt cancelled")]
    Cancelled,

    /// The session was torn down while the operation was in flight
    #[error("Session disconnected")]
    Disconnected,

    // ─────────────────────────────────────────────────────────────────────────────
    // Protocol Errors
    // ─────────────────────────────────────────────────────────────────────────────
    /// Operation requires the `ready` state
    #[error("Attempt to call action on transport when not in 'ready' state: {0}")]
    BotNotReady(String),

    /// In-band config update rejected by the remote agent
    #[error("Unable to update configuration: {0}")]
    ConfigUpdate(String),

    /// Inbound `error` / `error-response` envelope not otherwise classified
    #[error("Protocol error ({message_type}): {message}")]
    Protocol {
        message_type: String,
        message: String,
    },

    /// A correlated request received no reply in time
    #[error("Request {0} timed out waiting for a response")]
    RequestTimeout(String),

    /// Operation not permitted in the current session state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    // ─────────────────────────────────────────────────────────────────────────────
    // Infrastructure Errors
    // ─────────────────────────────────────────────────────────────────────────────
    /// HTTP transport failure (connect or action endpoint)
    #[error("HTTP error: {0}")]
    Http(String),

    /// Envelope or payload (de)serialization failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid client configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Internal consistency violation
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RtviError {
    /// HTTP-like status associated with this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            RtviError::StartBot { status, .. } => Some(*status),
            RtviError::ConfigUpdate(_) => Some(400),
            RtviError::ConnectionTimeout | RtviError::RequestTimeout(_) => Some(408),
            RtviError::BotNotReady(_) | RtviError::InvalidState(_) => Some(409),
            _ => None,
        }
    }

    /// Build a protocol error from an inbound envelope type and message text.
    pub fn protocol(message_type: impl Into<String>, message: impl Into<String>) -> Self {
        RtviError::Protocol {
            message_type: message_type.into(),
            message: message.into(),
        }
    }

    /// Whether this error terminated a connect attempt.
    pub fn is_connect_failure(&self) -> bool {
        matches!(
            self,
            RtviError::ConnectionTimeout | RtviError::StartBot { .. } | RtviError::TransportStart(_)
        )
    }
}

impl From<serde_json::Error> for RtviError {
    fn from(err: serde_json::Error) -> Self {
        RtviError::Serialization(err.to_string())
    }
}

impl From<reqwest::Error> for RtviError {
    fn from(err: reqwest::Error) -> Self {
        RtviError::Http(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status() {
        assert_eq!(RtviError::ConfigUpdate("bad".into()).status(), Some(400));
        assert_eq!(
            RtviError::StartBot {
                status: 503,
                body: "busy".into()
            }
            .status(),
            Some(503)
        );
        assert_eq!(RtviError::TransportStart("x".into()).status(), None);
        assert_eq!(RtviError::ConnectionTimeout.status(), Some(408));
    }

    #[test]
    fn test_error_display() {
        let err = RtviError::protocol("error-response", "unknown action");
        assert_eq!(
            err.to_string(),
            "Protocol error (error-response): unknown action"
        );

        let err = RtviError::StartBot {
            status: 401,
            body: "unauthorized".into(),
        };
        assert!(err.to_string().contains("401"));
        assert!(err.to_string().contains("unauthorized"));
    }

    #[test]
    fn test_connect_failure_classification() {
        assert!(RtviError::ConnectionTimeout.is_connect_failure());
        assert!(RtviError::TransportStart("join".into()).is_connect_failure());
        assert!(!RtviError::Disconnected.is_connect_failure());
        assert!(!RtviError::BotNotReady("x".into()).is_connect_failure());
    }
}
