//! RTVI control-message envelope and payload types.
//!
//! Every in-band message is a JSON envelope:
//!
//! ```json
//! {"id": "c0ffee", "label": "rtvi-ai", "type": "update-config", "data": {...}}
//! ```
//!
//! # Protocol Overview
//!
//! Client requests (sent to the agent):
//! - client-ready - Client is ready to receive media (no response)
//! - update-config - Update service options (`config` / `config-error`)
//! - get-config - Fetch current service options (`config`)
//! - describe-config - Describe available options (`config-available`)
//! - describe-actions - Describe registered actions (`actions-available`)
//! - disconnect-bot - Ask the agent to leave (no response)
//! - action - Run a service action (`action-response`)
//!
//! Agent messages (received, unsolicited):
//! - bot-ready, error, metrics
//! - user-transcription, bot-transcription
//! - user-started-speaking, user-stopped-speaking
//! - bot-started-speaking, bot-stopped-speaking
//! - user-llm-text, bot-llm-text, bot-llm-started, bot-llm-stopped
//! - bot-tts-text, bot-tts-started, bot-tts-stopped
//! - storage-item-stored
//!
//! Any request may also be answered with `error-response`.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::service_config::{RtviConfig, ServiceConfig};
use crate::errors::{RtviError, RtviResult};

/// Label carried by every RTVI envelope.
pub const RTVI_MESSAGE_LABEL: &str = "rtvi-ai";

/// Version of the RTVI protocol spoken by this client.
pub const RTVI_PROTOCOL_VERSION: &str = "0.2.0";

/// Envelope type used by the media layer to deliver pipeline metrics
/// outside of the RTVI label.
pub const PIPECAT_METRICS_TYPE: &str = "pipecat-metrics";

// =============================================================================
// Message Types
// =============================================================================

/// Canonical RTVI message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    // Client requests
    ClientReady,
    UpdateConfig,
    GetConfig,
    DescribeConfig,
    DescribeActions,
    DisconnectBot,
    Action,

    // Responses
    Config,
    ConfigAvailable,
    ConfigError,
    ActionsAvailable,
    ActionResponse,
    ErrorResponse,

    // Unsolicited
    BotReady,
    Error,
    Metrics,
    UserTranscription,
    BotTranscription,
    UserStartedSpeaking,
    UserStoppedSpeaking,
    BotStartedSpeaking,
    BotStoppedSpeaking,
    UserLlmText,
    BotLlmText,
    BotLlmStarted,
    BotLlmStopped,
    BotTtsText,
    BotTtsStarted,
    BotTtsStopped,
    StorageItemStored,
}

/// Response types that settle a correlated request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpectedResponse {
    pub success: MessageType,
    pub failures: &'static [MessageType],
}

impl ExpectedResponse {
    /// Whether `message_type` settles the request, and how.
    pub fn classify(&self, message_type: &str) -> Option<bool> {
        if self.success.as_str() == message_type {
            Some(true)
        } else if self.failures.iter().any(|f| f.as_str() == message_type) {
            Some(false)
        } else {
            None
        }
    }
}

const ERROR_RESPONSE_ONLY: &[MessageType] = &[MessageType::ErrorResponse];
const CONFIG_FAILURES: &[MessageType] = &[MessageType::ConfigError, MessageType::ErrorResponse];

impl MessageType {
    /// Wire name of the message type.
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ClientReady => "client-ready",
            Self::UpdateConfig => "update-config",
            Self::GetConfig => "get-config",
            Self::DescribeConfig => "describe-config",
            Self::DescribeActions => "describe-actions",
            Self::DisconnectBot => "disconnect-bot",
            Self::Action => "action",
            Self::Config => "config",
            Self::ConfigAvailable => "config-available",
            Self::ConfigError => "config-error",
            Self::ActionsAvailable => "actions-available",
            Self::ActionResponse => "action-response",
            Self::ErrorResponse => "error-response",
            Self::BotReady => "bot-ready",
            Self::Error => "error",
            Self::Metrics => "metrics",
            Self::UserTranscription => "user-transcription",
            Self::BotTranscription => "bot-transcription",
            Self::UserStartedSpeaking => "user-started-speaking",
            Self::UserStoppedSpeaking => "user-stopped-speaking",
            Self::BotStartedSpeaking => "bot-started-speaking",
            Self::BotStoppedSpeaking => "bot-stopped-speaking",
            Self::UserLlmText => "user-llm-text",
            Self::BotLlmText => "bot-llm-text",
            Self::BotLlmStarted => "bot-llm-started",
            Self::BotLlmStopped => "bot-llm-stopped",
            Self::BotTtsText => "bot-tts-text",
            Self::BotTtsStarted => "bot-tts-started",
            Self::BotTtsStopped => "bot-tts-stopped",
            Self::StorageItemStored => "storage-item-stored",
        }
    }

    /// Parse a wire name. Unknown names return `None`.
    pub fn parse(s: &str) -> Option<Self> {
        let parsed = match s {
            "client-ready" => Self::ClientReady,
            "update-config" => Self::UpdateConfig,
            "get-config" => Self::GetConfig,
            "describe-config" => Self::DescribeConfig,
            "describe-actions" => Self::DescribeActions,
            "disconnect-bot" => Self::DisconnectBot,
            "action" => Self::Action,
            "config" => Self::Config,
            "config-available" => Self::ConfigAvailable,
            "config-error" => Self::ConfigError,
            "actions-available" => Self::ActionsAvailable,
            "action-response" => Self::ActionResponse,
            "error-response" => Self::ErrorResponse,
            "bot-ready" => Self::BotReady,
            "error" => Self::Error,
            "metrics" => Self::Metrics,
            "user-transcription" => Self::UserTranscription,
            "bot-transcription" => Self::BotTranscription,
            "user-started-speaking" => Self::UserStartedSpeaking,
            "user-stopped-speaking" => Self::UserStoppedSpeaking,
            "bot-started-speaking" => Self::BotStartedSpeaking,
            "bot-stopped-speaking" => Self::BotStoppedSpeaking,
            "user-llm-text" => Self::UserLlmText,
            "bot-llm-text" => Self::BotLlmText,
            "bot-llm-started" => Self::BotLlmStarted,
            "bot-llm-stopped" => Self::BotLlmStopped,
            "bot-tts-text" => Self::BotTtsText,
            "bot-tts-started" => Self::BotTtsStarted,
            "bot-tts-stopped" => Self::BotTtsStopped,
            "storage-item-stored" => Self::StorageItemStored,
            _ => return None,
        };
        Some(parsed)
    }

    /// Response types for a request, or `None` for fire-and-forget messages.
    pub fn expected_response(&self) -> Option<ExpectedResponse> {
        let (success, failures) = match self {
            Self::UpdateConfig => (Self::Config, CONFIG_FAILURES),
            Self::GetConfig => (Self::Config, ERROR_RESPONSE_ONLY),
            Self::DescribeConfig => (Self::ConfigAvailable, ERROR_RESPONSE_ONLY),
            Self::DescribeActions => (Self::ActionsAvailable, ERROR_RESPONSE_ONLY),
            Self::Action => (Self::ActionResponse, ERROR_RESPONSE_ONLY),
            _ => return None,
        };
        Some(ExpectedResponse { success, failures })
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Envelope
// =============================================================================

/// An RTVI envelope. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RtviMessage {
    #[serde(default)]
    id: String,
    #[serde(default = "default_label")]
    label: String,
    #[serde(rename = "type")]
    message_type: String,
    #[serde(default)]
    data: Value,
}

fn default_label() -> String {
    RTVI_MESSAGE_LABEL.to_string()
}

/// Generate a short random message id.
pub fn generate_message_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

impl RtviMessage {
    /// Create an envelope with a fresh id.
    pub fn new(message_type: impl Into<String>, data: Value) -> Self {
        Self::with_id(generate_message_id(), message_type, data)
    }

    /// Create an envelope with an explicit id.
    pub fn with_id(id: impl Into<String>, message_type: impl Into<String>, data: Value) -> Self {
        Self {
            id: id.into(),
            label: RTVI_MESSAGE_LABEL.to_string(),
            message_type: message_type.into(),
            data,
        }
    }

    pub fn client_ready() -> Self {
        Self::new(MessageType::ClientReady.as_str(), Value::Null)
    }

    pub fn update_config(config: &[ServiceConfig], interrupt: bool) -> Self {
        Self::new(
            MessageType::UpdateConfig.as_str(),
            json!({ "config": config, "interrupt": interrupt }),
        )
    }

    pub fn get_config() -> Self {
        Self::new(MessageType::GetConfig.as_str(), Value::Null)
    }

    pub fn describe_config() -> Self {
        Self::new(MessageType::DescribeConfig.as_str(), Value::Null)
    }

    pub fn describe_actions() -> Self {
        Self::new(MessageType::DescribeActions.as_str(), Value::Null)
    }

    pub fn disconnect_bot() -> Self {
        Self::new(MessageType::DisconnectBot.as_str(), Value::Null)
    }

    /// Build an `action` request envelope.
    pub fn action(request: &ActionRequestData) -> RtviResult<Self> {
        Ok(Self::new(
            MessageType::Action.as_str(),
            serde_json::to_value(request)?,
        ))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn message_type(&self) -> &str {
        &self.message_type
    }

    /// Parsed message type, if it is a canonical RTVI type.
    pub fn kind(&self) -> Option<MessageType> {
        MessageType::parse(&self.message_type)
    }

    pub fn data(&self) -> &Value {
        &self.data
    }

    pub fn into_data(self) -> Value {
        self.data
    }

    /// Whether the envelope carries the RTVI label.
    pub fn is_rtvi(&self) -> bool {
        self.label == RTVI_MESSAGE_LABEL
    }

    /// Deserialize the payload into a typed structure.
    pub fn parse_data<T: serde::de::DeserializeOwned>(&self) -> RtviResult<T> {
        serde_json::from_value(self.data.clone()).map_err(|e| {
            RtviError::Serialization(format!(
                "invalid '{}' payload: {}",
                self.message_type, e
            ))
        })
    }

    /// Human-readable error text carried by `error` / `error-response` /
    /// `config-error` payloads.
    pub fn error_text(&self) -> String {
        self.data
            .get("error")
            .or_else(|| self.data.get("message"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| self.data.to_string())
    }

    pub fn to_json(&self) -> RtviResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(text: &str) -> RtviResult<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

// =============================================================================
// Action Sub-protocol
// =============================================================================

/// One named argument of an action request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionArgument {
    pub name: String,
    pub value: Value,
}

impl ActionArgument {
    pub fn new(name: impl Into<String>, value: Value) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// Payload of an `action` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRequestData {
    pub service: String,
    pub action: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub arguments: Vec<ActionArgument>,
}

impl ActionRequestData {
    pub fn new(service: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            action: action.into(),
            arguments: Vec::new(),
        }
    }

    pub fn with_argument(mut self, name: impl Into<String>, value: Value) -> Self {
        self.arguments.push(ActionArgument::new(name, value));
        self
    }
}

/// Payload of an `action-response`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    #[serde(default)]
    pub result: Value,
}

/// Result of an action, whichever channel delivered it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResponse {
    pub id: String,
    pub label: String,
    #[serde(rename = "type")]
    pub message_type: String,
    pub data: ActionResult,
}

impl ActionResponse {
    /// Build from an in-band envelope.
    pub fn from_message(message: &RtviMessage) -> Self {
        let result = message
            .data()
            .get("result")
            .cloned()
            .unwrap_or(Value::Null);
        Self {
            id: message.id().to_string(),
            label: message.label().to_string(),
            message_type: message.message_type().to_string(),
            data: ActionResult { result },
        }
    }

    /// Synthesize a response for a request answered with a bare result.
    pub fn synthesized(request_id: &str, result: Value) -> Self {
        Self {
            id: request_id.to_string(),
            label: RTVI_MESSAGE_LABEL.to_string(),
            message_type: MessageType::ActionResponse.as_str().to_string(),
            data: ActionResult { result },
        }
    }

    pub fn result(&self) -> &Value {
        &self.data.result
    }
}

// =============================================================================
// Payloads
// =============================================================================

/// Payload of `bot-ready`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BotReadyData {
    #[serde(default)]
    pub config: RtviConfig,
    #[serde(default)]
    pub version: String,
}

/// Payload of `config`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigData {
    #[serde(default)]
    pub config: RtviConfig,
}

/// Payload of `user-transcription`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TranscriptData {
    pub text: String,
    #[serde(rename = "final", default)]
    pub is_final: bool,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub user_id: String,
}

/// Payload of `bot-transcription`, `user-llm-text`, `bot-llm-text` and
/// `bot-tts-text`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TextData {
    pub text: String,
}

/// One processor measurement in a metrics report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricData {
    pub processor: String,
    pub value: f64,
}

/// Payload of `metrics`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing: Option<Vec<MetricData>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttfb: Option<Vec<MetricData>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub characters: Option<Vec<MetricData>>,
}

/// Payload of `storage-item-stored`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageItemStoredData {
    pub action: String,
    #[serde(default)]
    pub items: Value,
}
