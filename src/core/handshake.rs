//! Out-of-band HTTP channel: the connect handshake and single-turn actions.
//!
//! # Connect
//!
//! `POST {base_url}{endpoints.connect}` with the request data, the initial
//! service config and the service map as JSON body. A 2xx response carries
//! the transport auth bundle.
//!
//! # Action
//!
//! `POST {base_url}{endpoints.action}` with the request data and the action
//! envelope under `actions`. The server answers with a JSON body or with a
//! server-sent-event stream of envelopes (`data: {...}` lines).

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use super::messages::{ActionResponse, MessageType, RtviMessage};
use super::service_config::RtviConfig;
use crate::config::ConnectParams;
use crate::errors::{RtviError, RtviResult};

// =============================================================================
// Connect Handler
// =============================================================================

/// Produces the auth bundle handed to the transport.
///
/// The default implementation is [`HttpConnectHandler`]. Applications that
/// fetch credentials from their own backend can plug in another one.
#[async_trait]
pub trait ConnectHandler: Send + Sync {
    /// Run the handshake and return the transport auth bundle.
    ///
    /// The controller drops the returned future on timeout or disconnect.
    async fn connect(&self, params: &ConnectParams, config: &RtviConfig) -> RtviResult<Value>;
}

/// Body of the connect request: request data, then `config` and `services`.
pub fn connect_body(params: &ConnectParams, config: &RtviConfig) -> RtviResult<Value> {
    let mut body = params.request_data.clone();
    body.insert("config".to_string(), serde_json::to_value(config)?);
    body.insert("services".to_string(), serde_json::to_value(&params.services)?);
    Ok(Value::Object(body))
}

fn apply_headers(
    mut request: reqwest::RequestBuilder,
    headers: &HashMap<String, String>,
) -> reqwest::RequestBuilder {
    for (name, value) in headers {
        request = request.header(name.as_str(), value.as_str());
    }
    request
}

/// Default handshake: POST to the connect endpoint.
pub struct HttpConnectHandler {
    client: reqwest::Client,
    url: String,
}

impl HttpConnectHandler {
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), url)
    }

    pub fn with_client(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl ConnectHandler for HttpConnectHandler {
    async fn connect(&self, params: &ConnectParams, config: &RtviConfig) -> RtviResult<Value> {
        let body = connect_body(params, config)?;

        debug!(url = %self.url, services = config.len(), "Requesting auth bundle");

        let request = apply_headers(self.client.post(&self.url), &params.headers).json(&body);
        let response = request.send().await.map_err(|e| RtviError::StartBot {
            status: 0,
            body: format!("Request failed: {e}"),
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "Connect endpoint rejected the request");
            return Err(RtviError::StartBot {
                status: status.as_u16(),
                body,
            });
        }

        let text = response.text().await?;
        let bundle: Value = serde_json::from_str(&text).map_err(|e| RtviError::StartBot {
            status: status.as_u16(),
            body: format!("Invalid auth bundle: {e}"),
        })?;

        Ok(bundle)
    }
}

// =============================================================================
// HTTP Actions
// =============================================================================

/// Result of an action sent over HTTP.
///
/// Envelopes streamed before an `error-response` are kept alongside the
/// error.
#[derive(Debug)]
pub struct HttpActionOutcome {
    pub response: RtviResult<ActionResponse>,
    /// Other envelopes delivered in the same server-sent-event stream
    pub messages: Vec<RtviMessage>,
}

/// Sends actions to the action endpoint.
pub struct HttpActionClient {
    client: reqwest::Client,
    url: String,
    headers: HashMap<String, String>,
    request_data: Map<String, Value>,
}

impl HttpActionClient {
    pub fn new(url: impl Into<String>, params: &ConnectParams) -> Self {
        Self::with_client(reqwest::Client::new(), url, params)
    }

    pub fn with_client(client: reqwest::Client, url: impl Into<String>, params: &ConnectParams) -> Self {
        Self {
            client,
            url: url.into(),
            headers: params.headers.clone(),
            request_data: params.request_data.clone(),
        }
    }

    /// POST `message` and wait for the action result.
    pub async fn send(&self, message: &RtviMessage) -> RtviResult<HttpActionOutcome> {
        let mut body = self.request_data.clone();
        body.insert("actions".to_string(), json!([message]));

        debug!(url = %self.url, message_id = %message.id(), "Sending action over HTTP");

        let response = apply_headers(self.client.post(&self.url), &self.headers)
            .json(&Value::Object(body))
            .send()
            .await?;

        let status = response.status();
        let is_event_stream = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("text/event-stream"));
        let text = response.text().await?;

        if !status.is_success() {
            return Err(RtviError::Http(format!(
                "Action endpoint returned {status}: {text}"
            )));
        }

        if is_event_stream {
            Ok(parse_event_stream(message.id(), &text))
        } else {
            let value: Value = serde_json::from_str(&text)?;
            Ok(HttpActionOutcome {
                response: parse_json_result(message.id(), value),
                messages: Vec::new(),
            })
        }
    }
}

/// Settle an action from an envelope: `action-response` succeeds,
/// `error-response` fails.
fn settle(message: &RtviMessage) -> Option<RtviResult<ActionResponse>> {
    match message.kind() {
        Some(MessageType::ActionResponse) => Some(Ok(ActionResponse::from_message(message))),
        Some(MessageType::ErrorResponse) => Some(Err(RtviError::protocol(
            message.message_type(),
            message.error_text(),
        ))),
        _ => None,
    }
}

/// Interpret a JSON action result, either an envelope or a bare `{result}`.
pub fn parse_json_result(request_id: &str, value: Value) -> RtviResult<ActionResponse> {
    let is_envelope = value.get("label").and_then(Value::as_str).is_some()
        && value.get("type").and_then(Value::as_str).is_some();

    if is_envelope {
        let message: RtviMessage = serde_json::from_value(value)?;
        return settle(&message).unwrap_or_else(|| {
            Err(RtviError::protocol(
                message.message_type(),
                "unexpected response to action",
            ))
        });
    }

    let result = match value {
        Value::Object(mut map) if map.contains_key("result") => {
            map.remove("result").unwrap_or(Value::Null)
        }
        other => other,
    };
    Ok(ActionResponse::synthesized(request_id, result))
}

/// Interpret a server-sent-event stream of envelopes.
///
/// Envelopes other than the action result are returned for normal message
/// handling, whether the action succeeded or not.
pub fn parse_event_stream(request_id: &str, body: &str) -> HttpActionOutcome {
    let mut settled: Option<RtviResult<ActionResponse>> = None;
    let mut messages = Vec::new();

    for line in body.lines() {
        let Some(data) = line.strip_prefix("data:") else {
            continue;
        };
        let data = data.trim();
        if data.is_empty() {
            continue;
        }

        let message = match RtviMessage::from_json(data) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "Skipping malformed event in action stream");
                continue;
            }
        };

        if settled.is_none()
            && let Some(result) = settle(&message)
        {
            settled = Some(result);
            continue;
        }
        messages.push(message);
    }

    let response = settled.unwrap_or_else(|| {
        Err(RtviError::protocol(
            MessageType::Action.as_str(),
            format!("no action response for request {request_id} in event stream"),
        ))
    });

    HttpActionOutcome { response, messages }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::service_config::{ConfigOption, ServiceConfig};

    fn params() -> ConnectParams {
        let mut params = ConnectParams::default();
        params
            .request_data
            .insert("room".to_string(), json!("demo"));
        params
            .services
            .insert("llm".to_string(), "together".to_string());
        params
    }

    #[test]
    fn test_connect_body() {
        let config = RtviConfig::new(vec![ServiceConfig::new(
            "llm",
            vec![ConfigOption::new("model", json!("llama-3"))],
        )]);
        let body = connect_body(&params(), &config).unwrap();

        assert_eq!(body["room"], "demo");
        assert_eq!(body["services"]["llm"], "together");
        assert_eq!(body["config"][0]["service"], "llm");
        assert_eq!(body["config"][0]["options"][0]["value"], "llama-3");
    }

    #[test]
    fn test_parse_json_bare_result() {
        let response = parse_json_result("req-1", json!({"result": "ok"})).unwrap();
        assert_eq!(response.id, "req-1");
        assert_eq!(response.message_type, "action-response");
        assert_eq!(response.result(), &json!("ok"));
    }

    #[test]
    fn test_parse_json_envelope() {
        let response = parse_json_result(
            "req-1",
            json!({"id": "req-1", "label": "rtvi-ai", "type": "action-response", "data": {"result": 42}}),
        )
        .unwrap();
        assert_eq!(response.result(), &json!(42));

        let err = parse_json_result(
            "req-1",
            json!({"id": "req-1", "label": "rtvi-ai", "type": "error-response", "data": {"error": "no such action"}}),
        )
        .unwrap_err();
        assert!(matches!(err, RtviError::Protocol { ref message, .. } if message == "no such action"));
    }

    #[test]
    fn test_parse_event_stream() {
        let body = concat!(
            "data: {\"id\":\"a\",\"label\":\"rtvi-ai\",\"type\":\"bot-llm-started\",\"data\":{}}\n\n",
            ": keep-alive\n\n",
            "data: {\"id\":\"b\",\"label\":\"rtvi-ai\",\"type\":\"bot-llm-text\",\"data\":{\"text\":\"hi\"}}\n\n",
            "data: {\"id\":\"req\",\"label\":\"rtvi-ai\",\"type\":\"action-response\",\"data\":{\"result\":true}}\n\n",
            "data: {\"id\":\"c\",\"label\":\"rtvi-ai\",\"type\":\"bot-llm-stopped\",\"data\":{}}\n\n",
        );

        let outcome = parse_event_stream("req", body);
        assert_eq!(outcome.response.unwrap().result(), &json!(true));
        let types: Vec<_> = outcome.messages.iter().map(|m| m.message_type()).collect();
        assert_eq!(types, vec!["bot-llm-started", "bot-llm-text", "bot-llm-stopped"]);
    }

    #[test]
    fn test_parse_event_stream_without_response() {
        let body = "data: {\"id\":\"a\",\"label\":\"rtvi-ai\",\"type\":\"bot-llm-started\",\"data\":{}}\n";
        let outcome = parse_event_stream("req", body);
        assert!(matches!(outcome.response, Err(RtviError::Protocol { .. })));
        assert_eq!(outcome.messages.len(), 1);
    }

    #[test]
    fn test_parse_event_stream_keeps_messages_on_error() {
        let body = concat!(
            "data: {\"id\":\"a\",\"label\":\"rtvi-ai\",\"type\":\"bot-llm-started\",\"data\":{}}\n\n",
            "data: {\"id\":\"b\",\"label\":\"rtvi-ai\",\"type\":\"bot-llm-text\",\"data\":{\"text\":\"par\"}}\n\n",
            "data: {\"id\":\"req\",\"label\":\"rtvi-ai\",\"type\":\"error-response\",\"data\":{\"error\":\"llm crashed\"}}\n\n",
        );

        let outcome = parse_event_stream("req", body);
        assert!(matches!(
            outcome.response,
            Err(RtviError::Protocol { ref message, .. }) if message == "llm crashed"
        ));
        let types: Vec<_> = outcome.messages.iter().map(|m| m.message_type()).collect();
        assert_eq!(types, vec!["bot-llm-started", "bot-llm-text"]);
    }
}
