//! LLM service helper.
//!
//! Wraps the LLM service's actions (`get_context`, `set_context`,
//! `append_to_messages`, `run`) and answers function calls raised by the
//! bot's LLM through a registered async callback.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, warn};

use super::{HelperBinding, RtviClientHelper};
use crate::core::client::WeakRtviClient;
use crate::core::events::RtviEvent;
use crate::core::messages::{ActionRequestData, RtviMessage};
use crate::core::service_config::{ConfigOption, ServiceConfig};
use crate::core::transport::TransportState;
use crate::errors::RtviResult;

/// Config option holding the LLM context sent on connect.
pub const INITIAL_MESSAGES_OPTION: &str = "initial_messages";

/// In-band message types of the LLM helper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmMessageType {
    FunctionCall,
    FunctionCallStart,
    FunctionCallResult,
    JsonCompletion,
}

impl LlmMessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FunctionCall => "llm-function-call",
            Self::FunctionCallStart => "llm-function-call-start",
            Self::FunctionCallResult => "llm-function-call-result",
            Self::JsonCompletion => "llm-json-completion",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "llm-function-call" => Some(Self::FunctionCall),
            "llm-function-call-start" => Some(Self::FunctionCallStart),
            "llm-function-call-result" => Some(Self::FunctionCallResult),
            "llm-json-completion" => Some(Self::JsonCompletion),
            _ => None,
        }
    }
}

/// Payload of `llm-function-call` and `llm-function-call-result`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmFunctionCallData {
    pub function_name: String,
    pub tool_call_id: String,
    #[serde(default)]
    pub args: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmContextMessage {
    pub role: String,
    pub content: Value,
}

impl LlmContextMessage {
    pub fn new(role: impl Into<String>, content: impl Into<Value>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LlmContext {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<LlmContextMessage>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Value>,
}

/// Function call handed to the [`FunctionCallCallback`].
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionCallParams {
    pub function_name: String,
    pub arguments: Value,
}

/// Resolves a function call; the returned value is sent back to the LLM.
pub type FunctionCallCallback =
    Arc<dyn Fn(FunctionCallParams) -> Pin<Box<dyn Future<Output = Value> + Send>> + Send + Sync>;

/// JS-style truthiness of an action result.
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Helper for the LLM service.
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use rtvi_client::core::client::RtviClient;
/// use rtvi_client::core::helpers::{LlmContextMessage, LlmHelper};
/// use serde_json::json;
///
/// # async fn run(client: RtviClient) -> rtvi_client::RtviResult<()> {
/// let llm = client.register_helper("llm", Arc::new(LlmHelper::new()))?;
/// llm.handle_function_call(|call| async move { json!({"called": call.function_name}) });
/// llm.append_to_messages(LlmContextMessage::new("user", "Hello"), true)
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct LlmHelper {
    binding: HelperBinding,
    function_call: RwLock<Option<FunctionCallCallback>>,
}

impl LlmHelper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the callback that answers function calls.
    pub fn handle_function_call<F, Fut>(&self, callback: F)
    where
        F: Fn(FunctionCallParams) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Value> + Send + 'static,
    {
        let callback: FunctionCallCallback = Arc::new(
            move |params: FunctionCallParams| -> Pin<Box<dyn Future<Output = Value> + Send>> {
                Box::pin(callback(params))
            },
        );
        *self.function_call.write() = Some(callback);
    }

    fn request(&self, action: &str) -> RtviResult<ActionRequestData> {
        Ok(ActionRequestData::new(self.binding.service()?, action))
    }

    /// Retrieve the bot's current LLM context.
    pub async fn get_context(&self) -> RtviResult<LlmContext> {
        let client = self.binding.client()?;
        let response = client.action(&self.request("get_context")?).await?;
        Ok(serde_json::from_value(response.result().clone())?)
    }

    /// Replace the bot's LLM context.
    ///
    /// Before the session is ready this sets the `initial_messages` option
    /// sent on connect instead.
    pub async fn set_context(&self, context: &LlmContext, interrupt: bool) -> RtviResult<bool> {
        let client = self.binding.client()?;

        if client.state() != TransportState::Ready {
            self.set_initial_messages(serde_json::to_value(&context.messages)?)
                .await?;
            return Ok(true);
        }

        let request = self
            .request("set_context")?
            .with_argument("messages", serde_json::to_value(&context.messages)?)
            .with_argument("interrupt", json!(interrupt));
        let response = client.action(&request).await?;
        Ok(is_truthy(response.result()))
    }

    /// Append one message to the bot's LLM context.
    ///
    /// Before the session is ready the message is appended to the
    /// `initial_messages` option.
    pub async fn append_to_messages(
        &self,
        message: LlmContextMessage,
        run_immediately: bool,
    ) -> RtviResult<bool> {
        let client = self.binding.client()?;

        if client.state() != TransportState::Ready {
            let service = self.binding.service()?;
            let mut messages = match client.get_service_option_value(
                &service,
                INITIAL_MESSAGES_OPTION,
                None,
            ) {
                Some(Value::Array(messages)) => messages,
                _ => Vec::new(),
            };
            messages.push(serde_json::to_value(&message)?);
            self.set_initial_messages(Value::Array(messages)).await?;
            return Ok(true);
        }

        let request = self
            .request("append_to_messages")?
            .with_argument("messages", json!([message]))
            .with_argument("run_immediately", json!(run_immediately));
        let response = client.action(&request).await?;
        Ok(is_truthy(response.result()))
    }

    /// Run the bot's current LLM context. Does nothing unless ready.
    pub async fn run(&self, interrupt: bool) -> RtviResult<Value> {
        let client = self.binding.client()?;
        if client.state() != TransportState::Ready {
            return Ok(Value::Null);
        }

        let request = self
            .request("run")?
            .with_argument("interrupt", json!(interrupt));
        let response = client.action(&request).await?;
        Ok(response.result().clone())
    }

    async fn set_initial_messages(&self, messages: Value) -> RtviResult<()> {
        let client = self.binding.client()?;
        let service = self.binding.service()?;
        client
            .update_config(
                &[ServiceConfig::new(
                    service,
                    vec![ConfigOption::new(INITIAL_MESSAGES_OPTION, messages)],
                )],
                false,
            )
            .await?;
        Ok(())
    }

    fn on_function_call(&self, message: &RtviMessage) {
        let Ok(client) = self.binding.client() else {
            return;
        };

        let data = match message.parse_data::<LlmFunctionCallData>() {
            Ok(data) => data,
            Err(e) => {
                warn!("Malformed llm-function-call payload: {}", e);
                client.emit(RtviEvent::MessageError(message.clone()));
                return;
            }
        };

        debug!(function = %data.function_name, tool_call_id = %data.tool_call_id, "LLM function call");
        client.emit(RtviEvent::LlmFunctionCall(data.clone()));

        let Some(callback) = self.function_call.read().clone() else {
            return;
        };

        tokio::spawn(async move {
            let result = callback(FunctionCallParams {
                function_name: data.function_name.clone(),
                arguments: data.args.clone(),
            })
            .await;

            let reply = RtviMessage::new(
                LlmMessageType::FunctionCallResult.as_str(),
                json!({
                    "function_name": data.function_name,
                    "tool_call_id": data.tool_call_id,
                    "arguments": data.args,
                    "result": result,
                }),
            );
            if let Err(e) = client.send_message(reply).await {
                warn!(function = %data.function_name, "Failed to send function call result: {}", e);
            }
        });
    }
}

impl RtviClientHelper for LlmHelper {
    fn message_types(&self) -> Vec<String> {
        [
            LlmMessageType::FunctionCall,
            LlmMessageType::FunctionCallStart,
            LlmMessageType::JsonCompletion,
        ]
        .iter()
        .map(|t| t.as_str().to_string())
        .collect()
    }

    fn handle_message(&self, message: &RtviMessage) {
        match LlmMessageType::parse(message.message_type()) {
            Some(LlmMessageType::FunctionCall) => self.on_function_call(message),
            Some(LlmMessageType::FunctionCallStart) => {
                let Ok(client) = self.binding.client() else {
                    return;
                };
                let name = message
                    .data()
                    .get("function_name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                client.emit(RtviEvent::LlmFunctionCallStart(name));
            }
            Some(LlmMessageType::JsonCompletion) => {
                let Ok(client) = self.binding.client() else {
                    return;
                };
                let text = match message.data() {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                client.emit(RtviEvent::LlmJsonCompletion(text));
            }
            _ => {}
        }
    }

    fn attach(&self, client: WeakRtviClient, service: &str) {
        self.binding.bind(client, service);
    }
}
