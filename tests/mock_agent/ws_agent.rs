//! WebSocket agent server for the reference transport.
//!
//! Speaks the transport's framing: JSON text frames carry RTVI envelopes,
//! binary frames carry PCM16 audio. On join the agent sends one audio frame
//! (the bot track), answers `client-ready` with `bot-ready` and replies to
//! the standard requests. `disconnect-bot` makes the agent close the socket.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};

/// Shared record of what the agent observed.
#[derive(Default)]
pub struct WsAgentState {
    /// `Authorization` header of every upgrade request
    pub auth_headers: Mutex<Vec<Option<String>>>,
    /// Every envelope received, in order
    pub received: Mutex<Vec<Value>>,
    /// Bot config reported in `bot-ready`
    pub config: Mutex<Value>,
}

impl WsAgentState {
    pub fn received_types(&self) -> Vec<String> {
        self.received
            .lock()
            .iter()
            .filter_map(|v| v.get("type").and_then(Value::as_str).map(str::to_string))
            .collect()
    }
}

pub struct WsAgent {
    pub url: String,
    pub state: Arc<WsAgentState>,
}

/// Start the agent on an ephemeral loopback port.
pub async fn start(config: Value) -> WsAgent {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind agent listener");
    let addr = listener.local_addr().expect("listener has no address");

    let state = Arc::new(WsAgentState::default());
    *state.config.lock() = config;

    let task_state = state.clone();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let state = task_state.clone();
            tokio::spawn(async move {
                let _ = handle_connection(stream, state).await;
            });
        }
    });

    WsAgent {
        url: format!("ws://{addr}/session"),
        state,
    }
}

fn envelope(id: &str, message_type: &str, data: Value) -> Message {
    let value = json!({"id": id, "label": "rtvi-ai", "type": message_type, "data": data});
    Message::Text(value.to_string().into())
}

async fn handle_connection(
    stream: TcpStream,
    state: Arc<WsAgentState>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let header_state = state.clone();
    let ws_stream = accept_hdr_async(stream, move |request: &Request, response: Response| {
        let auth = request
            .headers()
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        header_state.auth_headers.lock().push(auth);
        Ok(response)
    })
    .await?;
    let (mut write, mut read) = ws_stream.split();

    // Bot audio track: 10ms of PCM16 at 16kHz
    let frame: Vec<u8> = std::iter::repeat_n(1000i16.to_le_bytes(), 160)
        .flatten()
        .collect();
    write.send(Message::Binary(frame.into())).await?;

    while let Some(msg) = read.next().await {
        let text = match msg? {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };

        let value: Value = serde_json::from_str(text.as_str())?;
        state.received.lock().push(value.clone());

        let id = value.get("id").and_then(Value::as_str).unwrap_or_default();
        let data = value.get("data").cloned().unwrap_or(Value::Null);
        let message_type = value.get("type").and_then(Value::as_str).unwrap_or_default();

        let reply = match message_type {
            "client-ready" => {
                let config = state.config.lock().clone();
                Some(envelope(
                    "ready",
                    "bot-ready",
                    json!({"version": "0.2.0", "config": config}),
                ))
            }
            "get-config" => {
                let config = state.config.lock().clone();
                Some(envelope(id, "config", json!({"config": config})))
            }
            "update-config" => {
                let config = data.get("config").cloned().unwrap_or(Value::Null);
                *state.config.lock() = config.clone();
                Some(envelope(id, "config", json!({"config": config})))
            }
            "describe-actions" => Some(envelope(
                id,
                "actions-available",
                json!({"actions": [{"service": "llm", "action": "run"}]}),
            )),
            "action" => Some(envelope(id, "action-response", json!({"result": "done"}))),
            "disconnect-bot" => {
                write.send(Message::Close(None)).await?;
                break;
            }
            _ => None,
        };

        if let Some(reply) = reply {
            write.send(reply).await?;
        }
    }

    Ok(())
}
