//! WebSocket reference transport.
//!
//! Carries the RTVI control channel as JSON text frames and agent audio as
//! PCM16 binary frames over one WebSocket connection. The auth bundle from
//! the connect endpoint names the session URL:
//!
//! ```json
//! {"url": "wss://agent.example.com/session/abc", "token": "...", "bot_id": "agent-1"}
//! ```

mod client;
mod config;

pub use client::{WebSocketTransport, pcm16_level};
pub use config::{
    DEFAULT_BOT_ID, LOCAL_PARTICIPANT_ID, WS_AUDIO_SAMPLE_RATE, WS_CHANNEL_CAPACITY,
    WebSocketAuthBundle, WebSocketTransportConfig,
};
