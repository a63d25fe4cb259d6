//! WebSocket transport configuration types.

use serde::{Deserialize, Serialize};

use crate::core::transport::base::{DeviceKind, MediaDeviceInfo};

/// Channel capacity for outgoing WebSocket frames.
pub const WS_CHANNEL_CAPACITY: usize = 256;

/// Sample rate of PCM16 audio frames exchanged with the agent.
pub const WS_AUDIO_SAMPLE_RATE: u32 = 16000;

/// Participant id used for the agent when the auth bundle names none.
pub const DEFAULT_BOT_ID: &str = "bot";

/// Participant id of the local user.
pub const LOCAL_PARTICIPANT_ID: &str = "local";

/// Static configuration of a [`WebSocketTransport`](super::WebSocketTransport).
///
/// The transport does not capture media, so the device lists are declared
/// here instead of enumerated from the host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSocketTransportConfig {
    /// Microphones reported by `get_all_mics`
    #[serde(default = "default_mics")]
    pub mics: Vec<MediaDeviceInfo>,

    /// Cameras reported by `get_all_cams`
    #[serde(default)]
    pub cams: Vec<MediaDeviceInfo>,

    /// Display name of the local participant
    #[serde(default = "default_user_name")]
    pub user_name: String,

    /// Join timeout in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn default_mics() -> Vec<MediaDeviceInfo> {
    vec![MediaDeviceInfo::new(
        "default",
        "Default Microphone",
        DeviceKind::AudioInput,
    )]
}

fn default_user_name() -> String {
    "user".to_string()
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

impl Default for WebSocketTransportConfig {
    fn default() -> Self {
        Self {
            mics: default_mics(),
            cams: Vec::new(),
            user_name: default_user_name(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

/// Auth bundle returned by the connect endpoint for a WebSocket session.
///
/// ```json
/// {"url": "wss://agent.example.com/session/abc", "token": "...", "expiry": 1735689600}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebSocketAuthBundle {
    /// `ws://` or `wss://` session URL
    #[serde(alias = "room_url", alias = "ws_url")]
    pub url: String,

    /// Bearer token sent on the upgrade request
    #[serde(default)]
    pub token: Option<String>,

    /// Participant id of the agent
    #[serde(default)]
    pub bot_id: Option<String>,

    /// Session expiry (unix seconds)
    #[serde(default)]
    pub expiry: Option<u64>,
}
