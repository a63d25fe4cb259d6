//! WebSocket transport implementation.
//!
//! Joins an agent session over a single WebSocket connection:
//!
//! - Text frames carry RTVI envelopes in both directions. Frames with a label
//!   other than `rtvi-ai` are ignored, except `pipecat-metrics` frames which
//!   are forwarded as `metrics` envelopes.
//! - Binary frames carry PCM 16-bit little-endian mono audio. Frames from the
//!   agent are the bot audio track; the first one starts the track and
//!   releases the armed `client-ready` message.
//!
//! # Example
//!
//! ```rust,ignore
//! use rtvi_client::core::transport::{WebSocketTransport, WebSocketTransportConfig};
//! use std::sync::Arc;
//!
//! let factory: TransportFactory = Arc::new(|| {
//!     Arc::new(WebSocketTransport::new(WebSocketTransportConfig::default()))
//! });
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{Sink, SinkExt, StreamExt};
use http::HeaderValue;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_util::sync::CancellationToken;

use super::config::{
    DEFAULT_BOT_ID, LOCAL_PARTICIPANT_ID, WS_CHANNEL_CAPACITY, WebSocketAuthBundle,
    WebSocketTransportConfig,
};
use crate::core::messages::{PIPECAT_METRICS_TYPE, RTVI_MESSAGE_LABEL, RtviMessage};
use crate::core::transport::base::{
    MediaDeviceInfo, MediaTrack, Participant, TrackKind, TrackPair, Tracks, Transport,
    TransportEvent, TransportEventSink, TransportOptions, TransportState,
};
use crate::errors::{RtviError, RtviResult};
use crate::utils::url_validation::validate_transport_url;

/// How long `disconnect` waits for the connection task to send its close frame.
const CLOSE_GRACE_PERIOD: Duration = Duration::from_millis(500);

const BOT_AUDIO_TRACK_ID: &str = "bot-audio";
const LOCAL_AUDIO_TRACK_ID: &str = "local-audio";
const LOCAL_VIDEO_TRACK_ID: &str = "local-video";

// =============================================================================
// Audio Levels
// =============================================================================

/// RMS level of a PCM16 little-endian frame, normalized to `0.0..=1.0`.
pub fn pcm16_level(frame: &[u8]) -> f32 {
    let samples = frame.len() / 2;
    if samples == 0 {
        return 0.0;
    }

    let sum_squares: f64 = frame
        .chunks_exact(2)
        .map(|pair| {
            let sample = i16::from_le_bytes([pair[0], pair[1]]) as f64 / 32768.0;
            sample * sample
        })
        .sum();

    ((sum_squares / samples as f64).sqrt() as f32).clamp(0.0, 1.0)
}

// =============================================================================
// Session State
// =============================================================================

/// State shared between the transport and its connection task.
#[derive(Default)]
struct SessionShared {
    /// `client-ready` should be sent on the first bot track
    ready_armed: AtomicBool,
    /// `client-ready` already went out for this session
    ready_sent: AtomicBool,
    bot: RwLock<Option<Participant>>,
    bot_audio: RwLock<Option<MediaTrack>>,
}

impl SessionShared {
    /// Claim the single `client-ready` send if it is armed and due.
    fn take_ready(&self) -> bool {
        self.ready_armed.load(Ordering::SeqCst)
            && self.bot_audio.read().is_some()
            && !self.ready_sent.swap(true, Ordering::SeqCst)
    }

    fn reset(&self) {
        self.ready_armed.store(false, Ordering::SeqCst);
        self.ready_sent.store(false, Ordering::SeqCst);
        *self.bot.write() = None;
        *self.bot_audio.write() = None;
    }
}

// =============================================================================
// WebSocket Transport
// =============================================================================

/// Reference [`Transport`] over a single WebSocket connection.
pub struct WebSocketTransport {
    config: WebSocketTransportConfig,
    events: RwLock<Option<TransportEventSink>>,
    state: Mutex<TransportState>,
    shared: Arc<SessionShared>,

    /// Outgoing frame channel (present while joined)
    ws_sender: Mutex<Option<mpsc::Sender<Message>>>,
    connection_handle: Mutex<Option<JoinHandle<()>>>,
    shutdown: Mutex<Option<CancellationToken>>,

    selected_mic: RwLock<Option<MediaDeviceInfo>>,
    selected_cam: RwLock<Option<MediaDeviceInfo>>,
    mic_enabled: AtomicBool,
    cam_enabled: AtomicBool,
    expiry: Mutex<Option<u64>>,
}

impl WebSocketTransport {
    pub fn new(config: WebSocketTransportConfig) -> Self {
        let defaults = TransportOptions::default();
        Self {
            config,
            mic_enabled: AtomicBool::new(defaults.enable_mic),
            cam_enabled: AtomicBool::new(defaults.enable_cam),
            events: RwLock::new(None),
            state: Mutex::new(TransportState::Disconnected),
            shared: Arc::new(SessionShared::default()),
            ws_sender: Mutex::new(None),
            connection_handle: Mutex::new(None),
            shutdown: Mutex::new(None),
            selected_mic: RwLock::new(None),
            selected_cam: RwLock::new(None),
            expiry: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &WebSocketTransportConfig {
        &self.config
    }

    /// Whether the WebSocket is currently joined.
    pub fn is_joined(&self) -> bool {
        self.ws_sender.lock().is_some()
    }

    /// Stream a PCM16 frame of local microphone audio to the agent.
    ///
    /// Dropped silently while the microphone is disabled.
    pub async fn send_audio(&self, frame: Bytes) -> RtviResult<()> {
        if !self.mic_enabled.load(Ordering::SeqCst) {
            return Ok(());
        }

        self.emit(TransportEvent::LocalAudioLevel(pcm16_level(&frame)));
        self.send_frame(Message::Binary(frame)).await
    }

    fn emit(&self, event: TransportEvent) {
        if let Some(events) = self.events.read().as_ref() {
            events.emit(event);
        }
    }

    fn local_participant(&self) -> Participant {
        Participant::new(LOCAL_PARTICIPANT_ID, self.config.user_name.clone(), true)
    }

    async fn send_frame(&self, frame: Message) -> RtviResult<()> {
        let sender = self.ws_sender.lock().clone();
        match sender {
            Some(sender) => sender
                .send(frame)
                .await
                .map_err(|e| RtviError::TransportStart(format!("WebSocket send failed: {e}"))),
            None => Err(RtviError::InvalidState(
                "transport is not connected".to_string(),
            )),
        }
    }

    /// Handle an inbound text frame.
    fn handle_text_frame(text: &str, events: &TransportEventSink) {
        let value: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!("Failed to parse inbound frame: {} - {}", e, text);
                return;
            }
        };

        let is_rtvi = value.get("label").and_then(Value::as_str) == Some(RTVI_MESSAGE_LABEL);
        let is_metrics = value.get("type").and_then(Value::as_str) == Some(PIPECAT_METRICS_TYPE);

        if is_rtvi {
            match serde_json::from_value::<RtviMessage>(value) {
                Ok(message) => {
                    events.emit(TransportEvent::Message(message));
                }
                Err(e) => tracing::warn!("Malformed RTVI envelope: {}", e),
            }
        } else if is_metrics {
            let metrics = value.get("metrics").cloned().unwrap_or(Value::Null);
            events.emit(TransportEvent::Message(RtviMessage::new("metrics", metrics)));
        } else {
            tracing::trace!("Ignoring non-RTVI frame: {:?}", value.get("label"));
        }
    }

    /// Handle an inbound audio frame from the agent.
    async fn handle_bot_audio<S>(
        frame: &[u8],
        events: &TransportEventSink,
        shared: &SessionShared,
        sink: &mut S,
    ) where
        S: Sink<Message> + Unpin,
    {
        let bot = shared
            .bot
            .read()
            .clone()
            .unwrap_or_else(|| Participant::new(DEFAULT_BOT_ID, DEFAULT_BOT_ID, false));

        let started = {
            let mut bot_audio = shared.bot_audio.write();
            if bot_audio.is_none() {
                *bot_audio = Some(MediaTrack::new(BOT_AUDIO_TRACK_ID, TrackKind::Audio));
                true
            } else {
                false
            }
        };

        if started {
            tracing::debug!("Bot audio track started");
            events.emit(TransportEvent::TrackStarted {
                track: MediaTrack::new(BOT_AUDIO_TRACK_ID, TrackKind::Audio),
                participant: Some(bot.clone()),
            });

            if shared.take_ready() {
                Self::send_client_ready(sink).await;
            }
        }

        events.emit(TransportEvent::RemoteAudioLevel {
            level: pcm16_level(frame),
            participant: bot,
        });
    }

    async fn send_client_ready<S>(sink: &mut S)
    where
        S: Sink<Message> + Unpin,
    {
        match RtviMessage::client_ready().to_json() {
            Ok(json) => {
                if sink.send(Message::Text(json.into())).await.is_err() {
                    tracing::error!("Failed to send client-ready");
                } else {
                    tracing::debug!("Sent client-ready");
                }
            }
            Err(e) => tracing::error!("Failed to serialize client-ready: {}", e),
        }
    }

    /// Report the agent leaving and the session ending.
    fn emit_session_ended(events: &TransportEventSink, shared: &SessionShared) {
        let bot = shared.bot.read().clone();
        let bot_audio = shared.bot_audio.read().clone();

        if let Some(bot) = bot {
            if let Some(track) = bot_audio {
                events.emit(TransportEvent::TrackStopped {
                    track,
                    participant: Some(bot.clone()),
                });
            }
            events.emit(TransportEvent::ParticipantLeft(bot.clone()));
            events.emit(TransportEvent::BotDisconnected(bot));
        }
        events.emit(TransportEvent::Disconnected);
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    fn initialize(&self, options: &TransportOptions, events: TransportEventSink) {
        self.mic_enabled.store(options.enable_mic, Ordering::SeqCst);
        self.cam_enabled.store(options.enable_cam, Ordering::SeqCst);
        *self.events.write() = Some(events);
    }

    async fn init_devices(&self) -> RtviResult<()> {
        let mics = self.config.mics.clone();
        let cams = self.config.cams.clone();

        self.emit(TransportEvent::AvailableMicsUpdated(mics.clone()));
        self.emit(TransportEvent::AvailableCamsUpdated(cams.clone()));

        if let Some(mic) = mics.into_iter().next() {
            *self.selected_mic.write() = Some(mic.clone());
            self.emit(TransportEvent::MicUpdated(mic));
        }
        if let Some(cam) = cams.into_iter().next() {
            *self.selected_cam.write() = Some(cam.clone());
            self.emit(TransportEvent::CamUpdated(cam));
        }

        Ok(())
    }

    async fn connect(&self, auth_bundle: Value, cancel: CancellationToken) -> RtviResult<()> {
        if self.is_joined() {
            return Ok(());
        }

        let bundle: WebSocketAuthBundle = serde_json::from_value(auth_bundle)
            .map_err(|e| RtviError::TransportStart(format!("invalid auth bundle: {e}")))?;
        validate_transport_url(&bundle.url)
            .map_err(|e| RtviError::TransportStart(e.to_string()))?;

        let mut request = bundle
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| RtviError::TransportStart(e.to_string()))?;
        if let Some(token) = &bundle.token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| RtviError::TransportStart(e.to_string()))?;
            request.headers_mut().insert(http::header::AUTHORIZATION, value);
        }

        let join = tokio::time::timeout(
            Duration::from_millis(self.config.connect_timeout_ms),
            tokio_tungstenite::connect_async(request),
        );

        let ws_stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RtviError::Cancelled),
            result = join => match result {
                Ok(Ok((ws_stream, _response))) => ws_stream,
                Ok(Err(e)) => return Err(RtviError::TransportStart(e.to_string())),
                Err(_) => {
                    return Err(RtviError::TransportStart(
                        "timed out joining WebSocket session".to_string(),
                    ));
                }
            },
        };

        if cancel.is_cancelled() {
            return Err(RtviError::Cancelled);
        }

        tracing::info!("Joined WebSocket session at {}", bundle.url);

        let events = self
            .events
            .read()
            .clone()
            .ok_or_else(|| RtviError::Internal("transport not initialized".to_string()))?;

        let bot = Participant::new(
            bundle.bot_id.clone().unwrap_or_else(|| DEFAULT_BOT_ID.to_string()),
            DEFAULT_BOT_ID,
            false,
        );
        self.shared.reset();
        *self.shared.bot.write() = Some(bot.clone());
        *self.expiry.lock() = bundle.expiry;

        let (mut ws_sink, mut ws_stream) = ws_stream.split();
        let (tx, mut rx) = mpsc::channel::<Message>(WS_CHANNEL_CAPACITY);
        *self.ws_sender.lock() = Some(tx);

        let shutdown = cancel.child_token();
        *self.shutdown.lock() = Some(shutdown.clone());

        let task_events = events.clone();
        let shared = self.shared.clone();

        // Join notifications go out before the reader task can report frames.
        let local = self.local_participant();
        events.emit(TransportEvent::ParticipantJoined(local.clone()));
        events.emit(TransportEvent::ParticipantJoined(bot.clone()));
        events.emit(TransportEvent::BotConnected(bot));
        if self.mic_enabled.load(Ordering::SeqCst) {
            events.emit(TransportEvent::TrackStarted {
                track: MediaTrack::new(LOCAL_AUDIO_TRACK_ID, TrackKind::Audio),
                participant: Some(local),
            });
        }
        events.emit(TransportEvent::Connected);

        let handle = tokio::spawn(async move {
            let mut intentional = false;

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        intentional = true;
                        let _ = ws_sink.send(Message::Close(None)).await;
                        break;
                    }

                    // Handle outgoing frames
                    Some(frame) = rx.recv() => {
                        if let Err(e) = ws_sink.send(frame).await {
                            tracing::error!("Failed to send WebSocket frame: {}", e);
                            break;
                        }
                    }

                    // Handle incoming frames
                    Some(frame) = ws_stream.next() => {
                        match frame {
                            Ok(Message::Text(text)) => {
                                Self::handle_text_frame(&text, &task_events);
                            }
                            Ok(Message::Binary(data)) => {
                                Self::handle_bot_audio(&data, &task_events, &shared, &mut ws_sink)
                                    .await;
                            }
                            Ok(Message::Ping(data)) => {
                                if let Err(e) = ws_sink.send(Message::Pong(data)).await {
                                    tracing::error!("Failed to send pong: {}", e);
                                }
                            }
                            Ok(Message::Close(_)) => {
                                tracing::info!("WebSocket closed by agent");
                                break;
                            }
                            Err(e) => {
                                tracing::error!("WebSocket error: {}", e);
                                break;
                            }
                            _ => {}
                        }
                    }

                    else => break,
                }
            }

            if !intentional {
                Self::emit_session_ended(&task_events, &shared);
            }
            tracing::info!("WebSocket connection task ended");
        });

        *self.connection_handle.lock() = Some(handle);

        Ok(())
    }

    async fn disconnect(&self) -> RtviResult<()> {
        if let Some(shutdown) = self.shutdown.lock().take() {
            shutdown.cancel();
        }
        *self.ws_sender.lock() = None;

        let handle = self.connection_handle.lock().take();
        if let Some(mut handle) = handle
            && tokio::time::timeout(CLOSE_GRACE_PERIOD, &mut handle)
                .await
                .is_err()
        {
            handle.abort();
        }

        self.shared.reset();
        *self.expiry.lock() = None;

        tracing::info!("Left WebSocket session");
        Ok(())
    }

    async fn send_message(&self, message: RtviMessage) -> RtviResult<()> {
        let json = message.to_json()?;
        tracing::debug!(
            message_id = message.id(),
            message_type = message.message_type(),
            "Sending envelope"
        );
        self.send_frame(Message::Text(json.into())).await
    }

    fn send_ready_message(&self) {
        self.shared.ready_armed.store(true, Ordering::SeqCst);

        // Bot media may already be flowing
        if self.shared.take_ready() {
            match RtviMessage::client_ready().to_json() {
                Ok(json) => {
                    if let Some(sender) = self.ws_sender.lock().as_ref()
                        && sender.try_send(Message::Text(json.into())).is_err()
                    {
                        tracing::error!("Failed to queue client-ready");
                    }
                }
                Err(e) => tracing::error!("Failed to serialize client-ready: {}", e),
            }
        }
    }

    async fn get_all_mics(&self) -> RtviResult<Vec<MediaDeviceInfo>> {
        Ok(self.config.mics.clone())
    }

    async fn get_all_cams(&self) -> RtviResult<Vec<MediaDeviceInfo>> {
        Ok(self.config.cams.clone())
    }

    async fn update_mic(&self, mic_id: &str) -> RtviResult<()> {
        let mic = self
            .config
            .mics
            .iter()
            .find(|m| m.device_id == mic_id)
            .cloned()
            .ok_or_else(|| RtviError::Configuration(format!("unknown microphone: {mic_id}")))?;

        *self.selected_mic.write() = Some(mic.clone());
        self.emit(TransportEvent::MicUpdated(mic));
        Ok(())
    }

    async fn update_cam(&self, cam_id: &str) -> RtviResult<()> {
        let cam = self
            .config
            .cams
            .iter()
            .find(|c| c.device_id == cam_id)
            .cloned()
            .ok_or_else(|| RtviError::Configuration(format!("unknown camera: {cam_id}")))?;

        *self.selected_cam.write() = Some(cam.clone());
        self.emit(TransportEvent::CamUpdated(cam));
        Ok(())
    }

    fn selected_mic(&self) -> Option<MediaDeviceInfo> {
        self.selected_mic.read().clone()
    }

    fn selected_cam(&self) -> Option<MediaDeviceInfo> {
        self.selected_cam.read().clone()
    }

    fn enable_mic(&self, enable: bool) {
        self.mic_enabled.store(enable, Ordering::SeqCst);
    }

    fn enable_cam(&self, enable: bool) {
        self.cam_enabled.store(enable, Ordering::SeqCst);
    }

    fn is_mic_enabled(&self) -> bool {
        self.mic_enabled.load(Ordering::SeqCst)
    }

    fn is_cam_enabled(&self) -> bool {
        self.cam_enabled.load(Ordering::SeqCst)
    }

    fn state(&self) -> TransportState {
        *self.state.lock()
    }

    fn set_state(&self, state: TransportState) {
        *self.state.lock() = state;
    }

    fn expiry(&self) -> Option<u64> {
        *self.expiry.lock()
    }

    fn tracks(&self) -> Tracks {
        let joined = self.is_joined();
        let local = TrackPair {
            audio: (joined && self.is_mic_enabled())
                .then(|| MediaTrack::new(LOCAL_AUDIO_TRACK_ID, TrackKind::Audio)),
            video: (joined && self.is_cam_enabled())
                .then(|| MediaTrack::new(LOCAL_VIDEO_TRACK_ID, TrackKind::Video)),
        };

        let bot = self.shared.bot.read().as_ref().map(|_| TrackPair {
            audio: self.shared.bot_audio.read().clone(),
            video: None,
        });

        Tracks { local, bot }
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.get_mut().take() {
            shutdown.cancel();
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
