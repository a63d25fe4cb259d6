//! Base trait and types for media transports.
//!
//! A transport carries the realtime media session (audio/video) and the
//! in-band RTVI message channel. The session controller consumes it only
//! through the [`Transport`] trait and receives its notifications as
//! [`TransportEvent`]s on a per-instance [`TransportEventSink`].
//!
//! # Ownership
//!
//! Each connection attempt gets a fresh transport instance built by a
//! [`TransportFactory`]. Instances are shared as `Arc<dyn Transport>`, so
//! every method takes `&self` and implementations keep their mutable state
//! behind interior locks.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::core::messages::RtviMessage;
use crate::errors::RtviResult;

// =============================================================================
// Session State
// =============================================================================

/// Session state shared by the controller and its transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportState {
    #[default]
    Disconnected,
    Initializing,
    Initialized,
    Authenticating,
    Connecting,
    Connected,
    Ready,
    Disconnecting,
    Error,
}

impl TransportState {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Initializing => "initializing",
            Self::Initialized => "initialized",
            Self::Authenticating => "authenticating",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Ready => "ready",
            Self::Disconnecting => "disconnecting",
            Self::Error => "error",
        }
    }

    /// Whether the session state machine has an edge from `self` to `next`.
    ///
    /// ```text
    /// disconnected -> initializing -> initialized -> [authenticating ->] connecting
    ///     -> connected -> ready
    /// initializing | initialized | authenticating | connecting | connected -> error
    /// * -> disconnecting -> disconnected
    /// error -> disconnected
    /// ```
    pub fn can_transition_to(&self, next: TransportState) -> bool {
        use TransportState::*;

        match (self, next) {
            (_, Disconnecting) => *self != Disconnecting,
            (Disconnecting, Disconnected) => true,
            (Error, Disconnected) => true,
            (Disconnected, Initializing) => true,
            (Initializing, Initialized) => true,
            (Initialized, Authenticating) => true,
            (Initialized, Connecting) => true,
            (Authenticating, Connecting) => true,
            (Connecting, Connected) => true,
            (Connected, Ready) => true,
            (Initializing | Initialized | Authenticating | Connecting | Connected, Error) => true,
            _ => false,
        }
    }

    /// A connect attempt is in flight or established.
    pub fn is_connecting_or_connected(&self) -> bool {
        matches!(
            self,
            Self::Authenticating | Self::Connecting | Self::Connected | Self::Ready
        )
    }

    /// States that precede any connect attempt.
    pub fn is_pre_connect(&self) -> bool {
        matches!(
            self,
            Self::Disconnected | Self::Initializing | Self::Initialized | Self::Error
        )
    }
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Media Types
// =============================================================================

/// Kind of a local media device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    AudioInput,
    VideoInput,
}

/// A local capture device as reported by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaDeviceInfo {
    pub device_id: String,
    pub label: String,
    pub kind: DeviceKind,
}

impl MediaDeviceInfo {
    pub fn new(device_id: impl Into<String>, label: impl Into<String>, kind: DeviceKind) -> Self {
        Self {
            device_id: device_id.into(),
            label: label.into(),
            kind,
        }
    }
}

/// A participant in the media session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: String,
    pub name: String,
    pub local: bool,
}

impl Participant {
    pub fn new(id: impl Into<String>, name: impl Into<String>, local: bool) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            local,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

/// Opaque handle to a media track. The session layer passes it through
/// unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaTrack {
    pub id: String,
    pub kind: TrackKind,
}

impl MediaTrack {
    pub fn new(id: impl Into<String>, kind: TrackKind) -> Self {
        Self {
            id: id.into(),
            kind,
        }
    }
}

/// Audio/video track pair for one side of the session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackPair {
    pub audio: Option<MediaTrack>,
    pub video: Option<MediaTrack>,
}

/// Current local and bot tracks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tracks {
    pub local: TrackPair,
    pub bot: Option<TrackPair>,
}

// =============================================================================
// Transport Events
// =============================================================================

/// Raw notification from a transport instance.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// The transport joined the media session.
    Connected,
    /// The transport left the media session.
    Disconnected,
    AvailableMicsUpdated(Vec<MediaDeviceInfo>),
    AvailableCamsUpdated(Vec<MediaDeviceInfo>),
    MicUpdated(MediaDeviceInfo),
    CamUpdated(MediaDeviceInfo),
    TrackStarted {
        track: MediaTrack,
        participant: Option<Participant>,
    },
    TrackStopped {
        track: MediaTrack,
        participant: Option<Participant>,
    },
    ParticipantJoined(Participant),
    ParticipantLeft(Participant),
    BotConnected(Participant),
    BotDisconnected(Participant),
    LocalAudioLevel(f32),
    RemoteAudioLevel {
        level: f32,
        participant: Participant,
    },
    /// In-band envelope received from the agent.
    Message(RtviMessage),
}

/// Forwards one tagged notification; returns `false` once the receiver is gone.
pub type EventForwarder = Arc<dyn Fn(u64, TransportEvent) -> bool + Send + Sync>;

/// Channel end a transport instance reports its notifications on.
///
/// Every sink is tagged with the generation of the transport instance it was
/// handed to, so the receiver can drop notifications from released
/// instances.
#[derive(Clone)]
pub struct TransportEventSink {
    generation: u64,
    forward: EventForwarder,
}

impl TransportEventSink {
    pub fn new(generation: u64, tx: mpsc::UnboundedSender<(u64, TransportEvent)>) -> Self {
        Self::with_forwarder(
            generation,
            Arc::new(move |generation: u64, event: TransportEvent| {
                tx.send((generation, event)).is_ok()
            }),
        )
    }

    /// Sink that hands notifications to `forward` instead of a plain channel.
    pub fn with_forwarder(generation: u64, forward: EventForwarder) -> Self {
        Self {
            generation,
            forward,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Report a notification. Returns `false` once the receiver is gone.
    pub fn emit(&self, event: TransportEvent) -> bool {
        (self.forward)(self.generation, event)
    }
}

impl fmt::Debug for TransportEventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportEventSink")
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Options
// =============================================================================

/// Options handed to a transport on initialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportOptions {
    pub enable_mic: bool,
    pub enable_cam: bool,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            enable_mic: true,
            enable_cam: false,
        }
    }
}

// =============================================================================
// Base Trait
// =============================================================================

/// Capability contract for a realtime media transport.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Bind options and the notification sink. Called once per instance,
    /// before any other method.
    fn initialize(&self, options: &TransportOptions, events: TransportEventSink);

    /// Enumerate and open local devices.
    async fn init_devices(&self) -> RtviResult<()>;

    /// Join the media session described by `auth_bundle`.
    ///
    /// Resolves once the join completes; the `Connected` notification is
    /// reported through the sink. If `cancel` fires, the transport must stop
    /// and report nothing further.
    async fn connect(&self, auth_bundle: Value, cancel: CancellationToken) -> RtviResult<()>;

    /// Leave the media session and release resources.
    async fn disconnect(&self) -> RtviResult<()>;

    /// Send an in-band envelope to the agent.
    async fn send_message(&self, message: RtviMessage) -> RtviResult<()>;

    /// Arm the `client-ready` message: it is sent once the first non-local
    /// media track starts.
    fn send_ready_message(&self);

    // -------------------------------------------------------------------------
    // Devices
    // -------------------------------------------------------------------------

    async fn get_all_mics(&self) -> RtviResult<Vec<MediaDeviceInfo>>;

    async fn get_all_cams(&self) -> RtviResult<Vec<MediaDeviceInfo>>;

    async fn update_mic(&self, mic_id: &str) -> RtviResult<()>;

    async fn update_cam(&self, cam_id: &str) -> RtviResult<()>;

    fn selected_mic(&self) -> Option<MediaDeviceInfo>;

    fn selected_cam(&self) -> Option<MediaDeviceInfo>;

    fn enable_mic(&self, enable: bool);

    fn enable_cam(&self, enable: bool);

    fn is_mic_enabled(&self) -> bool;

    fn is_cam_enabled(&self) -> bool;

    // -------------------------------------------------------------------------
    // State
    // -------------------------------------------------------------------------

    fn state(&self) -> TransportState;

    /// Mirror the controller's state.
    fn set_state(&self, state: TransportState);

    /// Session expiry as a unix timestamp in seconds, if the session has one.
    fn expiry(&self) -> Option<u64> {
        None
    }

    fn tracks(&self) -> Tracks;
}

/// Builds a fresh transport instance for each connection.
pub type TransportFactory = Arc<dyn Fn() -> Arc<dyn Transport> + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_display() {
        assert_eq!(TransportState::Ready.to_string(), "ready");
        assert_eq!(TransportState::Authenticating.to_string(), "authenticating");
        assert_eq!(
            serde_json::to_string(&TransportState::Disconnecting).unwrap(),
            "\"disconnecting\""
        );
    }

    #[test]
    fn test_happy_path_edges() {
        use TransportState::*;
        let path = [
            Disconnected,
            Initializing,
            Initialized,
            Authenticating,
            Connecting,
            Connected,
            Ready,
            Disconnecting,
            Disconnected,
        ];
        for pair in path.windows(2) {
            assert!(
                pair[0].can_transition_to(pair[1]),
                "{} -> {} should be allowed",
                pair[0],
                pair[1]
            );
        }
        assert!(Initialized.can_transition_to(Connecting));
    }

    #[test]
    fn test_no_skipping() {
        use TransportState::*;
        assert!(!Disconnected.can_transition_to(Connecting));
        assert!(!Connecting.can_transition_to(Ready));
        assert!(!Initialized.can_transition_to(Connected));
        assert!(!Ready.can_transition_to(Connected));
        assert!(!Error.can_transition_to(Connecting));
        assert!(!Ready.can_transition_to(Error));
        assert!(!Disconnected.can_transition_to(Error));
    }

    #[test]
    fn test_error_and_disconnect_edges() {
        use TransportState::*;
        for state in [Initializing, Initialized, Authenticating, Connecting, Connected] {
            assert!(state.can_transition_to(Error));
        }
        for state in [
            Disconnected,
            Initializing,
            Initialized,
            Authenticating,
            Connecting,
            Connected,
            Ready,
            Error,
        ] {
            assert!(state.can_transition_to(Disconnecting));
        }
        assert!(!Disconnecting.can_transition_to(Disconnecting));
        assert!(Error.can_transition_to(Disconnected));
    }

    #[test]
    fn test_event_sink_tags_generation() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = TransportEventSink::new(7, tx);
        assert!(sink.emit(TransportEvent::Connected));
        let (generation, event) = rx.try_recv().unwrap();
        assert_eq!(generation, 7);
        assert!(matches!(event, TransportEvent::Connected));

        drop(rx);
        assert!(!sink.emit(TransportEvent::Disconnected));
    }
}
