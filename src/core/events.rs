//! Normalized client events.
//!
//! Every raw transport notification and every unsolicited in-band message
//! becomes exactly one [`RtviEvent`]. The [`EventBus`] delivers it first to
//! the callback registered for its [`RtviEventName`], then to every
//! subscriber of the broadcast stream.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::trace;

use super::helpers::llm::LlmFunctionCallData;
use super::messages::{
    BotReadyData, MetricsData, RtviMessage, StorageItemStoredData, TextData, TranscriptData,
};
use super::service_config::RtviConfig;
use super::transport::{MediaDeviceInfo, MediaTrack, Participant, TransportState};

/// A normalized client event.
#[derive(Debug, Clone)]
pub enum RtviEvent {
    // Session
    Connected,
    Disconnected,
    TransportStateChanged(TransportState),
    BotConnected(Participant),
    BotReady(BotReadyData),
    BotDisconnected(Participant),
    ParticipantConnected(Participant),
    ParticipantLeft(Participant),

    // Media
    TrackStarted {
        track: MediaTrack,
        participant: Option<Participant>,
    },
    TrackStopped {
        track: MediaTrack,
        participant: Option<Participant>,
    },
    AvailableMicsUpdated(Vec<MediaDeviceInfo>),
    AvailableCamsUpdated(Vec<MediaDeviceInfo>),
    MicUpdated(MediaDeviceInfo),
    CamUpdated(MediaDeviceInfo),
    LocalAudioLevel(f32),
    RemoteAudioLevel {
        level: f32,
        participant: Participant,
    },

    // Conversation
    UserStartedSpeaking,
    UserStoppedSpeaking,
    BotStartedSpeaking,
    BotStoppedSpeaking,
    UserTranscript(TranscriptData),
    BotTranscript(TextData),
    UserLlmText(TextData),
    BotLlmText(TextData),
    BotLlmStarted,
    BotLlmStopped,
    BotTtsText(TextData),
    BotTtsStarted,
    BotTtsStopped,
    Metrics(MetricsData),
    StorageItemStored(StorageItemStoredData),

    // Configuration
    Config(RtviConfig),
    ConfigDescribe(Value),
    ActionsAvailable(Value),

    // LLM helper
    LlmFunctionCall(LlmFunctionCallData),
    LlmFunctionCallStart(String),
    LlmJsonCompletion(String),

    /// Payload of an in-band message with no known type.
    GenericMessage(Value),
    /// `error-response` not tied to a pending request, or an unparseable payload.
    MessageError(RtviMessage),
    /// Unsolicited `error` from the agent.
    Error(RtviMessage),
}

/// Names of the [`RtviEvent`] variants, used to register callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RtviEventName {
    Connected,
    Disconnected,
    TransportStateChanged,
    BotConnected,
    BotReady,
    BotDisconnected,
    ParticipantConnected,
    ParticipantLeft,
    TrackStarted,
    TrackStopped,
    AvailableMicsUpdated,
    AvailableCamsUpdated,
    MicUpdated,
    CamUpdated,
    LocalAudioLevel,
    RemoteAudioLevel,
    UserStartedSpeaking,
    UserStoppedSpeaking,
    BotStartedSpeaking,
    BotStoppedSpeaking,
    UserTranscript,
    BotTranscript,
    UserLlmText,
    BotLlmText,
    BotLlmStarted,
    BotLlmStopped,
    BotTtsText,
    BotTtsStarted,
    BotTtsStopped,
    Metrics,
    StorageItemStored,
    Config,
    ConfigDescribe,
    ActionsAvailable,
    LlmFunctionCall,
    LlmFunctionCallStart,
    LlmJsonCompletion,
    GenericMessage,
    MessageError,
    Error,
}

impl RtviEventName {
    /// camelCase name, as used by other RTVI clients.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::TransportStateChanged => "transportStateChanged",
            Self::BotConnected => "botConnected",
            Self::BotReady => "botReady",
            Self::BotDisconnected => "botDisconnected",
            Self::ParticipantConnected => "participantConnected",
            Self::ParticipantLeft => "participantLeft",
            Self::TrackStarted => "trackStarted",
            Self::TrackStopped => "trackStopped",
            Self::AvailableMicsUpdated => "availableMicsUpdated",
            Self::AvailableCamsUpdated => "availableCamsUpdated",
            Self::MicUpdated => "micUpdated",
            Self::CamUpdated => "camUpdated",
            Self::LocalAudioLevel => "localAudioLevel",
            Self::RemoteAudioLevel => "remoteAudioLevel",
            Self::UserStartedSpeaking => "userStartedSpeaking",
            Self::UserStoppedSpeaking => "userStoppedSpeaking",
            Self::BotStartedSpeaking => "botStartedSpeaking",
            Self::BotStoppedSpeaking => "botStoppedSpeaking",
            Self::UserTranscript => "userTranscript",
            Self::BotTranscript => "botTranscript",
            Self::UserLlmText => "userLlmText",
            Self::BotLlmText => "botLlmText",
            Self::BotLlmStarted => "botLlmStarted",
            Self::BotLlmStopped => "botLlmStopped",
            Self::BotTtsText => "botTtsText",
            Self::BotTtsStarted => "botTtsStarted",
            Self::BotTtsStopped => "botTtsStopped",
            Self::Metrics => "metrics",
            Self::StorageItemStored => "storageItemStored",
            Self::Config => "config",
            Self::ConfigDescribe => "configDescribe",
            Self::ActionsAvailable => "actionsAvailable",
            Self::LlmFunctionCall => "llmFunctionCall",
            Self::LlmFunctionCallStart => "llmFunctionCallStart",
            Self::LlmJsonCompletion => "llmJsonCompletion",
            Self::GenericMessage => "genericMessage",
            Self::MessageError => "messageError",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for RtviEventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl RtviEvent {
    pub fn name(&self) -> RtviEventName {
        match self {
            Self::Connected => RtviEventName::Connected,
            Self::Disconnected => RtviEventName::Disconnected,
            Self::TransportStateChanged(_) => RtviEventName::TransportStateChanged,
            Self::BotConnected(_) => RtviEventName::BotConnected,
            Self::BotReady(_) => RtviEventName::BotReady,
            Self::BotDisconnected(_) => RtviEventName::BotDisconnected,
            Self::ParticipantConnected(_) => RtviEventName::ParticipantConnected,
            Self::ParticipantLeft(_) => RtviEventName::ParticipantLeft,
            Self::TrackStarted { .. } => RtviEventName::TrackStarted,
            Self::TrackStopped { .. } => RtviEventName::TrackStopped,
            Self::AvailableMicsUpdated(_) => RtviEventName::AvailableMicsUpdated,
            Self::AvailableCamsUpdated(_) => RtviEventName::AvailableCamsUpdated,
            Self::MicUpdated(_) => RtviEventName::MicUpdated,
            Self::CamUpdated(_) => RtviEventName::CamUpdated,
            Self::LocalAudioLevel(_) => RtviEventName::LocalAudioLevel,
            Self::RemoteAudioLevel { .. } => RtviEventName::RemoteAudioLevel,
            Self::UserStartedSpeaking => RtviEventName::UserStartedSpeaking,
            Self::UserStoppedSpeaking => RtviEventName::UserStoppedSpeaking,
            Self::BotStartedSpeaking => RtviEventName::BotStartedSpeaking,
            Self::BotStoppedSpeaking => RtviEventName::BotStoppedSpeaking,
            Self::UserTranscript(_) => RtviEventName::UserTranscript,
            Self::BotTranscript(_) => RtviEventName::BotTranscript,
            Self::UserLlmText(_) => RtviEventName::UserLlmText,
            Self::BotLlmText(_) => RtviEventName::BotLlmText,
            Self::BotLlmStarted => RtviEventName::BotLlmStarted,
            Self::BotLlmStopped => RtviEventName::BotLlmStopped,
            Self::BotTtsText(_) => RtviEventName::BotTtsText,
            Self::BotTtsStarted => RtviEventName::BotTtsStarted,
            Self::BotTtsStopped => RtviEventName::BotTtsStopped,
            Self::Metrics(_) => RtviEventName::Metrics,
            Self::StorageItemStored(_) => RtviEventName::StorageItemStored,
            Self::Config(_) => RtviEventName::Config,
            Self::ConfigDescribe(_) => RtviEventName::ConfigDescribe,
            Self::ActionsAvailable(_) => RtviEventName::ActionsAvailable,
            Self::LlmFunctionCall(_) => RtviEventName::LlmFunctionCall,
            Self::LlmFunctionCallStart(_) => RtviEventName::LlmFunctionCallStart,
            Self::LlmJsonCompletion(_) => RtviEventName::LlmJsonCompletion,
            Self::GenericMessage(_) => RtviEventName::GenericMessage,
            Self::MessageError(_) => RtviEventName::MessageError,
            Self::Error(_) => RtviEventName::Error,
        }
    }
}

/// Callback registered for one event name.
pub type EventCallback = Arc<dyn Fn(&RtviEvent) + Send + Sync>;

/// Delivers events to the named callbacks and the broadcast stream.
pub struct EventBus {
    callbacks: RwLock<HashMap<RtviEventName, EventCallback>>,
    tx: broadcast::Sender<RtviEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            callbacks: RwLock::new(HashMap::new()),
            tx,
        }
    }

    /// Set the callback for `name`, replacing any previous one.
    pub fn on(&self, name: RtviEventName, callback: EventCallback) {
        self.callbacks.write().insert(name, callback);
    }

    /// Remove the callback for `name`.
    pub fn off(&self, name: RtviEventName) -> bool {
        self.callbacks.write().remove(&name).is_some()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RtviEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Deliver `event` to its callback, then to all subscribers.
    pub fn emit(&self, event: RtviEvent) {
        let name = event.name();
        trace!(event = %name, "Emitting event");

        // Clone out of the lock so a callback may register callbacks itself.
        let callback = self.callbacks.read().get(&name).cloned();
        if let Some(callback) = callback {
            callback(&event);
        }

        // No subscribers is not an error.
        let _ = self.tx.send(event);
    }
}
