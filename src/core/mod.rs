pub mod client;
pub mod dispatcher;
pub mod events;
pub mod handshake;
pub mod helpers;
pub mod messages;
pub mod service_config;
pub mod transport;

// Re-export commonly used types for convenience
pub use client::{RtviClient, RtviClientBuilder, WeakRtviClient};
pub use dispatcher::MessageDispatcher;
pub use events::{EventBus, EventCallback, RtviEvent, RtviEventName};
pub use handshake::{ConnectHandler, HttpActionClient, HttpActionOutcome, HttpConnectHandler};
pub use helpers::{LlmHelper, RtviClientHelper};
pub use messages::{
    ActionRequestData, ActionResponse, BotReadyData, MessageType, RTVI_MESSAGE_LABEL,
    RTVI_PROTOCOL_VERSION, RtviMessage,
};
pub use service_config::{ConfigOption, RtviConfig, ServiceConfig};
pub use transport::{
    Transport, TransportEvent, TransportEventSink, TransportFactory, TransportOptions,
    TransportState, WebSocketTransport,
};
