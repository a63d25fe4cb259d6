//! Media transport abstraction.
//!
//! The session controller talks to the media layer only through the
//! [`Transport`] trait. A transport joins the media session, carries the
//! in-band RTVI message channel and reports raw notifications as
//! [`TransportEvent`]s.
//!
//! # Supported Transports
//!
//! - **WebSocket** - JSON control frames and PCM16 audio over one socket

pub mod base;
pub mod websocket;

pub use base::{
    DeviceKind, EventForwarder, MediaDeviceInfo, MediaTrack, Participant, TrackKind, TrackPair,
    Tracks, Transport, TransportEvent, TransportEventSink, TransportFactory, TransportOptions,
    TransportState,
};
pub use websocket::{WebSocketAuthBundle, WebSocketTransport, WebSocketTransportConfig};
