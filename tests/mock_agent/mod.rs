//! Mock agents for integration tests.
//!
//! - `ScriptedAgent`: in-memory transport whose join, replies and failures
//!   are scripted by the test
//! - `ws_agent`: WebSocket agent server for the reference transport

// Allow dead code in test infrastructure - not every test file uses every helper
#![allow(dead_code)]

pub mod ws_agent;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use rtvi_client::core::transport::{
    DeviceKind, MediaDeviceInfo, Tracks, Transport, TransportEvent, TransportEventSink,
    TransportFactory, TransportOptions, TransportState,
};
use rtvi_client::{RtviError, RtviEvent, RtviMessage, RtviResult};

/// How a scripted transport joins the session.
#[derive(Debug, Clone, PartialEq)]
pub enum JoinBehavior {
    Succeed,
    Fail(String),
    /// Never completes until cancelled
    Hang,
}

/// Produces the agent's replies to one outgoing envelope.
pub type Responder = Arc<dyn Fn(&RtviMessage) -> Vec<RtviMessage> + Send + Sync>;

struct Script {
    join: JoinBehavior,
    fail_devices: bool,
    fail_sends: bool,
    /// Reply to client-ready with bot-ready
    auto_ready: bool,
    bot_version: String,
    bot_config: Value,
    responder: Option<Responder>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            join: JoinBehavior::Succeed,
            fail_devices: false,
            fail_sends: false,
            auto_ready: true,
            bot_version: "0.2.0".to_string(),
            bot_config: json!([]),
            responder: None,
        }
    }
}

/// Scripted remote agent shared by every transport instance it builds.
#[derive(Clone, Default)]
pub struct ScriptedAgent {
    script: Arc<Mutex<Script>>,
    instances: Arc<Mutex<Vec<Arc<ScriptedTransport>>>>,
}

impl ScriptedAgent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn factory(&self) -> TransportFactory {
        let agent = self.clone();
        Arc::new(move || {
            let transport = Arc::new(ScriptedTransport::new(agent.script.clone()));
            agent.instances.lock().push(transport.clone());
            transport as Arc<dyn Transport>
        })
    }

    pub fn set_join(&self, join: JoinBehavior) {
        self.script.lock().join = join;
    }

    pub fn set_fail_devices(&self, fail: bool) {
        self.script.lock().fail_devices = fail;
    }

    pub fn set_fail_sends(&self, fail: bool) {
        self.script.lock().fail_sends = fail;
    }

    pub fn set_auto_ready(&self, auto_ready: bool) {
        self.script.lock().auto_ready = auto_ready;
    }

    pub fn set_bot_version(&self, version: &str) {
        self.script.lock().bot_version = version.to_string();
    }

    pub fn set_bot_config(&self, config: Value) {
        self.script.lock().bot_config = config;
    }

    pub fn set_responder<F>(&self, responder: F)
    where
        F: Fn(&RtviMessage) -> Vec<RtviMessage> + Send + Sync + 'static,
    {
        self.script.lock().responder = Some(Arc::new(responder));
    }

    /// Every instance built so far, oldest first.
    pub fn instances(&self) -> Vec<Arc<ScriptedTransport>> {
        self.instances.lock().clone()
    }

    /// Most recently built instance.
    pub fn current(&self) -> Arc<ScriptedTransport> {
        self.instances
            .lock()
            .last()
            .cloned()
            .expect("factory has not built a transport yet")
    }
}

/// In-memory transport driven by a [`ScriptedAgent`].
pub struct ScriptedTransport {
    script: Arc<Mutex<Script>>,
    events: Mutex<Option<TransportEventSink>>,
    state: Mutex<TransportState>,
    sent: Mutex<Vec<RtviMessage>>,
    auth_bundles: Mutex<Vec<Value>>,
    mic_enabled: Mutex<bool>,
    cam_enabled: Mutex<bool>,
    pub connect_calls: AtomicUsize,
    pub disconnect_calls: AtomicUsize,
}

impl ScriptedTransport {
    fn new(script: Arc<Mutex<Script>>) -> Self {
        Self {
            script,
            events: Mutex::new(None),
            state: Mutex::new(TransportState::Disconnected),
            sent: Mutex::new(Vec::new()),
            auth_bundles: Mutex::new(Vec::new()),
            mic_enabled: Mutex::new(true),
            cam_enabled: Mutex::new(false),
            connect_calls: AtomicUsize::new(0),
            disconnect_calls: AtomicUsize::new(0),
        }
    }

    /// Report a raw notification as this instance.
    pub fn inject(&self, event: TransportEvent) {
        if let Some(events) = self.events.lock().as_ref() {
            events.emit(event);
        }
    }

    /// Deliver an in-band envelope from the agent.
    pub fn push(&self, message: RtviMessage) {
        self.inject(TransportEvent::Message(message));
    }

    /// Envelopes the client sent, in order.
    pub fn sent(&self) -> Vec<RtviMessage> {
        self.sent.lock().clone()
    }

    /// Sent envelopes of one type.
    pub fn sent_of_type(&self, message_type: &str) -> Vec<RtviMessage> {
        self.sent()
            .into_iter()
            .filter(|m| m.message_type() == message_type)
            .collect()
    }

    pub fn auth_bundles(&self) -> Vec<Value> {
        self.auth_bundles.lock().clone()
    }

    /// Wait until `count` envelopes of `message_type` were sent.
    pub async fn wait_for_sent(&self, message_type: &str, count: usize) -> Vec<RtviMessage> {
        for _ in 0..200 {
            let sent = self.sent_of_type(message_type);
            if sent.len() >= count {
                return sent;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("timed out waiting for {count} '{message_type}' messages");
    }

    fn bot_ready(&self) -> RtviMessage {
        let script = self.script.lock();
        RtviMessage::new(
            "bot-ready",
            json!({"version": script.bot_version, "config": script.bot_config}),
        )
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    fn initialize(&self, options: &TransportOptions, events: TransportEventSink) {
        *self.mic_enabled.lock() = options.enable_mic;
        *self.cam_enabled.lock() = options.enable_cam;
        *self.events.lock() = Some(events);
    }

    async fn init_devices(&self) -> RtviResult<()> {
        if self.script.lock().fail_devices {
            return Err(RtviError::TransportStart("no audio device".to_string()));
        }
        self.inject(TransportEvent::AvailableMicsUpdated(vec![MediaDeviceInfo::new(
            "mic-1",
            "Scripted Mic",
            DeviceKind::AudioInput,
        )]));
        Ok(())
    }

    async fn connect(&self, auth_bundle: Value, cancel: CancellationToken) -> RtviResult<()> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        self.auth_bundles.lock().push(auth_bundle);

        let join = self.script.lock().join.clone();
        match join {
            JoinBehavior::Succeed => {
                self.inject(TransportEvent::Connected);
                Ok(())
            }
            JoinBehavior::Fail(reason) => Err(RtviError::TransportStart(reason)),
            JoinBehavior::Hang => {
                cancel.cancelled().await;
                Err(RtviError::Cancelled)
            }
        }
    }

    async fn disconnect(&self) -> RtviResult<()> {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn send_message(&self, message: RtviMessage) -> RtviResult<()> {
        let (fail, responder) = {
            let script = self.script.lock();
            (script.fail_sends, script.responder.clone())
        };
        if fail {
            return Err(RtviError::TransportStart("send failed".to_string()));
        }

        self.sent.lock().push(message.clone());
        if let Some(responder) = responder {
            for reply in responder(&message) {
                self.push(reply);
            }
        }
        Ok(())
    }

    fn send_ready_message(&self) {
        self.sent.lock().push(RtviMessage::client_ready());
        if self.script.lock().auto_ready {
            let ready = self.bot_ready();
            self.push(ready);
        }
    }

    async fn get_all_mics(&self) -> RtviResult<Vec<MediaDeviceInfo>> {
        Ok(vec![MediaDeviceInfo::new(
            "mic-1",
            "Scripted Mic",
            DeviceKind::AudioInput,
        )])
    }

    async fn get_all_cams(&self) -> RtviResult<Vec<MediaDeviceInfo>> {
        Ok(Vec::new())
    }

    async fn update_mic(&self, _mic_id: &str) -> RtviResult<()> {
        Ok(())
    }

    async fn update_cam(&self, _cam_id: &str) -> RtviResult<()> {
        Ok(())
    }

    fn selected_mic(&self) -> Option<MediaDeviceInfo> {
        None
    }

    fn selected_cam(&self) -> Option<MediaDeviceInfo> {
        None
    }

    fn enable_mic(&self, enable: bool) {
        *self.mic_enabled.lock() = enable;
    }

    fn enable_cam(&self, enable: bool) {
        *self.cam_enabled.lock() = enable;
    }

    fn is_mic_enabled(&self) -> bool {
        *self.mic_enabled.lock()
    }

    fn is_cam_enabled(&self) -> bool {
        *self.cam_enabled.lock()
    }

    fn state(&self) -> TransportState {
        *self.state.lock()
    }

    fn set_state(&self, state: TransportState) {
        *self.state.lock() = state;
    }

    fn tracks(&self) -> Tracks {
        Tracks::default()
    }
}

/// Build a reply carrying the request's id.
pub fn reply(request: &RtviMessage, message_type: &str, data: Value) -> RtviMessage {
    RtviMessage::with_id(request.id(), message_type, data)
}

/// Drain every event currently buffered on `rx`.
pub fn drain(rx: &mut broadcast::Receiver<RtviEvent>) -> Vec<RtviEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Receive events until one matches `predicate`, failing after two seconds.
pub async fn wait_for_event<F>(rx: &mut broadcast::Receiver<RtviEvent>, predicate: F) -> RtviEvent
where
    F: Fn(&RtviEvent) -> bool,
{
    let found = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match rx.recv().await {
                Ok(event) if predicate(&event) => return event,
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event stream closed"),
            }
        }
    })
    .await;
    found.expect("timed out waiting for event")
}

/// State changes in `events`, in order.
pub fn state_changes(events: &[RtviEvent]) -> Vec<TransportState> {
    events
        .iter()
        .filter_map(|e| match e {
            RtviEvent::TransportStateChanged(state) => Some(*state),
            _ => None,
        })
        .collect()
}

/// Poll until the client reaches `state`.
pub async fn wait_for_state(client: &rtvi_client::RtviClient, state: TransportState) {
    let mut rx = client.watch_state();
    let reached = tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|s| *s == state))
        .await
        .map(|r| r.is_ok())
        .unwrap_or(false);
    assert!(
        reached,
        "client never reached state '{state}', current '{}'",
        client.state()
    );
}
