//! Session controller.
//!
//! [`RtviClient`] owns one transport instance at a time, the current service
//! config and the request dispatcher. It drives the connect/disconnect
//! lifecycle, turns raw transport notifications into [`RtviEvent`]s and
//! exposes the config and action RPCs.
//!
//! # Event Flow
//!
//! ```text
//! Transport --(generation, TransportEvent)--> event loop task
//!     -> state / config mutations
//!     -> dispatcher (correlated responses)
//!     -> helpers (claimed message types)
//!     -> EventBus (named callback, then subscribers)
//! ```
//!
//! Notifications are handled by a single task per client, in arrival order.
//! Each transport instance is tagged with a generation; notifications from a
//! released instance are dropped. State changes made by caller-side
//! operations are committed immediately but announced through the same
//! queue, so every event is delivered from the event loop task.

use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use arc_swap::ArcSwap;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::{Mutex, RwLock};
use semver::Version;
use serde_json::{Value, json};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::dispatcher::MessageDispatcher;
use super::events::{EventBus, EventCallback, RtviEvent, RtviEventName};
use super::handshake::{ConnectHandler, HttpActionClient, HttpConnectHandler};
use super::helpers::RtviClientHelper;
use super::messages::{
    ActionRequestData, ActionResponse, BotReadyData, ConfigData, MessageType,
    RTVI_PROTOCOL_VERSION, RtviMessage,
};
use super::service_config::{ConfigOption, RtviConfig, ServiceConfig};
use super::transport::{
    MediaDeviceInfo, Tracks, Transport, TransportEvent, TransportEventSink, TransportFactory,
    TransportState,
};
use crate::config::ClientConfig;
use crate::errors::{RtviError, RtviResult};

// =============================================================================
// Builder
// =============================================================================

/// Builds an [`RtviClient`].
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use rtvi_client::config::ClientConfig;
/// use rtvi_client::core::client::RtviClient;
/// use rtvi_client::core::transport::{Transport, WebSocketTransport};
///
/// # async fn run() -> rtvi_client::RtviResult<()> {
/// let config = ClientConfig::default().with_base_url("http://localhost:7860");
/// let client = RtviClient::builder(config)
///     .transport_factory(Arc::new(|| {
///         Arc::new(WebSocketTransport::new(Default::default())) as Arc<dyn Transport>
///     }))
///     .build()?;
///
/// let bot = client.connect().await?;
/// println!("bot ready, protocol {}", bot.version);
/// # Ok(())
/// # }
/// ```
pub struct RtviClientBuilder {
    config: ClientConfig,
    factory: Option<TransportFactory>,
    connect_handler: Option<Arc<dyn ConnectHandler>>,
    http_client: Option<reqwest::Client>,
}

impl RtviClientBuilder {
    pub fn transport_factory(mut self, factory: TransportFactory) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Replace the default HTTP handshake.
    pub fn connect_handler(mut self, handler: Arc<dyn ConnectHandler>) -> Self {
        self.connect_handler = Some(handler);
        self
    }

    /// HTTP client used for the connect and action endpoints.
    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Validate the configuration and start the client's event loop.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn build(self) -> RtviResult<RtviClient> {
        self.config.validate()?;

        let factory = self.factory.ok_or_else(|| {
            RtviError::Configuration("a transport factory is required".to_string())
        })?;

        let http = self.http_client.unwrap_or_default();
        let connect_handler = self.connect_handler.or_else(|| {
            self.config.connect_url().map(|url| {
                Arc::new(HttpConnectHandler::with_client(http.clone(), url))
                    as Arc<dyn ConnectHandler>
            })
        });
        let action_client = self
            .config
            .action_url()
            .map(|url| HttpActionClient::with_client(http, url, &self.config.params));

        Ok(RtviClient::start(
            self.config,
            factory,
            connect_handler,
            action_client,
        ))
    }
}

// =============================================================================
// Client
// =============================================================================

struct HelperEntry {
    helper: Arc<dyn RtviClientHelper>,
    any: Arc<dyn Any + Send + Sync>,
    message_types: Vec<String>,
}

struct TransportSlot {
    generation: u64,
    transport: Arc<dyn Transport>,
}

/// Item on the client's event queue.
enum QueueItem {
    Transport { generation: u64, event: TransportEvent },
    /// Event raised by a caller-side operation
    Client(RtviEvent),
    /// Answered once every earlier item has been handled
    Barrier(oneshot::Sender<()>),
}

fn transport_sink(generation: u64, tx: &mpsc::UnboundedSender<QueueItem>) -> TransportEventSink {
    let tx = tx.clone();
    TransportEventSink::with_forwarder(
        generation,
        Arc::new(move |generation: u64, event: TransportEvent| {
            tx.send(QueueItem::Transport { generation, event }).is_ok()
        }),
    )
}

struct ClientInner {
    options: ClientConfig,
    factory: TransportFactory,
    connect_handler: Option<Arc<dyn ConnectHandler>>,
    action_client: Option<HttpActionClient>,

    transport: RwLock<TransportSlot>,
    generation: AtomicU64,
    event_tx: mpsc::UnboundedSender<QueueItem>,

    state_tx: watch::Sender<TransportState>,

    /// Config as currently known to the bot.
    config: ArcSwap<RtviConfig>,
    /// Config sent with the next connect; restored on disconnect.
    last_known_config: ArcSwap<RtviConfig>,
    bot_ready: RwLock<Option<BotReadyData>>,

    dispatcher: MessageDispatcher,
    events: EventBus,
    helpers: DashMap<String, HelperEntry>,

    attempt: Mutex<Option<(u64, CancellationToken)>>,
    attempt_seq: AtomicU64,
    disconnect_lock: tokio::sync::Mutex<()>,
}

/// RTVI session controller. Cheap to clone; clones share the session.
#[derive(Clone)]
pub struct RtviClient {
    inner: Arc<ClientInner>,
}

/// Non-owning handle to an [`RtviClient`], held by helpers.
#[derive(Clone)]
pub struct WeakRtviClient {
    inner: Weak<ClientInner>,
}

impl WeakRtviClient {
    pub fn upgrade(&self) -> Option<RtviClient> {
        self.inner.upgrade().map(|inner| RtviClient { inner })
    }
}

impl RtviClient {
    pub fn builder(config: ClientConfig) -> RtviClientBuilder {
        RtviClientBuilder {
            config,
            factory: None,
            connect_handler: None,
            http_client: None,
        }
    }

    /// Create a client with the default HTTP handshake.
    pub fn new(config: ClientConfig, factory: TransportFactory) -> RtviResult<Self> {
        Self::builder(config).transport_factory(factory).build()
    }

    fn start(
        options: ClientConfig,
        factory: TransportFactory,
        connect_handler: Option<Arc<dyn ConnectHandler>>,
        action_client: Option<HttpActionClient>,
    ) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(TransportState::Disconnected);

        let transport = factory();
        transport.initialize(&options.transport_options(), transport_sink(0, &event_tx));

        let initial_config = Arc::new(options.params.config.clone());
        let inner = Arc::new(ClientInner {
            dispatcher: MessageDispatcher::new(options.request_timeout()),
            events: EventBus::new(options.event_channel_capacity),
            config: ArcSwap::new(initial_config.clone()),
            last_known_config: ArcSwap::new(initial_config),
            options,
            factory,
            connect_handler,
            action_client,
            transport: RwLock::new(TransportSlot {
                generation: 0,
                transport,
            }),
            generation: AtomicU64::new(0),
            event_tx,
            state_tx,
            bot_ready: RwLock::new(None),
            helpers: DashMap::new(),
            attempt: Mutex::new(None),
            attempt_seq: AtomicU64::new(0),
            disconnect_lock: tokio::sync::Mutex::new(()),
        });

        tokio::spawn(run_event_loop(Arc::downgrade(&inner), event_rx));

        Self { inner }
    }

    pub fn downgrade(&self) -> WeakRtviClient {
        WeakRtviClient {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn options(&self) -> &ClientConfig {
        &self.inner.options
    }

    fn transport(&self) -> Arc<dyn Transport> {
        self.inner.transport.read().transport.clone()
    }

    /// Deliver an event. Only called from the event loop task.
    pub(crate) fn emit(&self, event: RtviEvent) {
        self.inner.events.emit(event);
    }

    /// Queue an event raised outside the event loop behind every pending
    /// transport notification.
    fn post(&self, event: RtviEvent) {
        if self.inner.event_tx.send(QueueItem::Client(event)).is_err() {
            debug!("Event loop gone, dropping event");
        }
    }

    /// Wait until the event loop has delivered everything queued so far.
    async fn settle_events(&self) {
        let (tx, rx) = oneshot::channel();
        if self.inner.event_tx.send(QueueItem::Barrier(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    // -------------------------------------------------------------------------
    // State
    // -------------------------------------------------------------------------

    pub fn state(&self) -> TransportState {
        *self.inner.state_tx.borrow()
    }

    /// Watch state changes.
    pub fn watch_state(&self) -> watch::Receiver<TransportState> {
        self.inner.state_tx.subscribe()
    }

    pub fn connected(&self) -> bool {
        matches!(
            self.state(),
            TransportState::Connected | TransportState::Ready
        )
    }

    /// Protocol version spoken by this client.
    pub fn version(&self) -> &'static str {
        RTVI_PROTOCOL_VERSION
    }

    /// Apply a state transition if the state machine allows it.
    ///
    /// Returns `false` when the current state has no edge to `next`. The
    /// change is announced behind pending transport notifications.
    fn set_state(&self, next: TransportState) -> bool {
        let changed = self.commit_state(next);
        if changed {
            self.post(RtviEvent::TransportStateChanged(next));
        }
        changed
    }

    /// [`set_state`](Self::set_state) for the event loop task, which
    /// announces the change right away.
    fn advance_state(&self, next: TransportState) -> bool {
        let changed = self.commit_state(next);
        if changed {
            self.emit(RtviEvent::TransportStateChanged(next));
        }
        changed
    }

    fn commit_state(&self, next: TransportState) -> bool {
        let mut previous = next;
        let changed = self.inner.state_tx.send_if_modified(|state| {
            previous = *state;
            if state.can_transition_to(next) {
                *state = next;
                true
            } else {
                false
            }
        });

        if !changed {
            if previous != next {
                debug!(from = %previous, to = %next, "Ignoring invalid state transition");
            }
            return false;
        }

        debug!(from = %previous, to = %next, "Transport state changed");
        self.transport().set_state(next);
        true
    }

    /// Wait until the session is `ready`, failing once the attempt ends.
    async fn wait_for_ready(&self) -> Result<(), TransportState> {
        let mut rx = self.inner.state_tx.subscribe();
        loop {
            let state = *rx.borrow_and_update();
            match state {
                TransportState::Ready => return Ok(()),
                TransportState::Disconnecting
                | TransportState::Disconnected
                | TransportState::Error => return Err(state),
                _ => {}
            }
            if rx.changed().await.is_err() {
                return Err(TransportState::Disconnected);
            }
        }
    }

    fn ensure_ready(&self, operation: &str) -> RtviResult<()> {
        let state = self.state();
        if state == TransportState::Ready {
            Ok(())
        } else {
            Err(RtviError::BotNotReady(format!(
                "{operation} requires state 'ready', current state is '{state}'"
            )))
        }
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Initialize local media devices.
    ///
    /// Only runs from `disconnected`; otherwise devices are already set up.
    pub async fn init_devices(&self) -> RtviResult<()> {
        if self.state() != TransportState::Disconnected {
            return Ok(());
        }

        if !self.set_state(TransportState::Initializing) {
            return Err(RtviError::InvalidState(format!(
                "cannot initialize devices in state '{}'",
                self.state()
            )));
        }

        let result = match self.transport().init_devices().await {
            Ok(()) => {
                self.set_state(TransportState::Initialized);
                Ok(())
            }
            Err(e) => {
                error!("Failed to initialize devices: {}", e);
                self.set_state(TransportState::Error);
                Err(e)
            }
        };

        // Device notifications go out before `initialized`.
        self.settle_events().await;
        result
    }

    /// Connect to the agent and wait for it to report ready.
    ///
    /// Runs device initialization if needed, the handshake (if one is
    /// configured), the transport join and the wait for `bot-ready`. The
    /// configured timeout covers everything after device initialization.
    pub async fn connect(&self) -> RtviResult<BotReadyData> {
        let (attempt_id, cancel) = {
            let mut attempt = self.inner.attempt.lock();
            let state = self.state();
            if attempt.is_some()
                || state.is_connecting_or_connected()
                || state == TransportState::Disconnecting
            {
                return Err(RtviError::InvalidState(format!(
                    "client has already been started (state '{state}'), call disconnect() first"
                )));
            }

            let id = self.inner.attempt_seq.fetch_add(1, Ordering::SeqCst);
            let token = CancellationToken::new();
            *attempt = Some((id, token.clone()));
            (id, token)
        };

        if self.state() == TransportState::Error {
            self.set_state(TransportState::Disconnected);
        }

        info!("Connecting RTVI session");

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(RtviError::Cancelled),
            result = self.run_connect(&cancel) => result,
        };

        let owned = {
            let mut attempt = self.inner.attempt.lock();
            match attempt.as_ref() {
                Some((id, _)) if *id == attempt_id => {
                    *attempt = None;
                    true
                }
                _ => false,
            }
        };

        let result = match result {
            Ok(bot) => {
                info!(version = %bot.version, "Bot ready");
                Ok(bot)
            }
            Err(e) => {
                // A disconnect that cancelled the attempt owns the cleanup.
                if owned {
                    warn!("Connect attempt failed: {}", e);
                    cancel.cancel();
                    self.set_state(TransportState::Error);
                    self.release_transport().await;
                }
                Err(e)
            }
        };

        self.settle_events().await;
        result
    }

    async fn run_connect(&self, cancel: &CancellationToken) -> RtviResult<BotReadyData> {
        if self.state() == TransportState::Disconnected {
            self.init_devices().await?;
        }

        let session = self.join_session(cancel);
        match self.inner.options.timeout() {
            Some(limit) => match tokio::time::timeout(limit, session).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(timeout_ms = limit.as_millis() as u64, "Connect timed out");
                    Err(RtviError::ConnectionTimeout)
                }
            },
            None => session.await,
        }
    }

    async fn join_session(&self, cancel: &CancellationToken) -> RtviResult<BotReadyData> {
        let transport = self.transport();

        let auth_bundle = match &self.inner.connect_handler {
            Some(handler) => {
                self.set_state(TransportState::Authenticating);
                let config = self.inner.config.load_full();
                handler.connect(&self.inner.options.params, &config).await?
            }
            None => self
                .inner
                .options
                .transport_auth
                .clone()
                .unwrap_or_else(|| json!({})),
        };

        if !self.set_state(TransportState::Connecting) {
            return Err(RtviError::InvalidState(format!(
                "cannot connect transport in state '{}'",
                self.state()
            )));
        }

        transport
            .connect(auth_bundle, cancel.child_token())
            .await
            .map_err(|e| match e {
                RtviError::TransportStart(_) | RtviError::Cancelled => e,
                other => RtviError::TransportStart(other.to_string()),
            })?;

        transport.send_ready_message();

        self.wait_for_ready().await.map_err(|state| {
            RtviError::TransportStart(format!("session ended in state '{state}' before bot ready"))
        })?;

        Ok(self.inner.bot_ready.read().clone().unwrap_or_default())
    }

    /// Swap in a fresh transport instance and release the current one.
    ///
    /// Notifications from the released instance are dropped from here on and
    /// every pending request is rejected.
    async fn release_transport(&self) {
        let released = {
            let mut slot = self.inner.transport.write();
            let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;

            let fresh = (self.inner.factory)();
            fresh.initialize(
                &self.inner.options.transport_options(),
                transport_sink(generation, &self.inner.event_tx),
            );
            fresh.set_state(self.state());

            std::mem::replace(
                &mut *slot,
                TransportSlot {
                    generation,
                    transport: fresh,
                },
            )
        };

        debug!(generation = released.generation, "Releasing transport");
        if let Err(e) = released.transport.disconnect().await {
            warn!("Transport disconnect failed: {}", e);
        }

        self.inner.dispatcher.flush();
    }

    /// Leave the session.
    ///
    /// Cancels an in-flight connect attempt, releases the transport, rejects
    /// pending requests and restores the config sent on connect. Calling it
    /// while already disconnected does nothing.
    pub async fn disconnect(&self) {
        let _guard = self.inner.disconnect_lock.lock().await;

        if let Some((_, token)) = self.inner.attempt.lock().take() {
            token.cancel();
        }

        let state = self.state();
        if state == TransportState::Disconnected {
            return;
        }

        info!(state = %state, "Disconnecting RTVI session");
        let was_joined = matches!(state, TransportState::Connected | TransportState::Ready);

        self.set_state(TransportState::Disconnecting);
        self.release_transport().await;

        self.inner
            .config
            .store(self.inner.last_known_config.load_full());
        *self.inner.bot_ready.write() = None;

        self.set_state(TransportState::Disconnected);
        if was_joined {
            self.post(RtviEvent::Disconnected);
        }
        self.settle_events().await;
    }

    // -------------------------------------------------------------------------
    // Devices
    // -------------------------------------------------------------------------

    pub async fn get_all_mics(&self) -> RtviResult<Vec<MediaDeviceInfo>> {
        self.transport().get_all_mics().await
    }

    pub async fn get_all_cams(&self) -> RtviResult<Vec<MediaDeviceInfo>> {
        self.transport().get_all_cams().await
    }

    pub async fn update_mic(&self, mic_id: &str) -> RtviResult<()> {
        self.transport().update_mic(mic_id).await
    }

    pub async fn update_cam(&self, cam_id: &str) -> RtviResult<()> {
        self.transport().update_cam(cam_id).await
    }

    pub fn selected_mic(&self) -> Option<MediaDeviceInfo> {
        self.transport().selected_mic()
    }

    pub fn selected_cam(&self) -> Option<MediaDeviceInfo> {
        self.transport().selected_cam()
    }

    pub fn enable_mic(&self, enable: bool) {
        self.transport().enable_mic(enable);
    }

    pub fn enable_cam(&self, enable: bool) {
        self.transport().enable_cam(enable);
    }

    pub fn is_mic_enabled(&self) -> bool {
        self.transport().is_mic_enabled()
    }

    pub fn is_cam_enabled(&self) -> bool {
        self.transport().is_cam_enabled()
    }

    pub fn tracks(&self) -> Tracks {
        self.transport().tracks()
    }

    /// Session expiry (unix seconds) reported by the transport.
    pub fn transport_expiry(&self) -> Option<u64> {
        self.transport().expiry()
    }

    // -------------------------------------------------------------------------
    // Events
    // -------------------------------------------------------------------------

    /// Set the callback for one event, replacing any previous one.
    pub fn on<F>(&self, name: RtviEventName, callback: F)
    where
        F: Fn(&RtviEvent) + Send + Sync + 'static,
    {
        self.inner.events.on(name, Arc::new(callback) as EventCallback);
    }

    pub fn off(&self, name: RtviEventName) -> bool {
        self.inner.events.off(name)
    }

    /// Subscribe to every event.
    pub fn subscribe(&self) -> broadcast::Receiver<RtviEvent> {
        self.inner.events.subscribe()
    }

    // -------------------------------------------------------------------------
    // Messages
    // -------------------------------------------------------------------------

    /// Send an envelope to the bot without waiting for a response.
    pub async fn send_message(&self, message: RtviMessage) -> RtviResult<()> {
        self.ensure_ready("send_message")?;
        self.transport().send_message(message).await
    }

    /// Ask the bot to leave while keeping the session open.
    pub async fn disconnect_bot(&self) -> RtviResult<()> {
        self.ensure_ready("disconnect_bot")?;
        self.transport()
            .send_message(RtviMessage::disconnect_bot())
            .await
    }

    async fn dispatch(&self, message: RtviMessage) -> RtviResult<RtviMessage> {
        let transport = self.transport();
        self.inner.dispatcher.dispatch(transport.as_ref(), message).await
    }

    /// Request the bot's current config.
    pub async fn get_config(&self) -> RtviResult<RtviConfig> {
        self.ensure_ready("get_config")?;
        let response = self.dispatch(RtviMessage::get_config()).await?;
        Ok(response.parse_data::<ConfigData>()?.config)
    }

    /// Update service options.
    ///
    /// While `ready` the update goes to the bot and resolves with its
    /// `config` response. Before a connect attempt it updates the config
    /// that will be sent on connect. While an attempt is in flight it waits
    /// for the bot to become ready.
    pub async fn update_config(
        &self,
        config: &[ServiceConfig],
        interrupt: bool,
    ) -> RtviResult<RtviMessage> {
        let state = self.state();

        if state.is_pre_connect() {
            let merged = Arc::new(self.inner.last_known_config.load().with_options(config));
            self.inner.last_known_config.store(merged.clone());
            self.inner.config.store(merged.clone());
            debug!(services = merged.len(), "Updated local config");
            return Ok(RtviMessage::new(
                MessageType::Config.as_str(),
                json!({ "config": &*merged }),
            ));
        }

        if state != TransportState::Ready {
            self.wait_for_ready().await.map_err(|state| {
                RtviError::BotNotReady(format!(
                    "update_config: session ended in state '{state}'"
                ))
            })?;
        }

        self.dispatch(RtviMessage::update_config(config, interrupt))
            .await
    }

    /// Ask the bot to describe its configurable options.
    pub async fn describe_config(&self) -> RtviResult<Value> {
        self.ensure_ready("describe_config")?;
        Ok(self
            .dispatch(RtviMessage::describe_config())
            .await?
            .into_data())
    }

    /// Ask the bot to describe its registered actions.
    pub async fn describe_actions(&self) -> RtviResult<Value> {
        self.ensure_ready("describe_actions")?;
        Ok(self
            .dispatch(RtviMessage::describe_actions())
            .await?
            .into_data())
    }

    /// Run a service action.
    ///
    /// In-band while `ready`; otherwise through the action endpoint when a
    /// base URL is configured.
    pub async fn action(&self, request: &ActionRequestData) -> RtviResult<ActionResponse> {
        if self.state() == TransportState::Ready {
            let transport = self.transport();
            return self
                .inner
                .dispatcher
                .dispatch_action(transport.as_ref(), request)
                .await;
        }

        let Some(action_client) = &self.inner.action_client else {
            return Err(RtviError::BotNotReady(format!(
                "action '{}' on '{}' needs a ready session or a base URL",
                request.action, request.service
            )));
        };

        let message = RtviMessage::action(request)?;
        let outcome = action_client.send(&message).await?;

        self.feed_side_messages(outcome.messages).await;
        outcome.response
    }

    /// Hand envelopes streamed with an HTTP action to regular message
    /// handling and wait for their events to go out.
    async fn feed_side_messages(&self, messages: Vec<RtviMessage>) {
        if messages.is_empty() {
            return;
        }
        let generation = self.inner.generation.load(Ordering::SeqCst);
        for message in messages {
            let _ = self.inner.event_tx.send(QueueItem::Transport {
                generation,
                event: TransportEvent::Message(message),
            });
        }
        self.settle_events().await;
    }

    // -------------------------------------------------------------------------
    // Config queries
    // -------------------------------------------------------------------------

    /// Current config snapshot.
    pub fn config(&self) -> Arc<RtviConfig> {
        self.inner.config.load_full()
    }

    fn config_or_current(&self, config: Option<&RtviConfig>) -> Arc<RtviConfig> {
        match config {
            Some(config) => Arc::new(config.clone()),
            None => self.config(),
        }
    }

    /// Options of one service, from `config` or the current config.
    pub fn get_service_options(
        &self,
        service: &str,
        config: Option<&RtviConfig>,
    ) -> Option<ServiceConfig> {
        self.config_or_current(config).get(service).cloned()
    }

    pub fn get_service_option_value(
        &self,
        service: &str,
        option: &str,
        config: Option<&RtviConfig>,
    ) -> Option<Value> {
        self.config_or_current(config)
            .get_value(service, option)
            .cloned()
    }

    /// Config with `options` set for `service`. Does not change the client's
    /// config; pass the result to [`update_config`](Self::update_config).
    pub fn set_service_option(
        &self,
        service: &str,
        options: impl IntoIterator<Item = ConfigOption>,
        config: Option<&RtviConfig>,
    ) -> RtviConfig {
        self.config_or_current(config).with_option(service, options)
    }

    /// Config with every entry of `service_configs` applied, left to right.
    pub fn set_config_options(
        &self,
        service_configs: &[ServiceConfig],
        config: Option<&RtviConfig>,
    ) -> RtviConfig {
        self.config_or_current(config).with_options(service_configs)
    }

    // -------------------------------------------------------------------------
    // Helpers
    // -------------------------------------------------------------------------

    /// Register a helper for `service`. At most one helper per service.
    pub fn register_helper<H>(&self, service: &str, helper: Arc<H>) -> RtviResult<Arc<H>>
    where
        H: RtviClientHelper + 'static,
    {
        let message_types = helper.message_types();

        match self.inner.helpers.entry(service.to_string()) {
            Entry::Occupied(_) => Err(RtviError::Configuration(format!(
                "helper targeting service '{service}' already registered"
            ))),
            Entry::Vacant(slot) => {
                helper.attach(self.downgrade(), service);
                debug!(service, ?message_types, "Registered helper");
                slot.insert(HelperEntry {
                    helper: helper.clone(),
                    any: helper.clone(),
                    message_types,
                });
                Ok(helper)
            }
        }
    }

    pub fn get_helper<H>(&self, service: &str) -> Option<Arc<H>>
    where
        H: RtviClientHelper + 'static,
    {
        let any = self.inner.helpers.get(service)?.any.clone();
        any.downcast::<H>().ok()
    }

    pub fn unregister_helper(&self, service: &str) -> bool {
        self.inner.helpers.remove(service).is_some()
    }

    fn helper_for(&self, message_type: &str) -> Option<Arc<dyn RtviClientHelper>> {
        self.inner
            .helpers
            .iter()
            .find(|entry| entry.message_types.iter().any(|t| t == message_type))
            .map(|entry| entry.helper.clone())
    }

    // -------------------------------------------------------------------------
    // Event normalization
    // -------------------------------------------------------------------------

    fn handle_transport_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::Connected => {
                self.advance_state(TransportState::Connected);
                self.emit(RtviEvent::Connected);
            }
            TransportEvent::Disconnected => self.handle_transport_disconnected(),
            TransportEvent::AvailableMicsUpdated(mics) => {
                self.emit(RtviEvent::AvailableMicsUpdated(mics))
            }
            TransportEvent::AvailableCamsUpdated(cams) => {
                self.emit(RtviEvent::AvailableCamsUpdated(cams))
            }
            TransportEvent::MicUpdated(mic) => self.emit(RtviEvent::MicUpdated(mic)),
            TransportEvent::CamUpdated(cam) => self.emit(RtviEvent::CamUpdated(cam)),
            TransportEvent::TrackStarted { track, participant } => {
                self.emit(RtviEvent::TrackStarted { track, participant })
            }
            TransportEvent::TrackStopped { track, participant } => {
                self.emit(RtviEvent::TrackStopped { track, participant })
            }
            TransportEvent::ParticipantJoined(p) => self.emit(RtviEvent::ParticipantConnected(p)),
            TransportEvent::ParticipantLeft(p) => self.emit(RtviEvent::ParticipantLeft(p)),
            TransportEvent::BotConnected(p) => self.emit(RtviEvent::BotConnected(p)),
            TransportEvent::BotDisconnected(p) => self.emit(RtviEvent::BotDisconnected(p)),
            TransportEvent::LocalAudioLevel(level) => {
                self.emit(RtviEvent::LocalAudioLevel(level))
            }
            TransportEvent::RemoteAudioLevel { level, participant } => {
                self.emit(RtviEvent::RemoteAudioLevel { level, participant })
            }
            TransportEvent::Message(message) => self.handle_message(message),
        }
    }

    /// The transport left the session on its own.
    fn handle_transport_disconnected(&self) {
        match self.state() {
            TransportState::Ready => {
                info!("Transport disconnected, tearing down session");
                let client = self.clone();
                tokio::spawn(async move { client.disconnect().await });
            }
            // Fails the in-flight attempt; connect() cleans up.
            TransportState::Connecting | TransportState::Connected => {
                warn!("Transport disconnected before bot ready");
                self.advance_state(TransportState::Error);
            }
            _ => {}
        }
    }

    fn handle_message(&self, message: RtviMessage) {
        if !message.is_rtvi() {
            debug!(label = %message.label(), "Ignoring message with foreign label");
            return;
        }

        let kind = message.kind();
        debug!(
            message_id = %message.id(),
            message_type = %message.message_type(),
            "Received message"
        );

        // Commit data mutations before anyone hears about the message.
        if kind == Some(MessageType::Config)
            && let Ok(data) = message.parse_data::<ConfigData>()
        {
            self.inner.config.store(Arc::new(data.config));
        }

        let correlated = self.inner.dispatcher.resolve(&message);

        match kind {
            Some(MessageType::BotReady) => self.handle_bot_ready(&message),
            Some(MessageType::Config) => match message.parse_data::<ConfigData>() {
                Ok(data) => self.emit(RtviEvent::Config(data.config)),
                Err(e) => self.payload_error(&message, e),
            },
            Some(MessageType::ConfigAvailable) => {
                self.emit(RtviEvent::ConfigDescribe(message.into_data()))
            }
            Some(MessageType::ActionsAvailable) => {
                self.emit(RtviEvent::ActionsAvailable(message.into_data()))
            }
            Some(MessageType::ActionResponse) => {
                if !correlated {
                    debug!(message_id = %message.id(), "Uncorrelated action response");
                }
            }
            Some(MessageType::ConfigError | MessageType::ErrorResponse) => {
                warn!(message_id = %message.id(), error = %message.error_text(), "Request failed");
                self.emit(RtviEvent::MessageError(message));
            }
            Some(MessageType::Error) => {
                error!(error = %message.error_text(), "Bot reported an error");
                self.emit(RtviEvent::Error(message));
            }
            Some(MessageType::Metrics) => self.emit_parsed(message, RtviEvent::Metrics),
            Some(MessageType::UserTranscription) => self.emit_parsed(message, RtviEvent::UserTranscript),
            Some(MessageType::BotTranscription) => self.emit_parsed(message, RtviEvent::BotTranscript),
            Some(MessageType::UserLlmText) => self.emit_parsed(message, RtviEvent::UserLlmText),
            Some(MessageType::BotLlmText) => self.emit_parsed(message, RtviEvent::BotLlmText),
            Some(MessageType::BotTtsText) => self.emit_parsed(message, RtviEvent::BotTtsText),
            Some(MessageType::StorageItemStored) => self.emit_parsed(message, RtviEvent::StorageItemStored),
            Some(MessageType::UserStartedSpeaking) => self.emit(RtviEvent::UserStartedSpeaking),
            Some(MessageType::UserStoppedSpeaking) => self.emit(RtviEvent::UserStoppedSpeaking),
            Some(MessageType::BotStartedSpeaking) => self.emit(RtviEvent::BotStartedSpeaking),
            Some(MessageType::BotStoppedSpeaking) => self.emit(RtviEvent::BotStoppedSpeaking),
            Some(MessageType::BotLlmStarted) => self.emit(RtviEvent::BotLlmStarted),
            Some(MessageType::BotLlmStopped) => self.emit(RtviEvent::BotLlmStopped),
            Some(MessageType::BotTtsStarted) => self.emit(RtviEvent::BotTtsStarted),
            Some(MessageType::BotTtsStopped) => self.emit(RtviEvent::BotTtsStopped),
            _ => {
                if correlated {
                    return;
                }
                match self.helper_for(message.message_type()) {
                    Some(helper) => helper.handle_message(&message),
                    None => self.emit(RtviEvent::GenericMessage(message.into_data())),
                }
            }
        }
    }

    fn emit_parsed<T, F>(&self, message: RtviMessage, to_event: F)
    where
        T: serde::de::DeserializeOwned,
        F: FnOnce(T) -> RtviEvent,
    {
        match message.parse_data::<T>() {
            Ok(data) => self.emit(to_event(data)),
            Err(e) => self.payload_error(&message, e),
        }
    }

    fn payload_error(&self, message: &RtviMessage, error: RtviError) {
        warn!(message_type = %message.message_type(), "Malformed payload: {}", error);
        self.emit(RtviEvent::MessageError(message.clone()));
    }

    fn handle_bot_ready(&self, message: &RtviMessage) {
        let data = match message.parse_data::<BotReadyData>() {
            Ok(data) => data,
            Err(e) => {
                warn!("Malformed bot-ready payload: {}", e);
                BotReadyData::default()
            }
        };

        check_protocol_version(&data.version);

        if !data.config.is_empty() {
            self.inner.config.store(Arc::new(data.config.clone()));
        }
        *self.inner.bot_ready.write() = Some(data.clone());

        if self.advance_state(TransportState::Ready) {
            self.emit(RtviEvent::BotReady(data));
        } else {
            warn!(state = %self.state(), "Ignoring bot-ready outside of a connected session");
        }
    }
}

/// Warn when the bot speaks a different protocol version.
fn check_protocol_version(bot_version: &str) {
    let Ok(ours) = Version::parse(RTVI_PROTOCOL_VERSION) else {
        return;
    };
    match Version::parse(bot_version) {
        Ok(theirs) if theirs.major != ours.major || theirs.minor != ours.minor => {
            warn!(
                client = %ours,
                bot = %theirs,
                "Bot uses an incompatible RTVI protocol version"
            );
        }
        Ok(_) => {}
        Err(e) => {
            warn!(bot = bot_version, "Bot reported an unparseable protocol version: {}", e);
        }
    }
}

async fn run_event_loop(inner: Weak<ClientInner>, mut rx: mpsc::UnboundedReceiver<QueueItem>) {
    while let Some(item) = rx.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        let client = RtviClient { inner };

        match item {
            QueueItem::Transport { generation, event } => {
                if generation != client.inner.generation.load(Ordering::SeqCst) {
                    debug!(generation, "Dropping notification from released transport");
                    continue;
                }
                client.handle_transport_event(event);
            }
            QueueItem::Client(event) => client.emit(event),
            QueueItem::Barrier(done) => {
                let _ = done.send(());
            }
        }
    }
    debug!("Client event loop ended");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_protocol_version_accepts_anything() {
        check_protocol_version(RTVI_PROTOCOL_VERSION);
        check_protocol_version("1.0.0");
        check_protocol_version("not-a-version");
        check_protocol_version("");
    }
}
