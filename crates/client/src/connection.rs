//! Client connection - owner of the secure channel and its sessions.
//!
//! A [`ClientConnection`] holds at most one secure channel. It handles:
//! - Opening the channel and discovering endpoints (`connect`)
//! - Re-publishing channel notifications as [`ConnectionEvent`]s
//! - Tracking the sessions multiplexed over the channel
//! - Tearing everything down in order (`disconnect`)
//!
//! # Connect pipeline
//!
//! 1. Reject if a channel already exists (no state change)
//! 2. Build the channel with a listener wired to this connection
//! 3. `create` the channel; on failure destroy it and run `disconnect`
//! 4. Run `GetEndpoints`; on failure run `disconnect`
//! 5. Mark the connection `Connected`
//!
//! # Disconnect
//!
//! Sessions are drained first, repeatedly, until none are registered. Only
//! then is the channel reference cleared and the channel closed, followed by a
//! single [`ConnectionEvent::Close`].

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use opcua_protocol::{Request, Response};
use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::channel::{
    ChannelCounters, ChannelEvent, ChannelListener, ChannelOptions, SecureChannel,
    SecureChannelFactory,
};
use crate::config::{ClientConfig, ConnectionSettings};
use crate::discovery::GetEndpointsOptions;
use crate::endpoints::EndpointCatalog;
use crate::error::{Error, Result};
use crate::events::{ConnectionEvent, EventBus, EventStream, EventWaiter};
use crate::object_factory::{ObjectFactory, StandardObjectFactory};
use crate::session::{Session, SessionRegistry};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a [`ClientConnection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "connection#{}", self.0)
    }
}

/// Lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

struct ChannelSlot {
    generation: u64,
    channel: Arc<dyn SecureChannel>,
    forwarder: Arc<ChannelEventForwarder>,
}

/// Channel ownership. A slot is present iff the state is not `Disconnected`.
#[derive(Default)]
struct ChannelState {
    status: ConnectionState,
    slot: Option<ChannelSlot>,
    endpoint_url: Option<String>,
    /// Counters of the last channel, frozen when it was released.
    last_counters: ChannelCounters,
    /// A channel was destroyed without its close being published yet.
    close_pending: bool,
}

struct ConnectionInner {
    id: ConnectionId,
    settings: ConnectionSettings,
    channel_factory: Arc<dyn SecureChannelFactory>,
    object_factory: Arc<dyn ObjectFactory>,
    channel: Mutex<ChannelState>,
    next_generation: AtomicU64,
    sessions: SessionRegistry,
    endpoints: EndpointCatalog,
    events: EventBus<ConnectionEvent>,
}

/// Connection and session lifecycle manager for one server.
///
/// Cheap to clone; clones share the same channel, sessions and events.
///
/// # Example
///
/// ```ignore
/// let connection = ClientConnection::from_config(&config, channel_factory)?;
/// connection.connect("opc.tcp://plc:4840").await?;
/// let endpoints = connection.get_endpoints(Default::default()).await?;
/// connection.disconnect().await?;
/// ```
#[derive(Clone)]
pub struct ClientConnection {
    inner: Arc<ConnectionInner>,
}

/// Non-owning reference to a [`ClientConnection`], held by sessions and by
/// the channel listener.
#[derive(Clone)]
pub struct WeakClientConnection {
    id: ConnectionId,
    inner: Weak<ConnectionInner>,
}

impl WeakClientConnection {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn upgrade(&self) -> Option<ClientConnection> {
        self.inner.upgrade().map(|inner| ClientConnection { inner })
    }
}

impl fmt::Debug for WeakClientConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakClientConnection")
            .field("id", &self.id)
            .finish()
    }
}

impl ClientConnection {
    pub fn new(
        settings: ConnectionSettings,
        channel_factory: Arc<dyn SecureChannelFactory>,
    ) -> Self {
        Self::with_object_factory(
            settings,
            channel_factory,
            Arc::new(StandardObjectFactory::new()),
        )
    }

    pub fn with_object_factory(
        settings: ConnectionSettings,
        channel_factory: Arc<dyn SecureChannelFactory>,
        object_factory: Arc<dyn ObjectFactory>,
    ) -> Self {
        let events = EventBus::new(settings.event_capacity.max(1));
        Self {
            inner: Arc::new(ConnectionInner {
                id: ConnectionId(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed)),
                settings,
                channel_factory,
                object_factory,
                channel: Mutex::new(ChannelState::default()),
                next_generation: AtomicU64::new(1),
                sessions: SessionRegistry::default(),
                endpoints: EndpointCatalog::default(),
                events,
            }),
        }
    }

    /// Validates `config` and builds a connection from it.
    pub fn from_config(
        config: &ClientConfig,
        channel_factory: Arc<dyn SecureChannelFactory>,
    ) -> Result<Self> {
        Ok(Self::new(config.validate()?, channel_factory))
    }

    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    pub fn downgrade(&self) -> WeakClientConnection {
        WeakClientConnection {
            id: self.inner.id,
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn settings(&self) -> &ConnectionSettings {
        &self.inner.settings
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.channel.lock().status
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn has_secure_channel(&self) -> bool {
        self.inner.channel.lock().slot.is_some()
    }

    /// URL of the last `connect`, falling back to the configured one.
    pub fn endpoint_url(&self) -> Option<String> {
        self.inner
            .channel
            .lock()
            .endpoint_url
            .clone()
            .or_else(|| self.inner.settings.endpoint_url.clone())
    }

    /// Opens the secure channel and discovers the server's endpoints.
    ///
    /// # Errors
    ///
    /// - [`Error::AlreadyConnected`] if a channel exists; nothing is changed
    /// - Any channel creation or discovery failure, after the connection has
    ///   been fully torn down
    pub async fn connect(&self, endpoint_url: &str) -> Result<()> {
        let Some((generation, channel)) = self.install_channel(endpoint_url) else {
            tokio::task::yield_now().await;
            tracing::debug!(
                connection = %self.id(),
                endpoint_url,
                "Connect rejected: channel exists"
            );
            return Err(Error::AlreadyConnected);
        };

        tracing::debug!(connection = %self.id(), endpoint_url, "Creating secure channel");
        if let Err(err) = channel.create(endpoint_url).await {
            tracing::debug!(
                connection = %self.id(),
                error = %err,
                "Secure channel creation failed"
            );
            self.destroy_channel(generation);
            self.disconnect().await?;
            return Err(err);
        }

        tracing::debug!(connection = %self.id(), "Secure channel open, discovering endpoints");
        if let Err(err) = self.get_endpoints(GetEndpointsOptions::default()).await {
            tracing::debug!(connection = %self.id(), error = %err, "Endpoint discovery failed");
            self.disconnect().await?;
            return Err(err);
        }

        if !self.mark_connected(generation) {
            tracing::debug!(connection = %self.id(), "Secure channel closed during discovery");
            self.disconnect().await?;
            return Err(Error::ChannelClosed);
        }
        tracing::debug!(connection = %self.id(), endpoint_url, "Connected");
        Ok(())
    }

    /// Closes all sessions, then the secure channel.
    ///
    /// Safe to call at any time, including on a connection that never
    /// connected. Session and channel close failures are logged, not
    /// returned: teardown always completes.
    pub async fn disconnect(&self) -> Result<()> {
        self.drain_until_empty("Disconnecting with active sessions")
            .await;
        assert!(
            self.inner.sessions.is_empty(),
            "{}: sessions registered while disconnecting",
            self.id()
        );

        let (slot, close_pending) = {
            let mut state = self.inner.channel.lock();
            state.status = ConnectionState::Disconnected;
            let slot = state.slot.take();
            if let Some(slot) = &slot {
                state.last_counters = slot.channel.counters();
            }
            (slot, std::mem::take(&mut state.close_pending))
        };

        match slot {
            Some(slot) => {
                let announce = slot.forwarder.detach() || close_pending;
                tracing::debug!(connection = %self.id(), "Closing secure channel");
                if let Err(err) = slot.channel.close().await {
                    tracing::warn!(
                        connection = %self.id(),
                        error = %err,
                        "Secure channel close failed"
                    );
                }
                self.freeze_counters(&slot.channel);
                if announce {
                    self.inner.events.emit(ConnectionEvent::Close { error: None });
                }
            }
            None => {
                if close_pending {
                    self.inner.events.emit(ConnectionEvent::Close { error: None });
                }
            }
        }
        Ok(())
    }

    /// Submits `request` on the current secure channel.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidSecureChannel`] if there is no channel; otherwise
    /// whatever the channel reports.
    pub async fn perform_message_transaction(&self, request: Request) -> Result<Response> {
        let Some(channel) = self.current_channel() else {
            tokio::task::yield_now().await;
            return Err(Error::InvalidSecureChannel);
        };
        channel.perform_transaction(request).await
    }

    /// Registers a session with this connection.
    ///
    /// # Panics
    ///
    /// If the session is already registered or bound to another connection.
    pub fn add_session(&self, session: Arc<dyn Session>) {
        self.inner.sessions.add(session, self);
        tracing::debug!(
            connection = %self.id(),
            sessions = self.inner.sessions.len(),
            "Session registered"
        );
    }

    /// Deregisters a session. Unknown sessions are ignored.
    pub fn remove_session(&self, session: &dyn Session) {
        if self.inner.sessions.remove(session) {
            tracing::debug!(
                connection = %self.id(),
                sessions = self.inner.sessions.len(),
                "Session removed"
            );
        }
    }

    /// Closes every registered session concurrently.
    ///
    /// Returns the first close failure, if any.
    pub async fn drain_pending_sessions(&self) -> Result<()> {
        self.inner.sessions.drain().await
    }

    pub fn sessions(&self) -> Vec<Arc<dyn Session>> {
        self.inner.sessions.snapshot()
    }

    pub fn session_count(&self) -> usize {
        self.inner.sessions.len()
    }

    /// Traffic counters of the current channel, or of the last one once it is
    /// gone. All zero before the first `connect`.
    pub fn counters(&self) -> ChannelCounters {
        let state = self.inner.channel.lock();
        match &state.slot {
            Some(slot) => slot.channel.counters(),
            None => state.last_counters,
        }
    }

    pub fn bytes_read(&self) -> u64 {
        self.counters().bytes_read
    }

    pub fn bytes_written(&self) -> u64 {
        self.counters().bytes_written
    }

    pub fn transactions_performed(&self) -> u64 {
        self.counters().transactions_performed
    }

    pub fn timed_out_request_count(&self) -> u64 {
        self.counters().timed_out_request_count
    }

    /// Subscribes to connection events. Earlier events are not replayed.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.inner.events.subscribe()
    }

    pub fn events(&self) -> EventStream<ConnectionEvent> {
        EventStream::new(self.inner.events.subscribe())
    }

    /// Waits for the first event matching `predicate`.
    pub fn wait_for_event<F>(&self, predicate: F, timeout: Duration) -> EventWaiter<ConnectionEvent>
    where
        F: Fn(&ConnectionEvent) -> bool + Send + Sync + 'static,
    {
        EventWaiter::new(self.inner.events.register_waiter(predicate), timeout)
    }

    /// Waits for the next close notification, whether it comes from
    /// `disconnect`, a failed `connect` or the channel dropping on its own.
    pub fn wait_for_close(&self, timeout: Duration) -> EventWaiter<ConnectionEvent> {
        self.wait_for_event(ConnectionEvent::is_close, timeout)
    }

    pub(crate) fn endpoint_catalog(&self) -> &EndpointCatalog {
        &self.inner.endpoints
    }

    fn current_channel(&self) -> Option<Arc<dyn SecureChannel>> {
        self.inner
            .channel
            .lock()
            .slot
            .as_ref()
            .map(|slot| Arc::clone(&slot.channel))
    }

    /// Builds a channel and stores it, unless one already exists.
    fn install_channel(&self, endpoint_url: &str) -> Option<(u64, Arc<dyn SecureChannel>)> {
        let mut state = self.inner.channel.lock();
        if state.slot.is_some() {
            return None;
        }

        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let forwarder = Arc::new(ChannelEventForwarder {
            connection: self.downgrade(),
            generation,
            attached: AtomicBool::new(true),
            trace_messages: self.inner.settings.trace_messages,
        });

        let settings = &self.inner.settings;
        let channel = self.inner.channel_factory.create_channel(ChannelOptions {
            default_secure_token_lifetime: settings.default_secure_token_lifetime,
            security_mode: settings.security_mode,
            security_policy: settings.security_policy,
            server_certificate: settings.server_certificate.clone(),
            listener: Arc::clone(&forwarder) as Arc<dyn ChannelListener>,
            object_factory: Arc::clone(&self.inner.object_factory),
        });

        state.slot = Some(ChannelSlot {
            generation,
            channel: Arc::clone(&channel),
            forwarder,
        });
        state.status = ConnectionState::Connecting;
        state.endpoint_url = Some(endpoint_url.to_string());
        Some((generation, channel))
    }

    /// Drops the channel after a failed `create`: clears the reference and
    /// detaches the listener without closing.
    fn destroy_channel(&self, generation: u64) {
        let mut state = self.inner.channel.lock();
        if !state
            .slot
            .as_ref()
            .is_some_and(|slot| slot.generation == generation)
        {
            return;
        }
        if let Some(slot) = state.slot.take() {
            if slot.forwarder.detach() {
                state.close_pending = true;
            }
            state.last_counters = slot.channel.counters();
        }
        state.status = ConnectionState::Disconnected;
    }

    fn mark_connected(&self, generation: u64) -> bool {
        let mut state = self.inner.channel.lock();
        let owned = state
            .slot
            .as_ref()
            .is_some_and(|slot| slot.generation == generation);
        if owned {
            state.status = ConnectionState::Connected;
        }
        owned
    }

    fn freeze_counters(&self, channel: &Arc<dyn SecureChannel>) {
        let mut state = self.inner.channel.lock();
        if state.slot.is_none() {
            state.last_counters = channel.counters();
        }
    }

    /// Drains until the registry is empty. Each pass either finds no sessions
    /// or removes every session it saw.
    async fn drain_until_empty(&self, reason: &str) {
        loop {
            let pending = self.inner.sessions.len();
            if pending == 0 {
                break;
            }
            tracing::warn!(connection = %self.id(), sessions = pending, "{reason}");
            if let Err(err) = self.drain_pending_sessions().await {
                tracing::warn!(
                    connection = %self.id(),
                    error = %err,
                    "Session close failed during teardown"
                );
            }
        }
    }

    /// Releases the channel after it announced its own close.
    ///
    /// Returns false if `generation` is no longer the current channel.
    fn release_closed_channel(&self, generation: u64) -> bool {
        let mut state = self.inner.channel.lock();
        if !state
            .slot
            .as_ref()
            .is_some_and(|slot| slot.generation == generation)
        {
            return false;
        }
        if let Some(slot) = state.slot.take() {
            state.last_counters = slot.channel.counters();
        }
        state.status = ConnectionState::Disconnected;
        true
    }

    /// Close follow-up when no runtime is available to drain on. Sessions
    /// stay registered until the next `disconnect`.
    fn release_closed_channel_inline(&self, generation: u64) {
        if !self.release_closed_channel(generation) {
            return;
        }
        let pending = self.inner.sessions.len();
        if pending > 0 {
            tracing::warn!(
                connection = %self.id(),
                sessions = pending,
                drain_on_close = self.inner.settings.drain_sessions_on_channel_close,
                "Secure channel closed outside a runtime, sessions left for disconnect"
            );
        }
    }

    async fn handle_channel_closed(&self, generation: u64) {
        if !self.release_closed_channel(generation) {
            return;
        }
        tracing::debug!(connection = %self.id(), "Secure channel closed by peer, handle released");

        if self.inner.settings.drain_sessions_on_channel_close {
            self.drain_until_empty("Secure channel closed with active sessions")
                .await;
        } else if !self.inner.sessions.is_empty() {
            tracing::warn!(
                connection = %self.id(),
                sessions = self.inner.sessions.len(),
                "Secure channel closed, sessions left registered"
            );
        }
    }
}

impl fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConnection")
            .field("id", &self.id())
            .field("state", &self.state())
            .field("sessions", &self.session_count())
            .finish_non_exhaustive()
    }
}

/// Listener handed to each channel; re-publishes its notifications on the
/// connection's event bus.
struct ChannelEventForwarder {
    connection: WeakClientConnection,
    generation: u64,
    attached: AtomicBool,
    trace_messages: bool,
}

impl ChannelEventForwarder {
    /// Stops forwarding. Returns true if the listener was still attached.
    fn detach(&self) -> bool {
        self.attached.swap(false, Ordering::SeqCst)
    }

    fn trace(&self, event: &ChannelEvent) {
        match event {
            ChannelEvent::SendRequest(request) => tracing::debug!(
                connection = %self.connection.id(),
                type_id = request.type_id(),
                "--> {}",
                request.name()
            ),
            ChannelEvent::ReceiveResponse(response) => tracing::debug!(
                connection = %self.connection.id(),
                type_id = response.type_id(),
                "<-- {}",
                response.name()
            ),
            _ => {}
        }
    }
}

impl ChannelListener for ChannelEventForwarder {
    fn on_channel_event(&self, event: ChannelEvent) {
        if !self.attached.load(Ordering::SeqCst) {
            return;
        }
        let Some(connection) = self.connection.upgrade() else {
            return;
        };
        if self.trace_messages {
            self.trace(&event);
        }

        let is_close = matches!(event, ChannelEvent::Close(_));
        if is_close && !self.detach() {
            return;
        }
        connection.inner.events.emit(ConnectionEvent::from(event));

        if is_close {
            let generation = self.generation;
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(async move {
                        connection.handle_channel_closed(generation).await;
                    });
                }
                Err(_) => connection.release_closed_channel_inline(generation),
            }
        }
    }
}
