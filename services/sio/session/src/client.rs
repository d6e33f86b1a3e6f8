//! Client handles.
//!
//! [`Client`] is the owning handle: dropping the last clone, or calling
//! [`Client::destroy`], tears the session down. [`RawClient`] is the
//! non-owning handle handed to callbacks so they can emit and ack without
//! keeping the session alive.

use crate::ack_tracker::{AckHandler, AckTracker};
use crate::config::ClientConfig;
use crate::connection::{
    ConnectionManager, ConnectionState, Established, LinkObserver, LinkSignal,
};
use crate::error::{AckResult, SessionError};
use crate::reconnect::ReconnectPolicy;
use crate::router::{EventRouter, RouteOutcome};
use crate::stats::{Counters, SessionStats};
use crate::transport::{TcpTransport, Transport};
use sio_wire::{Event, Packet, Payload};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Ack window used when an [`EmitRequest`] does not set one
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(5);

/// Outbound event
#[derive(Debug, Clone)]
pub struct EmitRequest {
    /// Event tag
    pub event: Event,
    /// Event payload
    pub payload: Payload,
    /// Ask the peer for an ack, reported through the configured ack callback
    pub ack: bool,
    /// Ack window
    pub ack_timeout: Duration,
}

impl EmitRequest {
    /// Fire-and-forget event
    pub fn new(event: impl Into<Event>, payload: impl Into<Payload>) -> Self {
        Self {
            event: event.into(),
            payload: payload.into(),
            ack: false,
            ack_timeout: DEFAULT_ACK_TIMEOUT,
        }
    }

    /// Request an ack within `timeout`
    pub fn with_ack(mut self, timeout: Duration) -> Self {
        self.ack = true;
        self.ack_timeout = timeout;
        self
    }
}

struct Session {
    config: Arc<ClientConfig>,
    connection: ConnectionManager,
    tracker: AckTracker,
    router: EventRouter,
    counters: Arc<Counters>,
    destroyed: AtomicBool,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    fn default_ack_handler(&self) -> AckHandler {
        match &self.config.on_ack {
            Some(callback) => {
                let callback = Arc::clone(callback);
                Box::new(move |result| callback(result))
            }
            None => Box::new(|result| debug!("Ack outcome with no ack callback: {:?}", result)),
        }
    }

    fn send_event(
        &self,
        event: Event,
        payload: Payload,
        ack: Option<(AckHandler, Duration)>,
    ) -> Result<Option<i32>, SessionError> {
        if self.connection.state() != ConnectionState::Connected {
            debug!("Emit of {} while {}", event, self.connection.state());
            if let Some((handler, _)) = ack {
                handler(Err(SessionError::NotConnected));
            }
            return Err(SessionError::NotConnected);
        }

        let msg_id = match ack {
            Some((handler, timeout)) => Some(self.tracker.register(handler, timeout)?),
            None => None,
        };

        let body = match Packet::event(&self.config.namespace, event, payload, msg_id).encode() {
            Ok(body) => body,
            Err(e) => {
                let err = SessionError::Encode(e.to_string());
                if let Some(id) = msg_id {
                    self.tracker.abort(id, err.clone());
                }
                return Err(err);
            }
        };

        if let Err(e) = self.connection.send_frame(body) {
            if let Some(id) = msg_id {
                self.tracker.abort(id, e.clone());
            }
            return Err(e);
        }

        Ok(msg_id)
    }

    fn ack(&self, message_id: i32, payload: Payload) -> Result<(), SessionError> {
        if self.connection.state() != ConnectionState::Connected {
            return Err(SessionError::NotConnected);
        }
        if !self.router.take_awaiting(message_id) {
            warn!(
                "Ignoring ack for message {}: already acknowledged or unknown",
                message_id
            );
            return Err(SessionError::AlreadyAcked(message_id));
        }

        let sent = Packet::ack(&self.config.namespace, message_id, payload)
            .encode()
            .map_err(|e| SessionError::Encode(e.to_string()))
            .and_then(|body| self.connection.send_frame(body));
        if sent.is_err() {
            // Not sent, so the id stays ackable
            self.router.await_reply(message_id);
        }
        sent
    }

    /// Close the link and fail every pending ack; false when already done
    fn teardown(&self) -> bool {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return false;
        }

        // Closed first so no new ack can be registered behind cancel_all
        self.connection.disconnect();
        let cancelled = self.tracker.cancel_all();
        self.tracker.stop_sweeper();

        info!(
            "Client for {} destroyed ({} pending acks cancelled)",
            self.config.address, cancelled
        );
        true
    }
}

/// Non-owning client handle passed to callbacks
#[derive(Clone)]
pub struct RawClient {
    session: Arc<Session>,
}

impl RawClient {
    /// Emit an event; returns the ack id when `request.ack` is set
    pub fn emit(&self, request: EmitRequest) -> Result<Option<i32>, SessionError> {
        let ack = request
            .ack
            .then(|| (self.session.default_ack_handler(), request.ack_timeout));
        self.session.send_event(request.event, request.payload, ack)
    }

    /// Emit an event and report its ack to `callback` exactly once
    pub fn emit_with_ack<F>(
        &self,
        event: impl Into<Event>,
        payload: impl Into<Payload>,
        timeout: Duration,
        callback: F,
    ) -> Result<i32, SessionError>
    where
        F: FnOnce(AckResult) + Send + Sync + 'static,
    {
        let handler: AckHandler = Box::new(callback);
        let msg_id = self
            .session
            .send_event(event.into(), payload.into(), Some((handler, timeout)))?;
        msg_id.ok_or(SessionError::NotConnected)
    }

    /// Reply to an inbound event that asked for an ack
    pub fn ack(&self, message_id: i32, payload: impl Into<Payload>) -> Result<(), SessionError> {
        self.session.ack(message_id, payload.into())
    }

    /// Close the connection; idempotent
    pub fn disconnect(&self) {
        self.session.connection.disconnect();
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        self.session.connection.state()
    }

    /// Namespace this client joined
    pub fn namespace(&self) -> &str {
        &self.session.config.namespace
    }
}

impl fmt::Debug for RawClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawClient")
            .field("address", &self.session.config.address)
            .field("namespace", &self.session.config.namespace)
            .field("state", &self.state())
            .finish()
    }
}

struct Dispatch {
    client: RawClient,
}

impl LinkObserver for Dispatch {
    fn on_signal(&self, signal: LinkSignal) -> RouteOutcome {
        let session = &self.client.session;
        match signal {
            LinkSignal::Up => {
                session.router.link_changed();
                session
                    .router
                    .deliver(Event::Connect, Payload::empty(), &self.client, false, 0);
                RouteOutcome::Continue
            }
            LinkSignal::Frame(body) => session.router.route(body, &session.tracker, &self.client),
            LinkSignal::Down(reason) => {
                session.router.link_changed();
                session
                    .router
                    .deliver(Event::Close, Payload::String(reason), &self.client, false, 0);
                RouteOutcome::Continue
            }
            LinkSignal::ConnectFailed(reason) => {
                session
                    .router
                    .deliver(Event::Error, Payload::String(reason), &self.client, false, 0);
                RouteOutcome::Continue
            }
        }
    }
}

struct TeardownGuard {
    session: Arc<Session>,
}

impl Drop for TeardownGuard {
    fn drop(&mut self) {
        if self.session.teardown() {
            debug!("Last client handle dropped without destroy");
        }
    }
}

/// Owning client handle
#[derive(Clone)]
pub struct Client {
    raw: RawClient,
    _guard: Arc<TeardownGuard>,
}

impl Client {
    /// Client over the TCP transport
    pub fn new(config: ClientConfig) -> Self {
        let transport = Arc::new(TcpTransport::new(config.handshake_timeout));
        Self::with_transport(config, transport)
    }

    /// Client over a custom transport
    pub fn with_transport(config: ClientConfig, transport: Arc<dyn Transport>) -> Self {
        let config = Arc::new(config);
        let counters = Arc::new(Counters::default());

        let connection = ConnectionManager::new(
            &config.address,
            &config.namespace,
            config.auth.as_deref(),
            config.reconnect,
            transport,
            Arc::clone(&counters),
        );
        let tracker = AckTracker::with_counters(config.max_pending_acks, Arc::clone(&counters));
        let router = EventRouter::new(
            &config.namespace,
            config.on.clone(),
            config.max_pending_acks,
            Arc::clone(&counters),
        );

        let session = Arc::new(Session {
            config,
            connection,
            tracker,
            router,
            counters,
            destroyed: AtomicBool::new(false),
            driver: Mutex::new(None),
        });

        Self {
            raw: RawClient {
                session: Arc::clone(&session),
            },
            _guard: Arc::new(TeardownGuard { session }),
        }
    }

    /// Connect and start the link driver.
    ///
    /// With reconnection enabled a failed first attempt is retried in the
    /// background and reported as an `Error` event; otherwise it is returned.
    pub async fn connect(&self) -> Result<(), SessionError> {
        let session = &self.raw.session;
        let config = &session.config;

        let established = session.connection.establish().await?;
        if session.destroyed.load(Ordering::SeqCst) {
            session.connection.disconnect();
            if let Established::Linked(mut link) = established {
                link.sink.close().await;
            }
            return Err(SessionError::InvalidState(session.connection.state()));
        }
        session.tracker.start_sweeper(config.ack_sweep_interval);

        let dispatch = Dispatch {
            client: self.raw.clone(),
        };
        let first_link = match established {
            Established::Linked(link) => {
                dispatch.on_signal(LinkSignal::Up);
                Some(link)
            }
            Established::Retrying(reason) => {
                dispatch.on_signal(LinkSignal::ConnectFailed(reason));
                None
            }
        };

        let policy = ReconnectPolicy::new(config.reconnect_delay_min, config.reconnect_delay_max)
            .with_jitter(config.reconnect_jitter);

        let driver_session = Arc::clone(session);
        let handle = tokio::spawn(async move {
            driver_session
                .connection
                .run(first_link, policy, dispatch)
                .await;
        });

        if let Ok(mut driver) = session.driver.lock() {
            *driver = Some(handle);
        }

        // A teardown that raced the lines above may have missed the sweeper
        if session.destroyed.load(Ordering::SeqCst) {
            session.tracker.stop_sweeper();
        }
        Ok(())
    }

    /// See [`RawClient::emit`]
    pub fn emit(&self, request: EmitRequest) -> Result<Option<i32>, SessionError> {
        self.raw.emit(request)
    }

    /// See [`RawClient::emit_with_ack`]
    pub fn emit_with_ack<F>(
        &self,
        event: impl Into<Event>,
        payload: impl Into<Payload>,
        timeout: Duration,
        callback: F,
    ) -> Result<i32, SessionError>
    where
        F: FnOnce(AckResult) + Send + Sync + 'static,
    {
        self.raw.emit_with_ack(event, payload, timeout, callback)
    }

    /// See [`RawClient::ack`]
    pub fn ack(&self, message_id: i32, payload: impl Into<Payload>) -> Result<(), SessionError> {
        self.raw.ack(message_id, payload)
    }

    /// Close the connection without failing pending acks; idempotent
    pub fn disconnect(&self) {
        self.raw.disconnect();
    }

    /// Disconnect, cancel every pending ack and wait for the link driver to
    /// stop. Later calls on any clone are no-ops.
    pub async fn destroy(self) {
        let session = Arc::clone(&self.raw.session);
        if !session.teardown() {
            warn!("Client for {} already destroyed", session.config.address);
            return;
        }

        let driver = session.driver.lock().ok().and_then(|mut driver| driver.take());
        if let Some(handle) = driver {
            let _ = handle.await;
        }
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        self.raw.state()
    }

    /// Watch connection state changes
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.raw.session.connection.subscribe()
    }

    /// Counter snapshot
    pub fn stats(&self) -> SessionStats {
        self.raw.session.counters.snapshot()
    }

    /// Number of emits still waiting for their ack
    pub fn pending_acks(&self) -> usize {
        self.raw.session.tracker.pending_count()
    }

    /// Non-owning handle
    pub fn raw(&self) -> &RawClient {
        &self.raw
    }

    /// Configuration the client was built from
    pub fn config(&self) -> &ClientConfig {
        &self.raw.session.config
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.raw.session.config)
            .field("state", &self.state())
            .finish()
    }
}
