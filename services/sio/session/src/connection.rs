//! Connection state machine and link driver.
//!
//! The manager owns the connection state (a `watch` channel, so every
//! transition is a single atomic `send_if_modified`) and the command queue
//! feeding the link driver. The driver is one task per client:
//!
//! ```text
//!            connect()
//! Disconnected ───────► Connecting ──ok──► Connected
//!                           │                  │ link lost
//!                           │ failed           ▼
//!                           └──────────► Reconnecting ──delay──► Connecting
//!
//! disconnect() from any state ──► Closed
//! ```

use crate::reconnect::ReconnectPolicy;
use crate::router::RouteOutcome;
use crate::stats::Counters;
use crate::transport::{Link, Transport, TransportError};
use crate::SessionError;
use bytes::Bytes;
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tokio::time::Duration;
use tracing::{debug, error, info, warn};

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Created, `connect` not called yet
    Disconnected,
    /// Opening a link
    Connecting,
    /// Link established
    Connected,
    /// Waiting out a backoff delay
    Reconnecting,
    /// Terminal
    Closed,
}

impl ConnectionState {
    /// Whether no further transitions are possible
    pub fn is_terminal(self) -> bool {
        self == ConnectionState::Closed
    }

    /// Whether `self -> next` is a legal transition
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, Connected)
                | (Connecting, Reconnecting)
                | (Connected, Reconnecting)
                | (Reconnecting, Connecting)
                | (Disconnected | Connecting | Connected | Reconnecting, Closed)
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Work queued for the link driver
#[derive(Debug)]
pub(crate) enum Command {
    Send(Bytes),
    Close,
}

/// Link lifecycle notifications raised by the driver
#[derive(Debug)]
pub(crate) enum LinkSignal {
    Up,
    Frame(Bytes),
    Down(String),
    ConnectFailed(String),
}

/// Receives link notifications on the driver task
pub(crate) trait LinkObserver: Send + Sync + 'static {
    fn on_signal(&self, signal: LinkSignal) -> RouteOutcome;
}

/// Result of the initial connect
pub(crate) enum Established {
    Linked(Link),
    Retrying(String),
}

enum LinkEnd {
    Local,
    Remote(String),
}

/// Owns connection state and drives the link
pub(crate) struct ConnectionManager {
    address: String,
    namespace: String,
    auth: Option<String>,
    reconnect: bool,
    transport: Arc<dyn Transport>,
    state: watch::Sender<ConnectionState>,
    commands: mpsc::UnboundedSender<Command>,
    command_rx: Mutex<Option<mpsc::UnboundedReceiver<Command>>>,
    counters: Arc<Counters>,
}

impl ConnectionManager {
    pub fn new(
        address: &str,
        namespace: &str,
        auth: Option<&str>,
        reconnect: bool,
        transport: Arc<dyn Transport>,
        counters: Arc<Counters>,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (commands, command_rx) = mpsc::unbounded_channel();

        Self {
            address: address.to_string(),
            namespace: namespace.to_string(),
            auth: auth.map(str::to_string),
            reconnect,
            transport,
            state,
            commands,
            command_rx: Mutex::new(Some(command_rx)),
            counters,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Apply a legal transition; false if the current state forbids it
    pub fn transition(&self, next: ConnectionState) -> bool {
        let mut from = next;
        let changed = self.state.send_if_modified(|state| {
            if state.can_transition_to(next) {
                from = *state;
                *state = next;
                true
            } else {
                from = *state;
                false
            }
        });

        if changed {
            info!("Connection to {} {} -> {}", self.address, from, next);
        } else {
            debug!("Ignoring transition {} -> {}", from, next);
        }
        changed
    }

    /// Move to `Closed` and stop the driver; false if already closed
    pub fn disconnect(&self) -> bool {
        let closed = self.transition(ConnectionState::Closed);
        if closed {
            let _ = self.commands.send(Command::Close);
        }
        closed
    }

    #[cfg(test)]
    pub(crate) fn drop_command_receiver(&self) {
        self.command_rx.lock().unwrap().take();
    }

    /// Queue a packet body for the link writer
    pub fn send_frame(&self, body: Bytes) -> Result<(), SessionError> {
        if self.state() != ConnectionState::Connected {
            return Err(SessionError::NotConnected);
        }
        self.commands
            .send(Command::Send(body))
            .map_err(|_| SessionError::NotConnected)
    }

    async fn open(&self) -> Result<Link, TransportError> {
        self.transport
            .open(&self.address, &self.namespace, self.auth.as_deref())
            .await
    }

    /// First connection attempt, made on the caller's task
    pub async fn establish(&self) -> Result<Established, SessionError> {
        let began = self.state.send_if_modified(|state| {
            if *state == ConnectionState::Disconnected {
                *state = ConnectionState::Connecting;
                true
            } else {
                false
            }
        });
        if !began {
            return Err(SessionError::InvalidState(self.state()));
        }
        info!("Connecting to {} namespace {}", self.address, self.namespace);

        match self.open().await {
            Ok(mut link) => {
                if self.transition(ConnectionState::Connected) {
                    Ok(Established::Linked(link))
                } else {
                    link.sink.close().await;
                    Err(SessionError::InvalidState(self.state()))
                }
            }
            Err(e) => {
                warn!("Connect to {} failed: {}", self.address, e);
                let next = if self.reconnect {
                    ConnectionState::Reconnecting
                } else {
                    ConnectionState::Closed
                };
                if !self.transition(next) {
                    return Err(SessionError::InvalidState(self.state()));
                }
                if self.reconnect {
                    Ok(Established::Retrying(e.to_string()))
                } else {
                    Err(SessionError::ConnectFailed(e.to_string()))
                }
            }
        }
    }

    /// Drive the link until the connection is closed
    pub async fn run<O: LinkObserver>(
        &self,
        mut link: Option<Link>,
        mut policy: ReconnectPolicy,
        observer: O,
    ) {
        let Some(mut commands) = self.command_rx.lock().ok().and_then(|mut rx| rx.take()) else {
            warn!("Link driver for {} already started", self.address);
            return;
        };

        loop {
            if let Some(active) = link.take() {
                match self.pump(active, &mut commands, &observer).await {
                    LinkEnd::Local => break,
                    LinkEnd::Remote(reason) => {
                        let next = if self.reconnect {
                            ConnectionState::Reconnecting
                        } else {
                            ConnectionState::Closed
                        };
                        if !self.transition(next) {
                            break;
                        }
                        observer.on_signal(LinkSignal::Down(reason));
                        if next == ConnectionState::Closed {
                            break;
                        }
                    }
                }
            }

            let delay = policy.next_delay();
            info!(
                "Reconnecting to {} in {:?} (attempt {})",
                self.address,
                delay,
                policy.attempt()
            );
            if wait_or_close(delay, &mut commands).await {
                break;
            }
            if !self.transition(ConnectionState::Connecting) {
                break;
            }

            let opened = tokio::select! {
                biased;
                _ = until_close(&mut commands) => break,
                result = self.open() => result,
            };

            match opened {
                Ok(mut new_link) => {
                    if !self.transition(ConnectionState::Connected) {
                        new_link.sink.close().await;
                        break;
                    }
                    policy.reset();
                    Counters::incr(&self.counters.reconnects);
                    observer.on_signal(LinkSignal::Up);
                    link = Some(new_link);
                }
                Err(e) => {
                    warn!("Reconnect to {} failed: {}", self.address, e);
                    if !self.transition(ConnectionState::Reconnecting) {
                        break;
                    }
                    observer.on_signal(LinkSignal::ConnectFailed(e.to_string()));
                }
            }
        }

        debug!("Link driver for {} stopped", self.address);
    }

    async fn pump<O: LinkObserver>(
        &self,
        link: Link,
        commands: &mut mpsc::UnboundedReceiver<Command>,
        observer: &O,
    ) -> LinkEnd {
        let Link {
            mut sink,
            mut stream,
        } = link;

        loop {
            tokio::select! {
                biased;

                command = commands.recv() => match command {
                    Some(Command::Send(body)) => {
                        if let Err(e) = sink.send(body).await {
                            error!("Write to {} failed: {}", self.address, e);
                            return LinkEnd::Remote(e.to_string());
                        }
                        Counters::incr(&self.counters.frames_sent);
                    }
                    Some(Command::Close) | None => {
                        sink.close().await;
                        return LinkEnd::Local;
                    }
                },

                frame = stream.recv() => match frame {
                    Ok(Some(body)) => {
                        Counters::incr(&self.counters.frames_received);
                        if let RouteOutcome::Close(reason) = observer.on_signal(LinkSignal::Frame(body)) {
                            info!("Server closed namespace {}: {}", self.namespace, reason);
                            return LinkEnd::Remote(reason);
                        }
                    }
                    Ok(None) => {
                        info!("Link to {} closed by peer", self.address);
                        return LinkEnd::Remote("closed by peer".to_string());
                    }
                    Err(e) => {
                        error!("Read from {} failed: {}", self.address, e);
                        return LinkEnd::Remote(e.to_string());
                    }
                },
            }
        }
    }
}

/// Sleep for `delay`; true if a close request arrived first
async fn wait_or_close(delay: Duration, commands: &mut mpsc::UnboundedReceiver<Command>) -> bool {
    tokio::select! {
        _ = until_close(commands) => true,
        _ = tokio::time::sleep(delay) => false,
    }
}

/// Resolve on a close request, dropping frames queued while the link is down
async fn until_close(commands: &mut mpsc::UnboundedReceiver<Command>) {
    loop {
        match commands.recv().await {
            Some(Command::Send(_)) => debug!("Dropping frame queued while link is down"),
            Some(Command::Close) | None => return,
        }
    }
}
