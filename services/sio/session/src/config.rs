//! Client configuration.

use crate::ack_tracker::MIN_SWEEP_INTERVAL;
use crate::error::AckResult;
use crate::reconnect::MIN_RECONNECT_DELAY;
use crate::router::InboundEvent;
use sio_wire::DEFAULT_NAMESPACE;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Callback invoked for every inbound or synthesized event
pub type EventCallback = Arc<dyn Fn(&InboundEvent) + Send + Sync>;

/// Default callback for acks requested through [`crate::EmitRequest`]
pub type AckCallback = Arc<dyn Fn(AckResult) + Send + Sync>;

/// Immutable client configuration
#[derive(Clone)]
pub struct ClientConfig {
    /// Remote endpoint (`host:port`, optionally prefixed with `tcp://`)
    pub address: String,
    /// Namespace the session is scoped to
    pub namespace: String,
    /// Token sent with the connect handshake
    pub auth: Option<String>,
    /// Reconnect after a lost or failed link
    pub reconnect: bool,
    /// First reconnect delay
    pub reconnect_delay_min: Duration,
    /// Upper bound on the reconnect delay
    pub reconnect_delay_max: Duration,
    /// Randomize reconnect delays within the bounds
    pub reconnect_jitter: bool,
    /// How often expired acks are swept
    pub ack_sweep_interval: Duration,
    /// Maximum number of outstanding acks
    pub max_pending_acks: usize,
    /// Handshake deadline for the TCP transport
    pub handshake_timeout: Duration,
    /// Event callback
    pub on: Option<EventCallback>,
    /// Default ack callback
    pub on_ack: Option<AckCallback>,
}

impl ClientConfig {
    /// Start building a configuration for `address`
    pub fn builder(address: impl Into<String>) -> ClientConfigBuilder {
        ClientConfigBuilder {
            config: ClientConfig {
                address: address.into(),
                ..Default::default()
            },
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            address: String::new(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            auth: None,
            reconnect: true,
            reconnect_delay_min: Duration::from_millis(1000),
            reconnect_delay_max: Duration::from_millis(5000),
            reconnect_jitter: false,
            ack_sweep_interval: Duration::from_millis(10),
            max_pending_acks: 1024,
            handshake_timeout: Duration::from_secs(10),
            on: None,
            on_ack: None,
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("address", &self.address)
            .field("namespace", &self.namespace)
            .field("auth", &self.auth.as_ref().map(|_| "<redacted>"))
            .field("reconnect", &self.reconnect)
            .field("reconnect_delay_min", &self.reconnect_delay_min)
            .field("reconnect_delay_max", &self.reconnect_delay_max)
            .field("reconnect_jitter", &self.reconnect_jitter)
            .field("ack_sweep_interval", &self.ack_sweep_interval)
            .field("max_pending_acks", &self.max_pending_acks)
            .field("handshake_timeout", &self.handshake_timeout)
            .field("on", &self.on.is_some())
            .field("on_ack", &self.on_ack.is_some())
            .finish()
    }
}

/// Builder for [`ClientConfig`]
#[derive(Debug)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    /// Namespace to join (a leading `/` is added when missing)
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        let namespace = namespace.into();
        self.config.namespace = if namespace.starts_with('/') {
            namespace
        } else {
            format!("/{namespace}")
        };
        self
    }

    /// Auth token for the handshake
    pub fn auth(mut self, auth: impl Into<String>) -> Self {
        self.config.auth = Some(auth.into());
        self
    }

    /// Enable or disable reconnection
    pub fn reconnect(mut self, reconnect: bool) -> Self {
        self.config.reconnect = reconnect;
        self
    }

    /// Reconnect delay bounds; `min` is at least 1 ms and `max` at least `min`
    pub fn reconnect_delay(mut self, min: Duration, max: Duration) -> Self {
        let min = min.max(MIN_RECONNECT_DELAY);
        self.config.reconnect_delay_min = min;
        self.config.reconnect_delay_max = max.max(min);
        self
    }

    /// Randomize reconnect delays
    pub fn reconnect_jitter(mut self, jitter: bool) -> Self {
        self.config.reconnect_jitter = jitter;
        self
    }

    /// Expired-ack sweep interval (at least 1 ms)
    pub fn ack_sweep_interval(mut self, interval: Duration) -> Self {
        self.config.ack_sweep_interval = interval.max(MIN_SWEEP_INTERVAL);
        self
    }

    /// Cap on outstanding acks
    pub fn max_pending_acks(mut self, limit: usize) -> Self {
        self.config.max_pending_acks = limit.max(1);
        self
    }

    /// TCP handshake deadline
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.config.handshake_timeout = timeout;
        self
    }

    /// Event callback
    pub fn on<F>(mut self, callback: F) -> Self
    where
        F: Fn(&InboundEvent) + Send + Sync + 'static,
    {
        self.config.on = Some(Arc::new(callback));
        self
    }

    /// Default ack callback
    pub fn on_ack<F>(mut self, callback: F) -> Self
    where
        F: Fn(AckResult) + Send + Sync + 'static,
    {
        self.config.on_ack = Some(Arc::new(callback));
        self
    }

    /// Finish the configuration
    pub fn build(self) -> ClientConfig {
        self.config
    }
}
