//! Session engine for sio clients.
//!
//! This crate provides:
//! - Connection state machine with automatic reconnection
//! - Exponential reconnect backoff
//! - Ack correlation with timeouts
//! - Inbound event routing
//! - TCP transport with namespace handshake

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod ack_tracker;
pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod handshake;
pub mod reconnect;
pub mod router;
pub mod stats;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use ack_tracker::{AckHandler, AckTracker, MIN_SWEEP_INTERVAL};
pub use client::{Client, EmitRequest, RawClient, DEFAULT_ACK_TIMEOUT};
pub use config::{AckCallback, ClientConfig, ClientConfigBuilder, EventCallback};
pub use connection::ConnectionState;
pub use error::{AckResult, SessionError};
pub use reconnect::{ReconnectPolicy, MIN_RECONNECT_DELAY};
pub use router::InboundEvent;
pub use stats::SessionStats;
pub use transport::{FrameSink, FrameStream, Link, TcpTransport, Transport, TransportError};

pub use sio_wire::{Event, Payload};
