//! Session error types.

use crate::connection::ConnectionState;
use sio_wire::WireError;
use thiserror::Error;

/// Errors surfaced by the session engine.
///
/// Ack callbacks receive these too (`Timeout`, `Cancelled`, `NotConnected`,
/// `AckCapacity`), which is why the type is `Clone`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Handshake or transport failure while connecting
    #[error("connect failed: {0}")]
    ConnectFailed(String),

    /// Operation attempted while the link is down
    #[error("not connected")]
    NotConnected,

    /// Ack not received within its window
    #[error("ack timed out")]
    Timeout,

    /// Pending ack discarded at teardown
    #[error("pending ack cancelled")]
    Cancelled,

    /// Malformed inbound frame
    #[error("decode error: {0}")]
    Decode(#[from] WireError),

    /// Outbound packet could not be encoded
    #[error("encode error: {0}")]
    Encode(String),

    /// Operation not valid in the current connection state
    #[error("invalid state: {0:?}")]
    InvalidState(ConnectionState),

    /// Ack table is full
    #[error("too many pending acks (limit {0})")]
    AckCapacity(usize),

    /// Inbound message already acknowledged or never asked for one
    #[error("message {0} already acknowledged or unknown")]
    AlreadyAcked(i32),
}

/// Outcome handed to ack callbacks
pub type AckResult = Result<sio_wire::Payload, SessionError>;
