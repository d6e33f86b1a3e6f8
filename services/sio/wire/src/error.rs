//! Wire protocol error types.

use thiserror::Error;

/// Wire protocol errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    /// Incomplete packet (need more data)
    #[error("incomplete packet")]
    Incomplete,

    /// Unsupported protocol version
    #[error("version unsupported: {0}")]
    Version(u8),

    /// Size limit exceeded
    #[error("size limit exceeded: {0}")]
    Size(usize),

    /// Invalid CBOR metadata
    #[error("cbor meta invalid")]
    Meta,

    /// Reserved bits nonzero
    #[error("reserved bits nonzero")]
    Reserved,

    /// Unknown packet type
    #[error("unknown type {0}")]
    Type(u8),

    /// Unknown event tag
    #[error("unknown event tag {0}")]
    EventTag(u8),

    /// Custom event without a name in its metadata
    #[error("custom event without name")]
    MissingEventName,

    /// String payload that is not valid UTF-8
    #[error("string payload is not valid utf-8")]
    Utf8,

    /// Malformed packet structure
    #[error("malformed packet")]
    Malformed,
}
