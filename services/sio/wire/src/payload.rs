//! Payload and event tag types shared by the codec and the session engine.

use bytes::Bytes;
use std::fmt;

/// Data carried by an event or an ack
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Opaque bytes, not necessarily text
    Binary(Bytes),
    /// Owned UTF-8 text
    String(String),
}

impl Payload {
    /// Create a binary payload by copying the given slice
    pub fn binary(data: impl AsRef<[u8]>) -> Self {
        Payload::Binary(Bytes::copy_from_slice(data.as_ref()))
    }

    /// Create a string payload
    pub fn string(text: impl Into<String>) -> Self {
        Payload::String(text.into())
    }

    /// Empty string payload
    pub fn empty() -> Self {
        Payload::String(String::new())
    }

    /// Length of the payload in bytes
    pub fn len(&self) -> usize {
        match self {
            Payload::Binary(data) => data.len(),
            Payload::String(text) => text.len(),
        }
    }

    /// Whether the payload carries no bytes
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether this is the binary variant
    pub fn is_binary(&self) -> bool {
        matches!(self, Payload::Binary(_))
    }

    /// Borrow the text of a string payload
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Payload::String(text) => Some(text),
            Payload::Binary(_) => None,
        }
    }

    /// Raw bytes of either variant
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Payload::Binary(data) => data,
            Payload::String(text) => text.as_bytes(),
        }
    }
}

impl Default for Payload {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Payload::String(text)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Payload::String(text.to_string())
    }
}

impl From<Bytes> for Payload {
    fn from(data: Bytes) -> Self {
        Payload::Binary(data)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(data: Vec<u8>) -> Self {
        Payload::Binary(Bytes::from(data))
    }
}

/// Semantic channel of a message
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Event {
    /// Ordinary application event
    Message,
    /// Transport or protocol error notification
    Error,
    /// Application event with its own name
    Custom(String),
    /// Session established
    Connect,
    /// Session closed
    Close,
}

impl Event {
    /// Create a custom event
    pub fn custom(name: impl Into<String>) -> Self {
        Event::Custom(name.into())
    }

    /// Name used on the wire and in logs
    pub fn name(&self) -> &str {
        match self {
            Event::Message => "message",
            Event::Error => "error",
            Event::Custom(name) => name,
            Event::Connect => "connect",
            Event::Close => "close",
        }
    }
}

impl From<&str> for Event {
    /// Map reserved names to their tag, everything else to `Custom`
    fn from(name: &str) -> Self {
        match name {
            "message" => Event::Message,
            "error" => Event::Error,
            "connect" => Event::Connect,
            "close" => Event::Close,
            other => Event::Custom(other.to_string()),
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}
