//! Encoding and decoding helpers for the wire protocol.
//!
//! This module provides the CBOR metadata builder and the payload marshaling
//! primitives used by [`crate::Packet`].

use crate::header::Flags;
use crate::payload::Payload;
use crate::WireError;
use bytes::Bytes;
use std::collections::BTreeMap;
use thiserror::Error;

/// CBOR metadata builder helper
#[derive(Debug, Clone)]
pub struct MetaBuilder {
    map: BTreeMap<String, ciborium::Value>,
}

impl MetaBuilder {
    /// Create a new metadata builder
    pub fn new() -> Self {
        Self {
            map: BTreeMap::new(),
        }
    }

    /// Insert a string value
    pub fn insert_str(mut self, key: &str, value: &str) -> Self {
        self.map
            .insert(key.to_string(), ciborium::Value::Text(value.to_string()));
        self
    }

    /// Insert a string value when present
    pub fn insert_opt_str(self, key: &str, value: Option<&str>) -> Self {
        match value {
            Some(value) => self.insert_str(key, value),
            None => self,
        }
    }

    /// Build the metadata as CBOR bytes
    pub fn build(self) -> Result<Bytes, CodecError> {
        let value = ciborium::Value::Map(
            self.map
                .into_iter()
                .map(|(k, v)| (ciborium::Value::Text(k), v))
                .collect(),
        );

        let mut buf = Vec::new();
        ciborium::into_writer(&value, &mut buf).map_err(|_| CodecError::MetaEncode)?;

        Ok(Bytes::from(buf))
    }
}

impl Default for MetaBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Codec errors
#[derive(Error, Debug)]
pub enum CodecError {
    /// Wire protocol error
    #[error("wire error: {0}")]
    Wire(#[from] WireError),
    /// Metadata encoding error
    #[error("metadata encoding failed")]
    MetaEncode,
    /// Metadata decoding error
    #[error("metadata decoding failed")]
    MetaDecode,
}

/// Parse CBOR metadata into a map
pub fn parse_meta(meta_raw: &[u8]) -> Result<BTreeMap<String, ciborium::Value>, CodecError> {
    let value: ciborium::Value =
        ciborium::from_reader(meta_raw).map_err(|_| CodecError::MetaDecode)?;

    if let ciborium::Value::Map(map) = value {
        let mut result = BTreeMap::new();
        for (key, value) in map {
            if let ciborium::Value::Text(key_str) = key {
                result.insert(key_str, value);
            }
        }
        Ok(result)
    } else {
        Err(CodecError::MetaDecode)
    }
}

/// Get string value from metadata
pub fn get_meta_str(meta: &BTreeMap<String, ciborium::Value>, key: &str) -> Option<String> {
    meta.get(key).and_then(|v| {
        if let ciborium::Value::Text(s) = v {
            Some(s.clone())
        } else {
            None
        }
    })
}

/// Marshal a payload into its wire bytes and the flag describing its variant
pub fn encode_payload(payload: &Payload) -> (Flags, Bytes) {
    match payload {
        Payload::Binary(data) => (Flags::BINARY, data.clone()),
        Payload::String(text) => (Flags::empty(), Bytes::copy_from_slice(text.as_bytes())),
    }
}

/// Unmarshal wire bytes into a payload according to the packet flags
pub fn decode_payload(flags: Flags, raw: Bytes) -> Result<Payload, WireError> {
    if flags.contains(Flags::BINARY) {
        return Ok(Payload::Binary(raw));
    }

    String::from_utf8(raw.to_vec())
        .map(Payload::String)
        .map_err(|_| WireError::Utf8)
}
