//! Packet codec, payload marshaling and length-prefixed framing for sio.
//!
//! This crate provides the wire representation used by the sio event client:
//! typed payloads and event tags, the packet header, CBOR metadata, and the
//! length-prefixed framing used on stream transports.
//!
//! ## Features
//!
//! - **Typed Payloads**: binary blobs and UTF-8 strings behind one enum
//! - **Event Tags**: message, error, custom (named), connect and close
//! - **Ack Correlation**: signed 32-bit message ids carried in the header
//! - **CBOR Metadata**: namespace, custom event name, auth and close reasons
//! - **Zero-Copy I/O**: Uses `Bytes`/`BytesMut` for minimal allocations
//!
//! ## Wire Format
//!
//! ```text
//! +----------------------+----------------------------+
//! | u32 frame_len        | length of bytes that follow|
//! +----------------------+----------------------------+
//! | Packet Header (12B)  | type, flags, tag, msg id   |
//! +----------------------+----------------------------+
//! | u32 meta_len         | canonical CBOR map length  |
//! +----------------------+----------------------------+
//! | meta_bytes           | metadata (CBOR)            |
//! +----------------------+----------------------------+
//! | payload              | variable (0..N)            |
//! +----------------------+----------------------------+
//! ```
//!
//! The `frame_len` prefix belongs to the stream transport ([`frame`]); the
//! packet body that follows it is produced by [`Packet::encode`].

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
pub mod error;
pub mod frame;
pub mod header;
pub mod packet;
pub mod payload;

// Re-export main types
pub use codec::{
    decode_payload, encode_payload, get_meta_str, parse_meta, CodecError, MetaBuilder,
};
pub use error::WireError;
pub use frame::{encode_frame, FrameDecoder, DEFAULT_MAX_FRAME_SIZE, HARD_MAX_FRAME_SIZE};
pub use header::{EventKind, Flags, PacketHeader, PacketType, HEADER_SIZE, WIRE_VERSION};
pub use packet::{Packet, DEFAULT_NAMESPACE, MAX_META_SIZE};
pub use payload::{Event, Payload};
