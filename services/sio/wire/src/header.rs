//! Packet header for the wire protocol.
//!
//! This module defines the 12-byte packet header that lets the router pick
//! the packet type, the event tag and the ack id without parsing metadata.

use bitflags::bitflags;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

/// Wire protocol version
pub const WIRE_VERSION: u8 = 1;

/// Packet header size in bytes
pub const HEADER_SIZE: usize = 12;

/// Packet types as defined in the wire protocol
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PacketType {
    /// Namespace connect request (client) or accept (server)
    Connect = 0x00,
    /// Namespace connect refused by the server
    ConnectError = 0x01,
    /// Namespace session closed
    Disconnect = 0x02,
    /// Event packet
    Event = 0x03,
    /// Acknowledgment of an earlier event
    Ack = 0x04,
}

impl TryFrom<u8> for PacketType {
    type Error = crate::WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(PacketType::Connect),
            0x01 => Ok(PacketType::ConnectError),
            0x02 => Ok(PacketType::Disconnect),
            0x03 => Ok(PacketType::Event),
            0x04 => Ok(PacketType::Ack),
            _ => Err(crate::WireError::Type(value)),
        }
    }
}

bitflags! {
    /// Packet flags bitmask
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Flags: u16 {
        /// Sender expects an ack carrying the same msg_id
        const WANTS_ACK = 1 << 0;
        /// Payload is opaque binary rather than UTF-8 text
        const BINARY = 1 << 1;
    }
}

/// Event tag carried in the header
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    /// Ordinary message
    Message = 0,
    /// Error notification
    Error = 1,
    /// Named custom event (name lives in metadata)
    Custom = 2,
    /// Connect notification
    Connect = 3,
    /// Close notification
    Close = 4,
}

impl TryFrom<u8> for EventKind {
    type Error = crate::WireError;

    fn try_from(value: u8) -> Result<Self, crate::WireError> {
        match value {
            0 => Ok(EventKind::Message),
            1 => Ok(EventKind::Error),
            2 => Ok(EventKind::Custom),
            3 => Ok(EventKind::Connect),
            4 => Ok(EventKind::Close),
            _ => Err(crate::WireError::EventTag(value)),
        }
    }
}

impl From<&crate::Event> for EventKind {
    fn from(event: &crate::Event) -> Self {
        match event {
            crate::Event::Message => EventKind::Message,
            crate::Event::Error => EventKind::Error,
            crate::Event::Custom(_) => EventKind::Custom,
            crate::Event::Connect => EventKind::Connect,
            crate::Event::Close => EventKind::Close,
        }
    }
}

/// Packet header structure (12 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketHeader {
    /// Protocol version (must be 1)
    pub ver: u8,
    /// Packet type
    pub typ: PacketType,
    /// Packet flags
    pub flags: Flags,
    /// Event tag (meaningful for Event packets)
    pub kind: EventKind,
    /// Reserved field (must be zero)
    pub reserved0: u8,
    /// Reserved field (must be zero)
    pub reserved1: u16,
    /// Ack correlation id (0 when unused)
    pub msg_id: i32,
}

impl PacketHeader {
    /// Create a new packet header with default values
    pub fn new(typ: PacketType, kind: EventKind, msg_id: i32) -> Self {
        Self {
            ver: WIRE_VERSION,
            typ,
            flags: Flags::empty(),
            kind,
            reserved0: 0,
            reserved1: 0,
            msg_id,
        }
    }

    /// Whether the sender asked for an ack
    pub fn wants_ack(&self) -> bool {
        self.flags.contains(Flags::WANTS_ACK)
    }

    /// Encode the header to bytes (big-endian)
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.ver);
        buf.put_u8(self.typ as u8);
        buf.put_u16(self.flags.bits());
        buf.put_u8(self.kind as u8);
        buf.put_u8(self.reserved0);
        buf.put_u16(self.reserved1);
        buf.put_i32(self.msg_id);
    }

    /// Decode the header from bytes (big-endian)
    pub fn decode(buf: &mut Bytes) -> Result<Self, crate::WireError> {
        if buf.len() < HEADER_SIZE {
            return Err(crate::WireError::Incomplete);
        }

        let ver = buf.get_u8();
        if ver != WIRE_VERSION {
            return Err(crate::WireError::Version(ver));
        }

        let typ = PacketType::try_from(buf.get_u8())?;
        let flags = Flags::from_bits(buf.get_u16()).ok_or(crate::WireError::Reserved)?;
        let kind = EventKind::try_from(buf.get_u8())?;
        let reserved0 = buf.get_u8();
        let reserved1 = buf.get_u16();

        if reserved0 != 0 || reserved1 != 0 {
            return Err(crate::WireError::Reserved);
        }

        let msg_id = buf.get_i32();

        Ok(Self {
            ver,
            typ,
            flags,
            kind,
            reserved0,
            reserved1,
            msg_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_type_conversion() {
        assert_eq!(PacketType::try_from(0x00).unwrap(), PacketType::Connect);
        assert_eq!(PacketType::try_from(0x04).unwrap(), PacketType::Ack);
        assert!(PacketType::try_from(0xFF).is_err());
    }

    #[test]
    fn test_event_kind_conversion() {
        assert_eq!(EventKind::try_from(2).unwrap(), EventKind::Custom);
        assert_eq!(
            EventKind::try_from(9).unwrap_err(),
            crate::WireError::EventTag(9)
        );
        assert_eq!(EventKind::from(&crate::Event::custom("x")), EventKind::Custom);
    }

    #[test]
    fn test_header_encode_decode() {
        let mut header = PacketHeader::new(PacketType::Event, EventKind::Custom, 42);
        header.flags = Flags::WANTS_ACK | Flags::BINARY;

        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        assert_eq!(buf.len(), HEADER_SIZE);

        let mut bytes = buf.freeze();
        let decoded = PacketHeader::decode(&mut bytes).unwrap();

        assert_eq!(header, decoded);
        assert!(decoded.wants_ack());
    }

    #[test]
    fn test_header_rejects_bad_input() {
        let header = PacketHeader::new(PacketType::Ack, EventKind::Message, 7);
        let mut buf = BytesMut::new();
        header.encode(&mut buf);

        let mut bad_version = buf.clone();
        bad_version[0] = 2;
        assert_eq!(
            PacketHeader::decode(&mut bad_version.freeze()).unwrap_err(),
            crate::WireError::Version(2)
        );

        let mut bad_reserved = buf.clone();
        bad_reserved[5] = 1;
        assert_eq!(
            PacketHeader::decode(&mut bad_reserved.freeze()).unwrap_err(),
            crate::WireError::Reserved
        );

        let mut short = Bytes::from_static(&[1, 3, 0]);
        assert_eq!(
            PacketHeader::decode(&mut short).unwrap_err(),
            crate::WireError::Incomplete
        );
    }
}
