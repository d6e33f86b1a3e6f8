//! Packets exchanged inside a namespace session.
//!
//! A packet is the unit the session engine reasons about: connect handshake,
//! connect refusal, disconnect, event and ack. [`Packet::encode`] produces the
//! body that the stream transport wraps in a length-prefixed frame.

use crate::codec::{decode_payload, encode_payload, get_meta_str, parse_meta, CodecError, MetaBuilder};
use crate::header::{EventKind, PacketHeader, PacketType, HEADER_SIZE};
use crate::payload::{Event, Payload};
use crate::WireError;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Namespace used when none is configured
pub const DEFAULT_NAMESPACE: &str = "/";

/// Maximum metadata size (64 KiB)
pub const MAX_META_SIZE: usize = 64 * 1024;

/// Decoded packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Packet header
    pub header: PacketHeader,
    /// Namespace the packet belongs to
    pub namespace: String,
    /// Event tag (Message for non-event packets)
    pub event: Event,
    /// Packet payload
    pub payload: Payload,
    /// Auth token (connect requests only)
    pub auth: Option<String>,
    /// Human readable reason (connect errors and disconnects)
    pub reason: Option<String>,
}

impl Packet {
    fn base(typ: PacketType, namespace: &str, event: Event, payload: Payload, msg_id: i32) -> Self {
        let header = PacketHeader::new(typ, EventKind::from(&event), msg_id);
        Self {
            header,
            namespace: namespace.to_string(),
            event,
            payload,
            auth: None,
            reason: None,
        }
    }

    /// Connect request (client) or connect accept (server)
    pub fn connect(namespace: &str, auth: Option<&str>) -> Self {
        let mut packet = Self::base(
            PacketType::Connect,
            namespace,
            Event::Connect,
            Payload::empty(),
            0,
        );
        packet.auth = auth.map(str::to_string);
        packet
    }

    /// Connect refused with a reason
    pub fn connect_error(namespace: &str, reason: &str) -> Self {
        let mut packet = Self::base(
            PacketType::ConnectError,
            namespace,
            Event::Error,
            Payload::empty(),
            0,
        );
        packet.reason = Some(reason.to_string());
        packet
    }

    /// Namespace session closed
    pub fn disconnect(namespace: &str, reason: Option<&str>) -> Self {
        let mut packet = Self::base(
            PacketType::Disconnect,
            namespace,
            Event::Close,
            Payload::empty(),
            0,
        );
        packet.reason = reason.map(str::to_string);
        packet
    }

    /// Event packet, optionally asking the peer for an ack with `ack_id`
    pub fn event(namespace: &str, event: Event, payload: Payload, ack_id: Option<i32>) -> Self {
        let mut packet = Self::base(
            PacketType::Event,
            namespace,
            event,
            payload,
            ack_id.unwrap_or(0),
        );
        if ack_id.is_some() {
            packet.header.flags |= crate::Flags::WANTS_ACK;
        }
        packet
    }

    /// Ack reply for the event identified by `msg_id`
    pub fn ack(namespace: &str, msg_id: i32, payload: Payload) -> Self {
        Self::base(PacketType::Ack, namespace, Event::Message, payload, msg_id)
    }

    /// Packet type
    pub fn typ(&self) -> PacketType {
        self.header.typ
    }

    /// Correlation id carried in the header
    pub fn msg_id(&self) -> i32 {
        self.header.msg_id
    }

    /// Whether the sender expects an ack
    pub fn wants_ack(&self) -> bool {
        self.header.wants_ack()
    }

    /// Encode the packet body
    pub fn encode(&self) -> Result<Bytes, CodecError> {
        let (payload_flags, payload_raw) = encode_payload(&self.payload);

        let mut header = self.header;
        header.flags = (header.flags - crate::Flags::BINARY) | payload_flags;
        header.kind = EventKind::from(&self.event);

        let custom_name = match &self.event {
            Event::Custom(name) => Some(name.as_str()),
            _ => None,
        };

        let meta_raw = MetaBuilder::new()
            .insert_str("ns", &self.namespace)
            .insert_opt_str("event", custom_name)
            .insert_opt_str("auth", self.auth.as_deref())
            .insert_opt_str("reason", self.reason.as_deref())
            .build()?;

        if meta_raw.len() > MAX_META_SIZE {
            return Err(CodecError::Wire(WireError::Size(meta_raw.len())));
        }

        let mut buf = BytesMut::with_capacity(HEADER_SIZE + 4 + meta_raw.len() + payload_raw.len());
        header.encode(&mut buf);
        buf.put_u32(meta_raw.len() as u32);
        buf.put_slice(&meta_raw);
        buf.put_slice(&payload_raw);

        Ok(buf.freeze())
    }

    /// Decode a packet body
    pub fn decode(mut body: Bytes) -> Result<Self, WireError> {
        let header = PacketHeader::decode(&mut body)?;

        if body.len() < 4 {
            return Err(WireError::Malformed);
        }

        let meta_len = body.get_u32() as usize;
        if meta_len > MAX_META_SIZE || body.len() < meta_len {
            return Err(WireError::Meta);
        }

        let meta_raw = body.split_to(meta_len);
        let meta = parse_meta(&meta_raw).map_err(|_| WireError::Meta)?;

        let namespace =
            get_meta_str(&meta, "ns").unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());

        let event = match header.kind {
            EventKind::Message => Event::Message,
            EventKind::Error => Event::Error,
            EventKind::Connect => Event::Connect,
            EventKind::Close => Event::Close,
            EventKind::Custom => {
                Event::Custom(get_meta_str(&meta, "event").ok_or(WireError::MissingEventName)?)
            }
        };

        let payload = decode_payload(header.flags, body)?;

        Ok(Self {
            header,
            namespace,
            event,
            payload,
            auth: get_meta_str(&meta, "auth"),
            reason: get_meta_str(&meta, "reason"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Flags;

    #[test]
    fn test_event_packet_with_ack() {
        let packet = Packet::event(
            "/chat",
            Event::custom("typing"),
            Payload::binary([1u8, 2, 3]),
            Some(17),
        );

        let decoded = Packet::decode(packet.encode().unwrap()).unwrap();

        assert_eq!(decoded.typ(), PacketType::Event);
        assert_eq!(decoded.namespace, "/chat");
        assert_eq!(decoded.event, Event::custom("typing"));
        assert_eq!(decoded.payload, Payload::binary([1u8, 2, 3]));
        assert!(decoded.wants_ack());
        assert_eq!(decoded.msg_id(), 17);
        assert!(decoded.header.flags.contains(Flags::BINARY));
    }

    #[test]
    fn test_fire_and_forget_event() {
        let packet = Packet::event("/", Event::Message, Payload::string("hi"), None);
        let decoded = Packet::decode(packet.encode().unwrap()).unwrap();

        assert!(!decoded.wants_ack());
        assert_eq!(decoded.msg_id(), 0);
        assert_eq!(decoded.payload.as_str(), Some("hi"));
    }

    #[test]
    fn test_control_packets_carry_meta() {
        let connect = Packet::decode(Packet::connect("/admin", Some("secret")).encode().unwrap()).unwrap();
        assert_eq!(connect.typ(), PacketType::Connect);
        assert_eq!(connect.auth.as_deref(), Some("secret"));

        let refused =
            Packet::decode(Packet::connect_error("/admin", "bad token").encode().unwrap()).unwrap();
        assert_eq!(refused.typ(), PacketType::ConnectError);
        assert_eq!(refused.reason.as_deref(), Some("bad token"));

        let bye = Packet::decode(Packet::disconnect("/admin", None).encode().unwrap()).unwrap();
        assert_eq!(bye.typ(), PacketType::Disconnect);
        assert_eq!(bye.event, Event::Close);
        assert_eq!(bye.reason, None);
    }

    #[test]
    fn test_payload_variant_wins_over_stale_flag() {
        let mut packet = Packet::ack("/", 3, Payload::string("ok"));
        packet.header.flags |= Flags::BINARY;

        let decoded = Packet::decode(packet.encode().unwrap()).unwrap();
        assert_eq!(decoded.payload, Payload::string("ok"));
    }

    #[test]
    fn test_decode_errors() {
        assert_eq!(
            Packet::decode(Bytes::from_static(&[1, 3])).unwrap_err(),
            WireError::Incomplete
        );

        // Custom tag with no event name in meta
        let mut header = PacketHeader::new(PacketType::Event, EventKind::Custom, 0);
        header.flags = Flags::empty();
        let meta = MetaBuilder::new().insert_str("ns", "/").build().unwrap();
        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        buf.put_u32(meta.len() as u32);
        buf.put_slice(&meta);
        assert_eq!(
            Packet::decode(buf.freeze()).unwrap_err(),
            WireError::MissingEventName
        );

        // Meta length pointing past the end of the body
        let mut buf = BytesMut::new();
        PacketHeader::new(PacketType::Event, EventKind::Message, 0).encode(&mut buf);
        buf.put_u32(100);
        assert_eq!(Packet::decode(buf.freeze()).unwrap_err(), WireError::Meta);
    }
}
