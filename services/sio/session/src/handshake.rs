//! Namespace connect handshake.
//!
//! The client sends a Connect packet (namespace and optional auth token) right
//! after the stream is established, then waits for either a Connect reply or a
//! ConnectError carrying the refusal reason.

use crate::transport::TransportError;
use bytes::BytesMut;
use sio_wire::{encode_frame, FrameDecoder, Packet, PacketType, DEFAULT_MAX_FRAME_SIZE};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, trace};

/// Send a Connect packet for `namespace`
pub async fn send_connect<W: AsyncWriteExt + Unpin>(
    mut writer: W,
    namespace: &str,
    auth: Option<&str>,
) -> Result<(), TransportError> {
    let body = Packet::connect(namespace, auth).encode()?;
    let frame = encode_frame(&body, DEFAULT_MAX_FRAME_SIZE)?;

    writer.write_all(&frame).await?;
    debug!("Sent CONNECT for namespace {}", namespace);
    Ok(())
}

/// Read the next packet, keeping leftover bytes in `buffer`
pub async fn recv_packet<R: AsyncReadExt + Unpin>(
    mut reader: R,
    decoder: &mut FrameDecoder,
    buffer: &mut BytesMut,
) -> Result<Packet, TransportError> {
    loop {
        if let Some(body) = decoder.decode(buffer)? {
            return Ok(Packet::decode(body)?);
        }

        let bytes_read = reader.read_buf(buffer).await?;
        if bytes_read == 0 {
            return Err(TransportError::Closed);
        }

        trace!(
            "Read {} bytes, buffer now has {} bytes",
            bytes_read,
            buffer.len()
        );
    }
}

/// Wait for the server's answer to our Connect packet
pub async fn await_connect_reply<R: AsyncReadExt + Unpin>(
    reader: R,
    namespace: &str,
    decoder: &mut FrameDecoder,
    buffer: &mut BytesMut,
) -> Result<(), TransportError> {
    let packet = recv_packet(reader, decoder, buffer).await?;

    match packet.typ() {
        PacketType::Connect if packet.namespace == namespace => {
            debug!("Namespace {} accepted", namespace);
            Ok(())
        }
        PacketType::ConnectError => Err(TransportError::Rejected(
            packet
                .reason
                .unwrap_or_else(|| "connection refused".to_string()),
        )),
        other => Err(TransportError::UnexpectedPacket(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn test_connect_roundtrip() {
        let mut buffer = Vec::new();
        send_connect(&mut buffer, "/chat", Some("token")).await.unwrap();

        let mut decoder = FrameDecoder::new();
        let mut read_buf = BytesMut::new();
        let packet = recv_packet(Cursor::new(buffer), &mut decoder, &mut read_buf)
            .await
            .unwrap();

        assert_eq!(packet.typ(), PacketType::Connect);
        assert_eq!(packet.namespace, "/chat");
        assert_eq!(packet.auth.as_deref(), Some("token"));
    }

    #[tokio::test]
    async fn test_reply_handling() {
        async fn reply(packet: Packet) -> Result<(), TransportError> {
            let body = packet.encode().unwrap();
            let frame = encode_frame(&body, DEFAULT_MAX_FRAME_SIZE).unwrap();
            let mut decoder = FrameDecoder::new();
            let mut buffer = BytesMut::new();
            await_connect_reply(Cursor::new(frame.to_vec()), "/", &mut decoder, &mut buffer).await
        }

        assert!(reply(Packet::connect("/", None)).await.is_ok());

        match reply(Packet::connect_error("/", "bad token")).await {
            Err(TransportError::Rejected(reason)) => assert_eq!(reason, "bad token"),
            other => panic!("unexpected: {other:?}"),
        }

        assert!(matches!(
            reply(Packet::disconnect("/", None)).await,
            Err(TransportError::UnexpectedPacket(PacketType::Disconnect))
        ));
    }

    #[tokio::test]
    async fn test_eof_during_handshake() {
        let mut decoder = FrameDecoder::new();
        let mut buffer = BytesMut::new();

        let result = recv_packet(Cursor::new(Vec::new()), &mut decoder, &mut buffer).await;
        assert!(matches!(result, Err(TransportError::Closed)));
    }
}
