//! Transport seam and the TCP transport.
//!
//! A [`Transport`] opens a namespace-scoped [`Link`]: the handshake has already
//! completed when `open` returns. The link is split into a sink the driver
//! writes packet bodies to and a stream it reads packet bodies from.

use crate::handshake::{await_connect_reply, send_connect};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use sio_wire::{
    encode_frame, CodecError, FrameDecoder, Packet, PacketType, WireError,
    DEFAULT_MAX_FRAME_SIZE,
};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::{debug, info, trace};

/// Transport-level errors
#[derive(Error, Debug)]
pub enum TransportError {
    /// Socket error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Framing or packet decoding error
    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    /// Packet encoding error
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Server refused the namespace
    #[error("connection refused by server: {0}")]
    Rejected(String),

    /// No handshake reply in time
    #[error("handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),

    /// Handshake reply of the wrong type
    #[error("unexpected {0:?} packet during handshake")]
    UnexpectedPacket(PacketType),

    /// Address could not be used
    #[error("invalid address: {0}")]
    Address(String),

    /// Link already closed
    #[error("link closed")]
    Closed,
}

/// Write half of a link
#[async_trait]
pub trait FrameSink: Send {
    /// Send one packet body
    async fn send(&mut self, body: Bytes) -> Result<(), TransportError>;

    /// Close the link (best effort)
    async fn close(&mut self);
}

/// Read half of a link
#[async_trait]
pub trait FrameStream: Send {
    /// Next packet body; `None` once the peer closed the link.
    ///
    /// Must be cancel-safe: the driver polls it inside `select!`.
    async fn recv(&mut self) -> Result<Option<Bytes>, TransportError>;
}

/// An established namespace session
pub struct Link {
    /// Outbound half
    pub sink: Box<dyn FrameSink>,
    /// Inbound half
    pub stream: Box<dyn FrameStream>,
}

impl Link {
    /// Pair a sink and a stream
    pub fn new(sink: Box<dyn FrameSink>, stream: Box<dyn FrameStream>) -> Self {
        Self { sink, stream }
    }
}

impl fmt::Debug for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Link").finish_non_exhaustive()
    }
}

/// Opens links to a remote endpoint
#[async_trait]
pub trait Transport: Send + Sync {
    /// Connect to `address` and join `namespace`
    async fn open(
        &self,
        address: &str,
        namespace: &str,
        auth: Option<&str>,
    ) -> Result<Link, TransportError>;
}

/// Length-prefixed packets over TCP
#[derive(Debug, Clone)]
pub struct TcpTransport {
    handshake_timeout: Duration,
    max_frame_size: usize,
}

impl TcpTransport {
    /// Create a TCP transport
    pub fn new(handshake_timeout: Duration) -> Self {
        Self {
            handshake_timeout,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Override the frame size limit
    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

/// Strip an optional `tcp://` scheme and trailing slash
pub fn parse_address(address: &str) -> Result<&str, TransportError> {
    let host_port = address
        .strip_prefix("tcp://")
        .unwrap_or(address)
        .trim_end_matches('/');

    if host_port.is_empty() || !host_port.contains(':') {
        return Err(TransportError::Address(address.to_string()));
    }
    Ok(host_port)
}

#[async_trait]
impl Transport for TcpTransport {
    async fn open(
        &self,
        address: &str,
        namespace: &str,
        auth: Option<&str>,
    ) -> Result<Link, TransportError> {
        let host_port = parse_address(address)?;

        let handshake = async {
            let stream = TcpStream::connect(host_port).await?;
            stream.set_nodelay(true)?;
            let (mut reader, mut writer) = stream.into_split();

            send_connect(&mut writer, namespace, auth).await?;

            let mut decoder = FrameDecoder::with_max_frame_size(self.max_frame_size);
            let mut buffer = BytesMut::with_capacity(8 * 1024);
            await_connect_reply(&mut reader, namespace, &mut decoder, &mut buffer).await?;

            Ok::<_, TransportError>((reader, writer, decoder, buffer))
        };

        let (reader, writer, decoder, buffer) =
            tokio::time::timeout(self.handshake_timeout, handshake)
                .await
                .map_err(|_| TransportError::HandshakeTimeout(self.handshake_timeout))??;

        info!("Connected to {} namespace {}", host_port, namespace);

        let sink = TcpFrameSink {
            writer,
            namespace: namespace.to_string(),
            max_frame_size: self.max_frame_size,
        };
        let stream = TcpFrameStream {
            reader,
            namespace: namespace.to_string(),
            decoder,
            buffer,
        };

        Ok(Link::new(Box::new(sink), Box::new(stream)))
    }
}

struct TcpFrameSink {
    writer: OwnedWriteHalf,
    namespace: String,
    max_frame_size: usize,
}

#[async_trait]
impl FrameSink for TcpFrameSink {
    async fn send(&mut self, body: Bytes) -> Result<(), TransportError> {
        let frame = encode_frame(&body, self.max_frame_size)?;
        self.writer.write_all(&frame).await?;
        trace!("Wrote frame of {} bytes", frame.len());
        Ok(())
    }

    async fn close(&mut self) {
        if let Ok(body) = Packet::disconnect(&self.namespace, Some("client disconnect")).encode() {
            if let Ok(frame) = encode_frame(&body, self.max_frame_size) {
                let _ = self.writer.write_all(&frame).await;
            }
        }
        let _ = self.writer.shutdown().await;
        debug!("Closed link for namespace {}", self.namespace);
    }
}

struct TcpFrameStream {
    reader: OwnedReadHalf,
    namespace: String,
    decoder: FrameDecoder,
    buffer: BytesMut,
}

#[async_trait]
impl FrameStream for TcpFrameStream {
    async fn recv(&mut self) -> Result<Option<Bytes>, TransportError> {
        loop {
            if let Some(body) = self.decoder.decode(&mut self.buffer)? {
                return Ok(Some(body));
            }

            // Cancel-safe: read_buf appends to the persistent buffer
            let bytes_read = self.reader.read_buf(&mut self.buffer).await?;
            if bytes_read == 0 {
                debug!("Peer closed link for namespace {}", self.namespace);
                return Ok(None);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sio_wire::{Event, Payload};
    use tokio::net::TcpListener;

    async fn write_packet(socket: &mut TcpStream, packet: Packet) {
        let body = packet.encode().unwrap();
        let frame = encode_frame(&body, DEFAULT_MAX_FRAME_SIZE).unwrap();
        socket.write_all(&frame).await.unwrap();
    }

    #[test]
    fn test_parse_address() {
        assert_eq!(parse_address("tcp://127.0.0.1:4000/").unwrap(), "127.0.0.1:4000");
        assert_eq!(parse_address("localhost:4000").unwrap(), "localhost:4000");
        assert!(matches!(
            parse_address("localhost"),
            Err(TransportError::Address(_))
        ));
        assert!(parse_address("").is_err());
    }

    #[tokio::test]
    async fn test_tcp_link_exchanges_frames() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut decoder = FrameDecoder::new();
            let mut buffer = BytesMut::new();
            let hello = crate::handshake::recv_packet(&mut socket, &mut decoder, &mut buffer)
                .await
                .unwrap();
            assert_eq!(hello.namespace, "/chat");

            // Accept and push an event in the same write burst
            write_packet(&mut socket, Packet::connect("/chat", None)).await;
            write_packet(
                &mut socket,
                Packet::event("/chat", Event::Message, Payload::string("welcome"), None),
            )
            .await;

            crate::handshake::recv_packet(&mut socket, &mut decoder, &mut buffer)
                .await
                .unwrap()
        });

        let transport = TcpTransport::default();
        let mut link = transport
            .open(&format!("tcp://{addr}"), "/chat", None)
            .await
            .unwrap();

        let body = link.stream.recv().await.unwrap().unwrap();
        let welcome = Packet::decode(body).unwrap();
        assert_eq!(welcome.payload, Payload::string("welcome"));

        let ping = Packet::event("/chat", Event::custom("ping"), Payload::empty(), Some(1));
        link.sink.send(ping.encode().unwrap()).await.unwrap();

        let received = server.await.unwrap();
        assert_eq!(received.event, Event::custom("ping"));
        assert_eq!(received.msg_id(), 1);

        // Server dropped its socket
        assert!(link.stream.recv().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_tcp_rejected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut decoder = FrameDecoder::new();
            let mut buffer = BytesMut::new();
            crate::handshake::recv_packet(&mut socket, &mut decoder, &mut buffer)
                .await
                .unwrap();
            write_packet(&mut socket, Packet::connect_error("/", "bad token")).await;
            // Hold the socket until the client hangs up
            let _ = crate::handshake::recv_packet(&mut socket, &mut decoder, &mut buffer).await;
        });

        let result = TcpTransport::default().open(&addr.to_string(), "/", Some("x")).await;
        match result {
            Err(TransportError::Rejected(reason)) => assert_eq!(reason, "bad token"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_tcp_handshake_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_millis(500)).await;
            drop(socket);
        });

        let result = TcpTransport::new(Duration::from_millis(50))
            .open(&addr.to_string(), "/", None)
            .await;
        assert!(matches!(result, Err(TransportError::HandshakeTimeout(_))));
        server.abort();
    }
}
