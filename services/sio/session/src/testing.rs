//! In-memory transport for exercising the session engine.

use crate::router::InboundEvent;
use crate::transport::{FrameSink, FrameStream, Link, Transport, TransportError};
use async_trait::async_trait;
use bytes::Bytes;
use sio_wire::{Event, Packet, Payload};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Server side of one in-memory link
pub(crate) struct PeerEnd {
    inbound: Option<mpsc::UnboundedSender<Bytes>>,
    outbound: mpsc::UnboundedReceiver<Bytes>,
}

impl PeerEnd {
    /// Push a packet to the client
    pub fn send_packet(&self, packet: Packet) {
        self.send_raw(packet.encode().unwrap());
    }

    /// Push raw bytes to the client
    pub fn send_raw(&self, body: Bytes) {
        if let Some(inbound) = &self.inbound {
            inbound.send(body).unwrap();
        }
    }

    /// Next packet written by the client
    pub async fn next_packet(&mut self) -> Packet {
        let body = tokio::time::timeout(std::time::Duration::from_secs(5), self.outbound.recv())
            .await
            .expect("no packet from client")
            .expect("client closed the link");
        Packet::decode(body).unwrap()
    }

    /// Next raw body written by the client; `None` once it closed the link
    pub async fn next_raw(&mut self) -> Option<Bytes> {
        tokio::time::timeout(std::time::Duration::from_secs(5), self.outbound.recv())
            .await
            .expect("client neither wrote nor closed")
    }

    /// Nothing written by the client is waiting to be read
    pub fn assert_idle(&mut self) {
        assert!(self.outbound.try_recv().is_err());
    }

    /// Simulate the server dropping the connection
    pub fn hang_up(&mut self) {
        self.inbound = None;
    }
}

/// Transport whose connect outcomes are scripted by the test
pub(crate) struct ChannelTransport {
    script: Mutex<VecDeque<bool>>,
    opens: Mutex<Vec<Instant>>,
    peers: mpsc::UnboundedSender<PeerEnd>,
}

impl ChannelTransport {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<PeerEnd>) {
        let (peers, peer_rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            opens: Mutex::new(Vec::new()),
            peers,
        });
        (transport, peer_rx)
    }

    /// Queue connect outcomes (`true` accepts); once exhausted every attempt
    /// is accepted
    pub fn script(&self, outcomes: impl IntoIterator<Item = bool>) {
        self.script.lock().unwrap().extend(outcomes);
    }

    /// When each `open` was attempted
    pub fn open_times(&self) -> Vec<Instant> {
        self.opens.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn open(
        &self,
        _address: &str,
        _namespace: &str,
        _auth: Option<&str>,
    ) -> Result<Link, TransportError> {
        self.opens.lock().unwrap().push(Instant::now());

        let accept = self.script.lock().unwrap().pop_front().unwrap_or(true);
        if !accept {
            return Err(TransportError::Rejected("scripted refusal".to_string()));
        }

        let (to_client, from_peer) = mpsc::unbounded_channel();
        let (to_peer, from_client) = mpsc::unbounded_channel();

        let _ = self.peers.send(PeerEnd {
            inbound: Some(to_client),
            outbound: from_client,
        });

        Ok(Link::new(
            Box::new(ChannelSink { tx: Some(to_peer) }),
            Box::new(ChannelStream { rx: from_peer }),
        ))
    }
}

struct ChannelSink {
    tx: Option<mpsc::UnboundedSender<Bytes>>,
}

#[async_trait]
impl FrameSink for ChannelSink {
    async fn send(&mut self, body: Bytes) -> Result<(), TransportError> {
        match &self.tx {
            Some(tx) => tx.send(body).map_err(|_| TransportError::Closed),
            None => Err(TransportError::Closed),
        }
    }

    async fn close(&mut self) {
        self.tx = None;
    }
}

struct ChannelStream {
    rx: mpsc::UnboundedReceiver<Bytes>,
}

#[async_trait]
impl FrameStream for ChannelStream {
    async fn recv(&mut self) -> Result<Option<Bytes>, TransportError> {
        Ok(self.rx.recv().await)
    }
}

/// Event as seen by the callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Seen {
    pub event: Event,
    pub payload: Payload,
    pub wants_ack: bool,
    pub message_id: i32,
}

/// Records every event callback invocation
#[derive(Clone, Default)]
pub(crate) struct EventLog(Arc<Mutex<Vec<Seen>>>);

impl EventLog {
    pub fn record(&self, inbound: &InboundEvent) {
        self.0.lock().unwrap().push(Seen {
            event: inbound.event.clone(),
            payload: inbound.payload.clone(),
            wants_ack: inbound.wants_ack,
            message_id: inbound.message_id,
        });
    }

    pub fn seen(&self) -> Vec<Seen> {
        self.0.lock().unwrap().clone()
    }

    pub fn events(&self) -> Vec<Event> {
        self.seen().into_iter().map(|seen| seen.event).collect()
    }

    pub fn count(&self, event: &Event) -> usize {
        self.seen().iter().filter(|seen| &seen.event == event).count()
    }
}

/// Yield until `condition` holds (panics after a generous number of polls)
pub(crate) async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..5_000 {
        if condition() {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(1)).await;
    }
    panic!("condition not reached");
}
