//! Inbound frame dispatch.

use crate::ack_tracker::AckTracker;
use crate::client::RawClient;
use crate::config::EventCallback;
use crate::stats::Counters;
use bytes::Bytes;
use sio_wire::{Event, Packet, PacketType, Payload};
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

/// Event handed to the event callback
#[derive(Debug, Clone)]
pub struct InboundEvent {
    /// Event tag
    pub event: Event,
    /// Event payload
    pub payload: Payload,
    /// Handle for replying or emitting from inside the callback
    pub client: RawClient,
    /// Whether the sender expects an ack
    pub wants_ack: bool,
    /// Id to pass to `ack` when `wants_ack` is set
    pub message_id: i32,
}

/// What the link driver should do after a frame
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum RouteOutcome {
    Continue,
    Close(String),
}

/// Inbound ids the application may still ack, oldest first
#[derive(Default)]
struct AwaitingReply {
    order: VecDeque<i32>,
    ids: HashSet<i32>,
}

/// Decodes inbound frames and dispatches them to the ack table or the event
/// callback
pub(crate) struct EventRouter {
    namespace: String,
    on_event: Option<EventCallback>,
    awaiting_reply: Mutex<AwaitingReply>,
    max_awaiting: usize,
    counters: Arc<Counters>,
}

impl EventRouter {
    pub fn new(
        namespace: &str,
        on_event: Option<EventCallback>,
        max_awaiting: usize,
        counters: Arc<Counters>,
    ) -> Self {
        Self {
            namespace: namespace.to_string(),
            on_event,
            awaiting_reply: Mutex::new(AwaitingReply::default()),
            max_awaiting,
            counters,
        }
    }

    /// Route one inbound frame
    pub fn route(&self, body: Bytes, tracker: &AckTracker, sender: &RawClient) -> RouteOutcome {
        let packet = match Packet::decode(body) {
            Ok(packet) => packet,
            Err(e) => {
                Counters::incr(&self.counters.decode_errors);
                warn!("Dropping malformed frame: {}", e);
                self.deliver(
                    Event::Error,
                    Payload::String(format!("decode error: {e}")),
                    sender,
                    false,
                    0,
                );
                return RouteOutcome::Continue;
            }
        };

        if packet.namespace != self.namespace {
            warn!(
                "Dropping {:?} packet for namespace {} (joined {})",
                packet.typ(),
                packet.namespace,
                self.namespace
            );
            return RouteOutcome::Continue;
        }

        match packet.typ() {
            PacketType::Event => {
                let wants_ack = packet.wants_ack();
                let message_id = packet.msg_id();
                if wants_ack {
                    self.await_reply(message_id);
                }
                self.deliver(packet.event, packet.payload, sender, wants_ack, message_id);
                RouteOutcome::Continue
            }
            PacketType::Ack => {
                tracker.resolve(packet.msg_id(), packet.payload);
                RouteOutcome::Continue
            }
            PacketType::Disconnect => RouteOutcome::Close(
                packet
                    .reason
                    .unwrap_or_else(|| "server disconnect".to_string()),
            ),
            PacketType::ConnectError => {
                let reason = packet
                    .reason
                    .unwrap_or_else(|| "connection refused".to_string());
                self.deliver(Event::Error, Payload::String(reason.clone()), sender, false, 0);
                RouteOutcome::Close(reason)
            }
            PacketType::Connect => {
                debug!("Ignoring repeated CONNECT for {}", self.namespace);
                RouteOutcome::Continue
            }
        }
    }

    /// Invoke the event callback once
    pub fn deliver(
        &self,
        event: Event,
        payload: Payload,
        sender: &RawClient,
        wants_ack: bool,
        message_id: i32,
    ) {
        let Some(callback) = &self.on_event else {
            debug!("No event callback, dropping {}", event);
            return;
        };

        let inbound = InboundEvent {
            event,
            payload,
            client: sender.clone(),
            wants_ack,
            message_id,
        };
        Counters::incr(&self.counters.events_delivered);
        callback(&inbound);
    }

    fn awaiting(&self) -> MutexGuard<'_, AwaitingReply> {
        self.awaiting_reply
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Record `message_id` as ackable; past `max_awaiting` ids the oldest one
    /// is forgotten
    pub fn await_reply(&self, message_id: i32) {
        let mut awaiting = self.awaiting();
        if !awaiting.ids.insert(message_id) {
            awaiting.order.retain(|id| *id != message_id);
        }
        awaiting.order.push_back(message_id);

        while awaiting.ids.len() > self.max_awaiting {
            let Some(oldest) = awaiting.order.pop_front() else {
                break;
            };
            awaiting.ids.remove(&oldest);
            debug!("Message {} was never acked, no longer accepting an ack for it", oldest);
        }
    }

    /// Consume the awaiting-reply entry for `message_id`
    pub fn take_awaiting(&self, message_id: i32) -> bool {
        let mut awaiting = self.awaiting();
        if !awaiting.ids.remove(&message_id) {
            return false;
        }
        awaiting.order.retain(|id| *id != message_id);
        true
    }

    /// Ids are scoped to one link
    pub fn link_changed(&self) {
        let mut awaiting = self.awaiting();
        awaiting.ids.clear();
        awaiting.order.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router(max_awaiting: usize) -> EventRouter {
        EventRouter::new("/", None, max_awaiting, Arc::new(Counters::default()))
    }

    #[test]
    fn test_awaiting_evicts_oldest() {
        let router = router(3);
        for id in 1..=4 {
            router.await_reply(id);
        }

        assert!(!router.take_awaiting(1));
        assert!(router.take_awaiting(4));
        assert!(router.take_awaiting(2));
        assert!(!router.take_awaiting(2));
    }

    #[test]
    fn test_taken_ids_free_room() {
        let router = router(2);
        router.await_reply(1);
        router.await_reply(2);
        assert!(router.take_awaiting(1));

        router.await_reply(3);
        assert!(router.take_awaiting(2));
        assert!(router.take_awaiting(3));
    }

    #[test]
    fn test_repeated_id_moves_to_back() {
        let router = router(2);
        router.await_reply(1);
        router.await_reply(2);
        router.await_reply(1);
        router.await_reply(3);

        assert!(router.take_awaiting(1));
        assert!(!router.take_awaiting(2));
        assert!(router.take_awaiting(3));
    }

    #[test]
    fn test_link_change_forgets_everything() {
        let router = router(8);
        router.await_reply(5);
        router.link_changed();
        assert!(!router.take_awaiting(5));
    }
}
