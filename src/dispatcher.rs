// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Request correlation, subscription routing, and timeout enforcement.
//!
//! The scoped-resource pattern here, a guard whose `Drop` unregisters
//! synchronously, is the direct analogue of `stream::server::handshake::Receiver`,
//! which removes its own entry from a shared map on drop rather than
//! relying on the map's caller to remember to clean up.

use crate::{
    enr::Enr,
    error::DispatchError,
    events::{Event, EventBus},
    message::{FoundNodesMessage, Message, MessageType, RequestId},
    node_id::NodeId,
    pool::{InboundMessage, OutboundMessage},
};
use rand::Rng;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::sync::mpsc;

const MAX_REQUEST_ID_COLLISION_RETRIES: usize = 10;
pub const FOUND_NODES_MAX_PAYLOAD_SIZE: usize = 1200;

struct Subscriber {
    peer_node_id: NodeId,
    request_id: RequestId,
    message_type: MessageType,
    sender: mpsc::Sender<InboundMessage>,
}

struct HandlerEntry {
    message_type: MessageType,
    sender: mpsc::Sender<InboundMessage>,
}

struct Inner {
    reserved_ids: HashMap<NodeId, Vec<RequestId>>,
    subscribers: Vec<Subscriber>,
    handlers: Vec<HandlerEntry>,
}

/// Shared dispatcher state plus the channel to the Pool. Cheaply `Clone`d
/// (an `Arc` inside) so the Client and every guard can hold a handle.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Mutex<Inner>>,
    outbound: mpsc::Sender<OutboundMessage>,
    request_timeout: Duration,
    events: EventBus,
}

impl Dispatcher {
    pub fn new(outbound: mpsc::Sender<OutboundMessage>, request_timeout: Duration, events: EventBus) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                reserved_ids: HashMap::new(),
                subscribers: Vec::new(),
                handlers: Vec::new(),
            })),
            outbound,
            request_timeout,
            events,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Reserves a request ID unique among this peer's currently reserved
    /// IDs. Released when the returned guard drops.
    pub fn reserve_request_id(&self, peer_node_id: NodeId) -> ReservedRequestId {
        let mut inner = self.inner.lock().unwrap();
        let reserved = inner.reserved_ids.entry(peer_node_id).or_default();

        let mut rng = rand::rng();
        let mut candidate = rng.random::<u32>() as RequestId;
        let mut attempts = 0;
        while reserved.contains(&candidate) && attempts < MAX_REQUEST_ID_COLLISION_RETRIES {
            candidate = rng.random::<u32>() as RequestId;
            attempts += 1;
        }
        while reserved.contains(&candidate) {
            candidate = candidate.wrapping_add(1);
        }
        reserved.push(candidate);

        tracing::trace!(action = "reserve_request_id", peer = ?peer_node_id, request_id = candidate);
        ReservedRequestId {
            dispatcher: self.clone(),
            peer_node_id,
            request_id: candidate,
            released: false,
        }
    }

    fn release_request_id(&self, peer_node_id: NodeId, request_id: RequestId) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(reserved) = inner.reserved_ids.get_mut(&peer_node_id) {
            reserved.retain(|id| *id != request_id);
        }
    }

    /// Fire-and-forget: pushes onto the outbound channel for the Pool to
    /// encrypt and send.
    pub async fn send_message(&self, outbound: OutboundMessage) -> Result<(), DispatchError> {
        self.outbound
            .send(outbound)
            .await
            .map_err(|_| DispatchError::Fatal("outbound channel closed".into()))
    }

    /// Sends `message` and returns a subscription receiving only inbound
    /// messages from `receiver_node_id` matching `message`'s request ID and
    /// `expected_response_type`.
    pub async fn subscribe_request(
        &self,
        message: Message,
        receiver_endpoint: crate::endpoint::Endpoint,
        receiver_node_id: NodeId,
        expected_response_type: MessageType,
        capacity: usize,
    ) -> Result<Subscription, DispatchError> {
        let request_id = message.request_id();
        let (tx, rx) = mpsc::channel(capacity);
        {
            let mut inner = self.inner.lock().unwrap();
            inner.subscribers.push(Subscriber {
                peer_node_id: receiver_node_id,
                request_id,
                message_type: expected_response_type,
                sender: tx,
            });
        }

        self.send_message(OutboundMessage {
            message,
            receiver_endpoint,
            receiver_node_id,
        })
        .await?;

        Ok(Subscription {
            dispatcher: self.clone(),
            peer_node_id: receiver_node_id,
            request_id,
            receiver: rx,
            released: false,
        })
    }

    fn unsubscribe(&self, peer_node_id: NodeId, request_id: RequestId) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .subscribers
            .retain(|s| !(s.peer_node_id == peer_node_id && s.request_id == request_id));
    }

    /// Registers a handler for unsolicited inbound messages of `message_type`
    /// that don't match any live response subscription.
    pub fn add_request_handler(
        &self,
        message_type: MessageType,
        capacity: usize,
    ) -> HandlerSubscription {
        let (tx, rx) = mpsc::channel(capacity);
        {
            let mut inner = self.inner.lock().unwrap();
            inner.handlers.push(HandlerEntry {
                message_type,
                sender: tx,
            });
        }
        HandlerSubscription {
            dispatcher: self.clone(),
            message_type,
            receiver: rx,
            released: false,
        }
    }

    fn remove_handler(&self, message_type: MessageType) {
        let mut inner = self.inner.lock().unwrap();
        // There may be several handlers registered for the same type; this
        // removes one entry per call to balance one add_request_handler.
        if let Some(pos) = inner
            .handlers
            .iter()
            .position(|h| h.message_type == message_type)
        {
            inner.handlers.remove(pos);
        }
    }

    /// Routes one inbound message: first to a matching response
    /// subscription, then to a matching request handler, else drops it.
    pub async fn route_inbound(&self, inbound: InboundMessage) {
        let message_type = inbound.message.message_type();
        let request_id = inbound.message.request_id();

        let subscriber_sender = {
            let inner = self.inner.lock().unwrap();
            inner
                .subscribers
                .iter()
                .find(|s| {
                    s.peer_node_id == inbound.sender_node_id
                        && s.request_id == request_id
                        && s.message_type == message_type
                })
                .map(|s| s.sender.clone())
        };
        if let Some(sender) = subscriber_sender {
            let _ = sender.send(inbound).await;
            return;
        }

        let handler_sender = {
            let inner = self.inner.lock().unwrap();
            inner
                .handlers
                .iter()
                .find(|h| h.message_type == message_type)
                .map(|h| h.sender.clone())
        };
        if let Some(sender) = handler_sender {
            let _ = sender.send(inbound).await;
            return;
        }

        tracing::debug!(
            action = "unhandled_message",
            sender = ?inbound.sender_node_id,
            message_type = message_type.wire_id()
        );
        self.events.emit(Event::UnhandledMessage {
            node_id: inbound.sender_node_id,
            message_type: message_type.wire_id(),
        });
    }

    /// Splits `enrs` into batches under `FOUND_NODES_MAX_PAYLOAD_SIZE` and
    /// `max_per_batch` entries, and sends one `FoundNodes` message per batch
    /// sharing `request_id`, each tagging the final batch count. Returns the
    /// batch count.
    pub async fn send_found_nodes(
        &self,
        receiver_endpoint: crate::endpoint::Endpoint,
        receiver_node_id: NodeId,
        request_id: RequestId,
        enrs: Vec<Enr>,
        max_per_batch: usize,
    ) -> Result<usize, DispatchError> {
        let batches = partition_enrs(enrs, max_per_batch);
        let total = batches.len().max(1);

        if batches.is_empty() {
            self.send_message(OutboundMessage {
                message: Message::FoundNodes(FoundNodesMessage {
                    request_id,
                    total: 1,
                    enrs: Vec::new(),
                }),
                receiver_endpoint,
                receiver_node_id,
            })
            .await?;
            return Ok(1);
        }

        for batch in batches {
            self.send_message(OutboundMessage {
                message: Message::FoundNodes(FoundNodesMessage {
                    request_id,
                    total: total as u64,
                    enrs: batch,
                }),
                receiver_endpoint,
                receiver_node_id,
            })
            .await?;
        }
        Ok(total)
    }
}

/// Estimates an ENR's RLP-encoded size to decide batch placement.
fn enr_rlp_size(enr: &Enr) -> usize {
    rlp::encode(enr).len()
}

fn partition_enrs(enrs: Vec<Enr>, max_per_batch: usize) -> Vec<Vec<Enr>> {
    let max_per_batch = max_per_batch.max(1);
    let mut batches = Vec::new();
    let mut current = Vec::new();
    let mut current_size = 0usize;

    for enr in enrs {
        let size = enr_rlp_size(&enr);
        let exceeds_size = !current.is_empty() && current_size + size > FOUND_NODES_MAX_PAYLOAD_SIZE;
        let exceeds_count = current.len() >= max_per_batch;
        if exceeds_size || exceeds_count {
            batches.push(std::mem::take(&mut current));
            current_size = 0;
        }
        current_size += size;
        current.push(enr);
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
}

/// A reserved request ID, released when dropped.
pub struct ReservedRequestId {
    dispatcher: Dispatcher,
    peer_node_id: NodeId,
    request_id: RequestId,
    released: bool,
}

impl ReservedRequestId {
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }
}

impl Drop for ReservedRequestId {
    fn drop(&mut self) {
        if !self.released {
            self.dispatcher
                .release_request_id(self.peer_node_id, self.request_id);
        }
    }
}

/// A live response subscription. Unregistered synchronously on drop; no
/// inbound message is delivered after that point.
pub struct Subscription {
    dispatcher: Dispatcher,
    peer_node_id: NodeId,
    request_id: RequestId,
    receiver: mpsc::Receiver<InboundMessage>,
    released: bool,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<InboundMessage> {
        self.receiver.recv().await
    }

    /// Awaits the next matching message within this dispatcher's configured
    /// request timeout.
    pub async fn recv_with_timeout(&mut self) -> Result<InboundMessage, DispatchError> {
        tokio::time::timeout(self.dispatcher.request_timeout, self.recv())
            .await
            .map_err(|_| DispatchError::RequestTimeout(self.peer_node_id))?
            .ok_or(DispatchError::Cancelled)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if !self.released {
            self.dispatcher.unsubscribe(self.peer_node_id, self.request_id);
            self.dispatcher
                .release_request_id(self.peer_node_id, self.request_id);
        }
    }
}

/// A live request-handler registration, unregistered on drop.
pub struct HandlerSubscription {
    dispatcher: Dispatcher,
    message_type: MessageType,
    receiver: mpsc::Receiver<InboundMessage>,
    released: bool,
}

impl HandlerSubscription {
    pub async fn recv(&mut self) -> Option<InboundMessage> {
        self.receiver.recv().await
    }
}

impl Drop for HandlerSubscription {
    fn drop(&mut self) {
        if !self.released {
            self.dispatcher.remove_handler(self.message_type);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{enr::SigningKey, message::PingMessage};
    use std::net::Ipv4Addr;

    fn endpoint() -> crate::endpoint::Endpoint {
        crate::endpoint::Endpoint::new(Ipv4Addr::new(127, 0, 0, 1), 9000)
    }

    fn dispatcher() -> (Dispatcher, mpsc::Receiver<OutboundMessage>) {
        let (tx, rx) = mpsc::channel(16);
        (Dispatcher::new(tx, Duration::from_millis(50), EventBus::new(16)), rx)
    }

    fn dispatcher_with_events() -> (Dispatcher, EventBus) {
        let (tx, _rx) = mpsc::channel(16);
        let events = EventBus::new(16);
        (Dispatcher::new(tx, Duration::from_millis(50), events.clone()), events)
    }

    #[test]
    fn reserve_request_id_avoids_collisions_for_same_peer() {
        let (dispatcher, _rx) = dispatcher();
        let peer = NodeId::new([1; 32]);
        let a = dispatcher.reserve_request_id(peer);
        let b = dispatcher.reserve_request_id(peer);
        assert_ne!(a.request_id(), b.request_id());
    }

    #[test]
    fn dropping_reservation_releases_the_id() {
        let (dispatcher, _rx) = dispatcher();
        let peer = NodeId::new([1; 32]);
        let id = {
            let guard = dispatcher.reserve_request_id(peer);
            guard.request_id()
        };
        let inner = dispatcher.inner.lock().unwrap();
        assert!(!inner.reserved_ids.get(&peer).unwrap().contains(&id));
    }

    #[tokio::test]
    async fn subscribe_request_routes_matching_response() {
        let (dispatcher, mut outbound_rx) = dispatcher();
        let peer = NodeId::new([2; 32]);
        let mut sub = dispatcher
            .subscribe_request(
                Message::Ping(PingMessage {
                    request_id: 7,
                    enr_seq: 0,
                }),
                endpoint(),
                peer,
                MessageType::Pong,
                8,
            )
            .await
            .unwrap();

        let sent = outbound_rx.recv().await.unwrap();
        assert_eq!(sent.message.request_id(), 7);

        let pong = InboundMessage {
            message: Message::Pong(crate::message::PongMessage {
                request_id: 7,
                enr_seq: 0,
                packet_ip: Ipv4Addr::LOCALHOST,
                packet_port: 9000,
            }),
            sender_endpoint: endpoint(),
            sender_node_id: peer,
        };
        dispatcher.route_inbound(pong).await;

        let received = sub.recv_with_timeout().await.unwrap();
        assert_eq!(received.message.request_id(), 7);
    }

    #[tokio::test]
    async fn timeout_fires_when_no_response_arrives() {
        let (dispatcher, _outbound_rx) = dispatcher();
        let peer = NodeId::new([3; 32]);
        let mut sub = dispatcher
            .subscribe_request(
                Message::Ping(PingMessage {
                    request_id: 1,
                    enr_seq: 0,
                }),
                endpoint(),
                peer,
                MessageType::Pong,
                8,
            )
            .await
            .unwrap();

        let result = sub.recv_with_timeout().await;
        assert!(matches!(result, Err(DispatchError::RequestTimeout(_))));
    }

    #[tokio::test]
    async fn unmatched_message_falls_through_to_handler() {
        let (dispatcher, _outbound_rx) = dispatcher();
        let peer = NodeId::new([4; 32]);
        let mut handler = dispatcher.add_request_handler(MessageType::Ping, 8);

        dispatcher
            .route_inbound(InboundMessage {
                message: Message::Ping(PingMessage {
                    request_id: 99,
                    enr_seq: 0,
                }),
                sender_endpoint: endpoint(),
                sender_node_id: peer,
            })
            .await;

        let received = handler.recv().await.unwrap();
        assert_eq!(received.message.request_id(), 99);
    }

    #[tokio::test]
    async fn unmatched_message_with_no_handler_emits_unhandled_event() {
        let (dispatcher, events) = dispatcher_with_events();
        let mut subscriber = events.subscribe();
        let peer = NodeId::new([8; 32]);

        dispatcher
            .route_inbound(InboundMessage {
                message: Message::Ping(PingMessage {
                    request_id: 1,
                    enr_seq: 0,
                }),
                sender_endpoint: endpoint(),
                sender_node_id: peer,
            })
            .await;

        let event = subscriber.recv().await.unwrap();
        match event {
            Event::UnhandledMessage { node_id, message_type } => {
                assert_eq!(node_id, peer);
                assert_eq!(message_type, MessageType::Ping.wire_id());
            }
            other => panic!("expected UnhandledMessage, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn send_found_nodes_with_empty_enrs_sends_one_empty_message() {
        let (dispatcher, mut outbound_rx) = dispatcher();
        let peer = NodeId::new([5; 32]);
        let total = dispatcher
            .send_found_nodes(endpoint(), peer, 3, Vec::new(), 3)
            .await
            .unwrap();
        assert_eq!(total, 1);

        let sent = outbound_rx.recv().await.unwrap();
        match sent.message {
            Message::FoundNodes(m) => {
                assert_eq!(m.total, 1);
                assert!(m.enrs.is_empty());
            }
            _ => panic!("expected FoundNodes"),
        }
    }

    #[tokio::test]
    async fn send_found_nodes_partitions_large_batches() {
        let (dispatcher, mut outbound_rx) = dispatcher();
        let peer = NodeId::new([6; 32]);
        let key = SigningKey::from_bytes([1; 32]);
        let enrs: Vec<Enr> = (0..20)
            .map(|i| Enr::sign(&key, i, endpoint()))
            .collect();

        let total = dispatcher
            .send_found_nodes(endpoint(), peer, 9, enrs.clone(), enrs.len())
            .await
            .unwrap();
        assert!(total >= 1);

        let mut received_enrs = Vec::new();
        for _ in 0..total {
            let sent = outbound_rx.recv().await.unwrap();
            match sent.message {
                Message::FoundNodes(m) => {
                    assert_eq!(m.total, total as u64);
                    received_enrs.extend(m.enrs);
                }
                _ => panic!("expected FoundNodes"),
            }
        }
        assert_eq!(received_enrs, enrs);
    }

    #[tokio::test]
    async fn send_found_nodes_honors_configured_page_size() {
        let (dispatcher, mut outbound_rx) = dispatcher();
        let peer = NodeId::new([7; 32]);
        let key = SigningKey::from_bytes([2; 32]);
        let enrs: Vec<Enr> = (0..12)
            .map(|i| Enr::sign(&key, i, endpoint()))
            .collect();

        let total = dispatcher
            .send_found_nodes(endpoint(), peer, 11, enrs.clone(), 5)
            .await
            .unwrap();
        assert_eq!(total, 3);

        for _ in 0..total {
            let sent = outbound_rx.recv().await.unwrap();
            match sent.message {
                Message::FoundNodes(m) => assert!(m.enrs.len() <= 5),
                _ => panic!("expected FoundNodes"),
            }
        }
    }
}
