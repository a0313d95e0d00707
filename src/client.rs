// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The client facade: wires the five components together and exposes the
//! per-message-type send operations and correlated request/response
//! operations. Directly grounded on the reference `Client` in
//! `ddht.v5_1.client`.

use crate::{
    config::ClientConfig,
    datagram::{self, Datagram},
    dispatcher::Dispatcher,
    endpoint::Endpoint,
    enr::{Enr, NodeDb},
    envelope::{self, InboundEnvelope, OutboundEnvelope},
    error::DispatchError,
    events::{Event, EventBus},
    message::{
        FindNodeMessage, Message, MessageType, PingMessage, PongMessage, RegisterTopicMessage,
        TalkRequestMessage, Topic, TopicQueryMessage,
    },
    node_id::NodeId,
    pool::{self, InboundMessage, OutboundMessage, Pool},
};
use std::sync::{
    atomic::{AtomicBool, AtomicU8, Ordering},
    Arc,
};
use tokio::{net::UdpSocket, sync::Notify};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

/// A single-fire readiness signal: `mark_ready` is safe to call before any
/// caller has started waiting (the common case here, since the socket is
/// already bound by the time `Client::start` returns), unlike a bare
/// `Notify::notify_waiters` which would otherwise be lost.
struct ListenSignal {
    ready: AtomicBool,
    notify: Notify,
}

impl ListenSignal {
    fn new() -> Self {
        Self {
            ready: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    fn mark_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    async fn wait(&self) {
        if self.ready.load(Ordering::SeqCst) {
            return;
        }
        self.notify.notified().await;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ClientState {
    Constructed = 0,
    Listening = 1,
    Running = 2,
    Stopped = 3,
}

impl ClientState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Constructed,
            1 => Self::Listening,
            2 => Self::Running,
            _ => Self::Stopped,
        }
    }
}

/// Owns the running component tasks and exposes the protocol's public
/// surface. State machine: `Constructed -> Listening -> Running -> Stopped`.
pub struct Client {
    local_node_id: NodeId,
    dispatcher: Dispatcher,
    outbound_messages: tokio::sync::mpsc::Sender<OutboundMessage>,
    node_db: Arc<dyn NodeDb>,
    events: EventBus,
    listening: Arc<ListenSignal>,
    cancel: CancellationToken,
    tasks: TaskTracker,
    config: ClientConfig,
    state: Arc<AtomicU8>,
}

impl Client {
    /// Binds the UDP socket and spawns the five pipeline tasks. Resolves
    /// to `Listening` once the socket is bound; callers await
    /// [`Client::wait_listening`] for that signal.
    pub async fn start(
        local_node_id: NodeId,
        node_db: Arc<dyn NodeDb>,
        config: ClientConfig,
    ) -> Result<Self, DispatchError> {
        let socket = UdpSocket::bind::<std::net::SocketAddr>(config.listen_endpoint.into())
            .await
            .map_err(|e| DispatchError::Fatal(format!("socket bind failed: {e}")))?;
        let bound_addr = socket
            .local_addr()
            .map_err(|e| DispatchError::Fatal(format!("local_addr failed: {e}")))?;
        let mut config = config;
        if let std::net::SocketAddr::V4(addr) = bound_addr {
            config.listen_endpoint = Endpoint::from(addr);
        }
        let socket = Arc::new(socket);
        let state = Arc::new(AtomicU8::new(ClientState::Constructed as u8));

        let cancel = CancellationToken::new();
        let tasks = TaskTracker::new();
        let events = EventBus::new(config.channel_capacity);
        let cap = config.channel_capacity;

        let (in_dgram_tx, in_dgram_rx) = tokio::sync::mpsc::channel::<Datagram>(cap);
        let (out_dgram_tx, out_dgram_rx) = tokio::sync::mpsc::channel::<Datagram>(cap);
        let (in_env_tx, in_env_rx) = tokio::sync::mpsc::channel::<InboundEnvelope>(cap);
        let (out_env_tx, out_env_rx) = tokio::sync::mpsc::channel::<OutboundEnvelope>(cap);
        let (in_msg_tx, mut in_msg_rx) = tokio::sync::mpsc::channel::<InboundMessage>(cap);
        let (out_msg_tx, out_msg_rx) = tokio::sync::mpsc::channel::<OutboundMessage>(cap);

        tasks.spawn(datagram::run_receiver(socket.clone(), in_dgram_tx, cancel.clone()));
        tasks.spawn(datagram::run_sender(socket, out_dgram_rx, cancel.clone()));
        tasks.spawn(envelope::run_decoder(
            local_node_id,
            in_dgram_rx,
            in_env_tx,
            events.clone(),
            cancel.clone(),
        ));
        tasks.spawn(envelope::run_encoder(out_env_rx, out_dgram_tx, cancel.clone()));

        let pool = Pool::new(local_node_id, node_db.clone(), events.clone());
        tasks.spawn(pool::run(
            pool,
            in_env_rx,
            in_msg_tx,
            out_msg_rx,
            out_env_tx,
            cancel.clone(),
        ));

        let dispatcher = Dispatcher::new(out_msg_tx.clone(), config.request_timeout, events.clone());
        let route_dispatcher = dispatcher.clone();
        tasks.spawn(async move {
            while let Some(inbound) = in_msg_rx.recv().await {
                route_dispatcher.route_inbound(inbound).await;
            }
        });

        let listening = Arc::new(ListenSignal::new());
        state.store(ClientState::Listening as u8, Ordering::SeqCst);
        listening.mark_ready();
        events.emit(Event::Listening {
            endpoint: config.listen_endpoint,
        });
        // Every pipeline task is spawned and the socket is bound: the
        // client is immediately able to serve requests.
        state.store(ClientState::Running as u8, Ordering::SeqCst);

        Ok(Self {
            local_node_id,
            dispatcher,
            outbound_messages: out_msg_tx,
            node_db,
            events,
            listening,
            cancel,
            tasks,
            config,
            state,
        })
    }

    pub async fn wait_listening(&self) {
        self.listening.wait().await;
    }

    pub fn state(&self) -> ClientState {
        ClientState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn local_node_id(&self) -> NodeId {
        self.local_node_id
    }

    pub fn local_endpoint(&self) -> Endpoint {
        self.config.listen_endpoint
    }

    pub fn node_db(&self) -> &Arc<dyn NodeDb> {
        &self.node_db
    }

    /// Registers a handler for unsolicited inbound `Ping` requests.
    pub fn add_ping_handler(&self) -> crate::dispatcher::HandlerSubscription {
        self.dispatcher
            .add_request_handler(MessageType::Ping, self.config.channel_capacity)
    }

    /// Registers a handler for unsolicited inbound `FindNode` requests.
    pub fn add_find_node_handler(&self) -> crate::dispatcher::HandlerSubscription {
        self.dispatcher
            .add_request_handler(MessageType::FindNode, self.config.channel_capacity)
    }

    /// Cancels every child task and marks the client `Stopped`. Open
    /// subscriptions observe their channel close and fail with
    /// `Cancelled`.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        self.tasks.close();
        self.tasks.wait().await;
        self.state.store(ClientState::Stopped as u8, Ordering::SeqCst);
    }

    fn endpoint_for(&self, node_id: &NodeId) -> Endpoint {
        self.node_db
            .get_endpoint(node_id)
            .unwrap_or(self.config.listen_endpoint)
    }

    pub async fn send_ping(&self, peer: NodeId, request_id: u64, enr_seq: u64) -> Result<(), DispatchError> {
        self.dispatcher
            .send_message(OutboundMessage {
                message: Message::Ping(PingMessage { request_id, enr_seq }),
                receiver_endpoint: self.endpoint_for(&peer),
                receiver_node_id: peer,
            })
            .await
    }

    pub async fn send_pong(
        &self,
        peer: NodeId,
        request_id: u64,
        enr_seq: u64,
        packet_ip: std::net::Ipv4Addr,
        packet_port: u16,
    ) -> Result<(), DispatchError> {
        self.dispatcher
            .send_message(OutboundMessage {
                message: Message::Pong(PongMessage {
                    request_id,
                    enr_seq,
                    packet_ip,
                    packet_port,
                }),
                receiver_endpoint: self.endpoint_for(&peer),
                receiver_node_id: peer,
            })
            .await
    }

    pub async fn send_talk_response(
        &self,
        peer: NodeId,
        request_id: u64,
        response: Vec<u8>,
    ) -> Result<(), DispatchError> {
        self.dispatcher
            .send_message(OutboundMessage {
                message: Message::TalkResponse(crate::message::TalkResponseMessage {
                    request_id,
                    response,
                }),
                receiver_endpoint: self.endpoint_for(&peer),
                receiver_node_id: peer,
            })
            .await
    }

    /// Sends ENRs matching a `find_nodes` request, fragmenting as needed.
    pub async fn send_found_nodes(
        &self,
        peer: NodeId,
        request_id: u64,
        enrs: Vec<Enr>,
    ) -> Result<usize, DispatchError> {
        self.dispatcher
            .send_found_nodes(
                self.endpoint_for(&peer),
                peer,
                request_id,
                enrs,
                self.config.found_nodes_page_size,
            )
            .await
    }

    /// Correlated ping: sends a Ping and awaits the matching Pong within
    /// this client's configured request timeout.
    pub async fn ping(&self, peer: NodeId, enr_seq: u64) -> Result<PongMessage, DispatchError> {
        let reservation = self.dispatcher.reserve_request_id(peer);
        let request_id = reservation.request_id();
        let mut sub = self
            .dispatcher
            .subscribe_request(
                Message::Ping(PingMessage { request_id, enr_seq }),
                self.endpoint_for(&peer),
                peer,
                MessageType::Pong,
                self.config.channel_capacity,
            )
            .await?;

        let inbound = sub.recv_with_timeout().await?;
        match inbound.message {
            Message::Pong(pong) => Ok(pong),
            _ => Err(DispatchError::ProtocolViolation(
                peer,
                "expected Pong".into(),
            )),
        }
    }

    /// Correlated find_nodes: sends `FindNode` and collects exactly
    /// `total` `FoundNodes` fragments, returning the concatenated ENRs.
    pub async fn find_nodes(&self, peer: NodeId, distances: Vec<u64>) -> Result<Vec<Enr>, DispatchError> {
        let reservation = self.dispatcher.reserve_request_id(peer);
        let request_id = reservation.request_id();
        let mut sub = self
            .dispatcher
            .subscribe_request(
                Message::FindNode(FindNodeMessage { request_id, distances }),
                self.endpoint_for(&peer),
                peer,
                MessageType::FoundNodes,
                self.config.channel_capacity,
            )
            .await?;

        let head = sub.recv_with_timeout().await?;
        let head = match head.message {
            Message::FoundNodes(m) => m,
            _ => return Err(DispatchError::ProtocolViolation(peer, "expected FoundNodes".into())),
        };
        if head.total == 0 {
            return Err(DispatchError::ProtocolViolation(
                peer,
                "FoundNodes total == 0".into(),
            ));
        }

        let mut enrs = head.enrs;
        for _ in 1..head.total {
            let next = sub.recv_with_timeout().await?;
            match next.message {
                Message::FoundNodes(m) => enrs.extend(m.enrs),
                _ => return Err(DispatchError::ProtocolViolation(peer, "expected FoundNodes".into())),
            }
        }
        Ok(enrs)
    }

    /// Correlated talk request/response exchange.
    pub async fn talk(&self, peer: NodeId, protocol: Vec<u8>, request: Vec<u8>) -> Result<Vec<u8>, DispatchError> {
        let reservation = self.dispatcher.reserve_request_id(peer);
        let request_id = reservation.request_id();
        let mut sub = self
            .dispatcher
            .subscribe_request(
                Message::TalkRequest(TalkRequestMessage {
                    request_id,
                    protocol,
                    request,
                }),
                self.endpoint_for(&peer),
                peer,
                MessageType::TalkResponse,
                self.config.channel_capacity,
            )
            .await?;

        let inbound = sub.recv_with_timeout().await?;
        match inbound.message {
            Message::TalkResponse(m) => Ok(m.response),
            _ => Err(DispatchError::ProtocolViolation(peer, "expected TalkResponse".into())),
        }
    }

    /// Correlated topic registration: sends `RegisterTopic` and awaits
    /// either a `Ticket` (retry later) or a `RegistrationConfirmation`.
    pub async fn register_topic(
        &self,
        peer: NodeId,
        topic: Topic,
        enr: Enr,
        ticket: Vec<u8>,
    ) -> Result<Message, DispatchError> {
        let reservation = self.dispatcher.reserve_request_id(peer);
        let request_id = reservation.request_id();
        let message = Message::RegisterTopic(RegisterTopicMessage {
            request_id,
            topic,
            enr,
            ticket,
        });

        let mut sub = self
            .dispatcher
            .subscribe_request(message, self.endpoint_for(&peer), peer, MessageType::Ticket, self.config.channel_capacity)
            .await?;
        let inbound = sub.recv_with_timeout().await?;
        match inbound.message {
            Message::Ticket(_) | Message::RegistrationConfirmation(_) => Ok(inbound.message),
            _ => Err(DispatchError::ProtocolViolation(
                peer,
                "expected Ticket or RegistrationConfirmation".into(),
            )),
        }
    }

    /// Correlated topic query: returns the ENRs advertised under `topic`.
    pub async fn topic_query(&self, peer: NodeId, topic: Topic) -> Result<Vec<Enr>, DispatchError> {
        let reservation = self.dispatcher.reserve_request_id(peer);
        let request_id = reservation.request_id();
        let mut sub = self
            .dispatcher
            .subscribe_request(
                Message::TopicQuery(TopicQueryMessage { request_id, topic }),
                self.endpoint_for(&peer),
                peer,
                MessageType::FoundNodes,
                self.config.channel_capacity,
            )
            .await?;

        let head = sub.recv_with_timeout().await?;
        let head = match head.message {
            Message::FoundNodes(m) => m,
            _ => return Err(DispatchError::ProtocolViolation(peer, "expected FoundNodes".into())),
        };
        if head.total == 0 {
            return Err(DispatchError::ProtocolViolation(
                peer,
                "FoundNodes total == 0".into(),
            ));
        }

        let mut enrs = head.enrs;
        for _ in 1..head.total {
            let next = sub.recv_with_timeout().await?;
            match next.message {
                Message::FoundNodes(m) => enrs.extend(m.enrs),
                _ => return Err(DispatchError::ProtocolViolation(peer, "expected FoundNodes".into())),
            }
        }
        Ok(enrs)
    }

    /// Direct access to the raw outbound-message channel, used by tests
    /// that wire two `Client`s to the same in-memory pipeline.
    pub fn outbound_sender(&self) -> tokio::sync::mpsc::Sender<OutboundMessage> {
        self.outbound_messages.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enr::InMemoryNodeDb;
    use std::net::Ipv4Addr;

    async fn spawn_client(port: u16) -> Client {
        let node_db: Arc<dyn NodeDb> = Arc::new(InMemoryNodeDb::new());
        let config = ClientConfig::new(Endpoint::new(Ipv4Addr::LOCALHOST, port))
            .with_request_timeout(std::time::Duration::from_millis(100));
        Client::start(NodeId::new([port as u8; 32]), node_db, config)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn start_reaches_listening() {
        let client = spawn_client(0).await;
        client.wait_listening().await;
        assert_eq!(client.local_node_id(), NodeId::new([0; 32]));
        assert_eq!(client.state(), ClientState::Running);
        client.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_reaches_stopped() {
        let client = spawn_client(0).await;
        client.wait_listening().await;
        let state = client.state.clone();
        client.shutdown().await;
        assert_eq!(ClientState::from_u8(state.load(Ordering::SeqCst)), ClientState::Stopped);
    }

    #[tokio::test]
    async fn ping_with_no_peer_times_out() {
        let client = spawn_client(0).await;
        client.wait_listening().await;
        let peer = NodeId::new([42; 32]);
        let result = client.ping(peer, 0).await;
        assert!(matches!(result, Err(DispatchError::RequestTimeout(_))));
        client.shutdown().await;
    }
}
