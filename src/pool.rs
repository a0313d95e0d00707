// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The session pool: sole owner of the `NodeID -> Session` map, driving
//! handshakes and turning envelopes into messages and back. Grounded on
//! `path::secret::map` (single-owner session map) and the `Pool` wiring
//! pattern it follows.

use crate::{
    enr::NodeDb,
    envelope::{InboundEnvelope, OutboundEnvelope},
    error::PoolError,
    events::{Event, EventBus},
    message::Message,
    node_id::NodeId,
    packet::Packet,
    session::{Session, SessionSecret, SessionState},
};
use std::{collections::HashMap, sync::Arc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub struct InboundMessage {
    pub message: Message,
    pub sender_endpoint: crate::endpoint::Endpoint,
    pub sender_node_id: NodeId,
}

pub struct OutboundMessage {
    pub message: Message,
    pub receiver_endpoint: crate::endpoint::Endpoint,
    pub receiver_node_id: NodeId,
}

pub struct Pool {
    local_node_id: NodeId,
    node_db: Arc<dyn NodeDb>,
    sessions: HashMap<NodeId, Session>,
    events: EventBus,
}

impl Pool {
    pub fn new(local_node_id: NodeId, node_db: Arc<dyn NodeDb>, events: EventBus) -> Self {
        Self {
            local_node_id,
            node_db,
            sessions: HashMap::new(),
            events,
        }
    }

    /// Handles one inbound envelope: attempt decryption under the matching
    /// session, or progress a handshake for `whoareyou`/`handshake`
    /// packets.
    fn handle_inbound(
        &mut self,
        envelope: InboundEnvelope,
        out_messages: &mut Vec<InboundMessage>,
        out_envelopes: &mut Vec<OutboundEnvelope>,
    ) {
        let sender_node_id = envelope.packet.sender_node_id();

        match envelope.packet {
            Packet::Ordinary { ciphertext, .. } => {
                let Some(session) = self.sessions.get_mut(&sender_node_id) else {
                    let err = PoolError::NoSession(sender_node_id);
                    tracing::debug!(action = "session_mismatch", sender = ?sender_node_id, error = %err);
                    self.events.emit(Event::SessionMismatch {
                        node_id: sender_node_id,
                        reason: err.to_string(),
                    });
                    return;
                };
                let Some(plaintext) = session.open(&ciphertext) else {
                    let err = PoolError::HandshakeFailed(sender_node_id, "decryption failed".into());
                    tracing::debug!(action = "session_mismatch", sender = ?sender_node_id, error = %err);
                    self.events.emit(Event::SessionMismatch {
                        node_id: sender_node_id,
                        reason: err.to_string(),
                    });
                    return;
                };
                session.update_endpoint(envelope.sender_endpoint);
                match Message::from_wire_bytes(&plaintext) {
                    Ok(message) => out_messages.push(InboundMessage {
                        message,
                        sender_endpoint: envelope.sender_endpoint,
                        sender_node_id,
                    }),
                    Err(e) => {
                        tracing::warn!(action = "message_decode_failed", error = %e);
                        self.events.emit(Event::PacketDiscarded {
                            reason: format!("message decode failed: {e}"),
                        });
                    }
                }
            }
            Packet::WhoAreYou { .. } => {
                // The peer is challenging us to start a session. Become the
                // responder: establish our side immediately and answer with
                // a handshake completion so the initiator can establish too.
                let session = self
                    .sessions
                    .entry(sender_node_id)
                    .or_insert_with(|| Session::responding(sender_node_id, envelope.sender_endpoint));
                session.state = SessionState::Responding;
                session.update_endpoint(envelope.sender_endpoint);

                // Handshake completion is an external cryptographic concern;
                // this installs a deterministic placeholder secret so the
                // plumbing above and below can be exercised end to end.
                let secret = derive_placeholder_secret(&self.local_node_id, &sender_node_id);
                session.establish(secret);
                self.events.emit(Event::HandshakeComplete { node_id: sender_node_id });

                out_envelopes.push(OutboundEnvelope {
                    packet: Packet::Handshake {
                        sender_node_id: self.local_node_id,
                        ciphertext: Vec::new(),
                    },
                    receiver_endpoint: session.endpoint,
                });

                for message in session.drain_pending() {
                    if let Some(ciphertext) = session.seal(&message.to_wire_bytes()) {
                        out_envelopes.push(OutboundEnvelope {
                            packet: Packet::Ordinary {
                                sender_node_id: self.local_node_id,
                                ciphertext,
                            },
                            receiver_endpoint: session.endpoint,
                        });
                    }
                }
            }
            Packet::Handshake { ciphertext, .. } => {
                // The peer we challenged has answered: establish our
                // (initiating) side of the session and flush anything we
                // buffered while waiting.
                let session = self
                    .sessions
                    .entry(sender_node_id)
                    .or_insert_with(|| Session::responding(sender_node_id, envelope.sender_endpoint));
                let secret = derive_placeholder_secret(&self.local_node_id, &sender_node_id);
                session.establish(secret);
                session.update_endpoint(envelope.sender_endpoint);
                self.events.emit(Event::HandshakeComplete { node_id: sender_node_id });

                for message in session.drain_pending() {
                    if let Some(ciphertext) = session.seal(&message.to_wire_bytes()) {
                        out_envelopes.push(OutboundEnvelope {
                            packet: Packet::Ordinary {
                                sender_node_id: self.local_node_id,
                                ciphertext,
                            },
                            receiver_endpoint: session.endpoint,
                        });
                    }
                }

                if !ciphertext.is_empty() {
                    if let Some(plaintext) = session.open(&ciphertext) {
                        if let Ok(message) = Message::from_wire_bytes(&plaintext) {
                            out_messages.push(InboundMessage {
                                message,
                                sender_endpoint: envelope.sender_endpoint,
                                sender_node_id,
                            });
                        }
                    }
                }
            }
        }
    }

    /// Handles one outbound message: encrypt and send immediately if the
    /// session is established, otherwise buffer and (re)start a handshake.
    fn handle_outbound(&mut self, outbound: OutboundMessage, out_envelopes: &mut Vec<OutboundEnvelope>) {
        let endpoint = self
            .node_db
            .get_endpoint(&outbound.receiver_node_id)
            .unwrap_or(outbound.receiver_endpoint);

        let is_new = !self.sessions.contains_key(&outbound.receiver_node_id);
        let session = self
            .sessions
            .entry(outbound.receiver_node_id)
            .or_insert_with(|| Session::initiating(outbound.receiver_node_id, endpoint));
        if is_new {
            self.events.emit(Event::SessionCreated {
                node_id: outbound.receiver_node_id,
            });
        }
        session.update_endpoint(endpoint);

        if session.is_established() {
            if let Some(ciphertext) = session.seal(&outbound.message.to_wire_bytes()) {
                out_envelopes.push(OutboundEnvelope {
                    packet: Packet::Ordinary {
                        sender_node_id: self.local_node_id,
                        ciphertext,
                    },
                    receiver_endpoint: session.endpoint,
                });
            }
            return;
        }

        session.buffer(outbound.message);
        if session.state == SessionState::Initiating {
            out_envelopes.push(OutboundEnvelope {
                packet: Packet::WhoAreYou {
                    sender_node_id: self.local_node_id,
                    id_nonce: placeholder_nonce(&outbound.receiver_node_id),
                },
                receiver_endpoint: session.endpoint,
            });
        }
    }

    pub fn session_state(&self, node_id: &NodeId) -> Option<SessionState> {
        self.sessions.get(node_id).map(|s| s.state)
    }

    /// Terminates every live session and emits `session_terminated` for
    /// each, run once when the Pool task observes cancellation.
    fn terminate_all(&mut self, reason: &str) {
        for session in self.sessions.values_mut() {
            if session.state == SessionState::Terminated {
                continue;
            }
            session.terminate();
            self.events.emit(Event::SessionTerminated {
                node_id: session.peer_node_id,
                reason: reason.to_string(),
            });
        }
    }
}

fn derive_placeholder_secret(a: &NodeId, b: &NodeId) -> SessionSecret {
    let mut out = [0u8; 32];
    for (o, (x, y)) in out.iter_mut().zip(a.as_bytes().iter().zip(b.as_bytes().iter())) {
        *o = x ^ y;
    }
    SessionSecret::new(out)
}

fn placeholder_nonce(node_id: &NodeId) -> [u8; 16] {
    let mut out = [0u8; 16];
    out.copy_from_slice(&node_id.as_bytes()[..16]);
    out
}

/// Drives the Pool as a single task: the sole owner of the session map, so
/// no lock is required even on a multi-threaded runtime.
pub async fn run(
    mut pool: Pool,
    mut in_envelopes: mpsc::Receiver<InboundEnvelope>,
    out_messages: mpsc::Sender<InboundMessage>,
    mut in_messages: mpsc::Receiver<OutboundMessage>,
    out_envelopes: mpsc::Sender<OutboundEnvelope>,
    cancel: CancellationToken,
) {
    loop {
        let mut pending_messages = Vec::new();
        let mut pending_envelopes = Vec::new();

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                pool.terminate_all("cancelled");
                return;
            }
            envelope = in_envelopes.recv() => match envelope {
                Some(envelope) => pool.handle_inbound(envelope, &mut pending_messages, &mut pending_envelopes),
                None => return,
            },
            outbound = in_messages.recv() => match outbound {
                Some(outbound) => pool.handle_outbound(outbound, &mut pending_envelopes),
                None => return,
            },
        }

        for message in pending_messages {
            if out_messages.send(message).await.is_err() {
                return;
            }
        }
        for envelope in pending_envelopes {
            if out_envelopes.send(envelope).await.is_err() {
                return;
            }
        }
    }
}
