// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Per-peer authenticated channel state, grounded on the `path::secret`
//! state machine: a small set of named states, secrets that zero on
//! drop, and directional nonce counters that only ever increase.

use crate::{endpoint::Endpoint, message::Message, node_id::NodeId};
use std::collections::VecDeque;
use zeroize::Zeroize;

/// Handshake secrets. Zeroized on drop, following the use of `zeroize`
/// for path secrets: these bytes are not real AEAD keys (key derivation
/// is an external concern) but are treated with the same care.
#[derive(Clone, Zeroize)]
#[zeroize(drop)]
pub struct SessionSecret([u8; 32]);

impl SessionSecret {
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

/// Per-peer bound on how many outbound messages are held while a handshake
/// is in flight; the oldest is dropped on overflow.
pub const PENDING_QUEUE_CAPACITY: usize = 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Initiating,
    Responding,
    Established,
    Terminated,
}

/// Authenticated channel to one peer. At most one non-Terminated session
/// per peer lives in the Pool's map at a time.
pub struct Session {
    pub peer_node_id: NodeId,
    pub endpoint: Endpoint,
    pub state: SessionState,
    secret: Option<SessionSecret>,
    send_nonce: u64,
    recv_nonce: u64,
    pending: VecDeque<Message>,
}

impl Session {
    pub fn initiating(peer_node_id: NodeId, endpoint: Endpoint) -> Self {
        Self {
            peer_node_id,
            endpoint,
            state: SessionState::Initiating,
            secret: None,
            send_nonce: 0,
            recv_nonce: 0,
            pending: VecDeque::new(),
        }
    }

    pub fn responding(peer_node_id: NodeId, endpoint: Endpoint) -> Self {
        Self {
            state: SessionState::Responding,
            ..Self::initiating(peer_node_id, endpoint)
        }
    }

    pub fn is_established(&self) -> bool {
        self.state == SessionState::Established
    }

    /// Installs the negotiated secret and transitions to `Established`.
    /// Keys are installed exactly once: a session already `Established` is
    /// left untouched.
    pub fn establish(&mut self, secret: SessionSecret) {
        if self.state == SessionState::Established {
            return;
        }
        self.secret = Some(secret);
        self.state = SessionState::Established;
    }

    pub fn terminate(&mut self) {
        self.state = SessionState::Terminated;
        self.secret = None;
        self.pending.clear();
    }

    pub fn update_endpoint(&mut self, endpoint: Endpoint) {
        self.endpoint = endpoint;
    }

    /// Buffers a message while the handshake is outstanding; drops the
    /// oldest entry on overflow rather than blocking the Pool task.
    pub fn buffer(&mut self, message: Message) {
        if self.pending.len() >= PENDING_QUEUE_CAPACITY {
            self.pending.pop_front();
        }
        self.pending.push_back(message);
    }

    pub fn drain_pending(&mut self) -> Vec<Message> {
        self.pending.drain(..).collect()
    }

    /// Placeholder AEAD: not a real cipher (cryptographic primitives are
    /// out of scope), just a keyed, order-sensitive transform sufficient to
    /// exercise the session/pool plumbing end to end.
    pub fn seal(&mut self, plaintext: &[u8]) -> Option<Vec<u8>> {
        let secret = self.secret.as_ref()?;
        let nonce = self.send_nonce;
        self.send_nonce += 1;
        Some(xor_with_nonce(&secret.0, nonce, plaintext))
    }

    pub fn open(&mut self, ciphertext: &[u8]) -> Option<Vec<u8>> {
        let secret = self.secret.as_ref()?;
        let nonce = self.recv_nonce;
        self.recv_nonce += 1;
        Some(xor_with_nonce(&secret.0, nonce, ciphertext))
    }
}

fn xor_with_nonce(key: &[u8; 32], nonce: u64, data: &[u8]) -> Vec<u8> {
    let nonce_bytes = nonce.to_be_bytes();
    data.iter()
        .enumerate()
        .map(|(i, b)| b ^ key[i % key.len()] ^ nonce_bytes[i % nonce_bytes.len()])
        .collect()
}
