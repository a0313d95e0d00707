// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The v5.1 handshake packet layer.
//!
//! The real protocol's packet layout (masking, AES-GCM framing of the
//! ordinary/whoareyou/handshake variants) is an external concern; this
//! module models it as an oracle instead:
//! `decode_packet`/`to_wire_bytes` round-trip a [`Packet`] through bytes
//! without re-deriving the real protocol's cryptography.

use crate::node_id::NodeId;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("datagram too short")]
    TooShort,
    #[error("unrecognized packet tag {0}")]
    UnrecognizedTag(u8),
    #[error("sender node id does not match the addressed session")]
    SenderMismatch,
}

/// A decrypted (but not yet dispatcher-routed) handshake packet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Packet {
    /// An ordinary, already-authenticated message payload.
    Ordinary {
        sender_node_id: NodeId,
        ciphertext: Vec<u8>,
    },
    /// A challenge inviting the recipient to start or resume a handshake.
    WhoAreYou {
        sender_node_id: NodeId,
        id_nonce: [u8; 16],
    },
    /// A handshake completion carrying the initiator's identity proof plus
    /// the first authenticated message.
    Handshake {
        sender_node_id: NodeId,
        ciphertext: Vec<u8>,
    },
}

impl Packet {
    pub fn sender_node_id(&self) -> NodeId {
        match self {
            Self::Ordinary { sender_node_id, .. }
            | Self::WhoAreYou { sender_node_id, .. }
            | Self::Handshake { sender_node_id, .. } => *sender_node_id,
        }
    }

    const TAG_ORDINARY: u8 = 0;
    const TAG_WHOAREYOU: u8 = 1;
    const TAG_HANDSHAKE: u8 = 2;

    /// Serializes this packet to its wire form: `local_node_id` is the
    /// same parameter the external handshake layer would use to derive its
    /// masking key; it is not needed by this stand-in codec but kept on the
    /// encode path's sibling decode function to document the real
    /// contract's shape.
    pub fn to_wire_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        match self {
            Self::Ordinary {
                sender_node_id,
                ciphertext,
            } => {
                out.push(Self::TAG_ORDINARY);
                out.extend_from_slice(sender_node_id.as_bytes());
                out.extend_from_slice(ciphertext);
            }
            Self::WhoAreYou {
                sender_node_id,
                id_nonce,
            } => {
                out.push(Self::TAG_WHOAREYOU);
                out.extend_from_slice(sender_node_id.as_bytes());
                out.extend_from_slice(id_nonce);
            }
            Self::Handshake {
                sender_node_id,
                ciphertext,
            } => {
                out.push(Self::TAG_HANDSHAKE);
                out.extend_from_slice(sender_node_id.as_bytes());
                out.extend_from_slice(ciphertext);
            }
        }
        out
    }
}

/// Parses a datagram into a [`Packet`]. `_local_node_id` mirrors the real
/// oracle's signature (masking is keyed off the recipient); this stand-in
/// does not need it since it performs no cryptographic unmasking.
pub fn decode_packet(bytes: &[u8], _local_node_id: &NodeId) -> Result<Packet, ValidationError> {
    if bytes.len() < 1 + NodeId::LEN {
        return Err(ValidationError::TooShort);
    }
    let (&tag, rest) = bytes.split_first().unwrap();
    let (id_bytes, payload) = rest.split_at(NodeId::LEN);
    let sender_node_id = NodeId::new(id_bytes.try_into().unwrap());

    match tag {
        Packet::TAG_ORDINARY => Ok(Packet::Ordinary {
            sender_node_id,
            ciphertext: payload.to_vec(),
        }),
        Packet::TAG_WHOAREYOU => {
            if payload.len() != 16 {
                return Err(ValidationError::TooShort);
            }
            let mut id_nonce = [0u8; 16];
            id_nonce.copy_from_slice(payload);
            Ok(Packet::WhoAreYou {
                sender_node_id,
                id_nonce,
            })
        }
        Packet::TAG_HANDSHAKE => Ok(Packet::Handshake {
            sender_node_id,
            ciphertext: payload.to_vec(),
        }),
        other => Err(ValidationError::UnrecognizedTag(other)),
    }
}
