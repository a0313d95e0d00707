// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The ten Discovery v5.1 message variants and their RLP wire encoding.
//!
//! Field order is binding; each variant round-trips
//! through [`Message::to_wire_bytes`] / [`Message::from_wire_bytes`], which
//! dispatch on the leading `message_type` byte the way the reference
//! `v51_registry` keys its codecs.

use crate::enr::Enr;
use rlp::{DecoderError, Rlp, RlpStream};

pub const TOPIC_HASH_SIZE: usize = 32;

pub type RequestId = u64;
pub type Topic = [u8; TOPIC_HASH_SIZE];

/// Discriminator for the ten message variants, keyed the way the external
/// `MessageTypeRegistry` keys wire identifiers 1..=10.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    Ping = 1,
    Pong = 2,
    FindNode = 3,
    FoundNodes = 4,
    TalkRequest = 5,
    TalkResponse = 6,
    RegisterTopic = 7,
    Ticket = 8,
    RegistrationConfirmation = 9,
    TopicQuery = 10,
}

impl MessageType {
    pub fn from_wire_id(id: u8) -> Option<Self> {
        Some(match id {
            1 => Self::Ping,
            2 => Self::Pong,
            3 => Self::FindNode,
            4 => Self::FoundNodes,
            5 => Self::TalkRequest,
            6 => Self::TalkResponse,
            7 => Self::RegisterTopic,
            8 => Self::Ticket,
            9 => Self::RegistrationConfirmation,
            10 => Self::TopicQuery,
            _ => return None,
        })
    }

    pub fn wire_id(self) -> u8 {
        self as u8
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct PingMessage {
    pub request_id: RequestId,
    pub enr_seq: u64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PongMessage {
    pub request_id: RequestId,
    pub enr_seq: u64,
    pub packet_ip: std::net::Ipv4Addr,
    pub packet_port: u16,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FindNodeMessage {
    pub request_id: RequestId,
    pub distances: Vec<u64>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FoundNodesMessage {
    pub request_id: RequestId,
    pub total: u64,
    pub enrs: Vec<Enr>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TalkRequestMessage {
    pub request_id: RequestId,
    pub protocol: Vec<u8>,
    pub request: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TalkResponseMessage {
    pub request_id: RequestId,
    pub response: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RegisterTopicMessage {
    pub request_id: RequestId,
    pub topic: Topic,
    pub enr: Enr,
    pub ticket: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TicketMessage {
    pub request_id: RequestId,
    pub ticket: Vec<u8>,
    pub wait_time: u64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RegistrationConfirmationMessage {
    pub request_id: RequestId,
    pub topic: Topic,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TopicQueryMessage {
    pub request_id: RequestId,
    pub topic: Topic,
}

/// Tagged union over the ten message variants.
#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    Ping(PingMessage),
    Pong(PongMessage),
    FindNode(FindNodeMessage),
    FoundNodes(FoundNodesMessage),
    TalkRequest(TalkRequestMessage),
    TalkResponse(TalkResponseMessage),
    RegisterTopic(RegisterTopicMessage),
    Ticket(TicketMessage),
    RegistrationConfirmation(RegistrationConfirmationMessage),
    TopicQuery(TopicQueryMessage),
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::Ping(_) => MessageType::Ping,
            Self::Pong(_) => MessageType::Pong,
            Self::FindNode(_) => MessageType::FindNode,
            Self::FoundNodes(_) => MessageType::FoundNodes,
            Self::TalkRequest(_) => MessageType::TalkRequest,
            Self::TalkResponse(_) => MessageType::TalkResponse,
            Self::RegisterTopic(_) => MessageType::RegisterTopic,
            Self::Ticket(_) => MessageType::Ticket,
            Self::RegistrationConfirmation(_) => MessageType::RegistrationConfirmation,
            Self::TopicQuery(_) => MessageType::TopicQuery,
        }
    }

    pub fn request_id(&self) -> RequestId {
        match self {
            Self::Ping(m) => m.request_id,
            Self::Pong(m) => m.request_id,
            Self::FindNode(m) => m.request_id,
            Self::FoundNodes(m) => m.request_id,
            Self::TalkRequest(m) => m.request_id,
            Self::TalkResponse(m) => m.request_id,
            Self::RegisterTopic(m) => m.request_id,
            Self::Ticket(m) => m.request_id,
            Self::RegistrationConfirmation(m) => m.request_id,
            Self::TopicQuery(m) => m.request_id,
        }
    }

    /// Encodes `message_type` followed by the RLP-serialized field list.
    pub fn to_wire_bytes(&self) -> Vec<u8> {
        let mut out = vec![self.message_type().wire_id()];
        let mut s = RlpStream::new();
        match self {
            Self::Ping(m) => {
                s.begin_list(2);
                s.append(&m.request_id);
                s.append(&m.enr_seq);
            }
            Self::Pong(m) => {
                s.begin_list(4);
                s.append(&m.request_id);
                s.append(&m.enr_seq);
                s.append(&m.packet_ip.octets().as_slice());
                s.append(&m.packet_port);
            }
            Self::FindNode(m) => {
                s.begin_list(2);
                s.append(&m.request_id);
                s.begin_list(m.distances.len());
                for d in &m.distances {
                    s.append(d);
                }
            }
            Self::FoundNodes(m) => {
                s.begin_list(3);
                s.append(&m.request_id);
                s.append(&m.total);
                s.begin_list(m.enrs.len());
                for enr in &m.enrs {
                    s.append(enr);
                }
            }
            Self::TalkRequest(m) => {
                s.begin_list(3);
                s.append(&m.request_id);
                s.append(&m.protocol);
                s.append(&m.request);
            }
            Self::TalkResponse(m) => {
                s.begin_list(2);
                s.append(&m.request_id);
                s.append(&m.response);
            }
            Self::RegisterTopic(m) => {
                s.begin_list(4);
                s.append(&m.request_id);
                s.append(&m.topic.as_slice());
                s.append(&m.enr);
                s.append(&m.ticket);
            }
            Self::Ticket(m) => {
                s.begin_list(3);
                s.append(&m.request_id);
                s.append(&m.ticket);
                s.append(&m.wait_time);
            }
            Self::RegistrationConfirmation(m) => {
                s.begin_list(2);
                s.append(&m.request_id);
                s.append(&m.topic.as_slice());
            }
            Self::TopicQuery(m) => {
                s.begin_list(2);
                s.append(&m.request_id);
                s.append(&m.topic.as_slice());
            }
        }
        out.extend_from_slice(&s.out());
        out
    }

    pub fn from_wire_bytes(bytes: &[u8]) -> Result<Self, DecoderError> {
        let (&id, payload) = bytes
            .split_first()
            .ok_or(DecoderError::RlpIsTooShort)?;
        let message_type =
            MessageType::from_wire_id(id).ok_or(DecoderError::Custom("unknown message type"))?;
        let rlp = Rlp::new(payload);

        Ok(match message_type {
            MessageType::Ping => Message::Ping(PingMessage {
                request_id: rlp.val_at(0)?,
                enr_seq: rlp.val_at(1)?,
            }),
            MessageType::Pong => {
                let ip: Vec<u8> = rlp.val_at(2)?;
                let ip: [u8; 4] = ip.try_into().map_err(|_| DecoderError::RlpInvalidLength)?;
                Message::Pong(PongMessage {
                    request_id: rlp.val_at(0)?,
                    enr_seq: rlp.val_at(1)?,
                    packet_ip: std::net::Ipv4Addr::from(ip),
                    packet_port: rlp.val_at(3)?,
                })
            }
            MessageType::FindNode => Message::FindNode(FindNodeMessage {
                request_id: rlp.val_at(0)?,
                distances: rlp.list_at(1)?,
            }),
            MessageType::FoundNodes => Message::FoundNodes(FoundNodesMessage {
                request_id: rlp.val_at(0)?,
                total: rlp.val_at(1)?,
                enrs: rlp.list_at(2)?,
            }),
            MessageType::TalkRequest => Message::TalkRequest(TalkRequestMessage {
                request_id: rlp.val_at(0)?,
                protocol: rlp.val_at(1)?,
                request: rlp.val_at(2)?,
            }),
            MessageType::TalkResponse => Message::TalkResponse(TalkResponseMessage {
                request_id: rlp.val_at(0)?,
                response: rlp.val_at(1)?,
            }),
            MessageType::RegisterTopic => {
                let topic: Vec<u8> = rlp.val_at(1)?;
                let topic: Topic = topic
                    .try_into()
                    .map_err(|_| DecoderError::RlpInvalidLength)?;
                Message::RegisterTopic(RegisterTopicMessage {
                    request_id: rlp.val_at(0)?,
                    topic,
                    enr: rlp.val_at(2)?,
                    ticket: rlp.val_at(3)?,
                })
            }
            MessageType::Ticket => Message::Ticket(TicketMessage {
                request_id: rlp.val_at(0)?,
                ticket: rlp.val_at(1)?,
                wait_time: rlp.val_at(2)?,
            }),
            MessageType::RegistrationConfirmation => {
                let topic: Vec<u8> = rlp.val_at(1)?;
                let topic: Topic = topic
                    .try_into()
                    .map_err(|_| DecoderError::RlpInvalidLength)?;
                Message::RegistrationConfirmation(RegistrationConfirmationMessage {
                    request_id: rlp.val_at(0)?,
                    topic,
                })
            }
            MessageType::TopicQuery => {
                let topic: Vec<u8> = rlp.val_at(1)?;
                let topic: Topic = topic
                    .try_into()
                    .map_err(|_| DecoderError::RlpInvalidLength)?;
                Message::TopicQuery(TopicQueryMessage {
                    request_id: rlp.val_at(0)?,
                    topic,
                })
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enr::SigningKey;
    use crate::endpoint::Endpoint;
    use std::net::Ipv4Addr;

    #[test]
    fn ping_pong_round_trip() {
        let ping = Message::Ping(PingMessage {
            request_id: 42,
            enr_seq: 7,
        });
        let bytes = ping.to_wire_bytes();
        assert_eq!(Message::from_wire_bytes(&bytes).unwrap(), ping);

        let pong = Message::Pong(PongMessage {
            request_id: 42,
            enr_seq: 7,
            packet_ip: Ipv4Addr::new(1, 2, 3, 4),
            packet_port: 9000,
        });
        let bytes = pong.to_wire_bytes();
        assert_eq!(Message::from_wire_bytes(&bytes).unwrap(), pong);
    }

    #[test]
    fn found_nodes_round_trip_with_enrs() {
        let key = SigningKey::from_bytes([4; 32]);
        let enr = Enr::sign(&key, 1, Endpoint::new(Ipv4Addr::new(10, 0, 0, 1), 30303));
        let found = Message::FoundNodes(FoundNodesMessage {
            request_id: 7,
            total: 1,
            enrs: vec![enr],
        });
        let bytes = found.to_wire_bytes();
        assert_eq!(Message::from_wire_bytes(&bytes).unwrap(), found);
    }

    #[test]
    fn unknown_message_type_is_rejected() {
        let bytes = vec![99, 0xc0];
        assert!(Message::from_wire_bytes(&bytes).is_err());
    }

    #[test]
    fn message_type_and_request_id_accessors() {
        let m = Message::TopicQuery(TopicQueryMessage {
            request_id: 5,
            topic: [9; TOPIC_HASH_SIZE],
        });
        assert_eq!(m.message_type(), MessageType::TopicQuery);
        assert_eq!(m.request_id(), 5);
    }
}
