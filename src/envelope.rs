// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The packet codec stage, directly grounded on the reference
//! `PacketDecoder`/`PacketEncoder` `@as_service` pair: read a channel,
//! transform one item, write the next channel, discard and log on
//! failure rather than propagating.

use crate::{
    datagram::Datagram,
    endpoint::Endpoint,
    events::{Event, EventBus},
    node_id::NodeId,
    packet::{self, Packet},
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Debug)]
pub struct InboundEnvelope {
    pub packet: Packet,
    pub sender_endpoint: Endpoint,
}

#[derive(Clone, Debug)]
pub struct OutboundEnvelope {
    pub packet: Packet,
    pub receiver_endpoint: Endpoint,
}

/// Consumes inbound datagrams, decodes them via the packet oracle, and
/// forwards valid envelopes. A decode failure is logged and the datagram
/// discarded; it never reaches the session pool.
pub async fn run_decoder(
    local_node_id: NodeId,
    mut inbound: mpsc::Receiver<Datagram>,
    out: mpsc::Sender<InboundEnvelope>,
    events: EventBus,
    cancel: CancellationToken,
) {
    loop {
        let datagram = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            datagram = inbound.recv() => match datagram {
                Some(d) => d,
                None => return,
            },
        };

        match packet::decode_packet(&datagram.bytes, &local_node_id) {
            Ok(packet) => {
                let envelope = InboundEnvelope {
                    packet,
                    sender_endpoint: datagram.endpoint,
                };
                if out.send(envelope).await.is_err() {
                    return;
                }
            }
            Err(e) => {
                tracing::warn!(action = "packet_discarded", endpoint = ?datagram.endpoint, error = %e);
                events.emit(Event::PacketDiscarded {
                    reason: e.to_string(),
                });
            }
        }
    }
}

/// Symmetric to [`run_decoder`]: encoding is assumed infallible for
/// well-formed packets produced internally, so there is no discard path
/// here: a failure would be a programming fault.
pub async fn run_encoder(
    mut inbound: mpsc::Receiver<OutboundEnvelope>,
    out: mpsc::Sender<Datagram>,
    cancel: CancellationToken,
) {
    loop {
        let envelope = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            envelope = inbound.recv() => match envelope {
                Some(e) => e,
                None => return,
            },
        };

        let datagram = Datagram {
            bytes: envelope.packet.to_wire_bytes(),
            endpoint: envelope.receiver_endpoint,
        };
        if out.send(datagram).await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[tokio::test]
    async fn decoder_forwards_valid_packets_and_drops_invalid() {
        let local = NodeId::new([0; 32]);
        let (dgram_tx, dgram_rx) = mpsc::channel(8);
        let (env_tx, mut env_rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let events = EventBus::new(16);
        let handle = tokio::spawn(run_decoder(local, dgram_rx, env_tx, events, cancel.clone()));

        let endpoint = Endpoint::new(Ipv4Addr::new(1, 1, 1, 1), 30303);
        let packet = Packet::Ordinary {
            sender_node_id: NodeId::new([5; 32]),
            ciphertext: vec![1, 2, 3],
        };
        dgram_tx
            .send(Datagram {
                bytes: packet.to_wire_bytes(),
                endpoint,
            })
            .await
            .unwrap();
        dgram_tx
            .send(Datagram {
                bytes: vec![0xff],
                endpoint,
            })
            .await
            .unwrap();

        let envelope = env_rx.recv().await.unwrap();
        assert_eq!(envelope.packet, packet);

        drop(dgram_tx);
        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn encoder_serializes_outbound_envelopes() {
        let (env_tx, env_rx) = mpsc::channel(8);
        let (dgram_tx, mut dgram_rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_encoder(env_rx, dgram_tx, cancel.clone()));

        let endpoint = Endpoint::new(Ipv4Addr::new(2, 2, 2, 2), 9000);
        let packet = Packet::WhoAreYou {
            sender_node_id: NodeId::new([1; 32]),
            id_nonce: [3; 16],
        };
        env_tx
            .send(OutboundEnvelope {
                packet: packet.clone(),
                receiver_endpoint: endpoint,
            })
            .await
            .unwrap();

        let datagram = dgram_rx.recv().await.unwrap();
        assert_eq!(datagram.bytes, packet.to_wire_bytes());

        drop(env_tx);
        cancel.cancel();
        handle.await.unwrap();
    }
}
