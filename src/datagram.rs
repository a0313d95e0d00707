// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The outermost pipeline stage: moving bytes between a UDP socket and the
//! bounded datagram channels.

use crate::endpoint::Endpoint;
use std::sync::Arc;
use tokio::{net::UdpSocket, sync::mpsc};
use tokio_util::sync::CancellationToken;

/// Maximum payload this crate reads/writes per datagram; larger inbound
/// datagrams are truncated by the kernel before we ever see them.
pub const MAX_DATAGRAM_SIZE: usize = 1280;

#[derive(Clone, Debug)]
pub struct Datagram {
    pub bytes: Vec<u8>,
    pub endpoint: Endpoint,
}

/// Reads datagrams off the socket and publishes them to `out`. Terminates
/// when the socket is closed or `cancel` fires.
pub async fn run_receiver(
    socket: Arc<UdpSocket>,
    out: mpsc::Sender<Datagram>,
    cancel: CancellationToken,
) {
    let mut buf = [0u8; MAX_DATAGRAM_SIZE];
    loop {
        let recv = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!(action = "receiver_cancelled");
                return;
            }
            recv = socket.recv_from(&mut buf) => recv,
        };

        match recv {
            Ok((len, source)) => {
                let endpoint = match source {
                    std::net::SocketAddr::V4(addr) => Endpoint::from(addr),
                    std::net::SocketAddr::V6(_) => {
                        tracing::warn!(action = "discard_ipv6_source");
                        continue;
                    }
                };
                let datagram = Datagram {
                    bytes: buf[..len].to_vec(),
                    endpoint,
                };
                if out.send(datagram).await.is_err() {
                    tracing::debug!(action = "receiver_channel_closed");
                    return;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => continue,
            Err(e) => {
                tracing::error!(action = "receiver_socket_closed", error = %e);
                return;
            }
        }
    }
}

/// Reads outbound datagrams from `inbound` and writes them to the socket.
/// A send failure is logged and the datagram dropped, matching UDP's
/// unreliable-by-contract delivery: retransmission is the dispatcher's job.
pub async fn run_sender(
    socket: Arc<UdpSocket>,
    mut inbound: mpsc::Receiver<Datagram>,
    cancel: CancellationToken,
) {
    loop {
        let datagram = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!(action = "sender_cancelled");
                return;
            }
            datagram = inbound.recv() => match datagram {
                Some(d) => d,
                None => {
                    tracing::debug!(action = "sender_channel_closed");
                    return;
                }
            },
        };

        let addr: std::net::SocketAddr = datagram.endpoint.into();
        if let Err(e) = socket.send_to(&datagram.bytes, addr).await {
            tracing::warn!(action = "datagram_send_failed", endpoint = ?datagram.endpoint, error = %e);
        }
    }
}
