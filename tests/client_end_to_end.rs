// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! End-to-end scenarios run over real loopback UDP sockets: two `Client`s
//! exchanging datagrams, exercising the full
//! datagram -> envelope -> session -> dispatcher pipeline.

use discv5_core::{
    client::Client,
    config::ClientConfig,
    enr::{Enr, InMemoryNodeDb, NodeDb, SigningKey},
    endpoint::Endpoint,
};
use std::{net::Ipv4Addr, sync::Arc, time::Duration};

async fn spawn_client(seed: u8) -> (Client, Enr) {
    let key = SigningKey::from_bytes([seed; 32]);
    let endpoint = Endpoint::new(Ipv4Addr::LOCALHOST, 0);
    let enr = Enr::sign(&key, 1, endpoint);
    let node_db: Arc<dyn NodeDb> = Arc::new(InMemoryNodeDb::new());
    let config = ClientConfig::new(endpoint).with_request_timeout(Duration::from_secs(2));
    let client = Client::start(enr.node_id(), node_db, config).await.unwrap();
    client.wait_listening().await;
    // Re-sign with the OS-assigned bound port, since `endpoint` above still
    // carries the requested port 0.
    let enr = Enr::sign(&key, 1, client.local_endpoint());
    (client, enr)
}

fn link(a: &Client, a_enr: &Enr, b: &Client, b_enr: &Enr) {
    // Each side's NodeDB must resolve the other's real bound endpoint.
    a_node_db_insert(a, b_enr.clone());
    a_node_db_insert(b, a_enr.clone());
}

fn a_node_db_insert(client: &Client, enr: Enr) {
    client.node_db().set_enr(enr);
}

#[tokio::test]
async fn request_response_round_trip() {
    let (a, a_enr) = spawn_client(1).await;
    let (b, b_enr) = spawn_client(2).await;
    link(&a, &a_enr, &b, &b_enr);

    let b_node_id = b.local_node_id();
    let mut handler = b.add_ping_handler();

    let responder = tokio::spawn(async move {
        let inbound = handler.recv().await.unwrap();
        let request_id = inbound.message.request_id();
        b.send_pong(inbound.sender_node_id, request_id, 0, Ipv4Addr::LOCALHOST, 9000)
            .await
            .unwrap();
        b
    });

    let pong = a.ping(b_node_id, 0).await.unwrap();
    assert_eq!(pong.enr_seq, 0);

    let b = responder.await.unwrap();
    a.shutdown().await;
    b.shutdown().await;
}

#[tokio::test]
async fn request_id_collision_is_avoided_across_concurrent_pings() {
    let (a, a_enr) = spawn_client(3).await;
    let (b, b_enr) = spawn_client(4).await;
    link(&a, &a_enr, &b, &b_enr);

    let b_node_id = b.local_node_id();
    let mut handler = b.add_ping_handler();

    let responder = tokio::spawn(async move {
        for _ in 0..2 {
            let inbound = handler.recv().await.unwrap();
            let request_id = inbound.message.request_id();
            b.send_pong(inbound.sender_node_id, request_id, 0, Ipv4Addr::LOCALHOST, 9000)
                .await
                .unwrap();
        }
        b
    });

    let (first, second) = tokio::join!(a.ping(b_node_id, 0), a.ping(b_node_id, 0));
    assert!(first.is_ok());
    assert!(second.is_ok());

    let b = responder.await.unwrap();
    a.shutdown().await;
    b.shutdown().await;
}

#[tokio::test]
async fn found_nodes_fragmentation_round_trips_all_enrs() {
    let (a, a_enr) = spawn_client(5).await;
    let (b, b_enr) = spawn_client(6).await;
    link(&a, &a_enr, &b, &b_enr);

    let b_node_id = b.local_node_id();
    let mut handler = b.add_find_node_handler();

    let enrs: Vec<Enr> = (0..20)
        .map(|i| {
            let key = SigningKey::from_bytes([(100 + i) as u8; 32]);
            Enr::sign(&key, i as u64, Endpoint::new(Ipv4Addr::new(10, 0, 0, i as u8), 9000))
        })
        .collect();
    let expected = enrs.clone();

    let responder = tokio::spawn(async move {
        let inbound = handler.recv().await.unwrap();
        let request_id = inbound.message.request_id();
        b.send_found_nodes(inbound.sender_node_id, request_id, enrs)
            .await
            .unwrap();
        b
    });

    let received = a.find_nodes(b_node_id, vec![0]).await.unwrap();
    assert_eq!(received, expected);

    let b = responder.await.unwrap();
    a.shutdown().await;
    b.shutdown().await;
}

#[tokio::test]
async fn malformed_datagram_is_discarded_without_affecting_sessions() {
    let (a, a_enr) = spawn_client(7).await;
    let (b, b_enr) = spawn_client(8).await;
    link(&a, &a_enr, &b, &b_enr);

    let mut events = b.events().subscribe();

    let socket = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
    socket
        .send_to(&[0xff, 0xff], std::net::SocketAddr::from(b.local_endpoint()))
        .await
        .unwrap();

    let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(event, discv5_core::events::Event::PacketDiscarded { .. }));

    // The established pipeline is unaffected: a normal ping still round-trips.
    let b_node_id = b.local_node_id();
    let mut handler = b.add_ping_handler();
    let responder = tokio::spawn(async move {
        let inbound = handler.recv().await.unwrap();
        let request_id = inbound.message.request_id();
        b.send_pong(inbound.sender_node_id, request_id, 0, Ipv4Addr::LOCALHOST, 9000)
            .await
            .unwrap();
        b
    });
    assert!(a.ping(b_node_id, 0).await.is_ok());

    let b = responder.await.unwrap();
    a.shutdown().await;
    b.shutdown().await;
}
