// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Client core for the Discovery v5.1 peer-to-peer protocol.
//!
//! Five long-lived components move datagrams through typed, back-pressured
//! channels: [`datagram`] (socket I/O), [`envelope`] (packet codec),
//! [`pool`] (session state and handshakes), [`dispatcher`] (request
//! correlation, subscriptions, fragmentation, timeouts), and [`client`]
//! (the public facade wiring the rest together).

pub mod client;
pub mod config;
pub mod datagram;
pub mod dispatcher;
pub mod endpoint;
pub mod enr;
pub mod envelope;
pub mod error;
pub mod events;
pub mod message;
pub mod node_id;
pub mod packet;
pub mod pool;
pub mod session;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use client::{Client, ClientState};
pub use config::ClientConfig;
pub use endpoint::Endpoint;
pub use enr::Enr;
pub use error::{DispatchError, PoolError};
pub use node_id::NodeId;
