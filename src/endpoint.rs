// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::{fmt, net::Ipv4Addr};

/// An IPv4 address and UDP port pair, as carried in ENRs and wire messages.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub ip_address: Ipv4Addr,
    pub udp_port: u16,
}

impl Endpoint {
    #[inline]
    pub const fn new(ip_address: Ipv4Addr, udp_port: u16) -> Self {
        Self {
            ip_address,
            udp_port,
        }
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.ip_address, self.udp_port)
    }
}

impl From<std::net::SocketAddrV4> for Endpoint {
    fn from(addr: std::net::SocketAddrV4) -> Self {
        Self::new(*addr.ip(), addr.port())
    }
}

impl From<Endpoint> for std::net::SocketAddr {
    fn from(endpoint: Endpoint) -> Self {
        std::net::SocketAddr::V4(std::net::SocketAddrV4::new(
            endpoint.ip_address,
            endpoint.udp_port,
        ))
    }
}
