// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Test-only factories, mirroring the
//! `#[cfg(any(test, feature = "testing"))] pub mod testing` convention.

use crate::{endpoint::Endpoint, enr::{Enr, SigningKey}, node_id::NodeId};
use std::net::Ipv4Addr;

pub fn signing_key(seed: u8) -> SigningKey {
    SigningKey::from_bytes([seed; 32])
}

pub fn endpoint(port: u16) -> Endpoint {
    Endpoint::new(Ipv4Addr::LOCALHOST, port)
}

pub fn enr(seed: u8, port: u16) -> Enr {
    Enr::sign(&signing_key(seed), 1, endpoint(port))
}

pub fn node_id(seed: u8) -> NodeId {
    enr(seed, 0).node_id()
}
