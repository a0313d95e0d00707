// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Ethereum Node Records.
//!
//! Real signature schemes and identity verification are out of scope: this
//! module treats the record as an opaque, already validated value and only
//! implements the handful of accessors the Pool and Client need
//! (`node_id`, `sequence_number`, `ip`/`udp`). The signing scheme here is a
//! placeholder keyed digest, not a real cryptographic signature.

use crate::{endpoint::Endpoint, node_id::NodeId};
use rlp::{DecoderError, Encodable, Rlp, RlpStream};
use std::{
    collections::HashMap,
    net::Ipv4Addr,
    sync::{Arc, Mutex},
};

/// A node's long-term identity key. Stands in for the external identity
/// scheme (secp256k1 in the real protocol); any 32 distinct bytes produce a
/// distinct `NodeId`.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct SigningKey([u8; 32]);

impl SigningKey {
    #[inline]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    fn public_key(&self) -> [u8; 32] {
        // Placeholder "derivation": real schemes compute a public key via
        // elliptic-curve scalar multiplication. Good enough here since the
        // core only requires the derived bytes to be a stable function of
        // the private key.
        let mut out = self.0;
        for byte in out.iter_mut() {
            *byte ^= 0xa5;
        }
        out
    }
}

/// Ethereum Node Record: a signed, versioned, self-describing record
/// identifying a peer and its reachable address.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Enr {
    public_key: [u8; 32],
    sequence_number: u64,
    ip: Ipv4Addr,
    udp: u16,
    signature: [u8; 32],
}

impl Enr {
    /// Signs a fresh record over the given endpoint with `private_key`.
    pub fn sign(private_key: &SigningKey, sequence_number: u64, endpoint: Endpoint) -> Self {
        let public_key = private_key.public_key();
        let signature = Self::compute_signature(private_key, sequence_number, endpoint);
        Self {
            public_key,
            sequence_number,
            ip: endpoint.ip_address,
            udp: endpoint.udp_port,
            signature,
        }
    }

    fn compute_signature(
        private_key: &SigningKey,
        sequence_number: u64,
        endpoint: Endpoint,
    ) -> [u8; 32] {
        let mut sig = private_key.0;
        for (i, byte) in sequence_number.to_be_bytes().iter().enumerate() {
            sig[i] ^= byte;
        }
        for (i, byte) in endpoint.ip_address.octets().iter().enumerate() {
            sig[8 + i] ^= byte;
        }
        sig[12] ^= (endpoint.udp_port >> 8) as u8;
        sig[13] ^= endpoint.udp_port as u8;
        sig
    }

    #[inline]
    pub fn node_id(&self) -> NodeId {
        node_id_of(&self.public_key)
    }

    #[inline]
    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    #[inline]
    pub fn ip(&self) -> Ipv4Addr {
        self.ip
    }

    #[inline]
    pub fn udp(&self) -> u16 {
        self.udp
    }

    #[inline]
    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.ip, self.udp)
    }
}

impl Encodable for Enr {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(5);
        s.append(&self.public_key.as_slice());
        s.append(&self.sequence_number);
        s.append(&self.ip.octets().as_slice());
        s.append(&self.udp);
        s.append(&self.signature.as_slice());
    }
}

impl rlp::Decodable for Enr {
    fn decode(rlp: &Rlp) -> Result<Self, DecoderError> {
        let public_key: Vec<u8> = rlp.val_at(0)?;
        let public_key: [u8; 32] = public_key
            .try_into()
            .map_err(|_| DecoderError::RlpInvalidLength)?;
        let sequence_number: u64 = rlp.val_at(1)?;
        let ip: Vec<u8> = rlp.val_at(2)?;
        let ip: [u8; 4] = ip.try_into().map_err(|_| DecoderError::RlpInvalidLength)?;
        let udp: u16 = rlp.val_at(3)?;
        let signature: Vec<u8> = rlp.val_at(4)?;
        let signature: [u8; 32] = signature
            .try_into()
            .map_err(|_| DecoderError::RlpInvalidLength)?;
        Ok(Self {
            public_key,
            sequence_number,
            ip: Ipv4Addr::from(ip),
            udp,
            signature,
        })
    }
}

/// Derives a [`NodeId`] from a public key the same way the real protocol
/// hashes an identity key into an address: any fixed, collision-resistant
/// function is acceptable here since preimage resistance is the external
/// identity scheme's concern, not this crate's.
pub(crate) fn node_id_of(public_key: &[u8; 32]) -> NodeId {
    let mut out = [0u8; 32];
    for (i, byte) in public_key.iter().enumerate() {
        out[i] = byte.wrapping_mul(31).wrapping_add(i as u8);
    }
    NodeId::new(out)
}

/// External NodeDB contract: the Pool consults it when creating sessions
/// to resolve a peer's ENR and last-known endpoint.
pub trait NodeDb: Send + Sync {
    fn set_enr(&self, enr: Enr);
    fn get_enr(&self, node_id: &NodeId) -> Option<Enr>;
    fn get_endpoint(&self, node_id: &NodeId) -> Option<Endpoint> {
        self.get_enr(node_id).map(|enr| enr.endpoint())
    }
}

/// A minimal in-memory NodeDB sufficient to drive the Pool in tests and
/// single-process deployments. A persistent, disk-backed implementation is
/// out of scope for this crate.
#[derive(Clone, Default)]
pub struct InMemoryNodeDb {
    inner: Arc<Mutex<HashMap<NodeId, Enr>>>,
}

impl InMemoryNodeDb {
    pub fn new() -> Self {
        Self::default()
    }
}

impl NodeDb for InMemoryNodeDb {
    fn set_enr(&self, enr: Enr) {
        self.inner.lock().unwrap().insert(enr.node_id(), enr);
    }

    fn get_enr(&self, node_id: &NodeId) -> Option<Enr> {
        self.inner.lock().unwrap().get(node_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_is_deterministic_and_binds_endpoint() {
        let key = SigningKey::from_bytes([7; 32]);
        let endpoint = Endpoint::new(Ipv4Addr::new(10, 0, 0, 1), 9000);
        let a = Enr::sign(&key, 1, endpoint);
        let b = Enr::sign(&key, 1, endpoint);
        assert_eq!(a, b);
        assert_eq!(a.node_id(), b.node_id());

        let other_endpoint = Endpoint::new(Ipv4Addr::new(10, 0, 0, 2), 9000);
        let c = Enr::sign(&key, 1, other_endpoint);
        assert_ne!(a, c);
    }

    #[test]
    fn rlp_round_trips() {
        let key = SigningKey::from_bytes([3; 32]);
        let endpoint = Endpoint::new(Ipv4Addr::new(192, 168, 1, 5), 12345);
        let enr = Enr::sign(&key, 9, endpoint);
        let bytes = rlp::encode(&enr);
        let decoded: Enr = rlp::decode(&bytes).unwrap();
        assert_eq!(enr, decoded);
    }

    #[test]
    fn node_db_round_trips() {
        let db = InMemoryNodeDb::new();
        let key = SigningKey::from_bytes([1; 32]);
        let endpoint = Endpoint::new(Ipv4Addr::new(127, 0, 0, 1), 30303);
        let enr = Enr::sign(&key, 4, endpoint);
        let node_id = enr.node_id();
        db.set_enr(enr.clone());
        assert_eq!(db.get_enr(&node_id), Some(enr));
        assert_eq!(db.get_endpoint(&node_id), Some(endpoint));
    }
}
