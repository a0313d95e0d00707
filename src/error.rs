// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Flat error enums, one per component boundary, following the
//! `#[error("...")]`-per-variant convention used throughout this crate's
//! teacher for its `stream::recv` error kinds (minus their `Location`
//! wrapper, which is more tracking than this crate's scope warrants).

use crate::node_id::NodeId;
use thiserror::Error;

/// Failures the [`crate::dispatcher::Dispatcher`] can surface to a caller.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("failed to decode message: {0}")]
    Decode(#[from] rlp::DecoderError),

    #[error("message failed validation: {0}")]
    ValidationError(String),

    #[error("no established session with {0:?}")]
    SessionNotEstablished(NodeId),

    #[error("request to {0:?} timed out")]
    RequestTimeout(NodeId),

    #[error("peer {0:?} violated the protocol: {1}")]
    ProtocolViolation(NodeId, String),

    #[error("peer {0:?} unreachable")]
    PeerUnreachable(NodeId),

    #[error("operation cancelled")]
    Cancelled,

    #[error("fatal dispatcher failure: {0}")]
    Fatal(String),
}

/// Failures local to the [`crate::pool::Pool`]'s session bookkeeping; these
/// never cross a channel boundary, they are handled or logged in place.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("no session for {0:?}")]
    NoSession(NodeId),

    #[error("handshake with {0:?} failed: {1}")]
    HandshakeFailed(NodeId, String),
}
