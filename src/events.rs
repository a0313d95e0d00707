// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Observability events a running [`crate::client::Client`] emits.
//!
//! The teacher generates a large `Subscriber`/`Meta` event pipeline from a
//! code-generation macro (`event.rs`); that machinery is disproportionate
//! for this crate's six event kinds, so subscribers instead read a
//! `tokio::sync::broadcast` channel of a flat enum, matching the simpler
//! broadcast usage elsewhere in the ecosystem.

use crate::{endpoint::Endpoint, node_id::NodeId};
use tokio::sync::broadcast;

#[derive(Clone, Debug)]
pub enum Event {
    Listening { endpoint: Endpoint },
    SessionCreated { node_id: NodeId },
    HandshakeComplete { node_id: NodeId },
    SessionTerminated { node_id: NodeId, reason: String },
    PacketDiscarded { reason: String },
    SessionMismatch { node_id: NodeId, reason: String },
    UnhandledMessage { node_id: NodeId, message_type: u8 },
}

/// Thin wrapper around a broadcast sender so callers don't need to import
/// `tokio::sync::broadcast` themselves.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    /// Emits `event`. Dropped when there are no subscribers, mirroring
    /// `broadcast`'s usual "best effort, no back-pressure" semantics for an
    /// observability side-channel.
    pub fn emit(&self, event: Event) {
        let _ = self.sender.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[tokio::test]
    async fn subscribers_receive_emitted_events() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        bus.emit(Event::Listening {
            endpoint: Endpoint::new(Ipv4Addr::LOCALHOST, 9000),
        });
        let event = rx.recv().await.unwrap();
        assert!(matches!(event, Event::Listening { .. }));
    }

    #[test]
    fn emit_without_subscribers_does_not_panic() {
        let bus = EventBus::new(16);
        bus.emit(Event::PacketDiscarded {
            reason: "test".into(),
        });
    }
}
