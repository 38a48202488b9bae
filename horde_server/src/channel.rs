//! Command/RPC channel between the network front-end and the simulation.
//!
//! Inbound items are tagged with the connection that sent them and queued in
//! arrival order. The intake stage drains the whole queue once per tick.
//! Outbound RPCs queued by stages are held until the flush stage, which
//! expands broadcasts against the in-session set at flush time.

use std::collections::VecDeque;

use horde_shared::net::{ClientRpc, ConnectionId, PlayerInput, ServerRpc};

use crate::connections::ConnectionRegistry;

/// What a peer did.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundKind {
    /// Handshake finished.
    Connected,
    /// Peer asked to enter the session.
    Ready,
    Disconnected,
    Input(PlayerInput),
    Rpc(ClientRpc),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Inbound {
    pub from: ConnectionId,
    pub kind: InboundKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recipient {
    Connection(ConnectionId),
    /// Every connection that is in-session when the flush runs.
    InSession,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    pub to: Recipient,
    pub rpc: ServerRpc,
}

/// One RPC addressed to one connection, produced by [`Channel::flush`].
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub to: ConnectionId,
    pub rpc: ServerRpc,
}

#[derive(Debug, Default)]
pub struct Channel {
    inbound: VecDeque<Inbound>,
    outbound: Vec<Outbound>,
}

impl Channel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_inbound(&mut self, from: ConnectionId, kind: InboundKind) {
        self.inbound.push_back(Inbound { from, kind });
    }

    /// Takes every queued inbound item, oldest first.
    pub fn drain_inbound(&mut self) -> Vec<Inbound> {
        self.inbound.drain(..).collect()
    }

    pub fn inbound_len(&self) -> usize {
        self.inbound.len()
    }

    pub fn send_to(&mut self, to: ConnectionId, rpc: ServerRpc) {
        self.outbound.push(Outbound {
            to: Recipient::Connection(to),
            rpc,
        });
    }

    pub fn broadcast(&mut self, rpc: ServerRpc) {
        self.outbound.push(Outbound {
            to: Recipient::InSession,
            rpc,
        });
    }

    pub fn pending_outbound(&self) -> &[Outbound] {
        &self.outbound
    }

    /// Expands queued RPCs into per-connection deliveries, preserving queue
    /// order. Direct sends to connections that have since gone are dropped.
    pub fn flush(&mut self, connections: &ConnectionRegistry) -> Vec<Delivery> {
        let in_session = connections.in_session();
        let mut out = Vec::with_capacity(self.outbound.len());
        for item in self.outbound.drain(..) {
            match item.to {
                Recipient::Connection(id) => {
                    if connections.contains(id) {
                        out.push(Delivery { to: id, rpc: item.rpc });
                    }
                }
                Recipient::InSession => {
                    out.extend(in_session.iter().map(|id| Delivery {
                        to: *id,
                        rpc: item.rpc.clone(),
                    }));
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use horde_shared::ecs::EntityId;

    #[test]
    fn inbound_drains_wholly_in_arrival_order() {
        let mut ch = Channel::new();
        ch.push_inbound(ConnectionId(2), InboundKind::Connected);
        ch.push_inbound(ConnectionId(1), InboundKind::Ready);
        ch.push_inbound(ConnectionId(2), InboundKind::Rpc(ClientRpc::RequestRespawn));
        let drained = ch.drain_inbound();
        let from: Vec<_> = drained.iter().map(|i| i.from.0).collect();
        assert_eq!(from, vec![2, 1, 2]);
        assert_eq!(ch.inbound_len(), 0);
    }

    #[test]
    fn flush_expands_broadcasts_against_current_session() {
        let mut reg = ConnectionRegistry::new();
        for (c, p) in [(1, 10), (2, 20)] {
            reg.connect(ConnectionId(c), 0);
            reg.link(ConnectionId(c), EntityId(p));
        }
        reg.connect(ConnectionId(3), 0); // not in session yet

        let mut ch = Channel::new();
        ch.broadcast(ServerRpc::KillCountDelta { amount: 2 });
        ch.send_to(ConnectionId(3), ServerRpc::KillCountDelta { amount: 1 });
        ch.send_to(ConnectionId(9), ServerRpc::KillCountDelta { amount: 9 });

        let out = ch.flush(&reg);
        let to: Vec<_> = out.iter().map(|d| d.to.0).collect();
        assert_eq!(to, vec![1, 2, 3]);
        assert!(ch.pending_outbound().is_empty());
        assert!(ch.flush(&reg).is_empty());
    }
}
