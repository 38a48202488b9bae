//! Connection index.
//!
//! Connections and players reference each other: a [`Player`] component
//! stores its [`ConnectionId`], and the registry maps each connection to its
//! player entity. Both directions live here in two maps that are only ever
//! updated together.
//!
//! When a peer disconnects its entries are removed immediately, but the
//! player's component keeps the stale id. The session lifecycle stage looks
//! for those dangling back-references to flag the player dead.
//!
//! [`Player`]: horde_shared::components::Player

use std::collections::HashMap;

use horde_shared::{ecs::EntityId, net::ConnectionId};

/// One network peer as seen by the simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Connection {
    pub id: ConnectionId,
    /// Set once the peer's player has spawned.
    pub in_session: bool,
    pub connected_tick: u64,
    pub player: Option<EntityId>,
}

/// Bidirectional connection <-> player index.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    by_connection: HashMap<ConnectionId, Connection>,
    by_player: HashMap<EntityId, ConnectionId>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new peer. Returns false if the id is already known.
    pub fn connect(&mut self, id: ConnectionId, tick: u64) -> bool {
        if self.by_connection.contains_key(&id) {
            return false;
        }
        self.by_connection.insert(
            id,
            Connection {
                id,
                in_session: false,
                connected_tick: tick,
                player: None,
            },
        );
        true
    }

    /// Removes a peer and its player link.
    pub fn disconnect(&mut self, id: ConnectionId) -> Option<Connection> {
        let conn = self.by_connection.remove(&id)?;
        if let Some(player) = conn.player {
            self.by_player.remove(&player);
        }
        Some(conn)
    }

    /// Links a connection to its spawned player and marks it in-session.
    /// Returns false if the connection is unknown or already linked.
    pub fn link(&mut self, id: ConnectionId, player: EntityId) -> bool {
        let Some(conn) = self.by_connection.get_mut(&id) else {
            return false;
        };
        if conn.player.is_some() || self.by_player.contains_key(&player) {
            return false;
        }
        conn.player = Some(player);
        conn.in_session = true;
        self.by_player.insert(player, id);
        true
    }

    /// Detaches a destroyed player from its connection, which leaves the
    /// session until it sends ready again.
    pub fn unlink(&mut self, player: EntityId) -> Option<ConnectionId> {
        let id = self.by_player.remove(&player)?;
        if let Some(conn) = self.by_connection.get_mut(&id) {
            conn.player = None;
            conn.in_session = false;
        }
        Some(id)
    }

    pub fn get(&self, id: ConnectionId) -> Option<&Connection> {
        self.by_connection.get(&id)
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.by_connection.contains_key(&id)
    }

    pub fn player_of(&self, id: ConnectionId) -> Option<EntityId> {
        self.by_connection.get(&id).and_then(|c| c.player)
    }

    pub fn connection_of(&self, player: EntityId) -> Option<ConnectionId> {
        self.by_player.get(&player).copied()
    }

    /// In-session connection ids, ascending.
    pub fn in_session(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<_> = self
            .by_connection
            .values()
            .filter(|c| c.in_session)
            .map(|c| c.id)
            .collect();
        ids.sort();
        ids
    }

    /// All connection ids, ascending.
    pub fn ids(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<_> = self.by_connection.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.by_connection.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_connection.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_and_disconnect_keep_both_sides_in_sync() {
        let mut reg = ConnectionRegistry::new();
        let c = ConnectionId(1);
        let p = EntityId(7);
        assert!(reg.connect(c, 3));
        assert!(!reg.connect(c, 4), "duplicate connect");
        assert!(reg.in_session().is_empty());

        assert!(reg.link(c, p));
        assert!(!reg.link(c, EntityId(8)), "already linked");
        assert_eq!(reg.player_of(c), Some(p));
        assert_eq!(reg.connection_of(p), Some(c));
        assert_eq!(reg.in_session(), vec![c]);

        let gone = reg.disconnect(c).unwrap();
        assert_eq!(gone.connected_tick, 3);
        assert_eq!(reg.connection_of(p), None);
        assert!(reg.is_empty());
        assert!(reg.disconnect(c).is_none());
    }

    #[test]
    fn link_unknown_connection_fails() {
        let mut reg = ConnectionRegistry::new();
        assert!(!reg.link(ConnectionId(9), EntityId(1)));
        assert_eq!(reg.connection_of(EntityId(1)), None);
    }

    #[test]
    fn unlink_leaves_the_session_but_keeps_the_connection() {
        let mut reg = ConnectionRegistry::new();
        let c = ConnectionId(2);
        reg.connect(c, 0);
        reg.link(c, EntityId(5));

        assert_eq!(reg.unlink(EntityId(5)), Some(c));
        assert!(reg.contains(c));
        assert_eq!(reg.player_of(c), None);
        assert!(reg.in_session().is_empty());
        assert!(reg.link(c, EntityId(6)), "can rejoin with a fresh player");
        assert_eq!(reg.unlink(EntityId(5)), None);
    }
}
