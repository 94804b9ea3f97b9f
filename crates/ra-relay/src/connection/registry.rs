//! Agent connection registry

use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use ra_core::time::current_time_millis;
use ra_core::{AgentId, ConnectionId};
use ra_protocol::AgentOutbound;

use super::AgentHandle;

/// A registered agent connection
#[derive(Debug)]
pub struct AgentConnection {
    /// Identity the agent registered under
    pub identity: AgentId,
    /// Outbound channel
    pub handle: AgentHandle,
    /// Registration time (ms since epoch)
    pub connected_at: u64,
    /// Remote socket address
    pub peer_addr: Option<SocketAddr>,
}

impl AgentConnection {
    pub fn new(identity: AgentId, handle: AgentHandle, peer_addr: Option<SocketAddr>) -> Self {
        Self {
            identity,
            handle,
            connected_at: current_time_millis(),
            peer_addr,
        }
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.handle.id()
    }

    /// Queue an event to the agent
    pub fn send(&self, message: AgentOutbound) -> bool {
        self.handle.send(message)
    }
}

/// Live agent connections indexed by identity
///
/// At most one connection per identity. Callers serialize mutations
/// through the `StateCoordinator` write lock.
pub struct AgentRegistry {
    agents: DashMap<AgentId, Arc<AgentConnection>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self {
            agents: DashMap::new(),
        }
    }

    /// Insert a connection, returning the one it replaced
    pub fn insert(&self, connection: AgentConnection) -> (Arc<AgentConnection>, Option<Arc<AgentConnection>>) {
        let connection = Arc::new(connection);
        let previous = self
            .agents
            .insert(connection.identity.clone(), Arc::clone(&connection));
        (connection, previous)
    }

    pub fn get(&self, identity: &AgentId) -> Option<Arc<AgentConnection>> {
        self.agents.get(identity).map(|r| Arc::clone(&r))
    }

    pub fn contains(&self, identity: &AgentId) -> bool {
        self.agents.contains_key(identity)
    }

    /// Remove an identity; idempotent
    pub fn remove(&self, identity: &AgentId) -> Option<Arc<AgentConnection>> {
        self.agents.remove(identity).map(|(_, conn)| conn)
    }

    /// Remove the identity only if it is still held by `connection_id`
    ///
    /// A replaced connection disconnecting late must not evict its successor.
    pub fn remove_if_current(
        &self,
        identity: &AgentId,
        connection_id: ConnectionId,
    ) -> Option<Arc<AgentConnection>> {
        self.agents
            .remove_if(identity, |_, conn| conn.connection_id() == connection_id)
            .map(|(_, conn)| conn)
    }

    /// All registered agents, sorted by identity
    pub fn list(&self) -> Vec<Arc<AgentConnection>> {
        let mut agents: Vec<_> = self.agents.iter().map(|r| Arc::clone(&r)).collect();
        agents.sort_by(|a, b| a.identity.cmp(&b.identity));
        agents
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connection(identity: &str, id: u64) -> AgentConnection {
        let (handle, _rx) = AgentHandle::channel(ConnectionId::new(id));
        AgentConnection::new(AgentId::new(identity), handle, None)
    }

    #[test]
    fn test_insert_replaces_previous() {
        let registry = AgentRegistry::new();

        let (_, previous) = registry.insert(connection("A1", 1));
        assert!(previous.is_none());

        let (current, previous) = registry.insert(connection("A1", 2));
        assert_eq!(previous.unwrap().connection_id(), ConnectionId::new(1));
        assert_eq!(current.connection_id(), ConnectionId::new(2));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let registry = AgentRegistry::new();
        registry.insert(connection("A1", 1));

        assert!(registry.remove(&AgentId::new("A1")).is_some());
        assert!(registry.remove(&AgentId::new("A1")).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_remove_if_current_ignores_stale_connection() {
        let registry = AgentRegistry::new();
        registry.insert(connection("A1", 1));
        registry.insert(connection("A1", 2));

        assert!(registry
            .remove_if_current(&AgentId::new("A1"), ConnectionId::new(1))
            .is_none());
        assert!(registry.contains(&AgentId::new("A1")));

        assert!(registry
            .remove_if_current(&AgentId::new("A1"), ConnectionId::new(2))
            .is_some());
        assert!(!registry.contains(&AgentId::new("A1")));
    }

    #[test]
    fn test_list_sorted() {
        let registry = AgentRegistry::new();
        registry.insert(connection("B", 1));
        registry.insert(connection("A", 2));

        let ids: Vec<_> = registry.list().iter().map(|c| c.identity.to_string()).collect();
        assert_eq!(ids, vec!["A", "B"]);
    }
}
