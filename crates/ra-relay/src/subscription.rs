//! Operator subscriptions to agent identities
//!
//! Membership is keyed by agent identity, not by agent connection, so it
//! survives agent reconnects. It is removed only by an explicit unwatch
//! or when the operator connection goes away.

use dashmap::DashMap;
use std::collections::{HashMap, HashSet};

use ra_core::{AgentId, ConnectionId};
use ra_protocol::OperatorOutbound;

use crate::connection::OperatorHandle;

/// Which operator connections watch which agent identity
pub struct SubscriptionIndex {
    /// identity -> watching operator connections
    members: DashMap<AgentId, HashMap<ConnectionId, OperatorHandle>>,
    /// operator connection -> watched identities, for one-pass cleanup
    watching: DashMap<ConnectionId, HashSet<AgentId>>,
}

impl SubscriptionIndex {
    pub fn new() -> Self {
        Self {
            members: DashMap::new(),
            watching: DashMap::new(),
        }
    }

    /// Add membership; returns false if the operator already watched it
    pub fn watch(&self, operator: &OperatorHandle, identity: AgentId) -> bool {
        let added = self
            .members
            .entry(identity.clone())
            .or_default()
            .insert(operator.id(), operator.clone())
            .is_none();

        self.watching.entry(operator.id()).or_default().insert(identity);
        added
    }

    /// Drop one membership; returns false if it did not exist
    pub fn unwatch(&self, operator: ConnectionId, identity: &AgentId) -> bool {
        let removed = self
            .members
            .get_mut(identity)
            .map(|mut m| m.remove(&operator).is_some())
            .unwrap_or(false);
        self.members.remove_if(identity, |_, m| m.is_empty());

        if let Some(mut set) = self.watching.get_mut(&operator) {
            set.remove(identity);
        }
        self.watching.remove_if(&operator, |_, s| s.is_empty());
        removed
    }

    /// Deliver an event to every current subscriber of `identity`
    ///
    /// Iterates a snapshot taken at call time. Subscribers that have
    /// disconnected are skipped. Returns the number of deliveries.
    pub fn publish(&self, identity: &AgentId, event: OperatorOutbound) -> usize {
        let targets: Vec<OperatorHandle> = match self.members.get(identity) {
            Some(members) => members.values().cloned().collect(),
            None => return 0,
        };

        targets
            .iter()
            .filter(|handle| handle.send(event.clone()))
            .count()
    }

    /// Remove every membership of an operator connection
    pub fn unsubscribe_all(&self, operator: ConnectionId) -> Vec<AgentId> {
        let identities: Vec<AgentId> = self
            .watching
            .remove(&operator)
            .map(|(_, set)| set.into_iter().collect())
            .unwrap_or_default();

        for identity in &identities {
            if let Some(mut members) = self.members.get_mut(identity) {
                members.remove(&operator);
            }
            self.members.remove_if(identity, |_, m| m.is_empty());
        }
        identities
    }

    /// Operator connections currently watching `identity`
    pub fn subscribers(&self, identity: &AgentId) -> Vec<ConnectionId> {
        let mut ids: Vec<_> = self
            .members
            .get(identity)
            .map(|m| m.keys().copied().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    pub fn is_watching(&self, operator: ConnectionId, identity: &AgentId) -> bool {
        self.members
            .get(identity)
            .map(|m| m.contains_key(&operator))
            .unwrap_or(false)
    }

    /// Number of identities with at least one subscriber
    pub fn watched_count(&self) -> usize {
        self.members.len()
    }
}

impl Default for SubscriptionIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn operator(id: u64) -> (OperatorHandle, UnboundedReceiver<OperatorOutbound>) {
        OperatorHandle::channel(ConnectionId::new(id))
    }

    fn frame(image: &str) -> OperatorOutbound {
        OperatorOutbound::Frame {
            identity: "A1".to_string(),
            image: image.to_string(),
        }
    }

    #[tokio::test]
    async fn test_publish_reaches_only_subscribers() {
        let index = SubscriptionIndex::new();
        let (a, mut a_rx) = operator(1);
        let (b, mut b_rx) = operator(2);
        let (_c, mut c_rx) = operator(3);

        index.watch(&a, AgentId::new("A1"));
        index.watch(&b, AgentId::new("A1"));

        assert_eq!(index.publish(&AgentId::new("A1"), frame("x")), 2);

        assert!(matches!(a_rx.try_recv(), Ok(OperatorOutbound::Frame { .. })));
        assert!(matches!(b_rx.try_recv(), Ok(OperatorOutbound::Frame { .. })));
        assert!(c_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_watch_is_additive() {
        let index = SubscriptionIndex::new();
        let (a, _rx) = operator(1);

        assert!(index.watch(&a, AgentId::new("A1")));
        assert!(index.watch(&a, AgentId::new("A2")));
        assert!(!index.watch(&a, AgentId::new("A1")));

        assert!(index.is_watching(a.id(), &AgentId::new("A1")));
        assert!(index.is_watching(a.id(), &AgentId::new("A2")));
    }

    #[tokio::test]
    async fn test_disconnected_subscriber_is_noop() {
        let index = SubscriptionIndex::new();
        let (a, a_rx) = operator(1);
        let (b, mut b_rx) = operator(2);
        index.watch(&a, AgentId::new("A1"));
        index.watch(&b, AgentId::new("A1"));

        drop(a_rx);
        assert_eq!(index.publish(&AgentId::new("A1"), frame("x")), 1);
        assert!(b_rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_unsubscribe_all_removes_every_membership() {
        let index = SubscriptionIndex::new();
        let (a, mut a_rx) = operator(1);
        let (b, _b_rx) = operator(2);
        index.watch(&a, AgentId::new("A1"));
        index.watch(&a, AgentId::new("A2"));
        index.watch(&b, AgentId::new("A2"));

        let mut removed = index.unsubscribe_all(a.id());
        removed.sort();
        assert_eq!(removed, vec![AgentId::new("A1"), AgentId::new("A2")]);

        assert_eq!(index.publish(&AgentId::new("A1"), frame("x")), 0);
        assert!(a_rx.try_recv().is_err());
        assert_eq!(index.subscribers(&AgentId::new("A2")), vec![b.id()]);
        assert_eq!(index.watched_count(), 1);

        assert!(index.unsubscribe_all(a.id()).is_empty());
    }

    #[tokio::test]
    async fn test_unwatch() {
        let index = SubscriptionIndex::new();
        let (a, _rx) = operator(1);
        index.watch(&a, AgentId::new("A1"));

        assert!(index.unwatch(a.id(), &AgentId::new("A1")));
        assert!(!index.unwatch(a.id(), &AgentId::new("A1")));
        assert_eq!(index.watched_count(), 0);
    }
}
