//! State coordinator for cross-collection atomicity
//!
//! Agent registration touches several collections at once: the registry,
//! the media session manager and the privileged action table. The
//! `StateCoordinator` puts a single `RwLock<()>` in front of the registry
//! so that these multi-step updates cannot interleave with a forward to
//! the same agent.
//!
//! # Atomicity Model
//!
//! Forwarding a command to an agent acquires a read lock, looks the agent
//! up and queues the event while still holding it. Register, replace and
//! disconnect acquire the write lock. A forward therefore either sees the
//! old connection before it is closed or the new one after it is fully
//! registered; it never reaches a handle whose identity was already
//! removed.

use std::sync::Arc;
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::connection::AgentRegistry;

/// Coordinates access to the agent registry
pub struct StateCoordinator {
    /// Purely for coordination; guards no data itself
    inner: RwLock<()>,

    /// Live agent connections
    pub agents: Arc<AgentRegistry>,
}

impl StateCoordinator {
    pub fn new() -> Self {
        Self::with_registry(Arc::new(AgentRegistry::new()))
    }

    pub fn with_registry(agents: Arc<AgentRegistry>) -> Self {
        Self {
            inner: RwLock::new(()),
            agents,
        }
    }

    /// Shared lock for lookups that must not race a disconnect.
    ///
    /// Do not call `write` while holding this guard; the lock is not
    /// reentrant.
    pub async fn read(&self) -> RwLockReadGuard<'_, ()> {
        self.inner.read().await
    }

    /// Exclusive lock for register, replace and disconnect
    pub async fn write(&self) -> RwLockWriteGuard<'_, ()> {
        self.inner.write().await
    }
}

impl Default for StateCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
