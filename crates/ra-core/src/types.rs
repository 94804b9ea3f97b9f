//! Core domain types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Identity under which an agent registers
///
/// Opaque string key. At most one live connection is registered per
/// identity; a reconnecting agent replaces its previous entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AgentId(pub String);

impl AgentId {
    /// Create a new agent ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the raw ID string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for AgentId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for AgentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Process-unique identifier of one accepted WebSocket connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(pub u64);

impl ConnectionId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Allocates monotonically increasing connection IDs
///
/// IDs are never reused, so a late event addressed to a closed connection
/// can never reach a newer connection.
#[derive(Debug)]
pub struct ConnectionIdAllocator {
    next: AtomicU64,
}

impl ConnectionIdAllocator {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Allocate a new connection ID
    pub fn allocate(&self) -> ConnectionId {
        ConnectionId(self.next.fetch_add(1, Ordering::SeqCst))
    }
}

impl Default for ConnectionIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// Operator role carried in the capability token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Readonly,
    Operator,
    Admin,
}

impl Role {
    /// Whether this role may perform the given action
    pub fn permits(self, permission: Permission) -> bool {
        match permission {
            Permission::Watch
            | Permission::ListProcesses
            | Permission::Chat
            | Permission::SendFile
            | Permission::Signal
            | Permission::Media
            | Permission::ViewAgents => true,
            Permission::KillProcess => matches!(self, Role::Operator | Role::Admin),
            Permission::ViewActions => self == Role::Admin,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Readonly => "readonly",
            Role::Operator => "operator",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "readonly" => Ok(Role::Readonly),
            "operator" => Ok(Role::Operator),
            "admin" => Ok(Role::Admin),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}

/// Operator-side actions subject to a role check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    /// Subscribe to an agent's events
    Watch,
    /// Ask an agent for its process list
    ListProcesses,
    /// Terminate a process on an agent (requires local confirmation)
    KillProcess,
    /// Send a chat line to an agent
    Chat,
    /// Push a file to an agent
    SendFile,
    /// Relay a peer signaling payload to an agent
    Signal,
    /// Use the media signaling methods
    Media,
    /// List connected agents over HTTP
    ViewAgents,
    /// Inspect outstanding privileged actions over HTTP
    ViewActions,
}

/// Authenticated operator, decoded once at connection time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

impl Principal {
    pub fn new(role: Role, user: Option<String>) -> Self {
        Self { role, user }
    }

    /// Name shown to agents as the origin of chat lines and files
    pub fn display_name(&self) -> &str {
        self.user.as_deref().unwrap_or("operator")
    }

    pub fn can(&self, permission: Permission) -> bool {
        self.role.permits(permission)
    }
}

/// Identifier of a privileged action request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActionId(pub u64);

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "action-{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_readonly_cannot_kill() {
        assert!(!Role::Readonly.permits(Permission::KillProcess));
        assert!(Role::Operator.permits(Permission::KillProcess));
        assert!(Role::Admin.permits(Permission::KillProcess));
    }

    #[test]
    fn test_every_role_can_watch_and_chat() {
        for role in [Role::Readonly, Role::Operator, Role::Admin] {
            assert!(role.permits(Permission::Watch));
            assert!(role.permits(Permission::Chat));
            assert!(role.permits(Permission::SendFile));
            assert!(role.permits(Permission::Media));
        }
    }

    #[test]
    fn test_only_admin_views_actions() {
        assert!(Role::Admin.permits(Permission::ViewActions));
        assert!(!Role::Operator.permits(Permission::ViewActions));
        assert!(!Role::Readonly.permits(Permission::ViewActions));
    }

    #[test]
    fn test_role_parse() {
        assert_eq!("admin".parse::<Role>().unwrap(), Role::Admin);
        assert!("root".parse::<Role>().is_err());
        assert_eq!(
            serde_json::from_str::<Role>("\"readonly\"").unwrap(),
            Role::Readonly
        );
    }

    #[test]
    fn test_principal_display_name_defaults() {
        let anon = Principal::new(Role::Operator, None);
        assert_eq!(anon.display_name(), "operator");

        let named = Principal::new(Role::Admin, Some("alice".to_string()));
        assert_eq!(named.display_name(), "alice");
    }

    #[test]
    fn test_connection_ids_are_unique() {
        let ids = ConnectionIdAllocator::new();
        let a = ids.allocate();
        let b = ids.allocate();
        assert_ne!(a, b);
        assert_eq!(format!("{}", a), "conn-1");
    }
}
