//! Command relay between operators and agents
//!
//! Operator commands are role-checked against the cached principal and
//! forwarded to the single registered agent connection. Agent output is
//! broadcast to every operator watching that identity, not only to the
//! operator that asked for it.

use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, trace};

use ra_core::error::RelayError;
use ra_core::traits::AuditEvent;
use ra_core::{AgentId, Permission, Principal};
use ra_protocol::{AgentOutbound, FileReceiveResult, OperatorOutbound, ProcessInfo};

use crate::audit::AuditLog;
use crate::coordinator::StateCoordinator;
use crate::subscription::SubscriptionIndex;

/// Routes command traffic in both directions
pub struct CommandRelay {
    coordinator: Arc<StateCoordinator>,
    subscriptions: Arc<SubscriptionIndex>,
    audit: AuditLog,
}

fn require(principal: &Principal, permission: Permission) -> Result<(), RelayError> {
    if principal.can(permission) {
        Ok(())
    } else {
        Err(RelayError::Forbidden)
    }
}

impl CommandRelay {
    pub fn new(
        coordinator: Arc<StateCoordinator>,
        subscriptions: Arc<SubscriptionIndex>,
        audit: AuditLog,
    ) -> Self {
        Self {
            coordinator,
            subscriptions,
            audit,
        }
    }

    /// Queue an event to a registered agent
    ///
    /// Holds the coordinator read lock so the lookup and the send cannot
    /// straddle a disconnect.
    async fn forward(&self, identity: &AgentId, message: AgentOutbound) -> Result<(), RelayError> {
        let _lock = self.coordinator.read().await;
        let agent = self
            .coordinator
            .agents
            .get(identity)
            .ok_or_else(|| RelayError::AgentOffline(identity.to_string()))?;

        if agent.send(message) {
            Ok(())
        } else {
            Err(RelayError::AgentOffline(identity.to_string()))
        }
    }

    /// Ask an agent for its process list; the answer is broadcast
    pub async fn list_processes(
        &self,
        principal: &Principal,
        identity: &AgentId,
    ) -> Result<(), RelayError> {
        require(principal, Permission::ListProcesses)?;
        self.forward(identity, AgentOutbound::ProcessList).await?;

        self.audit
            .emit(AuditEvent::ProcessListRequest {
                identity: identity.to_string(),
                user: principal.display_name().to_string(),
            })
            .await;
        Ok(())
    }

    /// Send a chat line, attributed to the principal
    pub async fn send_chat(
        &self,
        principal: &Principal,
        identity: &AgentId,
        text: String,
    ) -> Result<(), RelayError> {
        require(principal, Permission::Chat)?;
        let from = principal.display_name().to_string();
        self.forward(
            identity,
            AgentOutbound::Chat {
                from: from.clone(),
                text: text.clone(),
            },
        )
        .await?;

        self.audit
            .emit(AuditEvent::OperatorChat {
                identity: identity.to_string(),
                user: from,
                text,
            })
            .await;
        Ok(())
    }

    /// Push a file to an agent verbatim
    pub async fn send_file(
        &self,
        principal: &Principal,
        identity: &AgentId,
        filename: String,
        data: String,
    ) -> Result<(), RelayError> {
        require(principal, Permission::SendFile)?;
        let from = principal.display_name().to_string();
        let bytes = data.len();
        self.forward(
            identity,
            AgentOutbound::FileReceive {
                filename: filename.clone(),
                data,
                from: from.clone(),
            },
        )
        .await?;

        debug!("{} sent {} ({} bytes) to {}", from, filename, bytes, identity);
        self.audit
            .emit(AuditEvent::FileSent {
                identity: identity.to_string(),
                user: from,
                filename,
                bytes,
            })
            .await;
        Ok(())
    }

    /// Relay an opaque peer signaling payload to an agent
    pub async fn signal_agent(
        &self,
        principal: &Principal,
        identity: &AgentId,
        signal: Value,
    ) -> Result<(), RelayError> {
        require(principal, Permission::Signal)?;
        self.forward(identity, AgentOutbound::Signal { signal }).await
    }

    pub fn agent_frame(&self, identity: &AgentId, image: String) -> usize {
        trace!("Frame from {} ({} bytes)", identity, image.len());
        self.subscriptions.publish(
            identity,
            OperatorOutbound::Frame {
                identity: identity.to_string(),
                image,
            },
        )
    }

    pub fn agent_signal(&self, identity: &AgentId, signal: Value) -> usize {
        self.subscriptions.publish(
            identity,
            OperatorOutbound::Signal {
                identity: identity.to_string(),
                signal,
            },
        )
    }

    pub fn process_list_response(
        &self,
        identity: &AgentId,
        procs: Vec<ProcessInfo>,
        error: Option<String>,
    ) -> usize {
        self.subscriptions.publish(
            identity,
            OperatorOutbound::ProcessListResponse {
                identity: identity.to_string(),
                procs,
                error,
            },
        )
    }

    /// Chat typed by the agent's local user, attributed to the identity
    pub fn agent_chat(&self, identity: &AgentId, text: String) -> usize {
        self.subscriptions.publish(
            identity,
            OperatorOutbound::Chat {
                identity: identity.to_string(),
                from: identity.to_string(),
                text,
            },
        )
    }

    pub fn file_receive_response(&self, identity: &AgentId, result: FileReceiveResult) -> usize {
        self.subscriptions.publish(
            identity,
            OperatorOutbound::FileReceiveResponse {
                identity: identity.to_string(),
                result,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::connection::{AgentConnection, AgentHandle, OperatorHandle};
    use ra_core::{ConnectionId, Role};
    use tokio::sync::mpsc::UnboundedReceiver;

    struct Fixture {
        relay: CommandRelay,
        subscriptions: Arc<SubscriptionIndex>,
        audit: Arc<MemoryAuditSink>,
        agent_rx: UnboundedReceiver<AgentOutbound>,
    }

    fn fixture() -> Fixture {
        let coordinator = Arc::new(StateCoordinator::new());
        let subscriptions = Arc::new(SubscriptionIndex::new());
        let audit = Arc::new(MemoryAuditSink::new());

        let (agent, agent_rx) = AgentHandle::channel(ConnectionId::new(1));
        coordinator
            .agents
            .insert(AgentConnection::new(AgentId::new("A1"), agent, None));

        Fixture {
            relay: CommandRelay::new(
                coordinator,
                Arc::clone(&subscriptions),
                AuditLog::new(audit.clone()),
            ),
            subscriptions,
            audit,
            agent_rx,
        }
    }

    fn alice() -> Principal {
        Principal::new(Role::Readonly, Some("alice".to_string()))
    }

    #[tokio::test]
    async fn test_chat_carries_user() {
        let mut f = fixture();
        f.relay
            .send_chat(&alice(), &AgentId::new("A1"), "hello".to_string())
            .await
            .unwrap();

        match f.agent_rx.try_recv().unwrap() {
            AgentOutbound::Chat { from, text } => {
                assert_eq!(from, "alice");
                assert_eq!(text, "hello");
            }
            other => panic!("Unexpected event: {:?}", other),
        }
        assert!(matches!(
            f.audit.events().as_slice(),
            [AuditEvent::OperatorChat { .. }]
        ));
    }

    #[tokio::test]
    async fn test_anonymous_chat_from_operator() {
        let mut f = fixture();
        let anon = Principal::new(Role::Operator, None);
        f.relay
            .send_chat(&anon, &AgentId::new("A1"), "hi".to_string())
            .await
            .unwrap();
        assert!(matches!(
            f.agent_rx.try_recv(),
            Ok(AgentOutbound::Chat { from, .. }) if from == "operator"
        ));
    }

    #[tokio::test]
    async fn test_offline_agent_reported() {
        let f = fixture();
        let offline = AgentId::new("B2");

        let err = f
            .relay
            .send_file(&alice(), &offline, "a.txt".to_string(), "aGk=".to_string())
            .await
            .unwrap_err();
        assert_eq!(err, RelayError::AgentOffline("B2".to_string()));

        assert!(f.relay.list_processes(&alice(), &offline).await.is_err());
        assert!(f
            .relay
            .signal_agent(&alice(), &offline, Value::Null)
            .await
            .is_err());
        assert!(f.audit.records().is_empty());
    }

    #[tokio::test]
    async fn test_process_list_response_broadcast() {
        let mut f = fixture();
        let (a, mut a_rx) = OperatorHandle::channel(ConnectionId::new(10));
        let (b, mut b_rx) = OperatorHandle::channel(ConnectionId::new(11));
        f.subscriptions.watch(&a, AgentId::new("A1"));
        f.subscriptions.watch(&b, AgentId::new("A1"));

        f.relay
            .list_processes(&alice(), &AgentId::new("A1"))
            .await
            .unwrap();
        assert!(matches!(f.agent_rx.try_recv(), Ok(AgentOutbound::ProcessList)));

        let delivered = f.relay.process_list_response(
            &AgentId::new("A1"),
            vec![ProcessInfo {
                image: "notepad.exe".to_string(),
                pid: Some(4242),
            }],
            None,
        );
        assert_eq!(delivered, 2);
        assert!(matches!(
            a_rx.try_recv(),
            Ok(OperatorOutbound::ProcessListResponse { .. })
        ));
        assert!(matches!(
            b_rx.try_recv(),
            Ok(OperatorOutbound::ProcessListResponse { .. })
        ));
    }

    #[tokio::test]
    async fn test_frame_without_watchers_is_dropped() {
        let f = fixture();
        assert_eq!(
            f.relay.agent_frame(&AgentId::new("A1"), "aGk=".to_string()),
            0
        );
    }
}
