//! Append-only audit sink capability

use async_trait::async_trait;
use ra_protocol::ActionStatus;
use serde::{Deserialize, Serialize};

use crate::error::CapabilityError;
use crate::time::current_time_millis;
use crate::types::Role;

/// Security-relevant event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditEvent {
    ServerStart {
        bind_address: String,
    },
    AgentConnect {
        identity: String,
        connection: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        peer: Option<String>,
    },
    AgentDisconnect {
        identity: String,
        connection: String,
    },
    /// A reconnect replaced a live registration
    AgentReplaced {
        identity: String,
        previous: String,
        connection: String,
    },
    InvalidAgentKey {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        identity: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        peer: Option<String>,
    },
    OperatorLogin {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user: Option<String>,
        role: Role,
    },
    OperatorWatch {
        identity: String,
        user: String,
    },
    OperatorChat {
        identity: String,
        user: String,
        text: String,
    },
    FileSent {
        identity: String,
        user: String,
        filename: String,
        bytes: usize,
    },
    ProcessListRequest {
        identity: String,
        user: String,
    },
    /// One transition of a privileged action
    PrivilegedAction {
        request_id: u64,
        identity: String,
        pid: u32,
        user: String,
        role: Role,
        state: ActionStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

impl AuditEvent {
    /// Event name as written to the log
    pub fn name(&self) -> &'static str {
        match self {
            AuditEvent::ServerStart { .. } => "server_start",
            AuditEvent::AgentConnect { .. } => "agent_connect",
            AuditEvent::AgentDisconnect { .. } => "agent_disconnect",
            AuditEvent::AgentReplaced { .. } => "agent_replaced",
            AuditEvent::InvalidAgentKey { .. } => "invalid_agent_key",
            AuditEvent::OperatorLogin { .. } => "operator_login",
            AuditEvent::OperatorWatch { .. } => "operator_watch",
            AuditEvent::OperatorChat { .. } => "operator_chat",
            AuditEvent::FileSent { .. } => "file_sent",
            AuditEvent::ProcessListRequest { .. } => "process_list_request",
            AuditEvent::PrivilegedAction { .. } => "privileged_action",
        }
    }
}

/// Timestamped audit event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Milliseconds since the Unix epoch
    pub time: u64,
    #[serde(flatten)]
    pub event: AuditEvent,
}

impl AuditRecord {
    pub fn now(event: AuditEvent) -> Self {
        Self {
            time: current_time_millis(),
            event,
        }
    }
}

/// Destination for audit records
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, record: AuditRecord) -> Result<(), CapabilityError>;
}
