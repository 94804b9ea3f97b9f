//! Event types for the remote-admin protocol
//!
//! Four directions are modelled as separate enums so that an agent can
//! never submit an operator-only event (and vice versa) past the decoder:
//!
//! - [`AgentInbound`]: agent -> relay
//! - [`AgentOutbound`]: relay -> agent
//! - [`OperatorInbound`]: operator -> relay
//! - [`OperatorOutbound`]: relay -> operator
//!
//! # Message Flow
//!
//! 1. Agent connects to `/agent?key=..&id=..`, relay registers it and
//!    pushes `routerRtpCapabilities`
//! 2. Operator connects to `/operator` with a bearer token and sends
//!    `watch:agent`
//! 3. Agent `frame`, `process:list:response`, `chat:message` and
//!    `webrtc:signal` events fan out to every watching operator
//! 4. Operator `process:kill` is forwarded to the agent, which asks its
//!    local user and answers with `process:kill:response`; the requesting
//!    operator receives `process:kill:result`

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::media::{MediaKind, MediaReply, MediaRequest};

/// Structured reason code sent to a connection whose action was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Shared secret mismatch on agent handshake
    InvalidAgentKey,
    /// Missing or invalid operator credential
    Unauthorized,
    /// Valid session, insufficient role
    Forbidden,
    /// Target agent identity is not registered
    AgentOffline,
    /// A privileged action for the same target is still outstanding
    #[serde(rename = "AlreadyPending")]
    AlreadyPending,
    TransportNotFound,
    ProducerNotFound,
    ConsumerNotFound,
    CannotConsume,
    TransportCreationFailed,
    /// The connection's media session has been torn down
    ConnectionClosed,
    /// An external capability (SFU, directory) failed
    CapabilityError,
    /// Event could not be decoded
    InvalidMessage,
}

impl ErrorCode {
    /// Wire representation of the code
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidAgentKey => "invalid_agent_key",
            ErrorCode::Unauthorized => "unauthorized",
            ErrorCode::Forbidden => "forbidden",
            ErrorCode::AgentOffline => "agent_offline",
            ErrorCode::AlreadyPending => "AlreadyPending",
            ErrorCode::TransportNotFound => "transport_not_found",
            ErrorCode::ProducerNotFound => "producer_not_found",
            ErrorCode::ConsumerNotFound => "consumer_not_found",
            ErrorCode::CannotConsume => "cannot_consume",
            ErrorCode::TransportCreationFailed => "transport_creation_failed",
            ErrorCode::ConnectionClosed => "connection_closed",
            ErrorCode::CapabilityError => "capability_error",
            ErrorCode::InvalidMessage => "invalid_message",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error body carried by `error` events and failed `media:response`s
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireError {
    pub code: ErrorCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl WireError {
    pub fn new(code: ErrorCode) -> Self {
        Self {
            code,
            message: None,
        }
    }

    pub fn with_message(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: Some(message.into()),
        }
    }
}

/// Lifecycle status of a privileged action as reported to operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Requested,
    Forwarded,
    Completed,
    Denied,
    Rejected,
    Failed,
}

/// One row of an agent process listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessInfo {
    #[serde(default)]
    pub image: String,
    /// Absent when the agent could not parse the row's pid
    #[serde(default)]
    pub pid: Option<u32>,
}

/// Agent's answer to a `file:receive`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileReceiveResult {
    #[serde(default)]
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Events sent by an agent to the relay
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AgentInbound {
    /// Screen frame (base64 JPEG)
    #[serde(rename = "frame")]
    Frame { image: String },

    /// Opaque peer-to-peer signaling payload
    #[serde(rename = "webrtc:signal")]
    Signal { signal: Value },

    /// Answer to `process:list`
    #[serde(rename = "process:list:response")]
    ProcessListResponse {
        #[serde(default)]
        procs: Vec<ProcessInfo>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// Outcome of a `process:kill` after local confirmation
    #[serde(rename = "process:kill:response")]
    ProcessKillResponse {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pid: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        success: Option<bool>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        image: Option<String>,
    },

    /// Chat line typed by the agent's local user
    #[serde(rename = "chat:message")]
    Chat { text: String },

    /// Answer to `file:receive`
    #[serde(rename = "file:receive:response")]
    FileReceiveResponse {
        #[serde(flatten)]
        result: FileReceiveResult,
    },

    /// Media signaling request
    #[serde(rename = "media")]
    Media {
        request_id: u64,
        request: MediaRequest,
    },
}

/// Events sent by the relay to an agent
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AgentOutbound {
    #[serde(rename = "process:list")]
    ProcessList,

    #[serde(rename = "process:kill")]
    ProcessKill { request_id: u64, pid: u32 },

    #[serde(rename = "chat:message")]
    Chat { from: String, text: String },

    #[serde(rename = "file:receive")]
    FileReceive {
        filename: String,
        data: String,
        from: String,
    },

    #[serde(rename = "webrtc:signal")]
    Signal { signal: Value },

    #[serde(rename = "routerRtpCapabilities")]
    RouterRtpCapabilities { rtp_capabilities: Value },

    #[serde(rename = "media:response")]
    MediaResponse {
        request_id: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ok: Option<MediaReply>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<WireError>,
    },

    #[serde(rename = "error")]
    Error {
        code: ErrorCode,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}

/// Events sent by an operator to the relay
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OperatorInbound {
    #[serde(rename = "watch:agent")]
    Watch { identity: String },

    #[serde(rename = "unwatch:agent")]
    Unwatch { identity: String },

    #[serde(rename = "process:list")]
    ProcessList { identity: String },

    #[serde(rename = "process:kill")]
    ProcessKill { identity: String, pid: u32 },

    #[serde(rename = "chat:send")]
    Chat { identity: String, text: String },

    #[serde(rename = "file:send")]
    FileSend {
        identity: String,
        filename: String,
        data: String,
    },

    #[serde(rename = "webrtc:signal")]
    Signal { identity: String, signal: Value },

    #[serde(rename = "media")]
    Media {
        request_id: u64,
        request: MediaRequest,
    },
}

/// Events sent by the relay to an operator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OperatorOutbound {
    #[serde(rename = "frame")]
    Frame { identity: String, image: String },

    #[serde(rename = "process:list:response")]
    ProcessListResponse {
        identity: String,
        procs: Vec<ProcessInfo>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    #[serde(rename = "chat:message")]
    Chat {
        identity: String,
        from: String,
        text: String,
    },

    #[serde(rename = "file:receive:response")]
    FileReceiveResponse {
        identity: String,
        #[serde(flatten)]
        result: FileReceiveResult,
    },

    #[serde(rename = "webrtc:signal")]
    Signal { identity: String, signal: Value },

    #[serde(rename = "newProducer")]
    NewProducer {
        identity: String,
        producer_id: String,
        kind: MediaKind,
    },

    #[serde(rename = "producerClosed")]
    ProducerClosed {
        identity: String,
        producer_id: String,
    },

    #[serde(rename = "agent:online")]
    AgentOnline { identity: String },

    #[serde(rename = "agent:offline")]
    AgentOffline { identity: String },

    /// Privileged action forwarded to the agent, awaiting local confirmation
    #[serde(rename = "process:kill:accepted")]
    KillAccepted {
        request_id: u64,
        identity: String,
        pid: u32,
    },

    /// Terminal state of a privileged action
    #[serde(rename = "process:kill:result")]
    KillResult {
        request_id: u64,
        identity: String,
        pid: u32,
        state: ActionStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    #[serde(rename = "routerRtpCapabilities")]
    RouterRtpCapabilities { rtp_capabilities: Value },

    #[serde(rename = "media:response")]
    MediaResponse {
        request_id: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ok: Option<MediaReply>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<WireError>,
    },

    #[serde(rename = "error")]
    Error {
        code: ErrorCode,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}

impl OperatorOutbound {
    /// Build an `error` event from a reason code
    pub fn error(code: ErrorCode) -> Self {
        OperatorOutbound::Error {
            code,
            message: None,
        }
    }
}
