//! Core error types for the remote-admin relay
//!
//! Every domain error belongs to one [`ErrorKind`] of the failure
//! taxonomy and maps to a stable [`ErrorCode`] that is sent to the
//! requesting connection. Only authentication failures terminate a
//! connection; everything else rejects the single request.

use ra_protocol::{ErrorCode, ProtocolError, WireError};
use std::path::PathBuf;
use thiserror::Error;

/// Failure taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad shared secret or token; connection-terminating
    Authentication,
    /// Valid session, insufficient role; message-rejecting
    Authorization,
    /// Unknown transport, producer, consumer or connection
    NotFound,
    /// External SFU or credential call failed
    Capability,
    /// Target-side policy disallowed the action
    Policy,
    /// Target identity is not registered
    Offline,
    /// Malformed event
    Protocol,
}

/// Top-level error type for the relay
#[derive(Error, Debug)]
pub enum RaError {
    /// Protocol error
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Relay error
    #[error("Relay error: {0}")]
    Relay(#[from] RelayError),

    /// Media session error
    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    /// Privileged action error
    #[error("Action error: {0}")]
    Action(#[from] ActionError),

    /// Authentication error
    #[error("Auth error: {0}")]
    Auth(#[from] AuthError),

    /// External capability error
    #[error("Capability error: {0}")]
    Capability(#[from] CapabilityError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RaError {
    pub fn code(&self) -> ErrorCode {
        match self {
            RaError::Protocol(_) => ErrorCode::InvalidMessage,
            RaError::Relay(e) => e.code(),
            RaError::Media(e) => e.code(),
            RaError::Action(e) => e.code(),
            RaError::Auth(e) => e.code(),
            RaError::Capability(_) | RaError::Config(_) | RaError::Io(_) => {
                ErrorCode::CapabilityError
            }
        }
    }
}

/// Command relay errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
    /// Principal's role does not permit the action
    #[error("Forbidden")]
    Forbidden,

    /// Target agent is not registered
    #[error("Agent offline: {0}")]
    AgentOffline(String),
}

impl RelayError {
    pub fn code(&self) -> ErrorCode {
        match self {
            RelayError::Forbidden => ErrorCode::Forbidden,
            RelayError::AgentOffline(_) => ErrorCode::AgentOffline,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            RelayError::Forbidden => ErrorKind::Authorization,
            RelayError::AgentOffline(_) => ErrorKind::Offline,
        }
    }

    pub fn to_wire(&self) -> WireError {
        WireError::new(self.code())
    }
}

/// Media session errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MediaError {
    /// SFU refused or failed to create a transport
    #[error("Transport creation failed: {0}")]
    TransportCreationFailed(String),

    /// Transport is not owned by the calling connection
    #[error("Transport not found: {0}")]
    TransportNotFound(String),

    /// Producer is unknown or its owner has disconnected
    #[error("Producer not found: {0}")]
    ProducerNotFound(String),

    /// Consumer is unknown to this connection
    #[error("Consumer not found: {0}")]
    ConsumerNotFound(String),

    /// Capability negotiation rejected the producer/capabilities pair
    #[error("Cannot consume producer {0}")]
    CannotConsume(String),

    /// The connection's media session has been torn down
    #[error("Media session closed")]
    ConnectionClosed,

    /// The SFU call itself failed
    #[error("SFU error: {0}")]
    Capability(String),
}

impl MediaError {
    pub fn code(&self) -> ErrorCode {
        match self {
            MediaError::TransportCreationFailed(_) => ErrorCode::TransportCreationFailed,
            MediaError::TransportNotFound(_) => ErrorCode::TransportNotFound,
            MediaError::ProducerNotFound(_) => ErrorCode::ProducerNotFound,
            MediaError::ConsumerNotFound(_) => ErrorCode::ConsumerNotFound,
            MediaError::CannotConsume(_) => ErrorCode::CannotConsume,
            MediaError::ConnectionClosed => ErrorCode::ConnectionClosed,
            MediaError::Capability(_) => ErrorCode::CapabilityError,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            MediaError::TransportCreationFailed(_)
            | MediaError::CannotConsume(_)
            | MediaError::Capability(_) => ErrorKind::Capability,
            MediaError::TransportNotFound(_)
            | MediaError::ProducerNotFound(_)
            | MediaError::ConsumerNotFound(_)
            | MediaError::ConnectionClosed => ErrorKind::NotFound,
        }
    }

    /// Wire error; capability failures carry the SFU message as detail
    pub fn to_wire(&self) -> WireError {
        match self {
            MediaError::TransportCreationFailed(detail) | MediaError::Capability(detail) => {
                WireError::with_message(self.code(), detail.clone())
            }
            _ => WireError::new(self.code()),
        }
    }
}

impl From<CapabilityError> for MediaError {
    fn from(e: CapabilityError) -> Self {
        MediaError::Capability(e.to_string())
    }
}

/// Privileged action request errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ActionError {
    /// Role check failed; nothing reached the agent
    #[error("Forbidden")]
    Forbidden,

    /// Target agent is not registered
    #[error("Agent offline: {0}")]
    AgentOffline(String),

    /// A non-terminal request for the same (agent, pid) exists
    #[error("Request {existing} for {identity} pid {pid} is still pending")]
    AlreadyPending {
        identity: String,
        pid: u32,
        existing: u64,
    },
}

impl ActionError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ActionError::Forbidden => ErrorCode::Forbidden,
            ActionError::AgentOffline(_) => ErrorCode::AgentOffline,
            ActionError::AlreadyPending { .. } => ErrorCode::AlreadyPending,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ActionError::Forbidden => ErrorKind::Authorization,
            ActionError::AgentOffline(_) => ErrorKind::Offline,
            ActionError::AlreadyPending { .. } => ErrorKind::Policy,
        }
    }
}

/// Authentication errors (handled at the gateway)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// Agent shared secret mismatch
    #[error("Invalid agent key")]
    InvalidAgentKey,

    /// No bearer credential presented
    #[error("Missing token")]
    MissingToken,

    /// Credential failed verification
    #[error("Invalid token: {0}")]
    InvalidToken(String),

    /// Username/password rejected
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// Token could not be signed
    #[error("Failed to issue token: {0}")]
    Issue(String),
}

impl AuthError {
    pub fn code(&self) -> ErrorCode {
        match self {
            AuthError::InvalidAgentKey => ErrorCode::InvalidAgentKey,
            AuthError::MissingToken | AuthError::InvalidToken(_) | AuthError::InvalidCredentials => {
                ErrorCode::Unauthorized
            }
            AuthError::Issue(_) => ErrorCode::CapabilityError,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            AuthError::Issue(_) => ErrorKind::Capability,
            _ => ErrorKind::Authentication,
        }
    }
}

/// Failures of external collaborators
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CapabilityError {
    /// SFU call failed
    #[error("SFU call failed: {0}")]
    Sfu(String),

    /// SFU worker process died
    #[error("SFU worker died")]
    WorkerDied,

    /// Directory service lookup failed
    #[error("Directory error: {0}")]
    Directory(String),

    /// Directory rejected the credentials
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// Audit sink could not record
    #[error("Audit sink error: {0}")]
    Audit(String),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_taxonomy_kinds() {
        assert_eq!(RelayError::Forbidden.kind(), ErrorKind::Authorization);
        assert_eq!(
            RelayError::AgentOffline("A1".into()).kind(),
            ErrorKind::Offline
        );
        assert_eq!(
            MediaError::TransportNotFound("t".into()).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            MediaError::CannotConsume("p".into()).kind(),
            ErrorKind::Capability
        );
        assert_eq!(AuthError::InvalidAgentKey.kind(), ErrorKind::Authentication);
    }

    #[test]
    fn test_wire_codes() {
        assert_eq!(
            ActionError::AlreadyPending {
                identity: "A1".into(),
                pid: 1,
                existing: 9
            }
            .code()
            .as_str(),
            "AlreadyPending"
        );
        assert_eq!(AuthError::MissingToken.code(), ErrorCode::Unauthorized);
        assert_eq!(
            RaError::from(MediaError::ConsumerNotFound("c".into())).code(),
            ErrorCode::ConsumerNotFound
        );
    }

    #[test]
    fn test_capability_detail_is_not_leaked_for_not_found() {
        let wire = MediaError::TransportNotFound("internal-id".into()).to_wire();
        assert_eq!(wire.code, ErrorCode::TransportNotFound);
        assert!(wire.message.is_none());

        let wire = MediaError::TransportCreationFailed("port range exhausted".into()).to_wire();
        assert_eq!(wire.message.as_deref(), Some("port range exhausted"));
    }
}
