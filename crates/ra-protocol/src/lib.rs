//! ra-protocol: Wire protocol for the remote-admin relay
//!
//! Agents and operators exchange JSON events over WebSocket text frames.
//! Every event is an object tagged by a `"type"` field carrying the event
//! name (`frame`, `process:kill`, `webrtc:signal`, ...). Media signaling
//! requests travel inside a `media` event and are answered by exactly one
//! `media:response` with the same `request_id`.

pub mod codec;
pub mod error;
pub mod media;
pub mod message;

pub use codec::{decode, encode, MAX_MESSAGE_SIZE};
pub use error::ProtocolError;
pub use media::{
    ConsumerDescriptor, MediaKind, MediaReply, MediaRequest, TransportDescriptor, TransportRole,
};
pub use message::{
    ActionStatus, AgentInbound, AgentOutbound, ErrorCode, FileReceiveResult, OperatorInbound,
    OperatorOutbound, ProcessInfo, WireError,
};
