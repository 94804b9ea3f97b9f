//! Media signaling messages
//!
//! The relay does not negotiate codecs itself. DTLS parameters, RTP
//! parameters and RTP capabilities are opaque JSON handed to the SFU.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind of media carried by a producer or consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Audio,
    Video,
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaKind::Audio => write!(f, "audio"),
            MediaKind::Video => write!(f, "video"),
        }
    }
}

/// Direction of a WebRTC transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportRole {
    /// Carries producers (agent screen stream)
    Send,
    /// Carries consumers (operator viewer)
    Receive,
}

/// Media signaling request, tagged by `method`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method")]
pub enum MediaRequest {
    /// Create a WebRTC transport owned by the calling connection
    #[serde(rename = "createTransport")]
    CreateTransport { role: TransportRole },

    /// Complete the DTLS handshake of an owned transport
    #[serde(rename = "connectTransport")]
    ConnectTransport {
        transport_id: String,
        dtls_parameters: Value,
    },

    /// Start producing on an owned send transport
    #[serde(rename = "produce")]
    Produce {
        transport_id: String,
        kind: MediaKind,
        rtp_parameters: Value,
    },

    /// Consume a producer; the consumer starts paused
    #[serde(rename = "consume")]
    Consume {
        producer_id: String,
        rtp_capabilities: Value,
    },

    /// Snapshot of producers currently live for an agent identity
    #[serde(rename = "getProducers")]
    GetProducers { identity: String },

    /// Resume a paused consumer owned by the calling connection
    #[serde(rename = "resumeConsumer")]
    ResumeConsumer { consumer_id: String },
}

impl MediaRequest {
    /// Method name as it appears on the wire
    pub fn method(&self) -> &'static str {
        match self {
            MediaRequest::CreateTransport { .. } => "createTransport",
            MediaRequest::ConnectTransport { .. } => "connectTransport",
            MediaRequest::Produce { .. } => "produce",
            MediaRequest::Consume { .. } => "consume",
            MediaRequest::GetProducers { .. } => "getProducers",
            MediaRequest::ResumeConsumer { .. } => "resumeConsumer",
        }
    }
}

/// Description of a created transport returned to its owner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportDescriptor {
    pub id: String,
    pub role: TransportRole,
    pub ice_parameters: Value,
    pub ice_candidates: Value,
    pub dtls_parameters: Value,
}

/// Description of a created consumer returned to its owner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsumerDescriptor {
    pub id: String,
    pub producer_id: String,
    pub kind: MediaKind,
    pub rtp_parameters: Value,
    pub transport_id: String,
    pub paused: bool,
}

/// Successful result of a media request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reply", rename_all = "snake_case")]
pub enum MediaReply {
    Transport(TransportDescriptor),
    Connected,
    Produced { producer_id: String },
    Consumed(ConsumerDescriptor),
    Producers { producer_ids: Vec<String> },
    Resumed,
}
