//! Selective forwarding unit capability
//!
//! The relay never touches media. It asks an SFU for transports,
//! producers and consumers and keeps track of who owns them.

use async_trait::async_trait;
use ra_protocol::MediaKind;
use serde_json::Value;
use std::sync::Arc;

use crate::error::CapabilityError;

/// Options for creating a WebRTC transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportOptions {
    pub listen_ip: String,
    pub announced_ip: Option<String>,
    pub enable_udp: bool,
    pub enable_tcp: bool,
    pub prefer_udp: bool,
}

impl TransportOptions {
    /// UDP and TCP enabled, UDP preferred
    pub fn new(listen_ip: impl Into<String>, announced_ip: Option<String>) -> Self {
        Self {
            listen_ip: listen_ip.into(),
            announced_ip,
            enable_udp: true,
            enable_tcp: true,
            prefer_udp: true,
        }
    }
}

/// Negotiation parameters of a freshly created transport
#[derive(Debug, Clone, PartialEq)]
pub struct TransportParameters {
    pub ice_parameters: Value,
    pub ice_candidates: Value,
    pub dtls_parameters: Value,
}

/// Router-level SFU operations
#[async_trait]
pub trait Sfu: Send + Sync {
    /// RTP capabilities clients must load before producing or consuming
    fn rtp_capabilities(&self) -> Value;

    /// Create a WebRTC transport
    async fn create_webrtc_transport(
        &self,
        options: &TransportOptions,
    ) -> Result<Arc<dyn SfuTransport>, CapabilityError>;

    /// Whether a consumer with these capabilities can receive the producer
    fn can_consume(&self, producer_id: &str, rtp_capabilities: &Value) -> bool;

    /// Resolves once the underlying worker has died
    async fn worker_died(&self);
}

/// One WebRTC transport
#[async_trait]
pub trait SfuTransport: Send + Sync {
    fn id(&self) -> &str;

    fn parameters(&self) -> TransportParameters;

    /// Complete the DTLS handshake
    async fn connect(&self, dtls_parameters: Value) -> Result<(), CapabilityError>;

    async fn produce(
        &self,
        kind: MediaKind,
        rtp_parameters: Value,
    ) -> Result<Arc<dyn SfuProducer>, CapabilityError>;

    async fn consume(
        &self,
        producer_id: &str,
        rtp_capabilities: Value,
        paused: bool,
    ) -> Result<Arc<dyn SfuConsumer>, CapabilityError>;

    /// Close the transport and everything created on it
    fn close(&self);
}

pub trait SfuProducer: Send + Sync {
    fn id(&self) -> &str;

    fn kind(&self) -> MediaKind;

    fn close(&self);
}

#[async_trait]
pub trait SfuConsumer: Send + Sync {
    fn id(&self) -> &str;

    fn producer_id(&self) -> &str;

    fn kind(&self) -> MediaKind;

    fn rtp_parameters(&self) -> Value;

    fn is_paused(&self) -> bool;

    async fn resume(&self) -> Result<(), CapabilityError>;

    fn close(&self);
}
