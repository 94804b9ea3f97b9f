//! In-process SFU
//!
//! Implements the SFU capability without moving any media. Used for
//! development and tests: ids are generated, producers are tracked for
//! `can_consume`, consumer pause state is recorded, and failures can be
//! injected.

use async_trait::async_trait;
use dashmap::DashMap;
use rand::RngCore;
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

use ra_core::error::CapabilityError;
use ra_core::traits::{
    Sfu, SfuConsumer, SfuProducer, SfuTransport, TransportOptions, TransportParameters,
};
use ra_protocol::MediaKind;

struct Router {
    /// Unused ports of the RTC range; a transport's UDP and TCP candidates
    /// share one port
    free_ports: Mutex<BTreeSet<u16>>,
    producers: DashMap<String, MediaKind>,
    open_transports: AtomicUsize,
    fail_transports: AtomicBool,
    refuse_consume: AtomicBool,
    worker: CancellationToken,
}

/// SFU capability backed by in-memory state
#[derive(Clone)]
pub struct MemorySfu {
    router: Arc<Router>,
}

impl MemorySfu {
    pub fn new() -> Self {
        Self::with_ports(40000, 40100)
    }

    /// SFU allocating transport ports from `min..=max`
    pub fn with_ports(min: u16, max: u16) -> Self {
        Self {
            router: Arc::new(Router {
                free_ports: Mutex::new((min..=max.max(min)).collect()),
                producers: DashMap::new(),
                open_transports: AtomicUsize::new(0),
                fail_transports: AtomicBool::new(false),
                refuse_consume: AtomicBool::new(false),
                worker: CancellationToken::new(),
            }),
        }
    }

    /// Make subsequent transport creation fail
    pub fn fail_transports(&self, fail: bool) {
        self.router.fail_transports.store(fail, Ordering::SeqCst);
    }

    /// Make `can_consume` reject every request
    pub fn refuse_consume(&self, refuse: bool) {
        self.router.refuse_consume.store(refuse, Ordering::SeqCst);
    }

    /// Simulate death of the worker process
    pub fn kill_worker(&self) {
        self.router.worker.cancel();
    }

    /// Transports created and not yet closed
    pub fn open_transports(&self) -> usize {
        self.router.open_transports.load(Ordering::SeqCst)
    }

    /// Producers currently live on the router
    pub fn live_producers(&self) -> usize {
        self.router.producers.len()
    }
}

impl Default for MemorySfu {
    fn default() -> Self {
        Self::new()
    }
}

fn random_hex(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    hex::encode(buf)
}

#[async_trait]
impl Sfu for MemorySfu {
    fn rtp_capabilities(&self) -> Value {
        json!({
            "codecs": [
                {"kind": "audio", "mimeType": "audio/opus", "clockRate": 48000, "channels": 2},
                {"kind": "video", "mimeType": "video/VP8", "clockRate": 90000}
            ],
            "headerExtensions": []
        })
    }

    async fn create_webrtc_transport(
        &self,
        options: &TransportOptions,
    ) -> Result<Arc<dyn SfuTransport>, CapabilityError> {
        if self.router.worker.is_cancelled() {
            return Err(CapabilityError::WorkerDied);
        }
        if self.router.fail_transports.load(Ordering::SeqCst) {
            return Err(CapabilityError::Sfu("transport creation failed".to_string()));
        }
        let port = self
            .router
            .free_ports
            .lock()
            .ok()
            .and_then(|mut free| free.pop_first())
            .ok_or_else(|| CapabilityError::Sfu("no free port in range".to_string()))?;

        let ip = options
            .announced_ip
            .clone()
            .unwrap_or_else(|| options.listen_ip.clone());
        let udp_priority: u32 = if options.prefer_udp { 1076302079 } else { 1076276479 };
        let mut candidates = Vec::new();
        if options.enable_udp {
            candidates.push(json!({
                "foundation": "udpcandidate", "ip": ip, "port": port,
                "priority": udp_priority, "protocol": "udp", "type": "host"
            }));
        }
        if options.enable_tcp {
            candidates.push(json!({
                "foundation": "tcpcandidate", "ip": ip, "port": port,
                "priority": 1076276479u32, "protocol": "tcp", "type": "host", "tcpType": "passive"
            }));
        }

        let parameters = TransportParameters {
            ice_parameters: json!({
                "usernameFragment": random_hex(8),
                "password": random_hex(16),
                "iceLite": true
            }),
            ice_candidates: Value::Array(candidates),
            dtls_parameters: json!({
                "role": "auto",
                "fingerprints": [{"algorithm": "sha-256", "value": random_hex(32)}]
            }),
        };

        self.router.open_transports.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MemoryTransport {
            id: uuid::Uuid::new_v4().to_string(),
            router: Arc::clone(&self.router),
            port,
            parameters,
            connected: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            producers: Mutex::new(Vec::new()),
        }))
    }

    fn can_consume(&self, producer_id: &str, rtp_capabilities: &Value) -> bool {
        !self.router.refuse_consume.load(Ordering::SeqCst)
            && self.router.producers.contains_key(producer_id)
            && rtp_capabilities.get("codecs").map_or(false, Value::is_array)
    }

    async fn worker_died(&self) {
        self.router.worker.cancelled().await;
    }
}

struct MemoryTransport {
    id: String,
    router: Arc<Router>,
    port: u16,
    parameters: TransportParameters,
    connected: AtomicBool,
    closed: AtomicBool,
    producers: Mutex<Vec<String>>,
}

impl MemoryTransport {
    fn ensure_open(&self) -> Result<(), CapabilityError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(CapabilityError::Sfu(format!("transport {} closed", self.id)));
        }
        Ok(())
    }
}

#[async_trait]
impl SfuTransport for MemoryTransport {
    fn id(&self) -> &str {
        &self.id
    }

    fn parameters(&self) -> TransportParameters {
        self.parameters.clone()
    }

    async fn connect(&self, dtls_parameters: Value) -> Result<(), CapabilityError> {
        self.ensure_open()?;
        if !dtls_parameters.is_object() {
            return Err(CapabilityError::Sfu("invalid dtlsParameters".to_string()));
        }
        if self.connected.swap(true, Ordering::SeqCst) {
            return Err(CapabilityError::Sfu("connect() already called".to_string()));
        }
        Ok(())
    }

    async fn produce(
        &self,
        kind: MediaKind,
        _rtp_parameters: Value,
    ) -> Result<Arc<dyn SfuProducer>, CapabilityError> {
        self.ensure_open()?;
        let id = uuid::Uuid::new_v4().to_string();
        self.router.producers.insert(id.clone(), kind);
        if let Ok(mut producers) = self.producers.lock() {
            producers.push(id.clone());
        }
        Ok(Arc::new(MemoryProducer {
            id,
            kind,
            router: Arc::clone(&self.router),
        }))
    }

    async fn consume(
        &self,
        producer_id: &str,
        _rtp_capabilities: Value,
        paused: bool,
    ) -> Result<Arc<dyn SfuConsumer>, CapabilityError> {
        self.ensure_open()?;
        let kind = self
            .router
            .producers
            .get(producer_id)
            .map(|k| *k)
            .ok_or_else(|| CapabilityError::Sfu(format!("producer {} not found", producer_id)))?;

        Ok(Arc::new(MemoryConsumer {
            id: uuid::Uuid::new_v4().to_string(),
            producer_id: producer_id.to_string(),
            kind,
            paused: AtomicBool::new(paused),
            closed: AtomicBool::new(false),
        }))
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Ok(producers) = self.producers.lock() {
            for id in producers.iter() {
                self.router.producers.remove(id);
            }
        }
        if let Ok(mut free) = self.router.free_ports.lock() {
            free.insert(self.port);
        }
        self.router.open_transports.fetch_sub(1, Ordering::SeqCst);
    }
}

struct MemoryProducer {
    id: String,
    kind: MediaKind,
    router: Arc<Router>,
}

impl SfuProducer for MemoryProducer {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn close(&self) {
        self.router.producers.remove(&self.id);
    }
}

struct MemoryConsumer {
    id: String,
    producer_id: String,
    kind: MediaKind,
    paused: AtomicBool,
    closed: AtomicBool,
}

#[async_trait]
impl SfuConsumer for MemoryConsumer {
    fn id(&self) -> &str {
        &self.id
    }

    fn producer_id(&self) -> &str {
        &self.producer_id
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn rtp_parameters(&self) -> Value {
        let (mime, clock) = match self.kind {
            MediaKind::Audio => ("audio/opus", 48000),
            MediaKind::Video => ("video/VP8", 90000),
        };
        json!({
            "codecs": [{"mimeType": mime, "clockRate": clock, "payloadType": 101}],
            "encodings": [{"ssrc": rand::random::<u32>()}]
        })
    }

    fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    async fn resume(&self) -> Result<(), CapabilityError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(CapabilityError::Sfu(format!("consumer {} closed", self.id)));
        }
        self.paused.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
