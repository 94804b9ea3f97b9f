//! Media session manager
//!
//! Single writer of transport, producer and consumer ownership. Every
//! transport belongs to exactly one connection; producers are indexed by
//! the agent identity that created them so operators can resolve "the
//! stream for agent X" across agent reconnects.
//!
//! Per-connection state sits behind its own `tokio::sync::Mutex`, held
//! across SFU calls. Operations on different connections never wait on
//! each other, and `close_connection` never locks another connection's
//! session.

use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use ra_core::error::MediaError;
use ra_core::traits::{Sfu, SfuConsumer, SfuProducer, SfuTransport, TransportOptions};
use ra_core::{AgentId, ConnectionId};
use ra_protocol::{
    ConsumerDescriptor, MediaKind, OperatorOutbound, TransportDescriptor, TransportRole,
};
use serde_json::Value;

use crate::subscription::SubscriptionIndex;

struct OwnedTransport {
    transport: Arc<dyn SfuTransport>,
    role: TransportRole,
}

/// Media state owned by one connection
struct ConnectionMedia {
    /// Set for agent connections
    agent: Option<AgentId>,
    transports: HashMap<String, OwnedTransport>,
    producers: Vec<String>,
    consumers: Vec<String>,
    closed: bool,
}

impl ConnectionMedia {
    fn receive_transport(&self) -> Option<Arc<dyn SfuTransport>> {
        self.transports
            .values()
            .find(|t| t.role == TransportRole::Receive)
            .map(|t| Arc::clone(&t.transport))
    }

    fn transport(&self, transport_id: &str) -> Result<Arc<dyn SfuTransport>, MediaError> {
        self.transports
            .get(transport_id)
            .map(|t| Arc::clone(&t.transport))
            .ok_or_else(|| MediaError::TransportNotFound(transport_id.to_string()))
    }
}

struct ProducerEntry {
    producer: Arc<dyn SfuProducer>,
    agent: Option<AgentId>,
    connection: ConnectionId,
}

struct ConsumerEntry {
    consumer: Arc<dyn SfuConsumer>,
    connection: ConnectionId,
    producer_id: String,
}

/// Counts of live media objects
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct MediaStats {
    pub sessions: usize,
    pub producers: usize,
    pub consumers: usize,
}

/// Owns transport/producer/consumer lifecycle per connection and per agent
pub struct MediaSessionManager {
    sfu: Arc<dyn Sfu>,
    options: TransportOptions,
    subscriptions: Arc<SubscriptionIndex>,
    sessions: DashMap<ConnectionId, Arc<Mutex<ConnectionMedia>>>,
    producers: DashMap<String, ProducerEntry>,
    agent_producers: DashMap<AgentId, Vec<String>>,
    consumers: DashMap<String, ConsumerEntry>,
}

impl MediaSessionManager {
    pub fn new(
        sfu: Arc<dyn Sfu>,
        options: TransportOptions,
        subscriptions: Arc<SubscriptionIndex>,
    ) -> Self {
        Self {
            sfu,
            options,
            subscriptions,
            sessions: DashMap::new(),
            producers: DashMap::new(),
            agent_producers: DashMap::new(),
            consumers: DashMap::new(),
        }
    }

    /// RTP capabilities pushed to every media-capable connection
    pub fn rtp_capabilities(&self) -> Value {
        self.sfu.rtp_capabilities()
    }

    /// Open a media session for a connection; `agent` is set for agents
    pub fn attach(&self, connection: ConnectionId, agent: Option<AgentId>) {
        self.sessions.entry(connection).or_insert_with(|| {
            Arc::new(Mutex::new(ConnectionMedia {
                agent,
                transports: HashMap::new(),
                producers: Vec::new(),
                consumers: Vec::new(),
                closed: false,
            }))
        });
    }

    fn session(&self, connection: ConnectionId) -> Result<Arc<Mutex<ConnectionMedia>>, MediaError> {
        self.sessions
            .get(&connection)
            .map(|s| Arc::clone(&s))
            .ok_or(MediaError::ConnectionClosed)
    }

    async fn new_transport(&self) -> Result<Arc<dyn SfuTransport>, MediaError> {
        self.sfu
            .create_webrtc_transport(&self.options)
            .await
            .map_err(|e| MediaError::TransportCreationFailed(e.to_string()))
    }

    /// Create a transport owned by `connection`
    pub async fn create_transport(
        &self,
        connection: ConnectionId,
        role: TransportRole,
    ) -> Result<TransportDescriptor, MediaError> {
        let session = self.session(connection)?;
        let mut media = session.lock().await;
        if media.closed {
            return Err(MediaError::ConnectionClosed);
        }

        let transport = self.new_transport().await?;
        let parameters = transport.parameters();
        let descriptor = TransportDescriptor {
            id: transport.id().to_string(),
            role,
            ice_parameters: parameters.ice_parameters,
            ice_candidates: parameters.ice_candidates,
            dtls_parameters: parameters.dtls_parameters,
        };

        debug!("Created {:?} transport {} for {}", role, descriptor.id, connection);
        media
            .transports
            .insert(descriptor.id.clone(), OwnedTransport { transport, role });
        Ok(descriptor)
    }

    /// Complete DTLS on a transport owned by `connection`
    pub async fn connect_transport(
        &self,
        connection: ConnectionId,
        transport_id: &str,
        dtls_parameters: Value,
    ) -> Result<(), MediaError> {
        let session = self.session(connection)?;
        let media = session.lock().await;
        if media.closed {
            return Err(MediaError::ConnectionClosed);
        }

        let transport = media.transport(transport_id)?;
        transport.connect(dtls_parameters).await?;
        Ok(())
    }

    /// Produce on a transport owned by `connection`
    ///
    /// Producers of agent connections are indexed under the agent identity
    /// and announced to its subscribers with `newProducer`.
    pub async fn produce(
        &self,
        connection: ConnectionId,
        transport_id: &str,
        kind: MediaKind,
        rtp_parameters: Value,
    ) -> Result<String, MediaError> {
        let session = self.session(connection)?;
        let mut media = session.lock().await;
        if media.closed {
            return Err(MediaError::ConnectionClosed);
        }

        let transport = media.transport(transport_id)?;
        let producer = transport.produce(kind, rtp_parameters).await?;
        let producer_id = producer.id().to_string();
        let agent = media.agent.clone();

        media.producers.push(producer_id.clone());
        self.producers.insert(
            producer_id.clone(),
            ProducerEntry {
                producer,
                agent: agent.clone(),
                connection,
            },
        );

        if let Some(agent) = agent {
            self.agent_producers
                .entry(agent.clone())
                .or_default()
                .push(producer_id.clone());

            info!("Agent {} producing {} ({})", agent, producer_id, kind);
            self.subscriptions.publish(
                &agent,
                OperatorOutbound::NewProducer {
                    identity: agent.to_string(),
                    producer_id: producer_id.clone(),
                    kind,
                },
            );
        }

        Ok(producer_id)
    }

    /// Snapshot of producers live for an agent identity
    pub fn get_producers(&self, identity: &AgentId) -> Vec<String> {
        self.agent_producers
            .get(identity)
            .map(|p| p.value().clone())
            .unwrap_or_default()
    }

    /// Create a paused consumer of `producer_id` for `connection`
    ///
    /// Reuses the connection's receive transport, creating one if it has
    /// none.
    pub async fn consume(
        &self,
        connection: ConnectionId,
        producer_id: &str,
        rtp_capabilities: Value,
    ) -> Result<ConsumerDescriptor, MediaError> {
        if !self.producers.contains_key(producer_id) {
            return Err(MediaError::ProducerNotFound(producer_id.to_string()));
        }
        if !self.sfu.can_consume(producer_id, &rtp_capabilities) {
            return Err(MediaError::CannotConsume(producer_id.to_string()));
        }

        let session = self.session(connection)?;
        let mut media = session.lock().await;
        if media.closed {
            return Err(MediaError::ConnectionClosed);
        }

        let transport = match media.receive_transport() {
            Some(transport) => transport,
            None => {
                let transport = self.new_transport().await?;
                media.transports.insert(
                    transport.id().to_string(),
                    OwnedTransport {
                        transport: Arc::clone(&transport),
                        role: TransportRole::Receive,
                    },
                );
                transport
            }
        };

        let consumer = transport.consume(producer_id, rtp_capabilities, true).await?;
        let consumer_id = consumer.id().to_string();
        self.consumers.insert(
            consumer_id.clone(),
            ConsumerEntry {
                consumer: Arc::clone(&consumer),
                connection,
                producer_id: producer_id.to_string(),
            },
        );

        // The owner may have disconnected while we awaited the SFU; its
        // cleanup sweep has then either seen this entry or we must undo it.
        if !self.producers.contains_key(producer_id) {
            self.consumers.remove(&consumer_id);
            consumer.close();
            return Err(MediaError::ProducerNotFound(producer_id.to_string()));
        }

        media.consumers.push(consumer_id.clone());
        debug!("{} consuming {} via {}", connection, producer_id, consumer_id);

        Ok(ConsumerDescriptor {
            id: consumer_id,
            producer_id: producer_id.to_string(),
            kind: consumer.kind(),
            rtp_parameters: consumer.rtp_parameters(),
            transport_id: transport.id().to_string(),
            paused: consumer.is_paused(),
        })
    }

    /// Resume a paused consumer owned by `connection`
    pub async fn resume(&self, connection: ConnectionId, consumer_id: &str) -> Result<(), MediaError> {
        let consumer = self
            .consumers
            .get(consumer_id)
            .filter(|entry| entry.connection == connection)
            .map(|entry| Arc::clone(&entry.consumer))
            .ok_or_else(|| MediaError::ConsumerNotFound(consumer_id.to_string()))?;

        consumer.resume().await?;
        Ok(())
    }

    /// Tear down every media object owned by `connection`
    ///
    /// Consumers elsewhere that referenced this connection's producers are
    /// closed too, and subscribers learn of each removed producer through
    /// `producerClosed`. Safe to call more than once. Returns the ids of
    /// the producers that were closed.
    pub async fn close_connection(&self, connection: ConnectionId) -> Vec<String> {
        let Some((_, session)) = self.sessions.remove(&connection) else {
            return Vec::new();
        };

        let mut media = session.lock().await;
        if media.closed {
            return Vec::new();
        }
        media.closed = true;
        let producer_ids = std::mem::take(&mut media.producers);
        let consumer_ids = std::mem::take(&mut media.consumers);
        let transports: Vec<_> = media.transports.drain().map(|(_, t)| t.transport).collect();
        drop(media);

        for consumer_id in consumer_ids {
            if let Some((_, entry)) = self.consumers.remove(&consumer_id) {
                entry.consumer.close();
            }
        }

        let mut closed = Vec::with_capacity(producer_ids.len());
        for producer_id in producer_ids {
            let Some((_, entry)) = self.producers.remove(&producer_id) else {
                continue;
            };
            entry.producer.close();

            let orphaned: Vec<String> = self
                .consumers
                .iter()
                .filter(|c| c.producer_id == producer_id)
                .map(|c| c.key().clone())
                .collect();
            for consumer_id in orphaned {
                if let Some((_, c)) = self.consumers.remove(&consumer_id) {
                    c.consumer.close();
                }
            }

            if let Some(agent) = &entry.agent {
                if let Some(mut list) = self.agent_producers.get_mut(agent) {
                    list.retain(|p| p != &producer_id);
                }
                self.agent_producers.remove_if(agent, |_, list| list.is_empty());

                self.subscriptions.publish(
                    agent,
                    OperatorOutbound::ProducerClosed {
                        identity: agent.to_string(),
                        producer_id: producer_id.clone(),
                    },
                );
            }
            debug!("Closed producer {} of {}", producer_id, entry.connection);
            closed.push(producer_id);
        }

        let transport_count = transports.len();
        for transport in transports {
            transport.close();
        }

        if transport_count > 0 || !closed.is_empty() {
            info!(
                "Closed media for {}: {} transports, {} producers",
                connection,
                transport_count,
                closed.len()
            );
        }
        closed
    }

    pub fn stats(&self) -> MediaStats {
        MediaStats {
            sessions: self.sessions.len(),
            producers: self.producers.len(),
            consumers: self.consumers.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::OperatorHandle;
    use crate::media::MemorySfu;
    use serde_json::json;

    const AGENT: ConnectionId = ConnectionId(1);
    const VIEWER: ConnectionId = ConnectionId(2);

    fn manager(sfu: &MemorySfu) -> (MediaSessionManager, Arc<SubscriptionIndex>) {
        let subscriptions = Arc::new(SubscriptionIndex::new());
        let manager = MediaSessionManager::new(
            Arc::new(sfu.clone()),
            TransportOptions::new("127.0.0.1", None),
            Arc::clone(&subscriptions),
        );
        manager.attach(AGENT, Some(AgentId::new("A1")));
        manager.attach(VIEWER, None);
        (manager, subscriptions)
    }

    fn caps() -> Value {
        json!({"codecs": []})
    }

    async fn start_stream(manager: &MediaSessionManager) -> String {
        let transport = manager
            .create_transport(AGENT, TransportRole::Send)
            .await
            .unwrap();
        manager
            .connect_transport(AGENT, &transport.id, json!({"role": "client"}))
            .await
            .unwrap();
        manager
            .produce(AGENT, &transport.id, MediaKind::Video, json!({}))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_round_trip() {
        let sfu = MemorySfu::new();
        let (manager, _) = manager(&sfu);

        let producer_id = start_stream(&manager).await;
        assert_eq!(manager.get_producers(&AgentId::new("A1")), vec![producer_id.clone()]);

        let consumer = manager.consume(VIEWER, &producer_id, caps()).await.unwrap();
        assert!(consumer.paused);
        assert_eq!(consumer.producer_id, producer_id);
        assert_eq!(consumer.kind, MediaKind::Video);

        manager.resume(VIEWER, &consumer.id).await.unwrap();
        assert_eq!(
            manager.stats(),
            MediaStats {
                sessions: 2,
                producers: 1,
                consumers: 1
            }
        );
    }

    #[tokio::test]
    async fn test_new_producer_announced_to_subscribers() {
        let sfu = MemorySfu::new();
        let (manager, subscriptions) = manager(&sfu);
        let (watcher, mut rx) = OperatorHandle::channel(VIEWER);
        subscriptions.watch(&watcher, AgentId::new("A1"));

        let producer_id = start_stream(&manager).await;

        match rx.try_recv().unwrap() {
            OperatorOutbound::NewProducer {
                identity,
                producer_id: announced,
                kind,
            } => {
                assert_eq!(identity, "A1");
                assert_eq!(announced, producer_id);
                assert_eq!(kind, MediaKind::Video);
            }
            other => panic!("Unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_foreign_transport_not_found() {
        let sfu = MemorySfu::new();
        let (manager, _) = manager(&sfu);
        let transport = manager
            .create_transport(AGENT, TransportRole::Send)
            .await
            .unwrap();

        let err = manager
            .connect_transport(VIEWER, &transport.id, json!({}))
            .await
            .unwrap_err();
        assert_eq!(err, MediaError::TransportNotFound(transport.id.clone()));

        let err = manager
            .produce(VIEWER, &transport.id, MediaKind::Video, json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::TransportNotFound(_)));
    }

    #[tokio::test]
    async fn test_transport_creation_failure_leaves_connection_usable() {
        let sfu = MemorySfu::new();
        let (manager, _) = manager(&sfu);

        sfu.fail_transports(true);
        let err = manager
            .create_transport(AGENT, TransportRole::Send)
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::TransportCreationFailed(_)));

        sfu.fail_transports(false);
        assert!(manager.create_transport(AGENT, TransportRole::Send).await.is_ok());
    }

    #[tokio::test]
    async fn test_cannot_consume() {
        let sfu = MemorySfu::new();
        let (manager, _) = manager(&sfu);
        let producer_id = start_stream(&manager).await;

        sfu.refuse_consume(true);
        let err = manager.consume(VIEWER, &producer_id, caps()).await.unwrap_err();
        assert_eq!(err, MediaError::CannotConsume(producer_id));
        assert_eq!(manager.stats().consumers, 0);
    }

    #[tokio::test]
    async fn test_consume_reuses_receive_transport() {
        let sfu = MemorySfu::new();
        let (manager, _) = manager(&sfu);
        let producer_id = start_stream(&manager).await;

        let recv = manager
            .create_transport(VIEWER, TransportRole::Receive)
            .await
            .unwrap();
        let first = manager.consume(VIEWER, &producer_id, caps()).await.unwrap();
        let second = manager.consume(VIEWER, &producer_id, caps()).await.unwrap();

        assert_eq!(first.transport_id, recv.id);
        assert_eq!(second.transport_id, recv.id);
        assert_eq!(sfu.open_transports(), 2);
    }

    #[tokio::test]
    async fn test_resume_requires_ownership() {
        let sfu = MemorySfu::new();
        let (manager, _) = manager(&sfu);
        let producer_id = start_stream(&manager).await;
        let consumer = manager.consume(VIEWER, &producer_id, caps()).await.unwrap();

        let err = manager.resume(AGENT, &consumer.id).await.unwrap_err();
        assert!(matches!(err, MediaError::ConsumerNotFound(_)));

        let err = manager.resume(VIEWER, "unknown").await.unwrap_err();
        assert_eq!(err.code(), ra_protocol::ErrorCode::ConsumerNotFound);
    }

    #[tokio::test]
    async fn test_close_connection_cleans_up_everything() {
        let sfu = MemorySfu::new();
        let (manager, subscriptions) = manager(&sfu);
        let (watcher, mut rx) = OperatorHandle::channel(ConnectionId(9));
        subscriptions.watch(&watcher, AgentId::new("A1"));

        let producer_id = start_stream(&manager).await;
        let consumer = manager.consume(VIEWER, &producer_id, caps()).await.unwrap();
        let _ = rx.try_recv();

        let closed = manager.close_connection(AGENT).await;
        assert_eq!(closed, vec![producer_id.clone()]);
        assert!(manager.get_producers(&AgentId::new("A1")).is_empty());
        assert_eq!(manager.stats().producers, 0);
        assert_eq!(manager.stats().consumers, 0);
        assert_eq!(sfu.live_producers(), 0);

        assert!(matches!(
            rx.try_recv(),
            Ok(OperatorOutbound::ProducerClosed { .. })
        ));

        let err = manager.consume(VIEWER, &producer_id, caps()).await.unwrap_err();
        assert!(matches!(err, MediaError::ProducerNotFound(_)));
        let err = manager.resume(VIEWER, &consumer.id).await.unwrap_err();
        assert!(matches!(err, MediaError::ConsumerNotFound(_)));

        assert!(manager.close_connection(AGENT).await.is_empty());
        let err = manager
            .create_transport(AGENT, TransportRole::Send)
            .await
            .unwrap_err();
        assert_eq!(err, MediaError::ConnectionClosed);
    }

    #[tokio::test]
    async fn test_operator_close_keeps_agent_stream() {
        let sfu = MemorySfu::new();
        let (manager, _) = manager(&sfu);
        let producer_id = start_stream(&manager).await;
        manager.consume(VIEWER, &producer_id, caps()).await.unwrap();

        assert!(manager.close_connection(VIEWER).await.is_empty());
        assert_eq!(manager.get_producers(&AgentId::new("A1")), vec![producer_id]);
        assert_eq!(manager.stats().consumers, 0);
        assert_eq!(sfu.open_transports(), 1);
    }
}
