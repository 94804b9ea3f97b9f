//! Global relay state
//!
//! Owns every component and performs the multi-component updates that
//! agent and operator lifecycle events require.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

use ra_core::config::RelayConfig;
use ra_core::traits::{AuditEvent, Directory, Sfu, TransportOptions};
use ra_core::types::ConnectionIdAllocator;
use ra_core::{AgentId, ConnectionId};
use ra_protocol::OperatorOutbound;

use crate::audit::AuditLog;
use crate::auth::{AgentKey, LoginService, StaticDirectory, TokenAuthority};
use crate::connection::{AgentConnection, AgentHandle, OperatorHandle};
use crate::coordinator::StateCoordinator;
use crate::media::MediaSessionManager;
use crate::privileged::PrivilegedActionCoordinator;
use crate::relay::CommandRelay;
use crate::subscription::SubscriptionIndex;

/// Global state for the relay daemon
pub struct RelayState {
    pub config: RelayConfig,
    pub coordinator: Arc<StateCoordinator>,
    pub subscriptions: Arc<SubscriptionIndex>,
    pub media: Arc<MediaSessionManager>,
    pub relay: CommandRelay,
    pub actions: PrivilegedActionCoordinator,
    pub tokens: Arc<TokenAuthority>,
    pub agent_key: AgentKey,
    pub login: LoginService,
    pub audit: AuditLog,
    pub sfu: Arc<dyn Sfu>,
    connection_ids: ConnectionIdAllocator,
    started: Instant,
}

impl RelayState {
    /// Build the relay around an SFU; the directory comes from config
    pub fn new(config: RelayConfig, sfu: Arc<dyn Sfu>, audit: AuditLog) -> Self {
        let directory: Option<Arc<dyn Directory>> = if config.auth.use_directory {
            Some(Arc::new(StaticDirectory::new(config.auth.users.clone())))
        } else {
            None
        };
        Self::with_directory(config, sfu, directory, audit)
    }

    /// Build the relay with an explicit directory capability
    pub fn with_directory(
        config: RelayConfig,
        sfu: Arc<dyn Sfu>,
        directory: Option<Arc<dyn Directory>>,
        audit: AuditLog,
    ) -> Self {
        let coordinator = Arc::new(StateCoordinator::new());
        let subscriptions = Arc::new(SubscriptionIndex::new());
        let options = TransportOptions::new(
            config.media.listen_ip.clone(),
            config.media.announced_ip.clone(),
        );
        let media = Arc::new(MediaSessionManager::new(
            Arc::clone(&sfu),
            options,
            Arc::clone(&subscriptions),
        ));
        let tokens = Arc::new(TokenAuthority::new(
            &config.auth.jwt_secret,
            config.auth.token_ttl,
        ));

        Self {
            relay: CommandRelay::new(
                Arc::clone(&coordinator),
                Arc::clone(&subscriptions),
                audit.clone(),
            ),
            actions: PrivilegedActionCoordinator::new(Arc::clone(&coordinator), audit.clone()),
            login: LoginService::new(&config.auth, directory, Arc::clone(&tokens), audit.clone()),
            agent_key: AgentKey::new(&config.agent_key),
            coordinator,
            subscriptions,
            media,
            tokens,
            audit,
            sfu,
            config,
            connection_ids: ConnectionIdAllocator::new(),
            started: Instant::now(),
        }
    }

    pub fn next_connection_id(&self) -> ConnectionId {
        self.connection_ids.allocate()
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started.elapsed().as_secs()
    }

    /// Register an authenticated agent connection
    ///
    /// A live connection under the same identity is closed first, together
    /// with its media and outstanding privileged actions, all before the
    /// new connection becomes visible to forwards.
    pub async fn register_agent(
        &self,
        identity: AgentId,
        handle: AgentHandle,
        peer: Option<SocketAddr>,
    ) -> Arc<AgentConnection> {
        let connection_id = handle.id();
        let (current, abandoned, previous) = {
            let _lock = self.coordinator.write().await;
            let (current, previous) = self.coordinator.agents.insert(AgentConnection::new(
                identity.clone(),
                handle,
                peer,
            ));

            let mut abandoned = Vec::new();
            if let Some(previous) = &previous {
                info!(
                    "Agent {} reconnected on {}, replacing {}",
                    identity,
                    connection_id,
                    previous.connection_id()
                );
                previous.handle.close();
                self.media.close_connection(previous.connection_id()).await;
                abandoned = self.actions.fail_for_agent(&identity);
            }

            self.media.attach(connection_id, Some(identity.clone()));
            self.subscriptions.publish(
                &identity,
                OperatorOutbound::AgentOnline {
                    identity: identity.to_string(),
                },
            );
            (current, abandoned, previous.map(|p| p.connection_id()))
        };

        self.actions.record_all(&abandoned).await;
        if let Some(previous) = previous {
            self.audit
                .emit(AuditEvent::AgentReplaced {
                    identity: identity.to_string(),
                    previous: previous.to_string(),
                    connection: connection_id.to_string(),
                })
                .await;
        }
        self.audit
            .emit(AuditEvent::AgentConnect {
                identity: identity.to_string(),
                connection: connection_id.to_string(),
                peer: peer.map(|p| p.to_string()),
            })
            .await;
        current
    }

    /// Tear down an agent connection
    ///
    /// Removes the registry entry only if `connection` is still the one
    /// registered; a connection that was already replaced only releases
    /// its own media. Returns whether the registration was removed.
    pub async fn disconnect_agent(&self, identity: &AgentId, connection: ConnectionId) -> bool {
        let (removed, abandoned) = {
            let _lock = self.coordinator.write().await;
            match self.coordinator.agents.remove_if_current(identity, connection) {
                Some(_) => {
                    self.media.close_connection(connection).await;
                    let abandoned = self.actions.fail_for_agent(identity);
                    self.subscriptions.publish(
                        identity,
                        OperatorOutbound::AgentOffline {
                            identity: identity.to_string(),
                        },
                    );
                    (true, abandoned)
                }
                None => {
                    self.media.close_connection(connection).await;
                    (false, Vec::new())
                }
            }
        };

        self.actions.record_all(&abandoned).await;
        if removed {
            info!("Agent {} disconnected ({})", identity, connection);
            self.audit
                .emit(AuditEvent::AgentDisconnect {
                    identity: identity.to_string(),
                    connection: connection.to_string(),
                })
                .await;
        }
        removed
    }

    /// Release everything an operator connection owned
    pub async fn disconnect_operator(&self, operator: &OperatorHandle) {
        let watched = self.subscriptions.unsubscribe_all(operator.id());
        self.media.close_connection(operator.id()).await;
        let abandoned = self.actions.fail_for_requester(operator.id());
        self.actions.record_all(&abandoned).await;
        info!(
            "Operator {} disconnected (watched {} agents, {} actions abandoned)",
            operator.id(),
            watched.len(),
            abandoned.len()
        );
    }
}
