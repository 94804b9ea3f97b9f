//! Privileged action coordinator
//!
//! Enforces at most one non-terminal kill request per (agent, pid). A
//! duplicate while one is outstanding is rejected with `AlreadyPending`
//! and leaves the first request untouched, so the agent's local user is
//! never shown stacked confirmation prompts.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use ra_core::error::ActionError;
use ra_core::time::current_time_millis;
use ra_core::traits::AuditEvent;
use ra_core::types::ActionId;
use ra_core::{AgentId, ConnectionId, Permission, Principal, Role};
use ra_protocol::{ActionStatus, AgentOutbound, OperatorOutbound};

use super::state::{ActionEvent, ActionState, FailureReason};
use crate::audit::AuditLog;
use crate::connection::OperatorHandle;
use crate::coordinator::StateCoordinator;

struct PendingAction {
    identity: AgentId,
    pid: u32,
    principal: Principal,
    requester: OperatorHandle,
    state: ActionState,
    created_at: u64,
}

/// Snapshot of a privileged action, as audited and listed
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionSummary {
    pub request_id: u64,
    pub identity: String,
    pub pid: u32,
    pub user: String,
    pub role: Role,
    pub state: ActionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub created_at: u64,
}

/// Terminal result of an agent's kill response
#[derive(Debug, Clone, PartialEq)]
pub struct KillOutcome {
    pub request_id: ActionId,
    pub state: ActionState,
}

/// Kill-process state machine driver
pub struct PrivilegedActionCoordinator {
    coordinator: Arc<StateCoordinator>,
    audit: AuditLog,
    next_id: AtomicU64,
    requests: DashMap<ActionId, PendingAction>,
    /// Non-terminal request per (agent, pid)
    pending: DashMap<(AgentId, u32), ActionId>,
}

fn summarize(id: ActionId, action: &PendingAction) -> ActionSummary {
    ActionSummary {
        request_id: id.0,
        identity: action.identity.to_string(),
        pid: action.pid,
        user: action.principal.display_name().to_string(),
        role: action.principal.role,
        state: action.state.status(),
        reason: action.state.detail(),
        created_at: action.created_at,
    }
}

impl PrivilegedActionCoordinator {
    pub fn new(coordinator: Arc<StateCoordinator>, audit: AuditLog) -> Self {
        Self {
            coordinator,
            audit,
            next_id: AtomicU64::new(1),
            requests: DashMap::new(),
            pending: DashMap::new(),
        }
    }

    async fn record(&self, summary: &ActionSummary) {
        self.audit
            .emit(AuditEvent::PrivilegedAction {
                request_id: summary.request_id,
                identity: summary.identity.clone(),
                pid: summary.pid,
                user: summary.user.clone(),
                role: summary.role,
                state: summary.state,
                reason: summary.reason.clone(),
            })
            .await;
    }

    /// Audit summaries produced by the synchronous cleanup paths
    pub async fn record_all(&self, summaries: &[ActionSummary]) {
        for summary in summaries {
            self.record(summary).await;
        }
    }

    /// Request termination of `pid` on `identity`
    ///
    /// On success the agent has been sent `process:kill` and the request is
    /// Forwarded. Forbidden and offline requests are audited and end in
    /// their terminal state immediately; nothing reaches the agent.
    pub async fn request_kill(
        &self,
        requester: &OperatorHandle,
        principal: &Principal,
        identity: AgentId,
        pid: u32,
    ) -> Result<ActionId, ActionError> {
        let id = ActionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let mut action = PendingAction {
            identity: identity.clone(),
            pid,
            principal: principal.clone(),
            requester: requester.clone(),
            state: ActionState::Requested,
            created_at: current_time_millis(),
        };
        self.record(&summarize(id, &action)).await;

        if !principal.can(Permission::KillProcess) {
            warn!(
                "Kill of pid {} on {} by {} ({}) forbidden",
                pid,
                identity,
                principal.display_name(),
                principal.role
            );
            self.finish(id, &mut action, ActionEvent::RoleCheckFailed).await;
            return Err(ActionError::Forbidden);
        }

        // The request is registered before `process:kill` leaves, still
        // under the read lock, so neither an early response nor a
        // disconnect cleanup can miss it.
        let forwarded = {
            let _lock = self.coordinator.read().await;
            match self.coordinator.agents.get(&identity) {
                None => Err((ActionError::AgentOffline(identity.to_string()), action)),
                Some(agent) => match self.pending.entry((identity.clone(), pid)) {
                    Entry::Occupied(existing) => {
                        let existing = existing.get().0;
                        Err((
                            ActionError::AlreadyPending {
                                identity: identity.to_string(),
                                pid,
                                existing,
                            },
                            action,
                        ))
                    }
                    Entry::Vacant(slot) => {
                        slot.insert(id);
                        action.state = ActionState::Forwarded;
                        let summary = summarize(id, &action);
                        self.requests.insert(id, action);

                        if agent.send(AgentOutbound::ProcessKill {
                            request_id: id.0,
                            pid,
                        }) {
                            Ok(summary)
                        } else {
                            self.pending
                                .remove_if(&(identity.clone(), pid), |_, v| *v == id);
                            match self.requests.remove(&id) {
                                Some((_, mut action)) => {
                                    action.state = ActionState::Requested;
                                    Err((ActionError::AgentOffline(identity.to_string()), action))
                                }
                                None => {
                                    // Already abandoned by a concurrent cleanup
                                    return Err(ActionError::AgentOffline(identity.to_string()));
                                }
                            }
                        }
                    }
                },
            }
        };

        match forwarded {
            Ok(summary) => {
                info!("{} forwarded: kill pid {} on {}", id, pid, identity);
                self.record(&summary).await;
                Ok(id)
            }
            Err((err @ ActionError::AgentOffline(_), mut action)) => {
                self.finish(id, &mut action, ActionEvent::AgentOffline).await;
                Err(err)
            }
            Err((err, mut action)) => {
                debug!("{} rejected: {}", id, err);
                self.finish(id, &mut action, ActionEvent::Duplicate).await;
                Err(err)
            }
        }
    }

    async fn finish(&self, id: ActionId, action: &mut PendingAction, event: ActionEvent) {
        match action.state.apply(event) {
            Ok(next) => action.state = next,
            Err(e) => warn!("{}: {}", id, e),
        }
        self.record(&summarize(id, action)).await;
    }

    /// Apply an agent's `process:kill:response`
    ///
    /// Matched by request id, or by (agent, pid) for agents that do not
    /// echo the id. Error responses may carry only the id. The requester receives `process:kill:result` and the
    /// request is dropped. Responses for unknown, foreign or abandoned
    /// requests are ignored.
    pub async fn complete(
        &self,
        identity: &AgentId,
        request_id: Option<u64>,
        pid: Option<u32>,
        success: Option<bool>,
        error: Option<&str>,
    ) -> Option<KillOutcome> {
        let id = match (request_id, pid) {
            (Some(raw), _) => ActionId(raw),
            (None, Some(pid)) => match self.pending.get(&(identity.clone(), pid)) {
                Some(id) => *id,
                None => {
                    warn!("Kill response from {} for pid {} matches no request", identity, pid);
                    return None;
                }
            },
            (None, None) => {
                warn!("Kill response from {} carries neither request id nor pid", identity);
                return None;
            }
        };

        let owned = self.requests.remove_if(&id, |_, a| &a.identity == identity);
        let Some((_, mut action)) = owned else {
            warn!("Kill response from {} for unknown {}", identity, id);
            return None;
        };
        self.pending
            .remove_if(&(action.identity.clone(), action.pid), |_, v| *v == id);

        let event = ActionEvent::from_agent_response(success, error);
        match action.state.apply(event) {
            Ok(next) => action.state = next,
            Err(e) => {
                warn!("{}: {}", id, e);
                return None;
            }
        }

        info!("{} on {} finished: {:?}", id, action.identity, action.state);
        action.requester.send(OperatorOutbound::KillResult {
            request_id: id.0,
            identity: action.identity.to_string(),
            pid: action.pid,
            state: action.state.status(),
            reason: action.state.reason().map(str::to_string),
        });
        self.record(&summarize(id, &action)).await;

        Some(KillOutcome {
            request_id: id,
            state: action.state,
        })
    }

    fn abandon_where<F>(&self, predicate: F, reason: FailureReason) -> Vec<ActionSummary>
    where
        F: Fn(&PendingAction) -> bool,
    {
        let ids: Vec<ActionId> = self
            .requests
            .iter()
            .filter(|r| predicate(r.value()))
            .map(|r| *r.key())
            .collect();

        let mut summaries = Vec::with_capacity(ids.len());
        for id in ids {
            let Some((_, mut action)) = self.requests.remove(&id) else {
                continue;
            };
            self.pending
                .remove_if(&(action.identity.clone(), action.pid), |_, v| *v == id);

            match action
                .state
                .apply(ActionEvent::Abandoned(reason.clone()))
            {
                Ok(next) => action.state = next,
                Err(e) => warn!("{}: {}", id, e),
            }
            action.requester.send(OperatorOutbound::KillResult {
                request_id: id.0,
                identity: action.identity.to_string(),
                pid: action.pid,
                state: action.state.status(),
                reason: action.state.reason().map(str::to_string),
            });
            summaries.push(summarize(id, &action));
        }
        summaries
    }

    /// Fail every outstanding request targeting `identity`
    ///
    /// Runs under the coordinator write lock on agent disconnect or
    /// replacement. Audit the result with `record_all` once the lock is
    /// released.
    pub fn fail_for_agent(&self, identity: &AgentId) -> Vec<ActionSummary> {
        let failed = self.abandon_where(|a| &a.identity == identity, FailureReason::AgentDisconnected);
        if !failed.is_empty() {
            info!("Failed {} pending actions for {}", failed.len(), identity);
        }
        failed
    }

    /// Fail every outstanding request issued by an operator connection
    pub fn fail_for_requester(&self, requester: ConnectionId) -> Vec<ActionSummary> {
        self.abandon_where(
            |a| a.requester.id() == requester,
            FailureReason::RequesterDisconnected,
        )
    }

    /// Outstanding requests, oldest first
    pub fn list(&self) -> Vec<ActionSummary> {
        let mut all: Vec<_> = self
            .requests
            .iter()
            .map(|r| summarize(*r.key(), r.value()))
            .collect();
        all.sort_by_key(|s| s.request_id);
        all
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
