//! Privileged action state machine
//!
//! ```text
//! Requested --RoleCheckFailed--> Rejected(forbidden)
//! Requested --Duplicate--------> Rejected(AlreadyPending)
//! Requested --Forward----------> Forwarded
//! Requested --AgentOffline-----> Failed(agent_offline)
//! Forwarded --LocalUserDenied--> Denied
//! Forwarded --PolicyRejected---> Rejected(policy)
//! Forwarded --Succeeded--------> Completed
//! Forwarded --ExecutionFailed--> Failed(error)
//! Requested | Forwarded --Abandoned--> Failed(disconnected)
//! ```

use ra_protocol::ActionStatus;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// Requesting role may not perform the action
    Forbidden,
    /// Target-side policy (process not allowlisted)
    Policy,
    /// Another request for the same target is outstanding
    AlreadyPending,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    AgentOffline,
    AgentDisconnected,
    RequesterDisconnected,
    /// Agent attempted the action and it failed
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionState {
    Requested,
    Forwarded,
    Completed,
    Denied,
    Rejected(RejectReason),
    Failed(FailureReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionEvent {
    RoleCheckFailed,
    Duplicate,
    Forward,
    AgentOffline,
    LocalUserDenied,
    PolicyRejected,
    Succeeded,
    ExecutionFailed(String),
    /// A party disconnected before the action finished
    Abandoned(FailureReason),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid transition from {from:?} on {event:?}")]
pub struct InvalidTransition {
    pub from: ActionState,
    pub event: ActionEvent,
}

impl ActionState {
    pub fn apply(&self, event: ActionEvent) -> Result<ActionState, InvalidTransition> {
        use ActionEvent as E;
        use ActionState as S;

        let next = match (self, &event) {
            (S::Requested, E::RoleCheckFailed) => S::Rejected(RejectReason::Forbidden),
            (S::Requested, E::Duplicate) => S::Rejected(RejectReason::AlreadyPending),
            (S::Requested, E::Forward) => S::Forwarded,
            (S::Requested, E::AgentOffline) => S::Failed(FailureReason::AgentOffline),
            (S::Forwarded, E::LocalUserDenied) => S::Denied,
            (S::Forwarded, E::PolicyRejected) => S::Rejected(RejectReason::Policy),
            (S::Forwarded, E::Succeeded) => S::Completed,
            (S::Forwarded, E::ExecutionFailed(msg)) => S::Failed(FailureReason::Error(msg.clone())),
            (S::Requested | S::Forwarded, E::Abandoned(reason)) => S::Failed(reason.clone()),
            _ => {
                return Err(InvalidTransition {
                    from: self.clone(),
                    event,
                })
            }
        };
        Ok(next)
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ActionState::Requested | ActionState::Forwarded)
    }

    /// Status reported to operators
    pub fn status(&self) -> ActionStatus {
        match self {
            ActionState::Requested => ActionStatus::Requested,
            ActionState::Forwarded => ActionStatus::Forwarded,
            ActionState::Completed => ActionStatus::Completed,
            ActionState::Denied => ActionStatus::Denied,
            ActionState::Rejected(_) => ActionStatus::Rejected,
            ActionState::Failed(_) => ActionStatus::Failed,
        }
    }

    /// Structured reason code; never agent-supplied text
    pub fn reason(&self) -> Option<&'static str> {
        match self {
            ActionState::Requested | ActionState::Forwarded | ActionState::Completed => None,
            ActionState::Denied => Some("local_user_denied"),
            ActionState::Rejected(RejectReason::Forbidden) => Some("forbidden"),
            ActionState::Rejected(RejectReason::Policy) => Some("policy"),
            ActionState::Rejected(RejectReason::AlreadyPending) => Some("AlreadyPending"),
            ActionState::Failed(FailureReason::AgentOffline) => Some("agent_offline"),
            ActionState::Failed(FailureReason::AgentDisconnected) => Some("agent_disconnected"),
            ActionState::Failed(FailureReason::RequesterDisconnected) => {
                Some("requester_disconnected")
            }
            ActionState::Failed(FailureReason::Error(_)) => Some("execution_error"),
        }
    }

    /// Reason for the audit log, including the agent's error text
    pub fn detail(&self) -> Option<String> {
        match self {
            ActionState::Failed(FailureReason::Error(msg)) => Some(msg.clone()),
            other => other.reason().map(str::to_string),
        }
    }
}

impl ActionEvent {
    /// Classify an agent's `process:kill:response`
    pub fn from_agent_response(success: Option<bool>, error: Option<&str>) -> ActionEvent {
        match error {
            Some("local_user_denied") => ActionEvent::LocalUserDenied,
            Some(e) if e == "policy" || e.contains("by policy") => ActionEvent::PolicyRejected,
            Some(e) => ActionEvent::ExecutionFailed(e.to_string()),
            None if success == Some(false) => {
                ActionEvent::ExecutionFailed("agent reported failure".to_string())
            }
            None => ActionEvent::Succeeded,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let state = ActionState::Requested.apply(ActionEvent::Forward).unwrap();
        assert_eq!(state, ActionState::Forwarded);
        assert!(!state.is_terminal());

        let state = state.apply(ActionEvent::Succeeded).unwrap();
        assert_eq!(state, ActionState::Completed);
        assert!(state.is_terminal());
        assert_eq!(state.reason(), None);
    }

    #[test]
    fn test_terminal_states_reject_events() {
        let denied = ActionState::Forwarded
            .apply(ActionEvent::LocalUserDenied)
            .unwrap();
        assert!(denied.apply(ActionEvent::Succeeded).is_err());
        assert!(denied
            .apply(ActionEvent::Abandoned(FailureReason::AgentDisconnected))
            .is_err());
    }

    #[test]
    fn test_requested_cannot_complete_directly() {
        let err = ActionState::Requested
            .apply(ActionEvent::Succeeded)
            .unwrap_err();
        assert_eq!(err.from, ActionState::Requested);
    }

    #[test]
    fn test_reasons_are_distinct() {
        let denied = ActionState::Forwarded.apply(ActionEvent::LocalUserDenied).unwrap();
        let policy = ActionState::Forwarded.apply(ActionEvent::PolicyRejected).unwrap();
        let failed = ActionState::Forwarded
            .apply(ActionEvent::ExecutionFailed("Access is denied.".to_string()))
            .unwrap();

        assert_eq!(denied.status(), ActionStatus::Denied);
        assert_eq!(denied.reason(), Some("local_user_denied"));
        assert_eq!(policy.status(), ActionStatus::Rejected);
        assert_eq!(policy.reason(), Some("policy"));
        assert_eq!(failed.status(), ActionStatus::Failed);
        assert_eq!(failed.reason(), Some("execution_error"));
        assert_eq!(failed.detail().as_deref(), Some("Access is denied."));
    }

    #[test]
    fn test_classify_agent_response() {
        assert_eq!(
            ActionEvent::from_agent_response(None, Some("local_user_denied")),
            ActionEvent::LocalUserDenied
        );
        assert_eq!(
            ActionEvent::from_agent_response(
                None,
                Some("process not allowed to be killed by policy")
            ),
            ActionEvent::PolicyRejected
        );
        assert_eq!(
            ActionEvent::from_agent_response(Some(true), None),
            ActionEvent::Succeeded
        );
        assert_eq!(ActionEvent::from_agent_response(None, None), ActionEvent::Succeeded);
        assert!(matches!(
            ActionEvent::from_agent_response(Some(false), None),
            ActionEvent::ExecutionFailed(_)
        ));
        assert!(matches!(
            ActionEvent::from_agent_response(None, Some("ERROR: not found")),
            ActionEvent::ExecutionFailed(_)
        ));
    }

    #[test]
    fn test_abandon_from_forwarded() {
        let state = ActionState::Forwarded
            .apply(ActionEvent::Abandoned(FailureReason::RequesterDisconnected))
            .unwrap();
        assert_eq!(state.reason(), Some("requester_disconnected"));
    }
}
