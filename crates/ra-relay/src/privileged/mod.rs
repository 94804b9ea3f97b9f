//! Privileged actions requiring local confirmation on the agent

mod coordinator;
mod state;

pub use coordinator::{ActionSummary, KillOutcome, PrivilegedActionCoordinator};
pub use state::{ActionEvent, ActionState, FailureReason, InvalidTransition, RejectReason};
