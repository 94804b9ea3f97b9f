//! Live connection handles and the agent registry

mod handle;
mod registry;

pub use handle::{AgentHandle, ConnectionHandle, OperatorHandle};
pub use registry::{AgentConnection, AgentRegistry};
