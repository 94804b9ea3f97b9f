//! ra-relay: Control-plane relay for remote administration
//!
//! The relay accepts WebSocket connections from agents (the machines being
//! administered) and operators (the people administering them). It keeps
//! one live connection per agent identity, fans agent output out to every
//! watching operator, brokers SFU media signaling, relays commands, and
//! drives the confirm-on-agent state machine for process termination.

pub mod audit;
pub mod auth;
pub mod connection;
pub mod coordinator;
pub mod gateway;
pub mod media;
pub mod privileged;
pub mod relay;
pub mod state;
pub mod subscription;

pub use coordinator::StateCoordinator;
pub use gateway::RelayServer;
pub use state::RelayState;
