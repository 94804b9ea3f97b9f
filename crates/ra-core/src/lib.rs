//! ra-core: Core abstractions and configuration for the remote-admin relay
//!
//! This crate provides the shared domain types, the error taxonomy, the
//! configuration structures, and the capability traits through which the
//! relay talks to its external collaborators (SFU, directory service,
//! audit sink).

pub mod config;
pub mod error;
pub mod time;
pub mod traits;
pub mod types;

pub use error::{ErrorKind, RaError};
pub use types::{AgentId, ConnectionId, Permission, Principal, Role};
