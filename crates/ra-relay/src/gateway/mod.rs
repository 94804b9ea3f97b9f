//! Session gateway
//!
//! Accepts agent and operator WebSocket connections, authenticates them,
//! and wires their events to the relay components. Also serves the small
//! HTTP API (login, agent list, action list, health).

mod agent;
mod http;
mod media;
mod operator;
mod server;
mod socket;

pub use http::{ApiError, Authenticated};
pub use server::{router, GatewayContext, RelayServer};
