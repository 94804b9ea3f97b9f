//! Agent and operator authentication

mod agent_key;
mod directory;
mod login;
mod token;

pub use agent_key::{AgentKey, SharedSecret};
pub use directory::{role_for_groups, StaticDirectory};
pub use login::{LoginRequest, LoginService};
pub use token::{Claims, TokenAuthority};
