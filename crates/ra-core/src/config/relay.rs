//! Relay daemon configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::serde_utils::duration_secs;

/// Configuration for the relay daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Address the HTTP/WebSocket gateway binds to
    pub bind_address: String,

    /// Shared secret every agent must present
    pub agent_key: String,

    /// Operator authentication
    pub auth: AuthConfig,

    /// SFU transport settings
    pub media: MediaConfig,

    /// Append-only action log
    pub audit: AuditConfig,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8443".to_string(),
            agent_key: "agent-secret".to_string(),
            auth: AuthConfig::default(),
            media: MediaConfig::default(),
            audit: AuditConfig::default(),
        }
    }
}

impl RelayConfig {
    /// Apply `SERVER_PORT`, `AGENT_KEY`, `JWT_SECRET`, `OPERATOR_PASSWORD`
    /// and `USE_DIRECTORY` from the process environment
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|name| std::env::var(name).ok());
    }

    /// Apply overrides from an arbitrary variable lookup
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("SERVER_PORT").and_then(|p| p.trim().parse::<u16>().ok()) {
            self.bind_address = with_port(&self.bind_address, port);
        }
        if let Some(key) = lookup("AGENT_KEY") {
            self.agent_key = key;
        }
        if let Some(secret) = lookup("JWT_SECRET") {
            self.auth.jwt_secret = secret;
        }
        if let Some(password) = lookup("OPERATOR_PASSWORD") {
            self.auth.operator_password = password;
        }
        if let Some(flag) = lookup("USE_DIRECTORY") {
            self.auth.use_directory = matches!(
                flag.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            );
        }
    }
}

/// Replace the port of a `host:port` string, keeping the host
fn with_port(bind_address: &str, port: u16) -> String {
    let host = match bind_address.rsplit_once(':') {
        Some((host, _)) => host,
        None => bind_address,
    };
    let host = if host.is_empty() { "0.0.0.0" } else { host };
    format!("{}:{}", host, port)
}

/// Operator authentication settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// HMAC secret for operator capability tokens
    pub jwt_secret: String,

    /// Lifetime of issued tokens
    #[serde(with = "duration_secs")]
    pub token_ttl: Duration,

    /// Shared password accepted when the directory is disabled
    pub operator_password: String,

    /// Authenticate logins against the directory instead of the shared password
    pub use_directory: bool,

    /// Group substring granting the admin role
    pub admin_group: String,

    /// Group substring granting the operator role
    pub operator_group: String,

    /// Static directory entries
    pub users: Vec<UserEntry>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "secret".to_string(),
            token_ttl: Duration::from_secs(8 * 60 * 60),
            operator_password: "change_me".to_string(),
            use_directory: false,
            admin_group: "remote-admin-admins".to_string(),
            operator_group: "remote-admin-ops".to_string(),
            users: Vec::new(),
        }
    }
}

/// One account of the static directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserEntry {
    pub username: String,
    /// Lowercase hex SHA-256 of the password
    pub password_sha256: String,
    #[serde(default)]
    pub groups: Vec<String>,
}

/// SFU transport settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    pub rtc_min_port: u16,
    pub rtc_max_port: u16,
    /// Local IP transports listen on
    pub listen_ip: String,
    /// Public IP advertised in ICE candidates, if behind NAT
    pub announced_ip: Option<String>,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            rtc_min_port: 40000,
            rtc_max_port: 40100,
            listen_ip: "0.0.0.0".to_string(),
            announced_ip: None,
        }
    }
}

/// Audit log settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub enabled: bool,
    /// JSON-lines file events are appended to
    pub path: PathBuf,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: super::default_config_dir().join("logs").join("actions.log"),
        }
    }
}
