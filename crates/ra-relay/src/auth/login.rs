//! Operator login

use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};

use ra_core::config::AuthConfig;
use ra_core::error::{AuthError, CapabilityError};
use ra_core::traits::{AuditEvent, Directory};
use ra_core::{Principal, Role};

use super::agent_key::SharedSecret;
use super::directory::role_for_groups;
use super::token::TokenAuthority;
use crate::audit::AuditLog;

/// Body of `POST /login`
#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub username: Option<String>,
    pub password: String,
}

/// Exchanges credentials for a capability token
///
/// With a directory configured, the role comes from the user's groups and
/// the token names the user. Otherwise the shared operator password yields
/// an anonymous operator token.
pub struct LoginService {
    directory: Option<Arc<dyn Directory>>,
    operator_password: SharedSecret,
    admin_group: String,
    operator_group: String,
    tokens: Arc<TokenAuthority>,
    audit: AuditLog,
}

impl LoginService {
    pub fn new(
        config: &AuthConfig,
        directory: Option<Arc<dyn Directory>>,
        tokens: Arc<TokenAuthority>,
        audit: AuditLog,
    ) -> Self {
        Self {
            directory,
            operator_password: SharedSecret::new(&config.operator_password),
            admin_group: config.admin_group.clone(),
            operator_group: config.operator_group.clone(),
            tokens,
            audit,
        }
    }

    async fn authenticate(&self, request: &LoginRequest) -> Result<Principal, AuthError> {
        match &self.directory {
            Some(directory) => {
                let username = request
                    .username
                    .as_deref()
                    .filter(|u| !u.is_empty())
                    .ok_or(AuthError::InvalidCredentials)?;
                let user = directory
                    .authenticate(username, &request.password)
                    .await
                    .map_err(|e| match e {
                        CapabilityError::InvalidCredentials => AuthError::InvalidCredentials,
                        other => {
                            warn!("Directory lookup for {} failed: {}", username, other);
                            AuthError::InvalidCredentials
                        }
                    })?;
                let role = role_for_groups(&user.groups, &self.admin_group, &self.operator_group);
                Ok(Principal::new(role, Some(user.username)))
            }
            None => {
                if self.operator_password.verify(&request.password) {
                    Ok(Principal::new(Role::Operator, None))
                } else {
                    Err(AuthError::InvalidCredentials)
                }
            }
        }
    }

    /// Validate credentials and issue a token
    pub async fn login(&self, request: &LoginRequest) -> Result<String, AuthError> {
        let principal = match self.authenticate(request).await {
            Ok(principal) => principal,
            Err(e) => {
                warn!(
                    "Login failed for {}",
                    request.username.as_deref().unwrap_or("<shared password>")
                );
                return Err(e);
            }
        };

        let token = self.tokens.issue(&principal)?;
        info!(
            "Operator {} logged in as {}",
            principal.display_name(),
            principal.role
        );
        self.audit
            .emit(AuditEvent::OperatorLogin {
                user: principal.user.clone(),
                role: principal.role,
            })
            .await;
        Ok(token)
    }
}
