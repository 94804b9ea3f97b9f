//! Directory service capability

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::CapabilityError;

/// Account returned by a successful directory bind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryUser {
    pub username: String,
    pub groups: Vec<String>,
}

/// Username/password verification against an account directory
#[async_trait]
pub trait Directory: Send + Sync {
    /// Returns `CapabilityError::InvalidCredentials` on a rejected bind
    async fn authenticate(
        &self,
        username: &str,
        password: &str,
    ) -> Result<DirectoryUser, CapabilityError>;
}
