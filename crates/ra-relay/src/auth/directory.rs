//! Config-backed account directory

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashMap;

use ra_core::config::UserEntry;
use ra_core::error::CapabilityError;
use ra_core::traits::{Directory, DirectoryUser};
use ra_core::Role;

use super::agent_key::constant_time_eq;

/// Directory over the `[[auth.users]]` entries of the config file
pub struct StaticDirectory {
    users: HashMap<String, UserEntry>,
}

impl StaticDirectory {
    pub fn new(users: impl IntoIterator<Item = UserEntry>) -> Self {
        Self {
            users: users
                .into_iter()
                .map(|u| (u.username.to_lowercase(), u))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[async_trait]
impl Directory for StaticDirectory {
    async fn authenticate(
        &self,
        username: &str,
        password: &str,
    ) -> Result<DirectoryUser, CapabilityError> {
        let Some(entry) = self.users.get(&username.to_lowercase()) else {
            return Err(CapabilityError::InvalidCredentials);
        };

        let provided = hex::encode(Sha256::digest(password.as_bytes()));
        let expected = entry.password_sha256.to_ascii_lowercase();
        if !constant_time_eq(provided.as_bytes(), expected.as_bytes()) {
            return Err(CapabilityError::InvalidCredentials);
        }

        Ok(DirectoryUser {
            username: entry.username.clone(),
            groups: entry.groups.clone(),
        })
    }
}

/// Map directory groups to a role
///
/// A group containing `admin_group` grants admin, else one containing
/// `operator_group` grants operator; everyone else is readonly. Matching
/// is by substring so full distinguished names work.
pub fn role_for_groups(groups: &[String], admin_group: &str, operator_group: &str) -> Role {
    if groups.iter().any(|g| g.contains(admin_group)) {
        Role::Admin
    } else if groups.iter().any(|g| g.contains(operator_group)) {
        Role::Operator
    } else {
        Role::Readonly
    }
}
