use std::collections::HashMap;

use serde::Deserialize;
use shared::domain::{ParseEnumError, Role, UserId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RoleTableError {
    #[error("invalid role table: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("user {user_id}: {source}")]
    Role {
        user_id: String,
        source: ParseEnumError,
    },
}

/// Static lookup from provider user id to role. Anyone not listed is a guest.
#[derive(Debug, Clone, Default)]
pub struct RoleDirectory {
    roles: HashMap<UserId, Role>,
}

#[derive(Debug, Deserialize)]
struct RoleFile {
    #[serde(default)]
    roles: HashMap<String, String>,
}

impl RoleDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_role(mut self, user_id: impl Into<UserId>, role: Role) -> Self {
        self.roles.insert(user_id.into(), role);
        self
    }

    /// Builds the directory from `uid = "role"` pairs.
    pub fn from_table(table: &HashMap<String, String>) -> Result<Self, RoleTableError> {
        let mut directory = Self::new();
        for (user_id, raw_role) in table {
            let role = raw_role.parse::<Role>().map_err(|source| RoleTableError::Role {
                user_id: user_id.clone(),
                source,
            })?;
            directory.roles.insert(UserId(user_id.clone()), role);
        }
        Ok(directory)
    }

    /// Parses the `[roles]` table of a TOML document.
    pub fn from_toml_str(raw: &str) -> Result<Self, RoleTableError> {
        let file: RoleFile = toml::from_str(raw)?;
        Self::from_table(&file.roles)
    }

    pub fn resolve(&self, user_id: &UserId) -> Role {
        self.roles.get(user_id).copied().unwrap_or(Role::Guest)
    }

    pub fn len(&self) -> usize {
        self.roles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }
}
