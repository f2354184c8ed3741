//! Capability check performed at connect time.
//!
//! The gateway treats authentication as an opaque collaborator: given a
//! user id and a token it either gets back a [`Role`] or an error.
//! [`StaticAuthorizer`] is the built-in implementation, configured from the
//! `AUTH_USERS` environment variable.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;

use crate::domain::{Role, UserId};
use crate::error::ChatError;

/// Verifies connect credentials and reports user roles.
#[async_trait]
pub trait Authorizer: Send + Sync + fmt::Debug {
    /// Checks a connect request and returns the role to grant.
    async fn authenticate(&self, user_id: &UserId, token: &str) -> Result<Role, ChatError>;

    /// Returns the role of a known user, connected or not.
    async fn role_of(&self, user_id: &UserId) -> Option<Role>;
}

#[derive(Clone)]
struct Credential {
    token: String,
    role: Role,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"<redacted>")
            .field("role", &self.role)
            .finish()
    }
}

/// Table of `user → (token, role)` entries.
///
/// With an empty table the authorizer runs open: any user id with any
/// token connects as a [`Role::Customer`].
#[derive(Debug, Clone, Default)]
pub struct StaticAuthorizer {
    users: HashMap<UserId, Credential>,
}

impl StaticAuthorizer {
    /// Creates an open authorizer.
    #[must_use]
    pub fn open() -> Self {
        Self::default()
    }

    /// Parses `user:token:role` entries separated by commas. Blank entries
    /// are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::InvalidPayload`] for a malformed entry or an
    /// unknown role.
    pub fn parse(table: &str) -> Result<Self, ChatError> {
        let mut users = HashMap::new();
        for entry in table.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let mut parts = entry.splitn(3, ':');
            let (Some(user), Some(token), Some(role)) = (parts.next(), parts.next(), parts.next())
            else {
                return Err(ChatError::InvalidPayload(format!(
                    "auth entry `{entry}` is not user:token:role"
                )));
            };
            users.insert(
                UserId::new(user),
                Credential {
                    token: token.to_string(),
                    role: parse_role(role)?,
                },
            );
        }
        Ok(Self { users })
    }

    /// Adds or replaces a user.
    #[must_use]
    pub fn with_user(mut self, user_id: impl Into<UserId>, token: impl Into<String>, role: Role) -> Self {
        self.users.insert(
            user_id.into(),
            Credential {
                token: token.into(),
                role,
            },
        );
        self
    }

    /// Returns `true` if every user is accepted.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.users.is_empty()
    }
}

fn parse_role(role: &str) -> Result<Role, ChatError> {
    match role.trim().to_ascii_lowercase().as_str() {
        "customer" => Ok(Role::Customer),
        "agent" => Ok(Role::Agent),
        "admin" => Ok(Role::Admin),
        other => Err(ChatError::InvalidPayload(format!("unknown role `{other}`"))),
    }
}

#[async_trait]
impl Authorizer for StaticAuthorizer {
    async fn authenticate(&self, user_id: &UserId, token: &str) -> Result<Role, ChatError> {
        if self.is_open() {
            return Ok(Role::Customer);
        }
        match self.users.get(user_id) {
            Some(credential) if credential.token == token => Ok(credential.role),
            _ => {
                tracing::warn!(%user_id, "rejected connect credentials");
                Err(ChatError::Unauthenticated)
            }
        }
    }

    async fn role_of(&self, user_id: &UserId) -> Option<Role> {
        self.users.get(user_id).map(|c| c.role)
    }
}
