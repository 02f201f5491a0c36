pub mod local;
pub mod password;
pub mod token;

use std::collections::HashSet;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::errors::AuthError;
use crate::models::{Identity, Role, SignupProfile};

/// An identity together with the bearer credential that proves it.
#[derive(Debug, Clone, Serialize)]
pub struct AuthSession {
    #[serde(flatten)]
    pub identity: Identity,
    pub token: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AuthEvent {
    SignedIn(Identity),
    PasswordUpdated { user_id: String },
    RoleChanged { user_id: String, role: Role },
}

#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn register(&self, profile: &SignupProfile) -> Result<AuthSession, AuthError>;

    async fn authenticate(&self, email: &str, password: &str) -> Result<AuthSession, AuthError>;

    /// Resolves a previously issued credential. Invalid or expired
    /// credentials resolve to `None`.
    async fn current_session(&self, token: &str) -> Result<Option<Identity>, AuthError>;

    async fn send_password_reset(&self, email: &str) -> Result<(), AuthError>;

    /// Consumes a reset token and sets a new password.
    async fn update_password(
        &self,
        reset_token: &str,
        new_password: &str,
    ) -> Result<AuthSession, AuthError>;

    fn subscribe_to_auth_changes(&self) -> Option<broadcast::Receiver<AuthEvent>> {
        None
    }
}

/// Decides the role a new account starts with.
///
/// Only emails on the configured allowlist become admins. Any other
/// elevation goes through an explicit role assignment.
#[derive(Debug, Clone, Default)]
pub struct RolePolicy {
    admin_emails: HashSet<String>,
}

impl RolePolicy {
    pub fn new<I, S>(admin_emails: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            admin_emails: admin_emails
                .into_iter()
                .map(|e| e.as_ref().trim().to_lowercase())
                .collect(),
        }
    }

    pub fn role_for_signup(&self, email: &str) -> Role {
        if self.admin_emails.contains(&email.trim().to_lowercase()) {
            Role::Admin
        } else {
            Role::Customer
        }
    }
}
