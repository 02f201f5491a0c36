use std::sync::{Arc, Mutex, MutexGuard};

use crate::errors::AuthError;
use crate::models::{Identity, SignupProfile};
use crate::services::auth::{AuthEvent, AuthProvider, AuthSession};
use crate::services::credentials::CredentialStore;

/// The current signed-in identity of one client, and the credential that
/// proves it.
///
/// Failed operations never touch the held session. Refreshing bookings after
/// an identity change is the caller's job, see `AppSession`.
pub struct SessionStore {
    auth: Arc<dyn AuthProvider>,
    credentials: Arc<dyn CredentialStore>,
    current: Mutex<Option<AuthSession>>,
}

impl SessionStore {
    pub fn new(auth: Arc<dyn AuthProvider>, credentials: Arc<dyn CredentialStore>) -> Self {
        Self {
            auth,
            credentials,
            current: Mutex::new(None),
        }
    }

    pub fn auth(&self) -> &Arc<dyn AuthProvider> {
        &self.auth
    }

    /// Recovers a persisted credential. A missing, expired or unreadable
    /// credential leaves the session empty and is not an error.
    pub async fn bootstrap(&self) -> Option<Identity> {
        let token = match self.credentials.load() {
            Ok(Some(token)) => token,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(error = %e, "failed to load stored credential");
                return None;
            }
        };

        match self.auth.current_session(&token).await {
            Ok(Some(identity)) => {
                tracing::info!(user = %identity.id, "session restored");
                self.set(Some(AuthSession {
                    identity: identity.clone(),
                    token,
                }));
                Some(identity)
            }
            Ok(None) => {
                tracing::info!("stored credential no longer valid, discarding");
                if let Err(e) = self.credentials.clear() {
                    tracing::warn!(error = %e, "failed to clear stale credential");
                }
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, "could not verify stored credential");
                None
            }
        }
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<Identity, AuthError> {
        let session = self.auth.authenticate(email, password).await?;
        Ok(self.adopt(session))
    }

    pub async fn signup(&self, profile: &SignupProfile) -> Result<Identity, AuthError> {
        let session = self.auth.register(profile).await?;
        Ok(self.adopt(session))
    }

    pub fn logout(&self) {
        if let Err(e) = self.credentials.clear() {
            tracing::warn!(error = %e, "failed to clear stored credential");
        }
        if let Some(previous) = self.take() {
            tracing::info!(user = %previous.identity.id, "signed out");
        }
    }

    pub async fn request_password_reset(&self, email: &str) -> Result<(), AuthError> {
        self.auth.send_password_reset(email).await
    }

    /// Sets a new password with a mailed reset token. The holder of the
    /// token ends up signed in.
    pub async fn complete_password_reset(
        &self,
        token: &str,
        new_password: &str,
    ) -> Result<Identity, AuthError> {
        let session = self.auth.update_password(token, new_password).await?;
        Ok(self.adopt(session))
    }

    pub fn current(&self) -> Option<Identity> {
        self.lock().as_ref().map(|s| s.identity.clone())
    }

    pub fn token(&self) -> Option<String> {
        self.lock().as_ref().map(|s| s.token.clone())
    }

    /// Folds a provider auth event into the held identity. Returns true when
    /// the current identity changed in a way that affects visibility.
    pub fn apply_auth_event(&self, event: &AuthEvent) -> bool {
        let mut current = self.lock();
        let Some(session) = current.as_mut() else {
            return false;
        };
        match event {
            AuthEvent::RoleChanged { user_id, role } if *user_id == session.identity.id => {
                if session.identity.role == *role {
                    return false;
                }
                tracing::info!(user = %user_id, role = role.as_str(), "role changed for current session");
                session.identity.role = *role;
                true
            }
            _ => false,
        }
    }

    fn adopt(&self, session: AuthSession) -> Identity {
        if let Err(e) = self.credentials.save(&session.token) {
            tracing::warn!(error = %e, "failed to persist credential");
        }
        let identity = session.identity.clone();
        self.set(Some(session));
        identity
    }

    fn set(&self, session: Option<AuthSession>) {
        *self.lock() = session;
    }

    fn take(&self) -> Option<AuthSession> {
        self.lock().take()
    }

    fn lock(&self) -> MutexGuard<'_, Option<AuthSession>> {
        // The guarded value is a plain Option, so a poisoned lock still holds
        // a usable session.
        self.current.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
