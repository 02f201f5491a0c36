use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{Duration, SecondsFormat, Utc};
use rusqlite::Connection;
use tokio::sync::broadcast;

use super::password::{self, MIN_PASSWORD_LEN};
use super::token::TokenSigner;
use super::{AuthEvent, AuthProvider, AuthSession, RolePolicy};
use crate::config::AppConfig;
use crate::db::queries::{self, UserRow};
use crate::errors::{AuthError, ValidationError};
use crate::models::{Identity, Role, SignupProfile};
use crate::services::mail::Mailer;

/// Accounts kept in the local `users` table, with signed bearer tokens.
pub struct LocalAuthProvider {
    db: Arc<Mutex<Connection>>,
    tokens: TokenSigner,
    roles: RolePolicy,
    mailer: Arc<dyn Mailer>,
    reset_ttl: Duration,
    public_url: String,
    events: broadcast::Sender<AuthEvent>,
}

impl LocalAuthProvider {
    pub fn new(
        db: Arc<Mutex<Connection>>,
        tokens: TokenSigner,
        roles: RolePolicy,
        mailer: Arc<dyn Mailer>,
        reset_ttl: Duration,
        public_url: String,
    ) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            db,
            tokens,
            roles,
            mailer,
            reset_ttl,
            public_url,
            events,
        }
    }

    pub fn from_config(db: Arc<Mutex<Connection>>, config: &AppConfig, mailer: Arc<dyn Mailer>) -> Self {
        Self::new(
            db,
            TokenSigner::new(&config.auth_secret, Duration::days(config.token_ttl_days)),
            RolePolicy::new(&config.admin_emails),
            mailer,
            Duration::minutes(config.reset_token_ttl_minutes),
            config.public_url.trim_end_matches('/').to_string(),
        )
    }

    /// Out-of-band role assignment. Live sessions of the user are told
    /// through the auth change feed.
    pub async fn assign_role(&self, email: &str, role: Role) -> Result<Identity, AuthError> {
        let row = {
            let db = self.conn()?;
            queries::update_role(&db, &normalize_email(email), role.as_str())?
        };
        let identity = to_identity(row.ok_or(AuthError::UserNotFound)?)?;
        tracing::info!(user = %identity.id, role = role.as_str(), "role assigned");
        self.emit(AuthEvent::RoleChanged {
            user_id: identity.id.clone(),
            role,
        });
        Ok(identity)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, AuthError> {
        self.db
            .lock()
            .map_err(|_| AuthError::Provider("database lock poisoned".to_string()))
    }

    fn emit(&self, event: AuthEvent) {
        let _ = self.events.send(event);
    }

    fn signed_in(&self, identity: Identity) -> AuthSession {
        let token = self.tokens.issue(&identity.id);
        self.emit(AuthEvent::SignedIn(identity.clone()));
        AuthSession { identity, token }
    }
}

#[async_trait]
impl AuthProvider for LocalAuthProvider {
    async fn register(&self, profile: &SignupProfile) -> Result<AuthSession, AuthError> {
        validate_profile(profile)?;
        let email = normalize_email(&profile.email);
        let password_hash = hash_off_thread(&profile.password).await?;

        let row = UserRow {
            id: format!("u_{}", uuid::Uuid::new_v4().simple()),
            name: profile.name.trim().to_string(),
            email: email.clone(),
            password_hash,
            phone: profile
                .phone
                .as_deref()
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string),
            role: self.roles.role_for_signup(&email).as_str().to_string(),
        };

        {
            let db = self.conn()?;
            if queries::get_user_by_email(&db, &email)?.is_some() {
                return Err(AuthError::EmailAlreadyRegistered);
            }
            queries::insert_user(&db, &row)?;
        }

        let identity = to_identity(row)?;
        tracing::info!(user = %identity.id, role = identity.role.as_str(), "account registered");
        Ok(self.signed_in(identity))
    }

    async fn authenticate(&self, email: &str, password: &str) -> Result<AuthSession, AuthError> {
        let row = {
            let db = self.conn()?;
            queries::get_user_by_email(&db, &normalize_email(email))?
        };
        let row = row.ok_or(AuthError::UserNotFound)?;

        if !verify_off_thread(&row.password_hash, password).await? {
            tracing::warn!(user = %row.id, "failed login");
            return Err(AuthError::InvalidCredentials);
        }

        Ok(self.signed_in(to_identity(row)?))
    }

    async fn current_session(&self, token: &str) -> Result<Option<Identity>, AuthError> {
        let Some(user_id) = self.tokens.verify(token) else {
            return Ok(None);
        };
        let row = {
            let db = self.conn()?;
            queries::get_user_by_id(&db, &user_id)?
        };
        row.map(to_identity).transpose()
    }

    async fn send_password_reset(&self, email: &str) -> Result<(), AuthError> {
        let email = normalize_email(email);
        let (token, digest) = password::new_reset_token()?;
        let expires_at = (Utc::now() + self.reset_ttl).to_rfc3339_opts(SecondsFormat::Micros, true);

        let user = {
            let db = self.conn()?;
            let user = queries::get_user_by_email(&db, &email)?.ok_or(AuthError::UserNotFound)?;
            queries::set_reset_token(&db, &user.id, &digest, &expires_at)?;
            user
        };

        let reset_url = format!("{}/#/resetpassword/{token}", self.public_url);
        let body = format!(
            "You are receiving this email because you (or someone else) requested a password reset.\n\n\
             Open the link below to choose a new password. It expires in {} minutes.\n\n{reset_url}",
            self.reset_ttl.num_minutes()
        );

        if let Err(e) = self.mailer.send_mail(&email, "Password reset", &body).await {
            tracing::error!(error = %e, user = %user.id, "failed to send reset mail");
            let db = self.conn()?;
            queries::clear_reset_token(&db, &user.id)?;
            return Err(AuthError::Network("reset email could not be sent".to_string()));
        }

        tracing::info!(user = %user.id, "password reset requested");
        Ok(())
    }

    async fn update_password(
        &self,
        reset_token: &str,
        new_password: &str,
    ) -> Result<AuthSession, AuthError> {
        validate_password(new_password)?;
        let digest = password::digest_token(reset_token);
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);
        let password_hash = hash_off_thread(new_password).await?;

        let row = {
            let db = self.conn()?;
            let row = queries::get_user_by_reset_token(&db, &digest, &now)?
                .ok_or(AuthError::TokenExpiredOrInvalid)?;
            queries::update_password(&db, &row.id, &password_hash)?;
            row
        };

        tracing::info!(user = %row.id, "password updated");
        self.emit(AuthEvent::PasswordUpdated {
            user_id: row.id.clone(),
        });
        Ok(self.signed_in(to_identity(row)?))
    }

    fn subscribe_to_auth_changes(&self) -> Option<broadcast::Receiver<AuthEvent>> {
        Some(self.events.subscribe())
    }
}

/// Argon2 work runs on the blocking pool.
async fn hash_off_thread(plain: &str) -> Result<String, AuthError> {
    let plain = plain.to_string();
    let hashed = tokio::task::spawn_blocking(move || password::hash_password(&plain))
        .await
        .map_err(|e| AuthError::Provider(format!("password hashing task failed: {e}")))??;
    Ok(hashed)
}

async fn verify_off_thread(hash: &str, plain: &str) -> Result<bool, AuthError> {
    let (hash, plain) = (hash.to_string(), plain.to_string());
    tokio::task::spawn_blocking(move || password::verify_password(&hash, &plain))
        .await
        .map_err(|e| AuthError::Provider(format!("password check task failed: {e}")))
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn to_identity(row: UserRow) -> Result<Identity, AuthError> {
    let role = Role::parse(&row.role)
        .ok_or_else(|| AuthError::Provider(format!("unknown role '{}' for {}", row.role, row.id)))?;
    Ok(Identity {
        id: row.id,
        name: row.name,
        email: row.email,
        role,
        phone: row.phone,
    })
}

fn validate_profile(profile: &SignupProfile) -> Result<(), ValidationError> {
    if profile.name.trim().is_empty() {
        return Err(ValidationError::new("name", "name is required"));
    }
    let email = profile.email.trim();
    let plausible = email
        .split_once('@')
        .map(|(local, domain)| !local.is_empty() && domain.contains('.') && !domain.starts_with('.'))
        .unwrap_or(false);
    if !plausible {
        return Err(ValidationError::new("email", "enter a valid email address"));
    }
    validate_password(&profile.password)
}

fn validate_password(password: &str) -> Result<(), ValidationError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ValidationError::new(
            "password",
            format!("password must be at least {MIN_PASSWORD_LEN} characters"),
        ));
    }
    Ok(())
}
