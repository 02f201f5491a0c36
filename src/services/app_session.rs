use std::sync::{Arc, Weak};

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::errors::{AuthError, RepositoryError};
use crate::models::{Booking, BookingDraft, BookingStatus, Identity, SignupProfile};
use crate::services::auth::{AuthEvent, AuthProvider};
use crate::services::credentials::CredentialStore;
use crate::services::repository::BookingRepository;
use crate::services::session::SessionStore;
use crate::services::sync::SyncController;

/// Client-side application state: who is signed in and which bookings they
/// currently see. Every mutation goes through here.
pub struct AppSession {
    session: SessionStore,
    sync: SyncController,
}

impl AppSession {
    pub fn new(
        auth: Arc<dyn AuthProvider>,
        credentials: Arc<dyn CredentialStore>,
        bookings: BookingRepository,
    ) -> Self {
        Self {
            session: SessionStore::new(auth, credentials),
            sync: SyncController::new(bookings),
        }
    }

    pub async fn bootstrap(&self) -> Option<Identity> {
        let identity = self.session.bootstrap().await;
        self.enter(identity.clone()).await;
        identity
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<Identity, AuthError> {
        let identity = self.session.login(email, password).await?;
        self.enter(Some(identity.clone())).await;
        Ok(identity)
    }

    pub async fn signup(&self, profile: &SignupProfile) -> Result<Identity, AuthError> {
        let identity = self.session.signup(profile).await?;
        self.enter(Some(identity.clone())).await;
        Ok(identity)
    }

    pub fn logout(&self) {
        self.session.logout();
        self.sync.reset(None);
    }

    pub async fn request_password_reset(&self, email: &str) -> Result<(), AuthError> {
        self.session.request_password_reset(email).await
    }

    pub async fn complete_password_reset(
        &self,
        token: &str,
        new_password: &str,
    ) -> Result<Identity, AuthError> {
        let identity = self.session.complete_password_reset(token, new_password).await?;
        self.enter(Some(identity.clone())).await;
        Ok(identity)
    }

    pub fn current_user(&self) -> Option<Identity> {
        self.session.current()
    }

    pub fn token(&self) -> Option<String> {
        self.session.token()
    }

    /// Submits a booking as the current user, or as a guest when signed out.
    pub async fn create_booking(&self, draft: BookingDraft) -> Result<Booking, RepositoryError> {
        let epoch = self.sync.epoch();
        let requester = self.session.current();
        let booking = self
            .sync
            .repository()
            .create(draft, requester.as_ref())
            .await?;
        self.sync.apply_local(booking.clone(), epoch);
        Ok(booking)
    }

    pub async fn update_booking_status(
        &self,
        id: &str,
        status: BookingStatus,
    ) -> Result<Booking, RepositoryError> {
        let requester = self.session.current().ok_or(RepositoryError::Forbidden)?;
        let epoch = self.sync.epoch();
        let booking = self
            .sync
            .repository()
            .update_status(id, status, &requester)
            .await?;
        self.sync.apply_local(booking.clone(), epoch);
        Ok(booking)
    }

    pub async fn refresh(&self) -> Result<(), RepositoryError> {
        self.sync.refresh().await
    }

    pub fn bookings(&self) -> Arc<Vec<Booking>> {
        self.sync.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<Vec<Booking>>> {
        self.sync.subscribe()
    }

    pub fn sync(&self) -> &SyncController {
        &self.sync
    }

    pub async fn handle_auth_event(&self, event: &AuthEvent) {
        if self.session.apply_auth_event(event) {
            self.enter(self.session.current()).await;
        }
    }

    /// Forwards the store's change feed and the auth provider's events into
    /// this session until either the session is dropped or both feeds close.
    /// Returns `None` when neither provider offers a feed.
    pub fn spawn_change_listener(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let mut changes = self.sync.repository().subscribe();
        let mut auth_events = self.session.auth().subscribe_to_auth_changes();
        if changes.is_none() && auth_events.is_none() {
            return None;
        }
        let weak: Weak<Self> = Arc::downgrade(self);

        Some(tokio::spawn(async move {
            while changes.is_some() || auth_events.is_some() {
                tokio::select! {
                    change = recv_or_pending(&mut changes) => {
                        let Some(app) = weak.upgrade() else { break };
                        match change {
                            Ok(change) => match app.sync.repository().decode_change(change) {
                                Ok(event) => {
                                    app.sync.apply_remote(event);
                                }
                                Err(e) => tracing::warn!(error = %e, "undecodable change event"),
                            },
                            Err(broadcast::error::RecvError::Lagged(n)) => {
                                tracing::warn!(skipped = n, "change feed lagged, refreshing");
                                let _ = app.refresh().await;
                            }
                            Err(broadcast::error::RecvError::Closed) => {
                                tracing::info!("change feed closed");
                                changes = None;
                            }
                        }
                    }
                    event = recv_or_pending(&mut auth_events) => {
                        let Some(app) = weak.upgrade() else { break };
                        match event {
                            Ok(event) => app.handle_auth_event(&event).await,
                            Err(broadcast::error::RecvError::Lagged(n)) => {
                                tracing::warn!(skipped = n, "auth feed lagged");
                            }
                            Err(broadcast::error::RecvError::Closed) => {
                                auth_events = None;
                            }
                        }
                    }
                }
            }
            tracing::debug!("change listener stopped");
        }))
    }

    async fn enter(&self, identity: Option<Identity>) {
        let signed_in = identity.is_some();
        self.sync.reset(identity);
        if signed_in {
            // Failures are logged by the controller and the list stays empty
            // until the next refresh.
            let _ = self.sync.refresh().await;
        }
    }
}

async fn recv_or_pending<T: Clone>(
    rx: &mut Option<broadcast::Receiver<T>>,
) -> Result<T, broadcast::error::RecvError> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
