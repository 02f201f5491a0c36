pub mod auth;
pub mod bookings;
pub mod catalog;
pub mod health;

use std::sync::Arc;

use axum::http::HeaderMap;
use axum::routing::{get, post, put};
use axum::Router;

use crate::errors::{AppError, AuthError};
use crate::models::Identity;
use crate::state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/api/auth/register", post(auth::register))
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/me", get(auth::me))
        .route("/api/auth/forgotpassword", post(auth::forgot_password))
        .route("/api/auth/resetpassword/:token", put(auth::reset_password))
        .route(
            "/api/bookings",
            post(bookings::create_booking).get(bookings::list_bookings),
        )
        .route("/api/bookings/events", get(bookings::events_stream))
        .route(
            "/api/bookings/:id",
            get(bookings::get_booking).patch(bookings::update_booking),
        )
        .route("/api/services", get(catalog::list_services))
        .route("/api/plans", get(catalog::list_plans))
        .with_state(state)
}

pub(crate) fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Resolves the caller from a bearer token. No header means a guest; a
/// header that does not resolve is rejected.
pub(crate) async fn optional_identity(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<Option<Identity>, AppError> {
    let Some(token) = bearer_token(headers) else {
        return Ok(None);
    };
    match state.auth.current_session(token).await? {
        Some(identity) => Ok(Some(identity)),
        None => Err(AuthError::Unauthenticated.into()),
    }
}

pub(crate) async fn require_identity(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<Identity, AppError> {
    optional_identity(state, headers)
        .await?
        .ok_or_else(|| AuthError::Unauthenticated.into())
}
