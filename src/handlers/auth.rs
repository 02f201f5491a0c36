use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::Deserialize;

use crate::errors::AppError;
use crate::models::{Identity, SignupProfile};
use crate::services::auth::AuthSession;
use crate::state::AppState;

use super::require_identity;

// POST /api/auth/register
pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(profile): Json<SignupProfile>,
) -> Result<(StatusCode, Json<AuthSession>), AppError> {
    let session = state.auth.register(&profile).await?;
    Ok((StatusCode::CREATED, Json(session)))
}

// POST /api/auth/login
#[derive(Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(body): Json<LoginRequest>,
) -> Result<Json<AuthSession>, AppError> {
    if body.email.trim().is_empty() || body.password.is_empty() {
        return Err(AppError::BadRequest("please provide an email and password".to_string()));
    }
    let session = state.auth.authenticate(&body.email, &body.password).await?;
    Ok(Json(session))
}

// GET /api/auth/me
pub async fn me(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Identity>, AppError> {
    Ok(Json(require_identity(&state, &headers).await?))
}

// POST /api/auth/forgotpassword
#[derive(Deserialize)]
pub struct ForgotPasswordRequest {
    #[serde(default)]
    pub email: String,
}

pub async fn forgot_password(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ForgotPasswordRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    if body.email.trim().is_empty() {
        return Err(AppError::BadRequest("email is required".to_string()));
    }
    state.auth.send_password_reset(&body.email).await?;
    Ok(Json(serde_json::json!({"success": true, "data": "Email sent"})))
}

// PUT /api/auth/resetpassword/:token
#[derive(Deserialize)]
pub struct ResetPasswordRequest {
    #[serde(default)]
    pub password: String,
}

pub async fn reset_password(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
    Json(body): Json<ResetPasswordRequest>,
) -> Result<Json<AuthSession>, AppError> {
    let session = state.auth.update_password(&token, &body.password).await?;
    Ok(Json(session))
}
