use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::models::BookingStatus;

/// A missing or malformed form field, reported before any provider call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Failure reported by a persistence adapter.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("storage error: {0}")]
    Storage(String),

    #[error("network error: {0}")]
    Network(String),
}

impl From<rusqlite::Error> for ProviderError {
    fn from(e: rusqlite::Error) -> Self {
        ProviderError::Storage(e.to_string())
    }
}

impl From<anyhow::Error> for ProviderError {
    fn from(e: anyhow::Error) -> Self {
        ProviderError::Storage(format!("{e:#}"))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("user not found, please sign up")]
    UserNotFound,

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("email already registered")]
    EmailAlreadyRegistered,

    #[error("reset token is invalid or has expired")]
    TokenExpiredOrInvalid,

    #[error("not authenticated")]
    Unauthenticated,

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("network error: {0}")]
    Network(String),

    #[error("auth provider error: {0}")]
    Provider(String),
}

impl From<rusqlite::Error> for AuthError {
    fn from(e: rusqlite::Error) -> Self {
        AuthError::Provider(e.to_string())
    }
}

impl From<anyhow::Error> for AuthError {
    fn from(e: anyhow::Error) -> Self {
        AuthError::Provider(format!("{e:#}"))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("booking not found: {0}")]
    NotFound(String),

    #[error("forbidden")]
    Forbidden,

    #[error("cannot move booking from {from} to {to}")]
    InvalidTransition {
        from: BookingStatus,
        to: BookingStatus,
    },

    #[error("provider failure: {0}")]
    ProviderFailure(String),

    #[error("network error: {0}")]
    Network(String),
}

impl From<ProviderError> for RepositoryError {
    fn from(e: ProviderError) -> Self {
        match e {
            ProviderError::Storage(msg) => RepositoryError::ProviderFailure(msg),
            ProviderError::Network(msg) => RepositoryError::Network(msg),
        }
    }
}

/// Error surface of the HTTP handlers.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unavailable: {0}")]
    Unavailable(String),
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::Auth(e) => match e {
                AuthError::UserNotFound => StatusCode::NOT_FOUND,
                AuthError::InvalidCredentials | AuthError::Unauthenticated => {
                    StatusCode::UNAUTHORIZED
                }
                AuthError::EmailAlreadyRegistered
                | AuthError::TokenExpiredOrInvalid
                | AuthError::Validation(_) => StatusCode::BAD_REQUEST,
                AuthError::Network(_) => StatusCode::BAD_GATEWAY,
                AuthError::Provider(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            AppError::Repository(e) => match e {
                RepositoryError::Validation(_) => StatusCode::BAD_REQUEST,
                RepositoryError::NotFound(_) => StatusCode::NOT_FOUND,
                RepositoryError::Forbidden => StatusCode::FORBIDDEN,
                RepositoryError::InvalidTransition { .. } => StatusCode::CONFLICT,
                RepositoryError::ProviderFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
                RepositoryError::Network(_) => StatusCode::BAD_GATEWAY,
            },
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn field(&self) -> Option<&'static str> {
        match self {
            AppError::Auth(AuthError::Validation(v))
            | AppError::Repository(RepositoryError::Validation(v)) => Some(v.field),
            _ => None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let body = match self.field() {
            Some(field) => serde_json::json!({ "error": self.to_string(), "field": field }),
            None => serde_json::json!({ "error": self.to_string() }),
        };
        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            AppError::from(RepositoryError::Forbidden).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            AppError::from(AuthError::InvalidCredentials).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AppError::from(RepositoryError::InvalidTransition {
                from: BookingStatus::Completed,
                to: BookingStatus::Pending,
            })
            .status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            AppError::from(RepositoryError::from(ValidationError::new("date", "date is required")))
                .status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_provider_timeout_maps_to_network() {
        let err = RepositoryError::from(ProviderError::Network("timed out".to_string()));
        assert!(matches!(err, RepositoryError::Network(_)));
    }
}
