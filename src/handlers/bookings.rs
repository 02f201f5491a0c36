use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, Sse};
use axum::Json;
use serde::Deserialize;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

use crate::errors::{AppError, AuthError};
use crate::models::{Booking, BookingDraft, BookingStatus};
use crate::services::policy;
use crate::state::AppState;

use super::{optional_identity, require_identity};

// POST /api/bookings
pub async fn create_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(draft): Json<BookingDraft>,
) -> Result<(StatusCode, Json<Booking>), AppError> {
    let requester = optional_identity(&state, &headers).await?;
    let booking = state.bookings.create(draft, requester.as_ref()).await?;
    Ok((StatusCode::CREATED, Json(booking)))
}

// GET /api/bookings
pub async fn list_bookings(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<Booking>>, AppError> {
    let identity = require_identity(&state, &headers).await?;
    Ok(Json(state.bookings.list(&identity).await?))
}

// GET /api/bookings/:id
pub async fn get_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Booking>, AppError> {
    let identity = require_identity(&state, &headers).await?;
    Ok(Json(state.bookings.get(&id, &identity).await?))
}

// PATCH /api/bookings/:id
#[derive(Deserialize)]
pub struct StatusUpdate {
    #[serde(default)]
    pub status: String,
}

pub async fn update_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<StatusUpdate>,
) -> Result<Json<Booking>, AppError> {
    let identity = require_identity(&state, &headers).await?;
    let status = BookingStatus::parse(body.status.trim())
        .ok_or_else(|| AppError::BadRequest(format!("unknown status '{}'", body.status)))?;
    Ok(Json(state.bookings.update_status(&id, status, &identity).await?))
}

// GET /api/bookings/events (SSE, changes the caller may see)
#[derive(Deserialize)]
pub struct SseQuery {
    pub token: Option<String>,
}

pub async fn events_stream(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SseQuery>,
) -> Result<Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>>, AppError> {
    // Auth via query param (EventSource can't set headers)
    let token = query.token.as_deref().unwrap_or("");
    let identity = state
        .auth
        .current_session(token)
        .await?
        .ok_or(AuthError::Unauthenticated)?;

    let rx = state
        .bookings
        .subscribe()
        .ok_or_else(|| AppError::Unavailable("store has no change feed".to_string()))?;
    tracing::debug!(user = %identity.id, "booking event stream opened");

    let repo = state.bookings.clone();
    let live_stream = BroadcastStream::new(rx).filter_map(move |result| match result {
        Ok(change) => {
            let event = match repo.decode_change(change) {
                Ok(event) => event,
                Err(e) => {
                    tracing::warn!(error = %e, "dropping undecodable change");
                    return None;
                }
            };
            if !policy::can_view_event(&identity, &event) {
                return None;
            }
            let data = serde_json::to_string(&event).unwrap_or_default();
            Some(Ok(Event::default().data(data).event("booking")))
        }
        // Missed changes; the client reloads its list.
        Err(BroadcastStreamRecvError::Lagged(_)) => {
            Some(Ok(Event::default().data("{}").event("resync")))
        }
    });

    let keepalive_stream = tokio_stream::StreamExt::map(
        tokio_stream::wrappers::IntervalStream::new(tokio::time::interval(Duration::from_secs(30))),
        |_| Ok(Event::default().comment("keepalive")),
    );

    Ok(Sse::new(StreamExt::merge(live_stream, keepalive_stream)))
}
