//! Who may see a booking and who may move its status.

use crate::errors::RepositoryError;
use crate::models::{Booking, BookingStatus, ChangeEvent, Identity};

/// Outcome of a permitted status request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Apply,
    /// The booking already holds the requested status.
    NoOp,
}

/// Admins see everything; customers see only bookings they own.
pub fn can_view_owner(viewer: &Identity, owner: Option<&str>) -> bool {
    viewer.is_admin() || owner == Some(viewer.id.as_str())
}

pub fn can_view(viewer: &Identity, booking: &Booking) -> bool {
    can_view_owner(viewer, booking.user_id.as_deref())
}

pub fn can_view_event(viewer: &Identity, event: &ChangeEvent) -> bool {
    can_view_owner(viewer, event.owner())
}

pub fn can_update_status(requester: &Identity) -> bool {
    requester.is_admin()
}

/// Checks a move along `Pending -> {Confirmed, Cancelled}`,
/// `Confirmed -> {Completed, Cancelled}`. Re-applying the current status is a
/// no-op in every state.
pub fn check_transition(
    from: BookingStatus,
    to: BookingStatus,
) -> Result<Transition, RepositoryError> {
    if from == to {
        return Ok(Transition::NoOp);
    }
    if from.next_statuses().contains(&to) {
        Ok(Transition::Apply)
    } else {
        Err(RepositoryError::InvalidTransition { from, to })
    }
}

/// Role check first, then the state machine.
pub fn authorize_status_change(
    requester: &Identity,
    from: BookingStatus,
    to: BookingStatus,
) -> Result<Transition, RepositoryError> {
    if !can_update_status(requester) {
        return Err(RepositoryError::Forbidden);
    }
    check_transition(from, to)
}
