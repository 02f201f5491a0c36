use std::sync::Arc;

use crate::services::auth::AuthProvider;
use crate::services::repository::BookingRepository;

pub struct AppState {
    pub auth: Arc<dyn AuthProvider>,
    pub bookings: BookingRepository,
}
