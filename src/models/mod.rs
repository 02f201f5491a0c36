pub mod booking;
pub mod catalog;
pub mod change;
pub mod identity;

pub use booking::{AcType, Booking, BookingDraft, BookingStatus, BookingType, PurchaseDetails, PurchaseDraft};
pub use change::ChangeEvent;
pub use identity::{Identity, Role, SignupProfile};
