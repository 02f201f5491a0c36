pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::errors::ProviderError;

/// A booking row in storage form: snake_case columns, enums as text,
/// timestamps as RFC 3339 strings, brands as a JSON array.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingRecord {
    pub id: String,
    pub user_id: Option<String>,
    pub customer_name: String,
    pub customer_phone: String,
    pub customer_address: String,
    pub booking_type: String,
    pub service_id: Option<String>,
    pub plan_id: Option<String>,
    pub purchase_brands: Option<String>,
    pub purchase_tonnage: Option<String>,
    pub purchase_budget: Option<String>,
    pub date: Option<String>,
    pub time: Option<String>,
    pub status: String,
    pub ac_type: String,
    pub notes: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub revision: i64,
}

#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    /// Restrict to one owner; `None` returns every record.
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    NewestFirst,
    OldestFirst,
}

/// A status write guarded by the status the writer last observed.
#[derive(Debug, Clone)]
pub struct StatusPatch {
    pub expected_status: String,
    pub status: String,
    pub updated_at: String,
}

/// A change on the bookings table in storage form.
#[derive(Debug, Clone)]
pub enum RecordChange {
    Insert(BookingRecord),
    Update(BookingRecord),
    Delete { id: String, user_id: Option<String> },
}

#[async_trait]
pub trait PersistenceProvider: Send + Sync {
    /// Stores a new record. An empty `id` is replaced with a fresh one.
    async fn insert(&self, record: BookingRecord) -> Result<BookingRecord, ProviderError>;

    async fn query(
        &self,
        filter: &RecordFilter,
        order: SortOrder,
    ) -> Result<Vec<BookingRecord>, ProviderError>;

    async fn fetch(&self, id: &str) -> Result<Option<BookingRecord>, ProviderError>;

    /// Applies `patch` atomically. `Ok(None)` means the record is missing or
    /// its status no longer matches `patch.expected_status`.
    async fn update(
        &self,
        id: &str,
        patch: &StatusPatch,
    ) -> Result<Option<BookingRecord>, ProviderError>;

    /// Change feed for realtime-capable stores.
    fn subscribe_to_changes(&self) -> Option<broadcast::Receiver<RecordChange>> {
        None
    }
}

pub fn new_booking_id() -> String {
    format!("bk_{}", uuid::Uuid::new_v4().simple())
}
