use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use rusqlite::Connection;
use tokio::sync::broadcast;

use super::{
    new_booking_id, BookingRecord, PersistenceProvider, RecordChange, RecordFilter, SortOrder,
    StatusPatch,
};
use crate::db::queries;
use crate::errors::ProviderError;

const CHANGE_FEED_CAPACITY: usize = 256;

/// SQLite-backed store that publishes every write on a change feed.
pub struct SqlitePersistence {
    db: Arc<Mutex<Connection>>,
    changes: broadcast::Sender<RecordChange>,
}

impl SqlitePersistence {
    pub fn new(db: Arc<Mutex<Connection>>) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self { db, changes }
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, ProviderError> {
        self.db
            .lock()
            .map_err(|_| ProviderError::Storage("database lock poisoned".to_string()))
    }

    fn publish(&self, change: RecordChange) {
        // No subscribers is fine.
        let _ = self.changes.send(change);
    }
}

#[async_trait]
impl PersistenceProvider for SqlitePersistence {
    async fn insert(&self, mut record: BookingRecord) -> Result<BookingRecord, ProviderError> {
        if record.id.is_empty() {
            record.id = new_booking_id();
        }
        {
            let db = self.conn()?;
            queries::insert_booking(&db, &record)?;
        }
        tracing::debug!(id = %record.id, "booking inserted");
        self.publish(RecordChange::Insert(record.clone()));
        Ok(record)
    }

    async fn query(
        &self,
        filter: &RecordFilter,
        order: SortOrder,
    ) -> Result<Vec<BookingRecord>, ProviderError> {
        let db = self.conn()?;
        Ok(queries::list_bookings(&db, filter.user_id.as_deref(), order)?)
    }

    async fn fetch(&self, id: &str) -> Result<Option<BookingRecord>, ProviderError> {
        let db = self.conn()?;
        Ok(queries::get_booking(&db, id)?)
    }

    async fn update(
        &self,
        id: &str,
        patch: &StatusPatch,
    ) -> Result<Option<BookingRecord>, ProviderError> {
        let updated = {
            let db = self.conn()?;
            let written = queries::update_booking_status(
                &db,
                id,
                &patch.expected_status,
                &patch.status,
                &patch.updated_at,
            )?;
            if !written {
                return Ok(None);
            }
            queries::get_booking(&db, id)?
        };

        if let Some(record) = &updated {
            tracing::debug!(id = %id, status = %record.status, "booking updated");
            self.publish(RecordChange::Update(record.clone()));
        }
        Ok(updated)
    }

    fn subscribe_to_changes(&self) -> Option<broadcast::Receiver<RecordChange>> {
        Some(self.changes.subscribe())
    }
}
