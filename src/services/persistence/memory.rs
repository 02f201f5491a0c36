use std::sync::Mutex;

use async_trait::async_trait;

use super::{new_booking_id, BookingRecord, PersistenceProvider, RecordFilter, SortOrder, StatusPatch};
use crate::errors::ProviderError;

/// Process-local store with no change feed. Clients of this store rely on
/// explicit refreshes.
#[derive(Default)]
pub struct MemoryPersistence {
    records: Mutex<Vec<BookingRecord>>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: Vec<BookingRecord>) -> Self {
        Self {
            records: Mutex::new(records),
        }
    }

    fn records(&self) -> Result<std::sync::MutexGuard<'_, Vec<BookingRecord>>, ProviderError> {
        self.records
            .lock()
            .map_err(|_| ProviderError::Storage("store lock poisoned".to_string()))
    }
}

#[async_trait]
impl PersistenceProvider for MemoryPersistence {
    async fn insert(&self, mut record: BookingRecord) -> Result<BookingRecord, ProviderError> {
        if record.id.is_empty() {
            record.id = new_booking_id();
        }
        let mut records = self.records()?;
        if records.iter().any(|r| r.id == record.id) {
            return Err(ProviderError::Storage(format!("duplicate id: {}", record.id)));
        }
        records.push(record.clone());
        Ok(record)
    }

    async fn query(
        &self,
        filter: &RecordFilter,
        order: SortOrder,
    ) -> Result<Vec<BookingRecord>, ProviderError> {
        let records = self.records()?;
        // Insertion index breaks ties between equal timestamps.
        let mut matched: Vec<(usize, BookingRecord)> = records
            .iter()
            .enumerate()
            .filter(|(_, r)| match &filter.user_id {
                Some(user_id) => r.user_id.as_deref() == Some(user_id.as_str()),
                None => true,
            })
            .map(|(i, r)| (i, r.clone()))
            .collect();

        matched.sort_by(|(ia, a), (ib, b)| a.created_at.cmp(&b.created_at).then(ia.cmp(ib)));
        if order == SortOrder::NewestFirst {
            matched.reverse();
        }
        Ok(matched.into_iter().map(|(_, r)| r).collect())
    }

    async fn fetch(&self, id: &str) -> Result<Option<BookingRecord>, ProviderError> {
        let records = self.records()?;
        Ok(records.iter().find(|r| r.id == id).cloned())
    }

    async fn update(
        &self,
        id: &str,
        patch: &StatusPatch,
    ) -> Result<Option<BookingRecord>, ProviderError> {
        let mut records = self.records()?;
        let Some(record) = records.iter_mut().find(|r| r.id == id) else {
            return Ok(None);
        };
        if record.status != patch.expected_status {
            return Ok(None);
        }
        record.status = patch.status.clone();
        record.updated_at = patch.updated_at.clone();
        record.revision += 1;
        Ok(Some(record.clone()))
    }
}
