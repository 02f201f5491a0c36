use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use tokio::sync::broadcast;

use crate::errors::RepositoryError;
use crate::models::{
    AcType, Booking, BookingDraft, BookingStatus, BookingType, ChangeEvent, Identity,
    PurchaseDetails,
};
use crate::services::persistence::{
    BookingRecord, PersistenceProvider, RecordChange, RecordFilter, SortOrder, StatusPatch,
};
use crate::services::policy::{self, Transition};

/// Attempts at a guarded status write before giving up on contention.
const MAX_STATUS_ATTEMPTS: usize = 3;

/// Booking CRUD against a persistence provider, with role scoping.
#[derive(Clone)]
pub struct BookingRepository {
    store: Arc<dyn PersistenceProvider>,
}

impl BookingRepository {
    pub fn new(store: Arc<dyn PersistenceProvider>) -> Self {
        Self { store }
    }

    /// Validates `draft` and stores it as a `Pending` booking owned by
    /// `requester` (or by nobody for a guest).
    pub async fn create(
        &self,
        draft: BookingDraft,
        requester: Option<&Identity>,
    ) -> Result<Booking, RepositoryError> {
        let booking = draft.into_booking(requester.map(|r| r.id.clone()), now())?;
        let stored = self.store.insert(to_record(&booking)).await?;
        let booking = from_record(stored)?;

        tracing::info!(
            id = %booking.id,
            booking_type = booking.booking_type.as_str(),
            guest = booking.user_id.is_none(),
            "booking created"
        );
        Ok(booking)
    }

    /// Everything for admins, own bookings for customers, newest first.
    pub async fn list(&self, identity: &Identity) -> Result<Vec<Booking>, RepositoryError> {
        let filter = RecordFilter {
            user_id: (!identity.is_admin()).then(|| identity.id.clone()),
        };
        let records = self.store.query(&filter, SortOrder::NewestFirst).await?;
        records.into_iter().map(from_record).collect()
    }

    /// A single booking, hidden as `NotFound` when the requester may not see it.
    pub async fn get(&self, id: &str, requester: &Identity) -> Result<Booking, RepositoryError> {
        let booking = self.fetch(id).await?;
        if !policy::can_view(requester, &booking) {
            return Err(RepositoryError::NotFound(id.to_string()));
        }
        Ok(booking)
    }

    pub async fn update_status(
        &self,
        id: &str,
        new_status: BookingStatus,
        requester: &Identity,
    ) -> Result<Booking, RepositoryError> {
        if !policy::can_update_status(requester) {
            tracing::warn!(id = %id, user = %requester.id, "status change forbidden");
            return Err(RepositoryError::Forbidden);
        }

        for _ in 0..MAX_STATUS_ATTEMPTS {
            let current = self.fetch(id).await?;
            match policy::authorize_status_change(requester, current.status, new_status)? {
                Transition::NoOp => return Ok(current),
                Transition::Apply => {}
            }

            let patch = StatusPatch {
                expected_status: current.status.as_str().to_string(),
                status: new_status.as_str().to_string(),
                updated_at: format_timestamp(&now()),
            };
            if let Some(record) = self.store.update(id, &patch).await? {
                let updated = from_record(record)?;
                tracing::info!(
                    id = %id,
                    from = %current.status,
                    to = %updated.status,
                    by = %requester.id,
                    "booking status updated"
                );
                return Ok(updated);
            }
            tracing::debug!(id = %id, "status changed underneath us, re-evaluating");
        }

        Err(RepositoryError::ProviderFailure(format!(
            "booking {id} kept changing during status update"
        )))
    }

    pub fn subscribe(&self) -> Option<broadcast::Receiver<RecordChange>> {
        self.store.subscribe_to_changes()
    }

    pub fn decode_change(&self, change: RecordChange) -> Result<ChangeEvent, RepositoryError> {
        Ok(match change {
            RecordChange::Insert(record) => ChangeEvent::Insert(from_record(record)?),
            RecordChange::Update(record) => ChangeEvent::Update(from_record(record)?),
            RecordChange::Delete { id, user_id } => ChangeEvent::Delete { id, user_id },
        })
    }

    async fn fetch(&self, id: &str) -> Result<Booking, RepositoryError> {
        let record = self
            .store
            .fetch(id)
            .await?
            .ok_or_else(|| RepositoryError::NotFound(id.to_string()))?;
        from_record(record)
    }
}

/// Storage timestamps carry microseconds, so new times are truncated to keep
/// the record mapping lossless.
fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(field: &str, raw: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| RepositoryError::ProviderFailure(format!("bad {field} '{raw}': {e}")))
}

fn corrupt(field: &str, raw: &str) -> RepositoryError {
    RepositoryError::ProviderFailure(format!("unrecognised {field} '{raw}'"))
}

pub fn to_record(booking: &Booking) -> BookingRecord {
    let (purchase_brands, purchase_tonnage, purchase_budget) = match &booking.purchase_details {
        Some(details) => (
            // A set of strings always serializes.
            Some(serde_json::to_string(&details.brands).unwrap_or_else(|_| "[]".to_string())),
            Some(details.tonnage.clone()),
            Some(details.budget.clone()),
        ),
        None => (None, None, None),
    };

    BookingRecord {
        id: booking.id.clone(),
        user_id: booking.user_id.clone(),
        customer_name: booking.customer_name.clone(),
        customer_phone: booking.customer_phone.clone(),
        customer_address: booking.customer_address.clone(),
        booking_type: booking.booking_type.as_str().to_string(),
        service_id: booking.service_id.clone(),
        plan_id: booking.plan_id.clone(),
        purchase_brands,
        purchase_tonnage,
        purchase_budget,
        date: booking.date.clone(),
        time: booking.time.clone(),
        status: booking.status.as_str().to_string(),
        ac_type: booking.ac_type.as_str().to_string(),
        notes: booking.notes.clone(),
        created_at: format_timestamp(&booking.created_at),
        updated_at: format_timestamp(&booking.updated_at),
        revision: booking.revision,
    }
}

pub fn from_record(record: BookingRecord) -> Result<Booking, RepositoryError> {
    let booking_type = BookingType::parse(&record.booking_type)
        .ok_or_else(|| corrupt("booking_type", &record.booking_type))?;
    let status =
        BookingStatus::parse(&record.status).ok_or_else(|| corrupt("status", &record.status))?;
    let ac_type = AcType::parse(&record.ac_type).ok_or_else(|| corrupt("ac_type", &record.ac_type))?;

    let purchase_details = match record.purchase_brands {
        Some(raw) => {
            let brands: BTreeSet<String> =
                serde_json::from_str(&raw).map_err(|_| corrupt("purchase_brands", &raw))?;
            Some(PurchaseDetails {
                brands,
                tonnage: record.purchase_tonnage.unwrap_or_default(),
                budget: record.purchase_budget.unwrap_or_default(),
            })
        }
        None => None,
    };

    Ok(Booking {
        created_at: parse_timestamp("created_at", &record.created_at)?,
        updated_at: parse_timestamp("updated_at", &record.updated_at)?,
        id: record.id,
        user_id: record.user_id,
        customer_name: record.customer_name,
        customer_phone: record.customer_phone,
        customer_address: record.customer_address,
        booking_type,
        service_id: record.service_id,
        plan_id: record.plan_id,
        purchase_details,
        date: record.date,
        time: record.time,
        status,
        ac_type,
        notes: record.notes,
        revision: record.revision,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ProviderError;
    use crate::models::{PurchaseDraft, Role};
    use crate::services::persistence::memory::MemoryPersistence;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Memory store where another writer lands `rival` just before our
    /// next status write, so that write loses the compare-and-set.
    struct RacingPersistence {
        inner: MemoryPersistence,
        rival: Mutex<Option<BookingStatus>>,
        always_lose: bool,
    }

    impl RacingPersistence {
        fn new(rival: Option<BookingStatus>, always_lose: bool) -> Self {
            Self {
                inner: MemoryPersistence::new(),
                rival: Mutex::new(rival),
                always_lose,
            }
        }
    }

    #[async_trait]
    impl PersistenceProvider for RacingPersistence {
        async fn insert(&self, record: BookingRecord) -> Result<BookingRecord, ProviderError> {
            self.inner.insert(record).await
        }

        async fn query(
            &self,
            filter: &RecordFilter,
            order: SortOrder,
        ) -> Result<Vec<BookingRecord>, ProviderError> {
            self.inner.query(filter, order).await
        }

        async fn fetch(&self, id: &str) -> Result<Option<BookingRecord>, ProviderError> {
            self.inner.fetch(id).await
        }

        async fn update(
            &self,
            id: &str,
            patch: &StatusPatch,
        ) -> Result<Option<BookingRecord>, ProviderError> {
            if self.always_lose {
                return Ok(None);
            }
            let rival = self.rival.lock().unwrap().take();
            if let Some(status) = rival {
                let rival_patch = StatusPatch {
                    expected_status: patch.expected_status.clone(),
                    status: status.as_str().to_string(),
                    updated_at: patch.updated_at.clone(),
                };
                assert!(self.inner.update(id, &rival_patch).await?.is_some());
            }
            self.inner.update(id, patch).await
        }
    }

    fn repo() -> BookingRepository {
        BookingRepository::new(Arc::new(MemoryPersistence::new()))
    }

    fn identity(id: &str, role: Role) -> Identity {
        Identity {
            id: id.to_string(),
            name: id.to_string(),
            email: format!("{id}@example.com"),
            role,
            phone: None,
        }
    }

    fn service_draft(name: &str) -> BookingDraft {
        BookingDraft {
            customer_name: name.to_string(),
            customer_phone: "9876543210".to_string(),
            customer_address: "Flat 402, DLF Phase 4".to_string(),
            booking_type: Some(BookingType::Service),
            service_id: Some("repair".to_string()),
            date: Some("2025-11-20".to_string()),
            time: Some("10:00 AM".to_string()),
            ..Default::default()
        }
    }

    fn record(booking_type: &str) -> BookingRecord {
        BookingRecord {
            id: "bk_123".to_string(),
            user_id: Some("u_1".to_string()),
            customer_name: "Rajesh".to_string(),
            customer_phone: "9876543210".to_string(),
            customer_address: "Flat 402".to_string(),
            booking_type: booking_type.to_string(),
            service_id: None,
            plan_id: None,
            purchase_brands: None,
            purchase_tonnage: None,
            purchase_budget: None,
            date: Some("2025-11-20".to_string()),
            time: Some("10:00 AM".to_string()),
            status: "Confirmed".to_string(),
            ac_type: "Cassette".to_string(),
            notes: Some("AC not cooling".to_string()),
            created_at: "2025-11-01T08:30:00.123456Z".to_string(),
            updated_at: "2025-11-02T09:00:00.000001Z".to_string(),
            revision: 3,
        }
    }

    #[test]
    fn test_record_round_trip_all_types() {
        let mut service = record("SERVICE");
        service.service_id = Some("repair".to_string());

        let mut amc = record("AMC");
        amc.plan_id = Some("premium".to_string());
        amc.user_id = None;

        let mut purchase = record("PURCHASE");
        purchase.purchase_brands = Some(r#"["Daikin","LG"]"#.to_string());
        purchase.purchase_tonnage = Some("2 Ton".to_string());
        purchase.purchase_budget = Some("50000".to_string());
        purchase.date = None;
        purchase.time = None;
        purchase.notes = None;

        for original in [service, amc, purchase] {
            let booking = from_record(original.clone()).unwrap();
            assert_eq!(to_record(&booking), original);
            assert_eq!(from_record(to_record(&booking)).unwrap(), booking);
        }
    }

    #[test]
    fn test_corrupt_record_is_provider_failure() {
        let err = from_record(record("RENTAL")).unwrap_err();
        assert!(matches!(err, RepositoryError::ProviderFailure(_)));
    }

    #[tokio::test]
    async fn test_create_returns_pending_with_id() {
        let repo = repo();
        let customer = identity("u_1", Role::Customer);
        let booking = repo.create(service_draft("Rajesh"), Some(&customer)).await.unwrap();
        assert!(!booking.id.is_empty());
        assert_eq!(booking.status, BookingStatus::Pending);
        assert_eq!(booking.user_id.as_deref(), Some("u_1"));
    }

    #[tokio::test]
    async fn test_create_rejects_invalid_draft() {
        let repo = repo();
        let mut draft = service_draft("Rajesh");
        draft.customer_address.clear();
        let err = repo.create(draft, None).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Validation(_)));
    }

    #[tokio::test]
    async fn test_guest_purchase_without_schedule() {
        let repo = repo();
        let draft = BookingDraft {
            customer_name: "Guest".to_string(),
            customer_phone: "9123456789".to_string(),
            customer_address: "Sector 56".to_string(),
            booking_type: Some(BookingType::Purchase),
            purchase_details: Some(PurchaseDraft::default()),
            ..Default::default()
        };
        let booking = repo.create(draft, None).await.unwrap();
        assert!(booking.user_id.is_none());
        let brands: Vec<_> = booking.purchase_details.unwrap().brands.into_iter().collect();
        assert_eq!(brands, vec!["Any".to_string()]);
    }

    #[tokio::test]
    async fn test_list_is_role_scoped_and_newest_first() {
        let repo = repo();
        let alice = identity("u_1", Role::Customer);
        let bob = identity("u_2", Role::Customer);
        let admin = identity("admin_1", Role::Admin);

        let first = repo.create(service_draft("Alice 1"), Some(&alice)).await.unwrap();
        let second = repo.create(service_draft("Bob 1"), Some(&bob)).await.unwrap();
        let third = repo.create(service_draft("Alice 2"), Some(&alice)).await.unwrap();

        let mine = repo.list(&alice).await.unwrap();
        assert!(mine.iter().all(|b| b.user_id.as_deref() == Some("u_1")));
        let ids: Vec<_> = mine.iter().map(|b| b.id.clone()).collect();
        assert_eq!(ids, vec![third.id.clone(), first.id.clone()]);

        let all = repo.list(&admin).await.unwrap();
        let ids: Vec<_> = all.iter().map(|b| b.id.clone()).collect();
        assert_eq!(ids, vec![third.id, second.id, first.id]);
        assert!(all.windows(2).all(|w| w[0].created_at >= w[1].created_at));
    }

    #[tokio::test]
    async fn test_customer_cannot_update_status() {
        let repo = repo();
        let alice = identity("u_1", Role::Customer);
        let booking = repo.create(service_draft("Alice"), Some(&alice)).await.unwrap();

        let err = repo
            .update_status(&booking.id, BookingStatus::Confirmed, &alice)
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Forbidden));
    }

    #[tokio::test]
    async fn test_admin_lifecycle_and_idempotence() {
        let repo = repo();
        let admin = identity("admin_1", Role::Admin);
        let booking = repo.create(service_draft("Alice"), None).await.unwrap();

        let confirmed = repo
            .update_status(&booking.id, BookingStatus::Confirmed, &admin)
            .await
            .unwrap();
        assert_eq!(confirmed.status, BookingStatus::Confirmed);
        assert_eq!(confirmed.revision, 2);

        let again = repo
            .update_status(&booking.id, BookingStatus::Confirmed, &admin)
            .await
            .unwrap();
        assert_eq!(again, confirmed);

        let completed = repo
            .update_status(&booking.id, BookingStatus::Completed, &admin)
            .await
            .unwrap();
        assert_eq!(completed.status, BookingStatus::Completed);

        for to in [BookingStatus::Pending, BookingStatus::Confirmed, BookingStatus::Cancelled] {
            let err = repo.update_status(&booking.id, to, &admin).await.unwrap_err();
            assert!(matches!(err, RepositoryError::InvalidTransition { .. }));
        }
    }

    #[tokio::test]
    async fn test_update_missing_booking() {
        let repo = repo();
        let admin = identity("admin_1", Role::Admin);
        let err = repo
            .update_status("bk_missing", BookingStatus::Confirmed, &admin)
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_get_hides_foreign_bookings() {
        let repo = repo();
        let alice = identity("u_1", Role::Customer);
        let bob = identity("u_2", Role::Customer);
        let booking = repo.create(service_draft("Alice"), Some(&alice)).await.unwrap();

        assert!(repo.get(&booking.id, &alice).await.is_ok());
        assert!(matches!(
            repo.get(&booking.id, &bob).await.unwrap_err(),
            RepositoryError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_concurrent_double_confirm_is_noop() {
        let repo = BookingRepository::new(Arc::new(RacingPersistence::new(
            Some(BookingStatus::Confirmed),
            false,
        )));
        let admin = identity("admin_1", Role::Admin);
        let booking = repo.create(service_draft("Alice"), None).await.unwrap();

        // The other admin confirms first; ours re-reads and finds nothing to do.
        let confirmed = repo
            .update_status(&booking.id, BookingStatus::Confirmed, &admin)
            .await
            .unwrap();
        assert_eq!(confirmed.status, BookingStatus::Confirmed);
        assert_eq!(confirmed.revision, 2);
    }

    #[tokio::test]
    async fn test_complete_after_concurrent_cancel_is_rejected() {
        let store = Arc::new(RacingPersistence::new(None, false));
        let repo = BookingRepository::new(store.clone());
        let admin = identity("admin_1", Role::Admin);
        let booking = repo.create(service_draft("Alice"), None).await.unwrap();
        repo.update_status(&booking.id, BookingStatus::Confirmed, &admin)
            .await
            .unwrap();

        *store.rival.lock().unwrap() = Some(BookingStatus::Cancelled);
        let err = repo
            .update_status(&booking.id, BookingStatus::Completed, &admin)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RepositoryError::InvalidTransition {
                from: BookingStatus::Cancelled,
                to: BookingStatus::Completed,
            }
        ));
        let stored = repo.get(&booking.id, &admin).await.unwrap();
        assert_eq!(stored.status, BookingStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_status_update_gives_up_under_contention() {
        let repo = BookingRepository::new(Arc::new(RacingPersistence::new(None, true)));
        let admin = identity("admin_1", Role::Admin);
        let booking = repo.create(service_draft("Alice"), None).await.unwrap();

        let err = repo
            .update_status(&booking.id, BookingStatus::Confirmed, &admin)
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::ProviderFailure(_)));
        assert_eq!(
            repo.get(&booking.id, &admin).await.unwrap().status,
            BookingStatus::Pending
        );
    }
}
