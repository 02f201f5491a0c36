//! Keeps the client-facing booking list consistent while local writes and
//! pushed store changes arrive in any order.
//!
//! Precedence, per booking id:
//! - no viewer: nothing is merged
//! - bookings the viewer may not see are dropped before anything else
//! - `INSERT` of an id already held is ignored, otherwise it is prepended
//! - `UPDATE` replaces in place unless it carries an older revision than the
//!   held copy, an unknown visible id is inserted in `createdAt` order
//! - `DELETE` removes the id if held

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::watch;

use crate::errors::RepositoryError;
use crate::models::{Booking, ChangeEvent, Identity};
use crate::services::policy;
use crate::services::repository::BookingRepository;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Inserted,
    Replaced,
    Removed,
    Ignored,
}

impl MergeOutcome {
    pub fn changed(self) -> bool {
        self != MergeOutcome::Ignored
    }
}

/// Merges one pushed change into a newest-first booking list.
pub fn merge(
    bookings: &mut Vec<Booking>,
    viewer: Option<&Identity>,
    event: ChangeEvent,
) -> MergeOutcome {
    let Some(viewer) = viewer else {
        return MergeOutcome::Ignored;
    };
    if !policy::can_view_event(viewer, &event) {
        return MergeOutcome::Ignored;
    }

    match event {
        ChangeEvent::Insert(booking) => {
            if bookings.iter().any(|b| b.id == booking.id) {
                return MergeOutcome::Ignored;
            }
            bookings.insert(0, booking);
            MergeOutcome::Inserted
        }
        ChangeEvent::Update(booking) => upsert(bookings, booking),
        ChangeEvent::Delete { id, .. } => {
            let before = bookings.len();
            bookings.retain(|b| b.id != id);
            if bookings.len() < before {
                MergeOutcome::Removed
            } else {
                MergeOutcome::Ignored
            }
        }
    }
}

fn upsert(bookings: &mut Vec<Booking>, booking: Booking) -> MergeOutcome {
    match bookings.iter_mut().find(|b| b.id == booking.id) {
        Some(held) if booking.revision < held.revision => MergeOutcome::Ignored,
        Some(held) if *held == booking => MergeOutcome::Ignored,
        Some(held) => {
            *held = booking;
            MergeOutcome::Replaced
        }
        None => {
            let at = bookings
                .iter()
                .position(|b| b.created_at < booking.created_at)
                .unwrap_or(bookings.len());
            bookings.insert(at, booking);
            MergeOutcome::Inserted
        }
    }
}

struct SyncState {
    viewer: Option<Identity>,
    epoch: u64,
    bookings: Vec<Booking>,
    /// Bumped for every write merged while a refresh is loading.
    seq: u64,
    /// Ids written while a refresh was loading, with the `seq` of the write.
    touched: HashMap<String, u64>,
    refreshing: usize,
}

impl SyncState {
    fn touch(&mut self, id: &str) {
        if self.refreshing == 0 {
            return;
        }
        self.seq += 1;
        self.touched.insert(id.to_string(), self.seq);
    }
}

/// Ends one in-flight refresh, including when its future is dropped.
struct RefreshGuard<'a> {
    sync: &'a SyncController,
    epoch: u64,
}

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.sync.lock();
        if state.epoch != self.epoch {
            return;
        }
        state.refreshing = state.refreshing.saturating_sub(1);
        if state.refreshing == 0 {
            state.touched.clear();
        }
    }
}

/// The reconciled booking list of one client session.
///
/// Every identity change bumps the epoch. Work started under an older epoch
/// is discarded when it completes.
pub struct SyncController {
    repo: BookingRepository,
    state: Mutex<SyncState>,
    tx: watch::Sender<Arc<Vec<Booking>>>,
}

impl SyncController {
    pub fn new(repo: BookingRepository) -> Self {
        let (tx, _) = watch::channel(Arc::new(Vec::new()));
        Self {
            repo,
            state: Mutex::new(SyncState {
                viewer: None,
                epoch: 0,
                bookings: Vec::new(),
                seq: 0,
                touched: HashMap::new(),
                refreshing: 0,
            }),
            tx,
        }
    }

    pub fn repository(&self) -> &BookingRepository {
        &self.repo
    }

    /// Switches to a new viewer and empties the list. Returns the new epoch.
    pub fn reset(&self, viewer: Option<Identity>) -> u64 {
        let mut state = self.lock();
        state.epoch += 1;
        state.viewer = viewer;
        state.bookings.clear();
        state.touched.clear();
        state.refreshing = 0;
        self.publish(&state);
        state.epoch
    }

    pub fn epoch(&self) -> u64 {
        self.lock().epoch
    }

    pub fn viewer(&self) -> Option<Identity> {
        self.lock().viewer.clone()
    }

    /// Reloads the viewer's bookings from the repository.
    ///
    /// On failure the held list is left as it was. Held copies newer than
    /// what the load returned are kept, and so is every write merged while
    /// the load was in flight.
    pub async fn refresh(&self) -> Result<(), RepositoryError> {
        let (viewer, epoch, since) = {
            let mut state = self.lock();
            let Some(viewer) = state.viewer.clone() else {
                return Ok(());
            };
            state.refreshing += 1;
            (viewer, state.epoch, state.seq)
        };
        let _guard = RefreshGuard { sync: self, epoch };

        let fetched = match self.repo.list(&viewer).await {
            Ok(fetched) => fetched,
            Err(e) => {
                tracing::warn!(error = %e, user = %viewer.id, "booking refresh failed, keeping last known list");
                return Err(e);
            }
        };

        let mut guard = self.lock();
        let state = &mut *guard;
        if state.epoch != epoch {
            tracing::debug!(user = %viewer.id, "discarding refresh from a previous session");
            return Ok(());
        }

        let mut bookings: Vec<Booking> = fetched
            .into_iter()
            .map(|fresh| match state.bookings.iter().find(|b| b.id == fresh.id) {
                Some(held) if held.revision > fresh.revision => held.clone(),
                _ => fresh,
            })
            .collect();
        for (id, _) in state.touched.iter().filter(|(_, seq)| **seq > since) {
            match state.bookings.iter().find(|b| &b.id == id) {
                Some(held) => {
                    upsert(&mut bookings, held.clone());
                }
                None => bookings.retain(|b| &b.id != id),
            }
        }
        state.bookings = bookings;
        tracing::debug!(user = %viewer.id, count = state.bookings.len(), "bookings refreshed");
        self.publish(state);
        Ok(())
    }

    /// Splices in a booking returned by a local create or status change.
    /// Returns false when the result belongs to an earlier epoch.
    pub fn apply_local(&self, booking: Booking, epoch: u64) -> bool {
        let mut state = self.lock();
        if state.epoch != epoch {
            tracing::debug!(id = %booking.id, "dropping result from a previous session");
            return false;
        }
        if state.viewer.is_none() {
            return false;
        }
        state.touch(&booking.id);
        if upsert(&mut state.bookings, booking).changed() {
            self.publish(&state);
        }
        true
    }

    pub fn apply_remote(&self, event: ChangeEvent) -> MergeOutcome {
        let mut guard = self.lock();
        let state = &mut *guard;
        let id = event.id().to_string();
        let kind = event.kind();
        let outcome = merge(&mut state.bookings, state.viewer.as_ref(), event);
        tracing::debug!(id = %id, kind, outcome = ?outcome, "change merged");
        if outcome.changed() {
            state.touch(&id);
            self.publish(state);
        }
        outcome
    }

    pub fn snapshot(&self) -> Arc<Vec<Booking>> {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<Vec<Booking>>> {
        self.tx.subscribe()
    }

    fn publish(&self, state: &SyncState) {
        self.tx.send_replace(Arc::new(state.bookings.clone()));
    }

    fn lock(&self) -> MutexGuard<'_, SyncState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AcType, BookingStatus, BookingType, Role};
    use crate::services::persistence::memory::MemoryPersistence;
    use chrono::{TimeZone, Utc};

    fn identity(id: &str, role: Role) -> Identity {
        Identity {
            id: id.to_string(),
            name: id.to_string(),
            email: format!("{id}@example.com"),
            role,
            phone: None,
        }
    }

    fn booking(id: &str, owner: Option<&str>, day: u32) -> Booking {
        let created = Utc.with_ymd_and_hms(2025, 7, day, 10, 0, 0).unwrap();
        Booking {
            id: id.to_string(),
            user_id: owner.map(str::to_string),
            customer_name: "Bob".to_string(),
            customer_phone: "9876543210".to_string(),
            customer_address: "Sector 45".to_string(),
            booking_type: BookingType::Service,
            service_id: Some("repair".to_string()),
            plan_id: None,
            purchase_details: None,
            date: Some("2025-08-01".to_string()),
            time: Some("10:00 AM".to_string()),
            status: BookingStatus::Pending,
            ac_type: AcType::Split,
            notes: None,
            created_at: created,
            updated_at: created,
            revision: 1,
        }
    }

    fn with_status(mut b: Booking, status: BookingStatus, revision: i64) -> Booking {
        b.status = status;
        b.revision = revision;
        b
    }

    fn ids(bookings: &[Booking]) -> Vec<&str> {
        bookings.iter().map(|b| b.id.as_str()).collect()
    }

    #[test]
    fn test_insert_prepends_once() {
        let viewer = identity("u_1", Role::Customer);
        let mut list = vec![booking("bk_1", Some("u_1"), 1)];

        let outcome = merge(&mut list, Some(&viewer), ChangeEvent::Insert(booking("bk_2", Some("u_1"), 2)));
        assert_eq!(outcome, MergeOutcome::Inserted);
        assert_eq!(ids(&list), vec!["bk_2", "bk_1"]);

        // Already applied optimistically.
        let outcome = merge(&mut list, Some(&viewer), ChangeEvent::Insert(booking("bk_2", Some("u_1"), 2)));
        assert_eq!(outcome, MergeOutcome::Ignored);
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn test_foreign_events_dropped_for_customer() {
        let viewer = identity("u_1", Role::Customer);
        let mut list = vec![booking("bk_1", Some("u_1"), 1)];
        let before = list.clone();

        for event in [
            ChangeEvent::Insert(booking("bk_9", Some("u_2"), 3)),
            ChangeEvent::Update(booking("bk_9", Some("u_2"), 3)),
            ChangeEvent::Insert(booking("bk_8", None, 3)),
        ] {
            assert_eq!(merge(&mut list, Some(&viewer), event), MergeOutcome::Ignored);
        }
        assert_eq!(list, before);
    }

    #[test]
    fn test_admin_sees_every_event() {
        let admin = identity("admin_1", Role::Admin);
        let mut list = vec![];
        merge(&mut list, Some(&admin), ChangeEvent::Insert(booking("bk_1", Some("u_1"), 1)));
        merge(&mut list, Some(&admin), ChangeEvent::Insert(booking("bk_2", None, 2)));
        assert_eq!(ids(&list), vec!["bk_2", "bk_1"]);
    }

    #[test]
    fn test_no_viewer_ignores_everything() {
        let mut list = vec![];
        let outcome = merge(&mut list, None, ChangeEvent::Insert(booking("bk_1", Some("u_1"), 1)));
        assert_eq!(outcome, MergeOutcome::Ignored);
        assert!(list.is_empty());
    }

    #[test]
    fn test_update_replaces_in_place() {
        let viewer = identity("u_1", Role::Customer);
        let mut list = vec![booking("bk_2", Some("u_1"), 2), booking("bk_1", Some("u_1"), 1)];

        let confirmed = with_status(booking("bk_1", Some("u_1"), 1), BookingStatus::Confirmed, 2);
        let outcome = merge(&mut list, Some(&viewer), ChangeEvent::Update(confirmed));
        assert_eq!(outcome, MergeOutcome::Replaced);
        assert_eq!(ids(&list), vec!["bk_2", "bk_1"]);
        assert_eq!(list[1].status, BookingStatus::Confirmed);
    }

    #[test]
    fn test_stale_update_never_overwrites_newer_copy() {
        let admin = identity("admin_1", Role::Admin);
        let completed = with_status(booking("bk_1", Some("u_1"), 1), BookingStatus::Completed, 3);
        let mut list = vec![completed.clone()];

        let late = with_status(booking("bk_1", Some("u_1"), 1), BookingStatus::Confirmed, 2);
        assert_eq!(
            merge(&mut list, Some(&admin), ChangeEvent::Update(late)),
            MergeOutcome::Ignored
        );
        assert_eq!(list, vec![completed]);
    }

    #[test]
    fn test_update_for_unknown_visible_id_is_inserted_in_order() {
        let viewer = identity("u_1", Role::Customer);
        let mut list = vec![booking("bk_3", Some("u_1"), 3), booking("bk_1", Some("u_1"), 1)];

        let outcome = merge(&mut list, Some(&viewer), ChangeEvent::Update(booking("bk_2", Some("u_1"), 2)));
        assert_eq!(outcome, MergeOutcome::Inserted);
        assert_eq!(ids(&list), vec!["bk_3", "bk_2", "bk_1"]);
    }

    #[test]
    fn test_delete_removes() {
        let admin = identity("admin_1", Role::Admin);
        let mut list = vec![booking("bk_1", Some("u_1"), 1)];
        let delete = ChangeEvent::Delete {
            id: "bk_1".to_string(),
            user_id: Some("u_1".to_string()),
        };
        assert_eq!(merge(&mut list, Some(&admin), delete.clone()), MergeOutcome::Removed);
        assert_eq!(merge(&mut list, Some(&admin), delete), MergeOutcome::Ignored);
        assert!(list.is_empty());
    }

    fn controller() -> SyncController {
        SyncController::new(BookingRepository::new(Arc::new(MemoryPersistence::new())))
    }

    #[test]
    fn test_apply_local_respects_epoch() {
        let sync = controller();
        let old = sync.reset(Some(identity("u_1", Role::Customer)));
        let new = sync.reset(Some(identity("u_2", Role::Customer)));
        assert_ne!(old, new);

        assert!(!sync.apply_local(booking("bk_1", Some("u_1"), 1), old));
        assert!(sync.snapshot().is_empty());

        assert!(sync.apply_local(booking("bk_2", Some("u_2"), 2), new));
        assert_eq!(ids(&sync.snapshot()), vec!["bk_2"]);
    }

    #[test]
    fn test_subscribers_see_merges() {
        let sync = controller();
        sync.reset(Some(identity("admin_1", Role::Admin)));
        let mut rx = sync.subscribe();
        rx.borrow_and_update();

        sync.apply_remote(ChangeEvent::Insert(booking("bk_1", Some("u_1"), 1)));
        assert!(rx.has_changed().unwrap());
        assert_eq!(ids(&rx.borrow_and_update()), vec!["bk_1"]);
    }

    #[tokio::test]
    async fn test_refresh_without_viewer_is_noop() {
        let sync = controller();
        sync.refresh().await.unwrap();
        assert!(sync.snapshot().is_empty());
    }
}
