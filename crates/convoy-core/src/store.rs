//! Durable notification storage with per-user read tracking.
//!
//! The store validates drafts, applies visibility and expiry rules, and
//! pages results. Persistence sits behind [`NotificationBackend`]; the
//! in-memory [`MemoryBackend`] locks one row at a time, so concurrent
//! read-marking is settled by idempotency rather than serialization.

use crate::notification::{NewNotification, Notification, NotificationId, Viewer};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Notification store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A required field is missing or malformed.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The notification does not exist (or has expired).
    #[error("Notification not found: {0}")]
    NotFound(NotificationId),

    /// The backing store could not be reached.
    #[error("Notification store unavailable: {0}")]
    Unavailable(String),
}

/// Result of recording a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// The user had not read it before.
    Marked,
    /// The user had already read it; nothing changed.
    AlreadyRead,
}

/// Persistence for notification rows.
///
/// Implementations must make `record_read` atomic per row: two concurrent
/// calls for the same user leave exactly one read entry.
#[async_trait]
pub trait NotificationBackend: Send + Sync {
    /// Store a new row.
    async fn insert(&self, notification: Notification) -> Result<(), StoreError>;

    /// Unexpired rows addressed to `viewer`, newest first.
    async fn visible_to(
        &self,
        viewer: &Viewer,
        now: DateTime<Utc>,
    ) -> Result<Vec<Notification>, StoreError>;

    /// Add `user_id` to a row's read log unless already present.
    ///
    /// Missing or expired rows yield [`StoreError::NotFound`].
    async fn record_read(
        &self,
        id: NotificationId,
        user_id: &str,
        at: DateTime<Utc>,
    ) -> Result<ReadOutcome, StoreError>;

    /// Delete a row. Returns `false` if it did not exist.
    async fn remove(&self, id: NotificationId) -> Result<bool, StoreError>;

    /// Delete every row expired at `now`. Returns how many were removed.
    async fn remove_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError>;

    /// Backend name for logs.
    fn name(&self) -> &'static str;
}

/// In-process backend.
#[derive(Default)]
pub struct MemoryBackend {
    rows: DashMap<NotificationId, (u64, Notification)>,
    sequence: AtomicU64,
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored rows, expired ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[async_trait]
impl NotificationBackend for MemoryBackend {
    async fn insert(&self, notification: Notification) -> Result<(), StoreError> {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        self.rows.insert(notification.id, (seq, notification));
        Ok(())
    }

    async fn visible_to(
        &self,
        viewer: &Viewer,
        now: DateTime<Utc>,
    ) -> Result<Vec<Notification>, StoreError> {
        let mut rows: Vec<(u64, Notification)> = self
            .rows
            .iter()
            .filter(|row| row.value().1.is_visible_to(viewer, now))
            .map(|row| row.value().clone())
            .collect();
        rows.sort_by(|(seq_a, a), (seq_b, b)| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| seq_b.cmp(seq_a))
        });
        Ok(rows.into_iter().map(|(_, n)| n).collect())
    }

    async fn record_read(
        &self,
        id: NotificationId,
        user_id: &str,
        at: DateTime<Utc>,
    ) -> Result<ReadOutcome, StoreError> {
        let Some(mut row) = self.rows.get_mut(&id) else {
            return Err(StoreError::NotFound(id));
        };
        let notification = &mut row.value_mut().1;
        if notification.is_expired(at) {
            return Err(StoreError::NotFound(id));
        }
        if notification.mark_read(user_id, at) {
            Ok(ReadOutcome::Marked)
        } else {
            Ok(ReadOutcome::AlreadyRead)
        }
    }

    async fn remove(&self, id: NotificationId) -> Result<bool, StoreError> {
        Ok(self.rows.remove(&id).is_some())
    }

    async fn remove_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut removed = 0;
        self.rows.retain(|_, (_, notification)| {
            let keep = !notification.is_expired(now);
            if !keep {
                removed += 1;
            }
            keep
        });
        Ok(removed)
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Paging limits.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Page size used when a query gives none.
    pub default_page_size: usize,
    /// Upper bound on any requested page size.
    pub max_page_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            default_page_size: 20,
            max_page_size: 100,
        }
    }
}

/// A page request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Page {
    pub limit: Option<usize>,
    pub offset: usize,
}

impl Page {
    #[must_use]
    pub fn new(limit: usize, offset: usize) -> Self {
        Self {
            limit: Some(limit),
            offset,
        }
    }
}

/// One page of a user's notifications plus their unread total.
#[derive(Debug, Clone)]
pub struct NotificationPage {
    pub items: Vec<Notification>,
    /// Visible notifications across all pages.
    pub total: usize,
    /// Visible notifications the user has not read, across all pages.
    pub unread: usize,
    pub limit: usize,
    pub offset: usize,
}

/// The notification store.
pub struct NotificationStore {
    backend: Arc<dyn NotificationBackend>,
    config: StoreConfig,
}

impl NotificationStore {
    /// Create a store over the given backend.
    #[must_use]
    pub fn new(backend: Arc<dyn NotificationBackend>) -> Self {
        Self::with_config(backend, StoreConfig::default())
    }

    /// Create a store with custom paging limits.
    #[must_use]
    pub fn with_config(backend: Arc<dyn NotificationBackend>, config: StoreConfig) -> Self {
        info!(backend = backend.name(), "Creating notification store with config: {:?}", config);
        Self { backend, config }
    }

    /// Create a store backed by process memory.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()))
    }

    fn clamp(&self, page: Page) -> usize {
        page.limit
            .unwrap_or(self.config.default_page_size)
            .clamp(1, self.config.max_page_size.max(1))
    }

    /// Validate and persist a draft.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Validation`] for incomplete drafts, or the
    /// backend's error if persisting fails.
    pub async fn create(&self, draft: NewNotification) -> Result<Notification, StoreError> {
        let notification =
            Notification::from_draft(draft, Utc::now()).map_err(StoreError::Validation)?;

        self.backend.insert(notification.clone()).await.map_err(|e| {
            warn!(error = %e, "Failed to persist notification");
            e
        })?;

        debug!(
            id = %notification.id,
            recipient_type = %notification.recipient_type,
            recipient = ?notification.recipient_id,
            "Notification created"
        );
        Ok(notification)
    }

    async fn visible(&self, viewer: &Viewer) -> Result<Vec<Notification>, StoreError> {
        let now = Utc::now();
        let mut rows = self.backend.visible_to(viewer, now).await?;
        // Expiry is re-checked here so results never depend on sweep timing.
        rows.retain(|n| n.is_visible_to(viewer, now));
        Ok(rows)
    }

    /// Notifications visible to `viewer`, newest first.
    ///
    /// # Errors
    ///
    /// Returns the backend's error if the query fails.
    pub async fn list_for(
        &self,
        viewer: &Viewer,
        page: Page,
    ) -> Result<Vec<Notification>, StoreError> {
        let limit = self.clamp(page);
        Ok(self
            .visible(viewer)
            .await?
            .into_iter()
            .skip(page.offset)
            .take(limit)
            .collect())
    }

    /// Number of visible notifications `viewer` has not read.
    ///
    /// # Errors
    ///
    /// Returns the backend's error if the query fails.
    pub async fn unread_count_for(&self, viewer: &Viewer) -> Result<usize, StoreError> {
        Ok(self
            .visible(viewer)
            .await?
            .iter()
            .filter(|n| !n.is_read_by(&viewer.user_id))
            .count())
    }

    /// A page of notifications together with the unread total, from one query.
    ///
    /// # Errors
    ///
    /// Returns the backend's error if the query fails.
    pub async fn page_for(
        &self,
        viewer: &Viewer,
        page: Page,
    ) -> Result<NotificationPage, StoreError> {
        let limit = self.clamp(page);
        let rows = self.visible(viewer).await?;
        let unread = rows
            .iter()
            .filter(|n| !n.is_read_by(&viewer.user_id))
            .count();
        let total = rows.len();

        Ok(NotificationPage {
            items: rows.into_iter().skip(page.offset).take(limit).collect(),
            total,
            unread,
            limit,
            offset: page.offset,
        })
    }

    /// Mark one notification read for `user_id`. Repeated calls are no-ops.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for unknown or expired IDs.
    pub async fn mark_read(
        &self,
        id: NotificationId,
        user_id: &str,
    ) -> Result<ReadOutcome, StoreError> {
        if user_id.trim().is_empty() {
            return Err(StoreError::Validation("userId is required".to_string()));
        }
        let outcome = self.backend.record_read(id, user_id, Utc::now()).await?;
        debug!(id = %id, user = %user_id, outcome = ?outcome, "Notification read");
        Ok(outcome)
    }

    /// Mark everything visible to `viewer` as read.
    ///
    /// Returns how many notifications were newly marked by this call.
    ///
    /// # Errors
    ///
    /// Returns the backend's error if the query or an update fails.
    pub async fn mark_all_read(&self, viewer: &Viewer) -> Result<usize, StoreError> {
        if viewer.user_id.trim().is_empty() {
            return Err(StoreError::Validation("userId is required".to_string()));
        }

        let mut marked = 0;
        for notification in self.visible(viewer).await? {
            if notification.is_read_by(&viewer.user_id) {
                continue;
            }
            match self
                .backend
                .record_read(notification.id, &viewer.user_id, Utc::now())
                .await
            {
                Ok(ReadOutcome::Marked) => marked += 1,
                Ok(ReadOutcome::AlreadyRead) => {}
                // Deleted or expired since the query.
                Err(StoreError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }

        debug!(user = %viewer.user_id, marked, "Marked all notifications read");
        Ok(marked)
    }

    /// Hard-delete a notification.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the ID does not exist.
    pub async fn delete(&self, id: NotificationId) -> Result<(), StoreError> {
        if !self.backend.remove(id).await? {
            return Err(StoreError::NotFound(id));
        }
        debug!(id = %id, "Notification deleted");
        Ok(())
    }

    /// Reclaim expired notifications. Returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns the backend's error if the sweep fails.
    pub async fn sweep_expired(&self) -> Result<usize, StoreError> {
        let removed = self.backend.remove_expired(Utc::now()).await?;
        if removed > 0 {
            debug!(removed, "Reclaimed expired notifications");
        }
        Ok(removed)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::Duration;
    use convoy_protocol::{Priority, RecipientType, UserType};

    /// Backend whose every call fails, standing in for an unreachable database.
    pub(crate) struct UnavailableBackend;

    #[async_trait]
    impl NotificationBackend for UnavailableBackend {
        async fn insert(&self, _: Notification) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }

        async fn visible_to(
            &self,
            _: &Viewer,
            _: DateTime<Utc>,
        ) -> Result<Vec<Notification>, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }

        async fn record_read(
            &self,
            _: NotificationId,
            _: &str,
            _: DateTime<Utc>,
        ) -> Result<ReadOutcome, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }

        async fn remove(&self, _: NotificationId) -> Result<bool, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }

        async fn remove_expired(&self, _: DateTime<Utc>) -> Result<usize, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }

        fn name(&self) -> &'static str {
            "unavailable"
        }
    }

    fn driver(id: &str) -> Viewer {
        Viewer::new(id, UserType::Driver)
    }

    fn passenger(id: &str) -> Viewer {
        Viewer::new(id, UserType::Passenger)
    }

    fn broadcast(title: &str) -> NewNotification {
        NewNotification::new(RecipientType::All, title, "details")
    }

    #[tokio::test]
    async fn test_create_validates() {
        let store = NotificationStore::in_memory();

        let missing_message = NewNotification::new(RecipientType::All, "Title", "");
        assert!(matches!(
            store.create(missing_message).await,
            Err(StoreError::Validation(_))
        ));

        let created = store.create(broadcast("Hello")).await.unwrap();
        assert_eq!(created.title, "Hello");
        assert_eq!(created.read_count(), 0);
    }

    #[tokio::test]
    async fn test_list_newest_first_with_paging() {
        let store = NotificationStore::in_memory();
        for i in 0..5 {
            store.create(broadcast(&format!("n{}", i))).await.unwrap();
        }

        let first = store.list_for(&driver("d-1"), Page::new(2, 0)).await.unwrap();
        let titles: Vec<&str> = first.iter().map(|n| n.title.as_str()).collect();
        assert_eq!(titles, vec!["n4", "n3"]);

        let last = store.list_for(&driver("d-1"), Page::new(2, 4)).await.unwrap();
        assert_eq!(last.len(), 1);
        assert_eq!(last[0].title, "n0");

        let beyond = store.list_for(&driver("d-1"), Page::new(2, 10)).await.unwrap();
        assert!(beyond.is_empty());
    }

    #[tokio::test]
    async fn test_page_size_is_clamped() {
        let store = NotificationStore::with_config(
            Arc::new(MemoryBackend::new()),
            StoreConfig {
                default_page_size: 2,
                max_page_size: 3,
            },
        );
        for i in 0..5 {
            store.create(broadcast(&format!("n{}", i))).await.unwrap();
        }

        let viewer = driver("d-1");
        assert_eq!(store.list_for(&viewer, Page::default()).await.unwrap().len(), 2);
        assert_eq!(store.list_for(&viewer, Page::new(50, 0)).await.unwrap().len(), 3);
        assert_eq!(store.list_for(&viewer, Page::new(0, 0)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_targeted_notification_counts_for_one_user() {
        let store = NotificationStore::in_memory();
        store
            .create(
                NewNotification::new(RecipientType::Passenger, "Booking Confirmed", "Seat 4A")
                    .to_user("p-42")
                    .with_priority(Priority::High),
            )
            .await
            .unwrap();

        assert_eq!(store.unread_count_for(&passenger("p-42")).await.unwrap(), 1);
        assert_eq!(store.unread_count_for(&passenger("p-43")).await.unwrap(), 0);
        assert!(store
            .list_for(&passenger("p-43"), Page::default())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_recipient_id_wins_over_recipient_type() {
        let store = NotificationStore::in_memory();
        store
            .create(
                NewNotification::new(RecipientType::Driver, "Lost property", "Blue bag")
                    .to_user("u-1"),
            )
            .await
            .unwrap();

        let named = passenger("u-1");
        assert_eq!(store.list_for(&named, Page::default()).await.unwrap().len(), 1);
        assert_eq!(store.unread_count_for(&named).await.unwrap(), 1);
        assert!(store
            .list_for(&driver("d-1"), Page::default())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_unread_counts_are_independent_per_user() {
        let store = NotificationStore::in_memory();
        let n = store.create(broadcast("Holiday timetable")).await.unwrap();

        let u1 = driver("d-1");
        let u2 = passenger("p-1");
        assert_eq!(store.unread_count_for(&u1).await.unwrap(), 1);
        assert_eq!(store.unread_count_for(&u2).await.unwrap(), 1);

        store.mark_read(n.id, "d-1").await.unwrap();
        assert_eq!(store.unread_count_for(&u1).await.unwrap(), 0);
        assert_eq!(store.unread_count_for(&u2).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_mark_read_twice_keeps_one_entry() {
        let store = NotificationStore::in_memory();
        let n = store.create(broadcast("Once")).await.unwrap();

        assert_eq!(store.mark_read(n.id, "d-1").await.unwrap(), ReadOutcome::Marked);
        assert_eq!(
            store.mark_read(n.id, "d-1").await.unwrap(),
            ReadOutcome::AlreadyRead
        );

        let listed = store.list_for(&driver("d-1"), Page::default()).await.unwrap();
        assert_eq!(listed[0].read_count(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_mark_read_is_idempotent() {
        let store = Arc::new(NotificationStore::in_memory());
        let n = store.create(broadcast("Race")).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.mark_read(n.id, "d-1").await.unwrap()
            }));
        }

        let mut marked = 0;
        for handle in handles {
            if handle.await.unwrap() == ReadOutcome::Marked {
                marked += 1;
            }
        }
        assert_eq!(marked, 1);

        let listed = store.list_for(&driver("d-1"), Page::default()).await.unwrap();
        assert_eq!(listed[0].read_count(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_mark_all_read_from_two_sessions() {
        let store = Arc::new(NotificationStore::in_memory());
        for i in 0..20 {
            store.create(broadcast(&format!("n{}", i))).await.unwrap();
        }

        let a = {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.mark_all_read(&driver("d-1")).await.unwrap() })
        };
        let b = {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.mark_all_read(&driver("d-1")).await.unwrap() })
        };

        assert_eq!(a.await.unwrap() + b.await.unwrap(), 20);
        assert_eq!(store.unread_count_for(&driver("d-1")).await.unwrap(), 0);
        assert_eq!(store.mark_all_read(&driver("d-1")).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_mark_all_read_only_touches_visible() {
        let store = NotificationStore::in_memory();
        store
            .create(NewNotification::new(RecipientType::Driver, "Shift", "6am"))
            .await
            .unwrap();
        store.create(broadcast("Everyone")).await.unwrap();

        assert_eq!(store.mark_all_read(&passenger("p-1")).await.unwrap(), 1);
        assert_eq!(store.unread_count_for(&driver("d-1")).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_expired_hidden_before_sweep() {
        let backend = Arc::new(MemoryBackend::new());
        let store = NotificationStore::new(backend.clone());
        let now = Utc::now();

        let expired = store
            .create(broadcast("Old").expires_at(now - Duration::seconds(1)))
            .await
            .unwrap();
        store
            .create(broadcast("Fresh").expires_at(now + Duration::hours(1)))
            .await
            .unwrap();

        let listed = store.list_for(&driver("d-1"), Page::default()).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].title, "Fresh");
        assert_eq!(store.unread_count_for(&driver("d-1")).await.unwrap(), 1);
        assert!(matches!(
            store.mark_read(expired.id, "d-1").await,
            Err(StoreError::NotFound(_))
        ));

        assert_eq!(backend.len(), 2);
        assert_eq!(store.sweep_expired().await.unwrap(), 1);
        assert_eq!(backend.len(), 1);
    }

    #[tokio::test]
    async fn test_not_found() {
        let store = NotificationStore::in_memory();
        let missing = NotificationId::generate();
        assert!(matches!(
            store.mark_read(missing, "d-1").await,
            Err(StoreError::NotFound(id)) if id == missing
        ));

        let n = store.create(broadcast("Delete me")).await.unwrap();
        store.delete(n.id).await.unwrap();
        assert!(matches!(store.delete(n.id).await, Err(StoreError::NotFound(_))));
        assert!(matches!(
            store.mark_read(n.id, "d-1").await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_page_for_reports_totals() {
        let store = NotificationStore::in_memory();
        let first = store.create(broadcast("a")).await.unwrap();
        store.create(broadcast("b")).await.unwrap();
        store.create(broadcast("c")).await.unwrap();
        store.mark_read(first.id, "d-1").await.unwrap();

        let page = store.page_for(&driver("d-1"), Page::new(1, 0)).await.unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.total, 3);
        assert_eq!(page.unread, 2);
    }

    #[tokio::test]
    async fn test_backend_failure_surfaces() {
        let store = NotificationStore::new(Arc::new(UnavailableBackend));

        assert!(matches!(
            store.create(broadcast("x")).await,
            Err(StoreError::Unavailable(_))
        ));
        assert!(matches!(
            store.unread_count_for(&driver("d-1")).await,
            Err(StoreError::Unavailable(_))
        ));
        assert!(matches!(
            store.mark_read(NotificationId::generate(), "d-1").await,
            Err(StoreError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_blank_user_rejected() {
        let store = NotificationStore::in_memory();
        let n = store.create(broadcast("x")).await.unwrap();
        assert!(matches!(
            store.mark_read(n.id, " ").await,
            Err(StoreError::Validation(_))
        ));
    }
}
