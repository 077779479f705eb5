//! In-memory notification store.
//!
//! Everything lives in one map behind a `tokio::sync::Mutex`; each operation
//! runs entirely under the lock, which makes `claim_batch` atomic. Not
//! durable: meant for tests and single-process embedding.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::domain::{
    HostId, NewNotification, Notification, NotificationId, ProcessingState, QueueName, SubjectId,
    TimedOrdering,
};
use crate::ports::{
    Clock, IdGenerator, NotificationStore, QueueCounts, StoreError, SystemClock, UlidGenerator,
    add_duration,
};

struct MemoryState {
    /// All rows, every queue (single source of truth).
    records: HashMap<NotificationId, Notification>,

    /// Last assigned total ordering.
    last_ordering: i64,
}

impl MemoryState {
    fn rows_of<'a>(&'a self, queue: &'a QueueName) -> impl Iterator<Item = &'a Notification> + 'a {
        self.records.values().filter(move |n| &n.queue_name == queue)
    }

    /// Apply `f` if the row belongs to `queue` and is leased by `owner`.
    fn complete(
        &mut self,
        queue: &QueueName,
        id: NotificationId,
        owner: &HostId,
        f: impl FnOnce(&mut Notification),
    ) -> bool {
        match self.records.get_mut(&id) {
            Some(record) if &record.queue_name == queue && record.is_owned_by(owner) => {
                f(record);
                true
            }
            _ => false,
        }
    }

    fn remove_where(&mut self, mut predicate: impl FnMut(&Notification) -> bool) -> u64 {
        let mut removed = 0;
        for record in self.records.values_mut() {
            if predicate(record) && record.remove() {
                removed += 1;
            }
        }
        removed
    }
}

pub struct InMemoryNotificationStore {
    state: Mutex<MemoryState>,
    clock: Arc<dyn Clock>,
    ids: Box<dyn IdGenerator>,
}

impl InMemoryNotificationStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// `created_date` and ID timestamps follow `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(MemoryState {
                records: HashMap::new(),
                last_ordering: 0,
            }),
            ids: Box::new(UlidGenerator::new(clock.clone())),
            clock,
        }
    }
}

impl Default for InMemoryNotificationStore {
    fn default() -> Self {
        Self::new()
    }
}

fn sorted(mut rows: Vec<Notification>) -> Vec<Notification> {
    rows.sort_by_key(|n| n.ordering_key());
    rows
}

#[async_trait]
impl NotificationStore for InMemoryNotificationStore {
    async fn insert(&self, new: NewNotification) -> Result<NotificationId, StoreError> {
        let mut state = self.state.lock().await;
        state.last_ordering += 1;
        let id = self.ids.generate_notification_id();
        let record = Notification::from_new(id, state.last_ordering, self.clock.now(), new);
        state.records.insert(id, record);
        Ok(id)
    }

    async fn claim_batch(
        &self,
        queue: &QueueName,
        host: &HostId,
        now: DateTime<Utc>,
        lease_duration: Duration,
        max_batch: usize,
    ) -> Result<Vec<Notification>, StoreError> {
        let mut state = self.state.lock().await;

        let mut candidates: Vec<_> = state
            .rows_of(queue)
            .filter(|n| n.is_claimable(now))
            .map(|n| (n.ordering_key(), n.id))
            .collect();
        candidates.sort();
        candidates.truncate(max_batch);

        let lease_expiry = add_duration(now, lease_duration);
        let mut claimed = Vec::with_capacity(candidates.len());
        for (_, id) in candidates {
            if let Some(record) = state.records.get_mut(&id) {
                record.claim(host.clone(), lease_expiry);
                claimed.push(record.clone());
            }
        }
        Ok(claimed)
    }

    async fn mark_processed(
        &self,
        queue: &QueueName,
        id: NotificationId,
        owner: &HostId,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        Ok(state.complete(queue, id, owner, Notification::mark_processed))
    }

    async fn reschedule(
        &self,
        queue: &QueueName,
        id: NotificationId,
        owner: &HostId,
        next_available: DateTime<Utc>,
        error: &str,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        Ok(state.complete(queue, id, owner, |n| {
            n.reschedule(next_available, error.to_string())
        }))
    }

    async fn quarantine(
        &self,
        queue: &QueueName,
        id: NotificationId,
        owner: &HostId,
        error: &str,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        Ok(state.complete(queue, id, owner, |n| n.quarantine(error.to_string())))
    }

    async fn cancel_by_key(
        &self,
        queue: &QueueName,
        key_tag: &str,
        key_payload: &serde_json::Value,
        subject_id: SubjectId,
    ) -> Result<u64, StoreError> {
        let mut state = self.state.lock().await;
        Ok(state.remove_where(|n| {
            &n.queue_name == queue
                && n.subject_id == subject_id
                && n.key_tag == key_tag
                && &n.key_payload == key_payload
        }))
    }

    async fn cancel_by_id(&self, queue: &QueueName, id: NotificationId) -> Result<u64, StoreError> {
        let mut state = self.state.lock().await;
        Ok(state.remove_where(|n| &n.queue_name == queue && n.id == id))
    }

    async fn query(
        &self,
        queue: &QueueName,
        subject_id: SubjectId,
        as_of: DateTime<Utc>,
    ) -> Result<Vec<Notification>, StoreError> {
        let state = self.state.lock().await;
        let rows = state
            .rows_of(queue)
            .filter(|n| {
                n.subject_id == subject_id
                    && n.processing_state.is_pending()
                    && n.effective_date <= as_of
            })
            .cloned()
            .collect();
        Ok(sorted(rows))
    }

    async fn get(&self, queue: &QueueName, id: NotificationId) -> Result<Option<Notification>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .records
            .get(&id)
            .filter(|n| &n.queue_name == queue)
            .cloned())
    }

    async fn list_quarantined(&self, queue: &QueueName, limit: usize) -> Result<Vec<Notification>, StoreError> {
        let state = self.state.lock().await;
        let rows = state
            .rows_of(queue)
            .filter(|n| n.processing_state == ProcessingState::Quarantined)
            .cloned()
            .collect();
        let mut rows = sorted(rows);
        rows.truncate(limit);
        Ok(rows)
    }

    async fn counts(&self, queue: &QueueName) -> Result<QueueCounts, StoreError> {
        let state = self.state.lock().await;
        let mut counts = QueueCounts::default();
        for record in state.rows_of(queue) {
            match record.processing_state {
                ProcessingState::Available => counts.available += 1,
                ProcessingState::InProcessing => counts.in_processing += 1,
                ProcessingState::Processed => counts.processed += 1,
                ProcessingState::Quarantined => counts.quarantined += 1,
                ProcessingState::Removed => counts.removed += 1,
            }
        }
        Ok(counts)
    }
}
