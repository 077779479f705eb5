//! NotificationStore port - the durable source of truth for notifications.
//!
//! The store owns every state transition. The dispatcher only asks for them.
//!
//! # Design
//! - `claim_batch` is the one cross-host synchronization point: selection and
//!   the move to `IN_PROCESSING` happen in a single atomic step.
//! - Completion calls (`mark_processed`, `reschedule`, `quarantine`) are
//!   guarded by ownership: they return `false` and change nothing when the
//!   caller no longer holds the lease.
//! - Cancellation is idempotent and never fails on terminal rows.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::domain::{HostId, NewNotification, Notification, NotificationId, QueueName, SubjectId};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("schema migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("corrupt row {id}: {message}")]
    CorruptRow { id: String, message: String },
}

/// Number of rows per processing state in one queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub available: usize,
    pub in_processing: usize,
    pub processed: usize,
    pub quarantined: usize,
    pub removed: usize,
}

impl QueueCounts {
    pub fn pending(&self) -> usize {
        self.available + self.in_processing
    }
}

#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// Persist a new `AVAILABLE` row. Assigns id, total ordering and created date.
    async fn insert(&self, new: NewNotification) -> Result<NotificationId, StoreError>;

    /// Atomically lease up to `max_batch` claimable rows of `queue`, in rule order.
    ///
    /// Claimable: `AVAILABLE` with `effective_date <= now`, or `IN_PROCESSING`
    /// with `lease_expiry < now`. Claimed rows come back already moved to
    /// `IN_PROCESSING`, owned by `host`, expiring at `now + lease_duration`.
    async fn claim_batch(
        &self,
        queue: &QueueName,
        host: &HostId,
        now: DateTime<Utc>,
        lease_duration: Duration,
        max_batch: usize,
    ) -> Result<Vec<Notification>, StoreError>;

    async fn mark_processed(
        &self,
        queue: &QueueName,
        id: NotificationId,
        owner: &HostId,
    ) -> Result<bool, StoreError>;

    /// Back to `AVAILABLE` at `next_available`; bumps `error_count`.
    async fn reschedule(
        &self,
        queue: &QueueName,
        id: NotificationId,
        owner: &HostId,
        next_available: DateTime<Utc>,
        error: &str,
    ) -> Result<bool, StoreError>;

    /// Terminal failure; bumps `error_count`.
    async fn quarantine(
        &self,
        queue: &QueueName,
        id: NotificationId,
        owner: &HostId,
        error: &str,
    ) -> Result<bool, StoreError>;

    /// Remove every pending row matching the encoded key and subject.
    /// Returns how many rows were removed.
    async fn cancel_by_key(
        &self,
        queue: &QueueName,
        key_tag: &str,
        key_payload: &serde_json::Value,
        subject_id: SubjectId,
    ) -> Result<u64, StoreError>;

    async fn cancel_by_id(&self, queue: &QueueName, id: NotificationId) -> Result<u64, StoreError>;

    /// Pending rows of `subject_id` due at or before `as_of`, in rule order.
    async fn query(
        &self,
        queue: &QueueName,
        subject_id: SubjectId,
        as_of: DateTime<Utc>,
    ) -> Result<Vec<Notification>, StoreError>;

    async fn get(&self, queue: &QueueName, id: NotificationId) -> Result<Option<Notification>, StoreError>;

    async fn list_quarantined(&self, queue: &QueueName, limit: usize) -> Result<Vec<Notification>, StoreError>;

    async fn counts(&self, queue: &QueueName) -> Result<QueueCounts, StoreError>;
}
