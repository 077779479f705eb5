//! Notification record: one scheduled work item.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{HostId, NotificationId, SubjectId};
use super::ordering::TimedOrdering;
use super::queue_name::QueueName;
use super::state::ProcessingState;

/// A notification as stored by a `NotificationStore`.
///
/// Design:
/// - This is the single source of truth for the item's state.
/// - State transitions go through the methods below so that
///   `owner_host`/`lease_expiry` are set only while `InProcessing`.
/// - `error_count` never decreases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: NotificationId,
    pub queue_name: QueueName,

    /// Tag naming the concrete key type (`NotificationKey::TAG`).
    pub key_tag: String,

    /// Structured (JSON) encoding of the key.
    pub key_payload: serde_json::Value,

    pub subject_id: SubjectId,

    /// Claimable at or after this instant.
    pub effective_date: DateTime<Utc>,

    /// Store-assigned insertion sequence.
    pub total_ordering: i64,

    /// Catalog snapshot captured by the producer, if any.
    pub catalog_effective_date: Option<DateTime<Utc>>,

    pub owner_host: Option<HostId>,
    pub lease_expiry: Option<DateTime<Utc>>,

    pub processing_state: ProcessingState,

    /// Number of failed processing attempts.
    pub error_count: u32,

    /// Last failure message (if any).
    pub last_error: Option<String>,

    pub created_date: DateTime<Utc>,
}

impl Notification {
    /// Build the initial `Available` record for a new item.
    pub fn from_new(
        id: NotificationId,
        total_ordering: i64,
        created_date: DateTime<Utc>,
        new: NewNotification,
    ) -> Self {
        Self {
            id,
            queue_name: new.queue_name,
            key_tag: new.key_tag,
            key_payload: new.key_payload,
            subject_id: new.subject_id,
            effective_date: new.effective_date,
            total_ordering,
            catalog_effective_date: new.catalog_effective_date,
            owner_host: None,
            lease_expiry: None,
            processing_state: ProcessingState::Available,
            error_count: 0,
            last_error: None,
            created_date,
        }
    }

    /// Can a claim at `now` take this row?
    ///
    /// Either it is available and due, or its lease has expired.
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        match self.processing_state {
            ProcessingState::Available => self.effective_date <= now,
            ProcessingState::InProcessing => self.lease_expiry.is_some_and(|expiry| expiry < now),
            _ => false,
        }
    }

    /// Is this row currently leased by `host`?
    pub fn is_owned_by(&self, host: &HostId) -> bool {
        self.processing_state == ProcessingState::InProcessing
            && self.owner_host.as_ref() == Some(host)
    }

    pub fn claim(&mut self, host: HostId, lease_expiry: DateTime<Utc>) {
        self.processing_state = ProcessingState::InProcessing;
        self.owner_host = Some(host);
        self.lease_expiry = Some(lease_expiry);
    }

    pub fn mark_processed(&mut self) {
        self.processing_state = ProcessingState::Processed;
        self.release_lease();
    }

    /// Back to `Available` at `next_available`, counting the failure.
    pub fn reschedule(&mut self, next_available: DateTime<Utc>, error: String) {
        self.processing_state = ProcessingState::Available;
        self.effective_date = next_available;
        self.error_count += 1;
        self.last_error = Some(error);
        self.release_lease();
    }

    pub fn quarantine(&mut self, error: String) {
        self.processing_state = ProcessingState::Quarantined;
        self.error_count += 1;
        self.last_error = Some(error);
        self.release_lease();
    }

    /// Cancel. Returns false (and changes nothing) if already terminal.
    pub fn remove(&mut self) -> bool {
        if self.processing_state.is_terminal() {
            return false;
        }
        self.processing_state = ProcessingState::Removed;
        self.release_lease();
        true
    }

    fn release_lease(&mut self) {
        self.owner_host = None;
        self.lease_expiry = None;
    }
}

impl TimedOrdering for Notification {
    fn effective_date(&self) -> DateTime<Utc> {
        self.effective_date
    }

    fn total_ordering(&self) -> i64 {
        self.total_ordering
    }

    fn catalog_effective_date(&self) -> Option<DateTime<Utc>> {
        self.catalog_effective_date
    }
}

/// Insert request: everything the producer decides. The store assigns
/// `id`, `total_ordering` and `created_date`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewNotification {
    pub queue_name: QueueName,
    pub key_tag: String,
    pub key_payload: serde_json::Value,
    pub subject_id: SubjectId,
    pub effective_date: DateTime<Utc>,
    pub catalog_effective_date: Option<DateTime<Utc>>,
}
