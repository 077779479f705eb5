//! NotificationQueueService - the facade producers and operators use.
//!
//! Producers enqueue and cancel; operators register handlers, start and stop
//! dispatchers and inspect quarantined rows. Enqueueing does not require the
//! queue to be registered on this host: the handler may run elsewhere.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use super::builder::ServiceBuilder;
use super::config::DispatcherConfig;
use super::dispatcher::{Dispatcher, TickReport};
use super::registry::QueueRegistry;
use super::status::QueueStatus;
use crate::domain::{Decider, HostId, NewNotification, Notification, NotificationId, QueueName, SubjectId};
use crate::error::QueueError;
use crate::ports::{Clock, NotificationStore, QueueCounts};
use crate::typed::{DecoderRegistry, KeyCodec, NotificationKey};

pub struct NotificationQueueService {
    pub(super) store: Arc<dyn NotificationStore>,
    pub(super) registry: QueueRegistry,
    pub(super) clock: Arc<dyn Clock>,
    pub(super) decider: Arc<dyn Decider>,
    pub(super) config: DispatcherConfig,
    pub(super) host: HostId,
}

impl NotificationQueueService {
    pub fn builder(store: Arc<dyn NotificationStore>) -> ServiceBuilder {
        ServiceBuilder::new(store)
    }

    pub fn host(&self) -> &HostId {
        &self.host
    }

    pub fn store(&self) -> &Arc<dyn NotificationStore> {
        &self.store
    }

    /// Schedule `key` for `subject_id` at `effective_date`.
    ///
    /// Fails with `QueueError::Serialization` before touching the store if
    /// the key cannot be encoded.
    pub async fn enqueue<K: NotificationKey>(
        &self,
        queue: &QueueName,
        subject_id: SubjectId,
        key: &K,
        effective_date: DateTime<Utc>,
    ) -> Result<NotificationId, QueueError> {
        self.insert(queue, subject_id, key, effective_date, None).await
    }

    /// Like `enqueue`, recording the catalog version in force for the key.
    pub async fn enqueue_with_snapshot<K: NotificationKey>(
        &self,
        queue: &QueueName,
        subject_id: SubjectId,
        key: &K,
        effective_date: DateTime<Utc>,
        catalog_effective_date: DateTime<Utc>,
    ) -> Result<NotificationId, QueueError> {
        self.insert(queue, subject_id, key, effective_date, Some(catalog_effective_date))
            .await
    }

    async fn insert<K: NotificationKey>(
        &self,
        queue: &QueueName,
        subject_id: SubjectId,
        key: &K,
        effective_date: DateTime<Utc>,
        catalog_effective_date: Option<DateTime<Utc>>,
    ) -> Result<NotificationId, QueueError> {
        let encoded = KeyCodec::encode(key)?;
        let id = self
            .store
            .insert(NewNotification {
                queue_name: queue.clone(),
                key_tag: encoded.tag,
                key_payload: encoded.payload,
                subject_id,
                effective_date,
                catalog_effective_date,
            })
            .await?;
        debug!(queue = %queue, notification_id = %id, key_tag = K::TAG, %effective_date, "Enqueued");
        Ok(id)
    }

    /// Cancel every pending notification of `subject_id` carrying `key`.
    pub async fn cancel_by_key<K: NotificationKey>(
        &self,
        queue: &QueueName,
        key: &K,
        subject_id: SubjectId,
    ) -> Result<u64, QueueError> {
        let encoded = KeyCodec::encode(key)?;
        let removed = self
            .store
            .cancel_by_key(queue, &encoded.tag, &encoded.payload, subject_id)
            .await?;
        debug!(queue = %queue, key_tag = K::TAG, removed, "Cancelled by key");
        Ok(removed)
    }

    pub async fn cancel_by_id(&self, queue: &QueueName, id: NotificationId) -> Result<u64, QueueError> {
        Ok(self.store.cancel_by_id(queue, id).await?)
    }

    /// Pending notifications of `subject_id` due at or before `as_of`, in claim order.
    pub async fn query(
        &self,
        queue: &QueueName,
        subject_id: SubjectId,
        as_of: DateTime<Utc>,
    ) -> Result<Vec<Notification>, QueueError> {
        Ok(self.store.query(queue, subject_id, as_of).await?)
    }

    pub fn register(&self, queue: QueueName, handlers: DecoderRegistry) -> Result<(), QueueError> {
        self.registry.register(queue, handlers)
    }

    /// Start dispatching `queue`. Idempotent.
    pub async fn start(&self, queue: &QueueName) -> Result<(), QueueError> {
        let started = self
            .registry
            .start(queue, |handlers| self.dispatcher_for(queue, handlers))
            .await?;
        if !started {
            debug!(queue = %queue, "Already started");
        }
        Ok(())
    }

    /// Stop dispatching `queue` after its current batch. No-op if not started.
    pub async fn stop(&self, queue: &QueueName) -> Result<(), QueueError> {
        if self.registry.stop(queue).await? {
            info!(queue = %queue, "Queue stopped");
        }
        Ok(())
    }

    pub async fn stop_all(&self) {
        for queue in self.registry.queue_names() {
            // Registered names only: stop cannot miss.
            if let Err(e) = self.stop(&queue).await {
                tracing::warn!(queue = %queue, error = %e, "Failed to stop queue");
            }
        }
    }

    pub fn is_started(&self, queue: &QueueName) -> bool {
        self.registry.is_started(queue)
    }

    /// Run a single tick for `queue` on the caller's task, whether or not
    /// its loop is started.
    pub async fn tick(&self, queue: &QueueName) -> Result<TickReport, QueueError> {
        let handlers = self.registry.handlers(queue)?;
        Ok(self.dispatcher_for(queue, handlers).tick().await?)
    }

    pub async fn quarantined(&self, queue: &QueueName, limit: usize) -> Result<Vec<Notification>, QueueError> {
        Ok(self.store.list_quarantined(queue, limit).await?)
    }

    pub async fn counts(&self, queue: &QueueName) -> Result<QueueCounts, QueueError> {
        Ok(self.store.counts(queue).await?)
    }

    pub async fn status(&self, queue: &QueueName) -> Result<QueueStatus, QueueError> {
        let handlers = self.registry.handlers(queue)?;
        Ok(QueueStatus {
            queue_name: queue.clone(),
            started: self.registry.is_started(queue),
            registered_tags: handlers.registered_tags(),
            counts: self.store.counts(queue).await?,
        })
    }

    fn dispatcher_for(&self, queue: &QueueName, handlers: Arc<DecoderRegistry>) -> Dispatcher {
        Dispatcher::new(
            queue.clone(),
            Arc::clone(&self.store),
            handlers,
            Arc::clone(&self.decider),
            Arc::clone(&self.clock),
            self.host.clone(),
            &self.config,
        )
    }
}
