//! QueueRegistry - queue name -> handlers + lifecycle.
//!
//! Each entry owns its own started flag and dispatcher handle; there is no
//! registry-wide lifecycle state. The map lock is never held across an
//! await, so stopping one queue does not block work on another.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::Mutex;
use tracing::info;

use super::dispatcher::{Dispatcher, DispatcherHandle};
use crate::domain::QueueName;
use crate::error::QueueError;
use crate::typed::{DecoderRegistry, RegistryError};

struct QueueEntry {
    handlers: Arc<DecoderRegistry>,
    started: AtomicBool,
    /// Serializes start/stop of this queue.
    dispatcher: Mutex<Option<DispatcherHandle>>,
}

#[derive(Default)]
pub struct QueueRegistry {
    queues: RwLock<HashMap<QueueName, Arc<QueueEntry>>>,
}

impl QueueRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `handlers` to `queue`. Must happen before `start`.
    pub fn register(&self, queue: QueueName, handlers: DecoderRegistry) -> Result<(), QueueError> {
        if handlers.is_empty() {
            return Err(RegistryError::Empty.into());
        }
        let mut queues = self.queues.write().unwrap_or_else(PoisonError::into_inner);
        if queues.contains_key(&queue) {
            return Err(QueueError::AlreadyRegistered(queue));
        }
        info!(queue = %queue, tags = ?handlers.registered_tags(), "Queue registered");
        queues.insert(
            queue,
            Arc::new(QueueEntry {
                handlers: Arc::new(handlers),
                started: AtomicBool::new(false),
                dispatcher: Mutex::new(None),
            }),
        );
        Ok(())
    }

    fn entry(&self, queue: &QueueName) -> Result<Arc<QueueEntry>, QueueError> {
        self.queues
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(queue)
            .cloned()
            .ok_or_else(|| QueueError::QueueNotRegistered(queue.clone()))
    }

    pub fn handlers(&self, queue: &QueueName) -> Result<Arc<DecoderRegistry>, QueueError> {
        Ok(Arc::clone(&self.entry(queue)?.handlers))
    }

    /// Start the queue's dispatcher, built by `make` from its handlers.
    ///
    /// Returns false (a no-op) if it was already started.
    pub async fn start(
        &self,
        queue: &QueueName,
        make: impl FnOnce(Arc<DecoderRegistry>) -> Dispatcher,
    ) -> Result<bool, QueueError> {
        let entry = self.entry(queue)?;
        let mut dispatcher = entry.dispatcher.lock().await;
        if dispatcher.is_some() {
            return Ok(false);
        }
        *dispatcher = Some(make(Arc::clone(&entry.handlers)).spawn());
        entry.started.store(true, Ordering::Release);
        Ok(true)
    }

    /// Signal the dispatcher and wait for its current batch to drain.
    ///
    /// Returns false (a no-op) if it was not started.
    pub async fn stop(&self, queue: &QueueName) -> Result<bool, QueueError> {
        let entry = self.entry(queue)?;
        let mut dispatcher = entry.dispatcher.lock().await;
        let Some(handle) = dispatcher.take() else {
            return Ok(false);
        };
        entry.started.store(false, Ordering::Release);
        handle.shutdown_and_join().await;
        Ok(true)
    }

    /// The lifecycle flag, not loop liveness. Unknown queues are not started.
    pub fn is_started(&self, queue: &QueueName) -> bool {
        self.entry(queue)
            .map(|entry| entry.started.load(Ordering::Acquire))
            .unwrap_or(false)
    }

    /// Registered queue names, sorted by composite name.
    pub fn queue_names(&self) -> Vec<QueueName> {
        let mut names: Vec<QueueName> = self
            .queues
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort_by_key(|name| name.composite());
        names
    }
}
