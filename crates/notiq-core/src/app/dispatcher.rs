//! Dispatcher - per-queue claim/handle/decide/complete loop.
//!
//! # Flow (one tick)
//! 1. `NotificationStore::claim_batch` leases due rows, in rule order
//! 2. `DecoderRegistry::dispatch` decodes the key and runs its handler
//! 3. `Decider::decide` turns the outcome into a `Decision`
//! 4. The decision is applied with an ownership-guarded store call
//!
//! A batch fans out over at most `worker_count` concurrent handler tasks.
//! Shutdown is cooperative: a tick in progress always runs to completion.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Semaphore, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use super::config::DispatcherConfig;
use crate::domain::{Decider, Decision, HostId, Notification, QueueName};
use crate::ports::{Clock, NotificationStore, StoreError, add_duration};
use crate::typed::{DecoderRegistry, Delivery};

/// What happened to the rows of one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub claimed: usize,
    pub processed: usize,
    pub rescheduled: usize,
    pub quarantined: usize,
    /// Completions refused because the lease was lost or the row cancelled.
    pub lost: usize,
}

impl TickReport {
    fn record(&mut self, applied: Applied) {
        match applied {
            Applied::Processed => self.processed += 1,
            Applied::Rescheduled => self.rescheduled += 1,
            Applied::Quarantined => self.quarantined += 1,
            Applied::Lost => self.lost += 1,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Applied {
    Processed,
    Rescheduled,
    Quarantined,
    Lost,
}

#[derive(Clone)]
pub struct Dispatcher {
    queue: QueueName,
    host: HostId,
    store: Arc<dyn NotificationStore>,
    handlers: Arc<DecoderRegistry>,
    decider: Arc<dyn Decider>,
    clock: Arc<dyn Clock>,
    lease_duration: Duration,
    poll_interval: Duration,
    batch_size: usize,
    workers: Arc<Semaphore>,
}

impl Dispatcher {
    pub fn new(
        queue: QueueName,
        store: Arc<dyn NotificationStore>,
        handlers: Arc<DecoderRegistry>,
        decider: Arc<dyn Decider>,
        clock: Arc<dyn Clock>,
        host: HostId,
        config: &DispatcherConfig,
    ) -> Self {
        Self {
            queue,
            host,
            store,
            handlers,
            decider,
            clock,
            lease_duration: config.lease_duration(),
            poll_interval: config.poll_interval(),
            batch_size: config.batch_size(),
            workers: Arc::new(Semaphore::new(config.worker_count())),
        }
    }

    pub fn queue(&self) -> &QueueName {
        &self.queue
    }

    /// Claim one batch and process it completely.
    ///
    /// A store error aborts the tick after in-flight rows finish; rows whose
    /// completion was not written stay leased until their lease expires.
    pub async fn tick(&self) -> Result<TickReport, StoreError> {
        let now = self.clock.now();
        let batch = self
            .store
            .claim_batch(&self.queue, &self.host, now, self.lease_duration, self.batch_size)
            .await?;

        let mut report = TickReport {
            claimed: batch.len(),
            ..TickReport::default()
        };
        if batch.is_empty() {
            return Ok(report);
        }
        debug!(queue = %self.queue, host = %self.host, claimed = batch.len(), "Claimed batch");

        let mut tasks = JoinSet::new();
        for notification in batch {
            // The semaphore is never closed.
            let Ok(permit) = Arc::clone(&self.workers).acquire_owned().await else {
                break;
            };
            let this = self.clone();
            tasks.spawn(async move {
                let _permit = permit;
                this.process_one(notification).await
            });
        }

        let mut first_error = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(applied)) => report.record(applied),
                Ok(Err(e)) => {
                    first_error.get_or_insert(e);
                }
                Err(join_error) => {
                    // Lease expiry hands the row to the next claim.
                    error!(queue = %self.queue, error = %join_error, "Handler task failed");
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }

    async fn process_one(&self, notification: Notification) -> Result<Applied, StoreError> {
        let delivery = Delivery {
            notification_id: notification.id,
            subject_id: notification.subject_id,
            effective_date: notification.effective_date,
            error_count: notification.error_count,
        };

        let decision = match self
            .handlers
            .dispatch(&notification.key_tag, &notification.key_payload, &delivery)
            .await
        {
            Ok(outcome) => self.decider.decide(&notification, &outcome),
            Err(e) => Decision::Quarantine {
                reason: format!("undecodable key: {e}"),
            },
        };

        self.apply(&notification, decision).await
    }

    async fn apply(&self, notification: &Notification, decision: Decision) -> Result<Applied, StoreError> {
        let id = notification.id;
        let (applied, done) = match decision {
            Decision::MarkProcessed => (
                Applied::Processed,
                self.store.mark_processed(&self.queue, id, &self.host).await?,
            ),
            Decision::Reschedule { delay, reason } => {
                let next_available = add_duration(self.clock.now(), delay);
                warn!(
                    queue = %self.queue,
                    notification_id = %id,
                    error_count = notification.error_count + 1,
                    retry_at = %next_available,
                    error = %reason,
                    "Handler failed; rescheduling"
                );
                (
                    Applied::Rescheduled,
                    self.store
                        .reschedule(&self.queue, id, &self.host, next_available, &reason)
                        .await?,
                )
            }
            Decision::Quarantine { reason } => {
                error!(
                    queue = %self.queue,
                    notification_id = %id,
                    error_count = notification.error_count + 1,
                    error = %reason,
                    "Quarantining notification"
                );
                (
                    Applied::Quarantined,
                    self.store.quarantine(&self.queue, id, &self.host, &reason).await?,
                )
            }
        };

        if done {
            Ok(applied)
        } else {
            warn!(
                queue = %self.queue,
                notification_id = %id,
                host = %self.host,
                "Completion refused: lease lost or notification cancelled"
            );
            Ok(Applied::Lost)
        }
    }

    /// Run the poll loop on a new task.
    pub fn spawn(self) -> DispatcherHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(self.run(shutdown_rx));
        DispatcherHandle { shutdown_tx, join }
    }

    async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(queue = %self.queue, host = %self.host, "Dispatcher started");
        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            let full_batch = match self.tick().await {
                Ok(report) => report.claimed >= self.batch_size,
                Err(e) => {
                    warn!(queue = %self.queue, error = %e, "Tick aborted; retrying on next poll");
                    false
                }
            };
            if full_batch {
                // More may be due right now.
                tokio::task::yield_now().await;
                continue;
            }

            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
        info!(queue = %self.queue, host = %self.host, "Dispatcher stopped");
    }
}

/// Running dispatcher loop.
/// - `request_shutdown` stops it taking new batches
/// - `shutdown_and_join` also waits for the current batch to drain
pub struct DispatcherHandle {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl DispatcherHandle {
    pub fn request_shutdown(&self) {
        // ignore send error: the loop may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        if let Err(e) = self.join.await {
            error!(error = %e, "Dispatcher task ended abnormally");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}
