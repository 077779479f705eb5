//! ServiceBuilder - wiring for `NotificationQueueService`.
//!
//! # Points
//! - Builder pattern
//! - Fail-fast validation at startup (expected queues must be registered)

use std::sync::Arc;

use super::config::DispatcherConfig;
use super::registry::QueueRegistry;
use super::service::NotificationQueueService;
use crate::domain::{Decider, QueueName};
use crate::error::QueueError;
use crate::ports::{Clock, NotificationStore, SystemClock};
use crate::typed::DecoderRegistry;

/// Builds a `NotificationQueueService`.
///
/// # Example
/// ```ignore
/// let service = NotificationQueueService::builder(store)
///     .config(settings.dispatcher)
///     .queue(queue.clone(), DecoderRegistry::new().with::<NextBillingDate, _>(handler)?)
///     .expect_queues(&[queue])
///     .build()?;
/// ```
///
/// # Fail-fast
/// - `expect_queues()` names queues this host must serve
/// - `build()` checks every expected queue was given handlers
pub struct ServiceBuilder {
    store: Arc<dyn NotificationStore>,
    clock: Arc<dyn Clock>,
    decider: Option<Arc<dyn Decider>>,
    config: DispatcherConfig,
    queues: Vec<(QueueName, DecoderRegistry)>,
    expected_queues: Option<Vec<QueueName>>,
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Missing queues: {0:?}. These queues were expected but not registered.")]
    MissingQueues(Vec<String>),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

impl ServiceBuilder {
    pub fn new(store: Arc<dyn NotificationStore>) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            decider: None,
            config: DispatcherConfig::default(),
            queues: Vec::new(),
            expected_queues: None,
        }
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the retry/quarantine policy built from the config.
    pub fn decider(mut self, decider: Arc<dyn Decider>) -> Self {
        self.decider = Some(decider);
        self
    }

    pub fn config(mut self, config: DispatcherConfig) -> Self {
        self.config = config;
        self
    }

    pub fn queue(mut self, queue: QueueName, handlers: DecoderRegistry) -> Self {
        self.queues.push((queue, handlers));
        self
    }

    pub fn expect_queues(mut self, queues: &[QueueName]) -> Self {
        self.expected_queues = Some(queues.to_vec());
        self
    }

    pub fn build(self) -> Result<NotificationQueueService, BuildError> {
        if let Some(expected) = &self.expected_queues {
            let missing: Vec<String> = expected
                .iter()
                .filter(|q| !self.queues.iter().any(|(registered, _)| registered == *q))
                .map(QueueName::composite)
                .collect();
            if !missing.is_empty() {
                return Err(BuildError::MissingQueues(missing));
            }
        }

        let registry = QueueRegistry::new();
        for (queue, handlers) in self.queues {
            registry.register(queue, handlers)?;
        }

        let decider = match self.decider {
            Some(decider) => decider,
            None => Arc::new(self.config.decider()),
        };

        Ok(NotificationQueueService {
            store: self.store,
            registry,
            clock: self.clock,
            decider,
            host: self.config.host_id(),
            config: self.config,
        })
    }
}
