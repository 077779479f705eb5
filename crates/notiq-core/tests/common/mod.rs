#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use notiq_core::app::{DispatcherConfig, NotificationQueueService};
use notiq_core::domain::{HandlerOutcome, QueueName};
use notiq_core::ports::{Clock, ManualClock, NotificationStore};
use notiq_core::typed::{DecoderRegistry, Delivery, Handler, NotificationKey};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseChange {
    pub subscription: String,
    pub phase: String,
}

impl NotificationKey for PhaseChange {
    const TAG: &'static str = "billing.phase_change.v1";
}

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 7, 1, 0, 0, 0).unwrap()
}

pub fn queue() -> QueueName {
    QueueName::new("subscription-service", "subscription-events").unwrap()
}

pub fn key(phase: &str) -> PhaseChange {
    PhaseChange {
        subscription: "sub-42".to_string(),
        phase: phase.to_string(),
    }
}

/// Records every key it sees and answers from a script (then `Success`).
#[derive(Clone, Default)]
pub struct ScriptedHandler {
    pub seen: Arc<Mutex<Vec<(PhaseChange, Delivery)>>>,
    script: Arc<Mutex<VecDeque<HandlerOutcome>>>,
}

impl ScriptedHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn answering(outcomes: impl IntoIterator<Item = HandlerOutcome>) -> Self {
        Self {
            seen: Arc::default(),
            script: Arc::new(Mutex::new(outcomes.into_iter().collect())),
        }
    }

    pub async fn seen_phases(&self) -> Vec<String> {
        self.seen
            .lock()
            .await
            .iter()
            .map(|(k, _)| k.phase.clone())
            .collect()
    }
}

#[async_trait]
impl Handler<PhaseChange> for ScriptedHandler {
    async fn process(&self, key: PhaseChange, delivery: &Delivery) -> HandlerOutcome {
        self.seen.lock().await.push((key, delivery.clone()));
        self.script
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(HandlerOutcome::success)
    }
}

pub fn config(max_retries: u32) -> DispatcherConfig {
    let mut config = DispatcherConfig {
        host_id: Some("host-a".to_string()),
        worker_count: 1,
        max_retries,
        lease_duration_ms: 60_000,
        poll_interval_ms: 10,
        ..DispatcherConfig::default()
    };
    config.retry.base_delay_ms = 1_000;
    config
}

pub fn service(
    store: Arc<dyn NotificationStore>,
    clock: Arc<ManualClock>,
    handler: ScriptedHandler,
    config: DispatcherConfig,
) -> NotificationQueueService {
    service_with(store, clock, handler, config)
}

pub fn service_with<H: Handler<PhaseChange> + 'static>(
    store: Arc<dyn NotificationStore>,
    clock: Arc<ManualClock>,
    handler: H,
    config: DispatcherConfig,
) -> NotificationQueueService {
    let handlers = DecoderRegistry::new()
        .with::<PhaseChange, _>(handler)
        .unwrap();
    let clock: Arc<dyn Clock> = clock;
    NotificationQueueService::builder(store)
        .clock(clock)
        .config(config)
        .queue(queue(), handlers)
        .build()
        .unwrap()
}
