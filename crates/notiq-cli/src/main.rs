mod settings;

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::signal;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use notiq_core::NotificationQueueService;
use notiq_core::domain::{HandlerOutcome, QueueName, SubjectId};
use notiq_core::impls::SqliteNotificationStore;
use notiq_core::typed::{DecoderRegistry, Delivery, Handler, NotificationKey};

use settings::Settings;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SubscriptionTransition {
    subscription_id: String,
    transition: String,
}

impl NotificationKey for SubscriptionTransition {
    const TAG: &'static str = "billing.subscription.transition.v1";
}

/// Fails the first `remaining_failures` deliveries, then succeeds.
struct TransitionHandler {
    remaining_failures: AtomicU32,
}

impl TransitionHandler {
    fn new(n: u32) -> Self {
        Self {
            remaining_failures: AtomicU32::new(n),
        }
    }
}

#[async_trait]
impl Handler<SubscriptionTransition> for TransitionHandler {
    async fn process(&self, key: SubscriptionTransition, delivery: &Delivery) -> HandlerOutcome {
        let left = self.remaining_failures.load(Ordering::Relaxed);
        if left > 0 {
            self.remaining_failures.fetch_sub(1, Ordering::Relaxed);
            return HandlerOutcome::retryable(format!("intentional failure (left={left})"));
        }

        tracing::info!(
            subscription_id = %key.subscription_id,
            transition = %key.transition,
            attempt = delivery.attempt(),
            "Applied subscription transition"
        );
        HandlerOutcome::success()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let settings = Settings::new().context("failed to load settings")?;
    let store = SqliteNotificationStore::connect(&settings.database.url)
        .await
        .with_context(|| format!("failed to open {}", settings.database.url))?;

    let queue = QueueName::new("subscription-service", "subscription-events")?;
    let handlers = DecoderRegistry::new()
        .with::<SubscriptionTransition, _>(TransitionHandler::new(settings.demo.failures))?;

    let service = NotificationQueueService::builder(Arc::new(store))
        .config(settings.dispatcher.clone())
        .queue(queue.clone(), handlers)
        .expect_queues(std::slice::from_ref(&queue))
        .build()?;

    if settings.demo.seed {
        seed(&service, &queue).await?;
    }

    service.start(&queue).await?;
    tracing::info!(queue = %queue, host = %service.host(), "Running; press Ctrl+C to stop");

    signal::ctrl_c().await.context("failed to listen for Ctrl+C")?;

    tracing::info!("Shutting down...");
    service.stop_all().await;

    let status = service.status(&queue).await?;
    tracing::info!(status = %serde_json::to_string(&status)?, "Final queue status");
    Ok(())
}

/// Enqueue a due transition, a future one, and one that is cancelled again.
async fn seed(service: &NotificationQueueService, queue: &QueueName) -> anyhow::Result<()> {
    let subject = SubjectId::generate();
    let now = Utc::now();

    let phase = SubscriptionTransition {
        subscription_id: "sub-1".to_string(),
        transition: "PHASE".to_string(),
    };
    service.enqueue(queue, subject, &phase, now).await?;

    let cancel = SubscriptionTransition {
        subscription_id: "sub-1".to_string(),
        transition: "CANCEL".to_string(),
    };
    service
        .enqueue(queue, subject, &cancel, now + chrono::Duration::seconds(10))
        .await?;

    let pause = SubscriptionTransition {
        subscription_id: "sub-1".to_string(),
        transition: "PAUSE".to_string(),
    };
    service
        .enqueue_with_snapshot(queue, subject, &pause, now + chrono::Duration::seconds(5), now)
        .await?;
    let removed = service.cancel_by_key(queue, &pause, subject).await?;

    let pending = service
        .query(queue, subject, now + chrono::Duration::minutes(1))
        .await?;
    tracing::info!(pending = pending.len(), removed, "Seeded demo notifications");
    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
