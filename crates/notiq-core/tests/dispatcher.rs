mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use notiq_core::QueueError;
use notiq_core::domain::{
    HandlerOutcome, HostId, NewNotification, Notification, NotificationId, ProcessingState,
    QueueName, SubjectId,
};
use notiq_core::impls::{InMemoryNotificationStore, SqliteNotificationStore};
use notiq_core::ports::{Clock, ManualClock, NotificationStore, QueueCounts, StoreError};
use notiq_core::typed::{Delivery, Handler, KeyCodec, NotificationKey};
use rstest::rstest;

use common::{PhaseChange, ScriptedHandler, config, key, queue, service, service_with, t0};

fn memory_store(clock: &Arc<ManualClock>) -> Arc<dyn NotificationStore> {
    Arc::new(InMemoryNotificationStore::with_clock(clock.clone()))
}

async fn sqlite_store(clock: &Arc<ManualClock>) -> Arc<dyn NotificationStore> {
    Arc::new(
        SqliteNotificationStore::open_in_memory()
            .await
            .unwrap()
            .with_clock(clock.clone()),
    )
}

async fn store_for(backend: &str, clock: &Arc<ManualClock>) -> Arc<dyn NotificationStore> {
    match backend {
        "memory" => memory_store(clock),
        "sqlite" => sqlite_store(clock).await,
        other => panic!("unknown backend {other}"),
    }
}

async fn state_of(store: &Arc<dyn NotificationStore>, id: NotificationId) -> ProcessingState {
    store.get(&queue(), id).await.unwrap().unwrap().processing_state
}

#[rstest]
#[case("memory")]
#[case("sqlite")]
#[tokio::test]
async fn equal_effective_dates_dispatch_in_insertion_order(#[case] backend: &str) {
    let clock = Arc::new(ManualClock::new(t0()));
    let store = store_for(backend, &clock).await;
    let handler = ScriptedHandler::new();
    let svc = service(store, clock, handler.clone(), config(3));
    let subject = SubjectId::generate();

    svc.enqueue(&queue(), subject, &key("x"), t0()).await.unwrap();
    svc.enqueue(&queue(), subject, &key("y"), t0()).await.unwrap();

    let report = svc.tick(&queue()).await.unwrap();
    assert_eq!(report.claimed, 2);
    assert_eq!(report.processed, 2);
    assert_eq!(handler.seen_phases().await, vec!["x", "y"]);
}

#[rstest]
#[case("memory")]
#[case("sqlite")]
#[tokio::test]
async fn insertion_sequence_outranks_catalog_snapshot(#[case] backend: &str) {
    let clock = Arc::new(ManualClock::new(t0()));
    let store = store_for(backend, &clock).await;
    let svc = service(store, clock, ScriptedHandler::new(), config(3));
    let subject = SubjectId::generate();
    let t1 = t0() - chrono::Duration::days(60);
    let t2 = t0() - chrono::Duration::days(30);

    let later_catalog = svc
        .enqueue_with_snapshot(&queue(), subject, &key("b"), t0(), t2)
        .await
        .unwrap();
    let earlier_catalog = svc
        .enqueue_with_snapshot(&queue(), subject, &key("a"), t0(), t1)
        .await
        .unwrap();

    let rows = svc.query(&queue(), subject, t0()).await.unwrap();
    assert_eq!(rows.len(), 2);
    // Insertion sequence decides before the catalog date does.
    assert_eq!(rows[0].id, later_catalog);
    assert_eq!(rows[1].id, earlier_catalog);
    assert_eq!(rows[1].catalog_effective_date, Some(t1));
}

#[rstest]
#[case("memory")]
#[case("sqlite")]
#[tokio::test]
async fn two_retryable_failures_with_budget_two_quarantine(#[case] backend: &str) {
    let clock = Arc::new(ManualClock::new(t0()));
    let store = store_for(backend, &clock).await;
    let handler = ScriptedHandler::answering([
        HandlerOutcome::retryable("gateway timeout"),
        HandlerOutcome::retryable("gateway timeout"),
    ]);
    let svc = service(store.clone(), clock.clone(), handler.clone(), config(2));

    let id = svc
        .enqueue(&queue(), SubjectId::generate(), &key("x"), t0())
        .await
        .unwrap();

    let first = svc.tick(&queue()).await.unwrap();
    assert_eq!(first.rescheduled, 1);
    let row = store.get(&queue(), id).await.unwrap().unwrap();
    assert_eq!(row.processing_state, ProcessingState::Available);
    assert_eq!(row.error_count, 1);
    assert_eq!(row.effective_date, t0() + chrono::Duration::seconds(1));

    // Not due yet.
    assert_eq!(svc.tick(&queue()).await.unwrap().claimed, 0);

    clock.advance(Duration::from_secs(1));
    let second = svc.tick(&queue()).await.unwrap();
    assert_eq!(second.quarantined, 1);
    assert_eq!(state_of(&store, id).await, ProcessingState::Quarantined);

    clock.advance(Duration::from_secs(86_400));
    assert_eq!(svc.tick(&queue()).await.unwrap().claimed, 0);
    assert_eq!(handler.seen_phases().await.len(), 2);

    let quarantined = svc.quarantined(&queue(), 10).await.unwrap();
    assert_eq!(quarantined.len(), 1);
    assert_eq!(quarantined[0].error_count, 2);
    assert!(quarantined[0].last_error.as_deref().unwrap_or_default().contains("gateway timeout"));
}

#[tokio::test]
async fn error_count_increases_with_each_retry_and_backoff_grows() {
    let clock = Arc::new(ManualClock::new(t0()));
    let store = memory_store(&clock);
    let handler = ScriptedHandler::answering(
        std::iter::repeat_with(|| HandlerOutcome::retryable("down")).take(4),
    );
    let svc = service(store.clone(), clock.clone(), handler.clone(), config(4));
    let id = svc
        .enqueue(&queue(), SubjectId::generate(), &key("x"), t0())
        .await
        .unwrap();

    let mut last_count = 0;
    let mut last_delay = chrono::Duration::zero();
    for _ in 0..3 {
        let now = clock.now();
        svc.tick(&queue()).await.unwrap();
        let row = store.get(&queue(), id).await.unwrap().unwrap();
        assert_eq!(row.processing_state, ProcessingState::Available);
        assert!(row.error_count > last_count);
        let delay = row.effective_date - now;
        assert!(delay >= last_delay);
        last_count = row.error_count;
        last_delay = delay;
        clock.set(row.effective_date);
    }

    svc.tick(&queue()).await.unwrap();
    let row = store.get(&queue(), id).await.unwrap().unwrap();
    assert_eq!(row.processing_state, ProcessingState::Quarantined);
    assert_eq!(row.error_count, 4);

    let attempts: Vec<u32> = handler
        .seen
        .lock()
        .await
        .iter()
        .map(|(_, d)| d.attempt())
        .collect();
    assert_eq!(attempts, vec![1, 2, 3, 4]);
}

#[tokio::test]
async fn permanent_failure_quarantines_immediately() {
    let clock = Arc::new(ManualClock::new(t0()));
    let store = memory_store(&clock);
    let handler = ScriptedHandler::answering([HandlerOutcome::permanent("plan retired")]);
    let svc = service(store.clone(), clock, handler, config(10));

    let id = svc
        .enqueue(&queue(), SubjectId::generate(), &key("x"), t0())
        .await
        .unwrap();
    let report = svc.tick(&queue()).await.unwrap();

    assert_eq!(report.quarantined, 1);
    let row = store.get(&queue(), id).await.unwrap().unwrap();
    assert_eq!(row.processing_state, ProcessingState::Quarantined);
    assert_eq!(row.error_count, 1);
}

#[rstest]
#[case("memory")]
#[case("sqlite")]
#[tokio::test]
async fn cancelled_notification_is_never_dispatched(#[case] backend: &str) {
    let clock = Arc::new(ManualClock::new(t0()));
    let store = store_for(backend, &clock).await;
    let handler = ScriptedHandler::new();
    let svc = service(store.clone(), clock.clone(), handler.clone(), config(3));
    let subject = SubjectId::generate();

    let by_key = svc
        .enqueue(&queue(), subject, &key("evergreen"), t0() + chrono::Duration::days(1))
        .await
        .unwrap();
    let by_id = svc
        .enqueue(&queue(), subject, &key("trial"), t0() + chrono::Duration::days(1))
        .await
        .unwrap();

    assert_eq!(svc.cancel_by_key(&queue(), &key("evergreen"), subject).await.unwrap(), 1);
    assert_eq!(svc.cancel_by_id(&queue(), by_id).await.unwrap(), 1);
    // Second cancel is a no-op.
    assert_eq!(svc.cancel_by_id(&queue(), by_id).await.unwrap(), 0);

    clock.advance(Duration::from_secs(2 * 86_400));
    assert_eq!(svc.tick(&queue()).await.unwrap().claimed, 0);
    assert!(handler.seen_phases().await.is_empty());
    assert_eq!(state_of(&store, by_key).await, ProcessingState::Removed);
    assert_eq!(state_of(&store, by_id).await, ProcessingState::Removed);
}

#[tokio::test]
async fn cancel_during_processing_makes_completion_a_noop() {
    let clock = Arc::new(ManualClock::new(t0()));
    let store = memory_store(&clock);
    let host = HostId::new("host-a");
    let svc = service(store.clone(), clock, ScriptedHandler::new(), config(3));

    let id = svc
        .enqueue(&queue(), SubjectId::generate(), &key("x"), t0())
        .await
        .unwrap();
    store
        .claim_batch(&queue(), &host, t0(), Duration::from_secs(60), 10)
        .await
        .unwrap();
    assert_eq!(svc.cancel_by_id(&queue(), id).await.unwrap(), 1);

    assert!(!store.mark_processed(&queue(), id, &host).await.unwrap());
    assert_eq!(state_of(&store, id).await, ProcessingState::Removed);
}

#[rstest]
#[case("memory")]
#[case("sqlite")]
#[tokio::test]
async fn enqueued_key_round_trips_to_handler(#[case] backend: &str) {
    let clock = Arc::new(ManualClock::new(t0()));
    let store = store_for(backend, &clock).await;
    let handler = ScriptedHandler::new();
    let svc = service(store, clock, handler.clone(), config(3));
    let subject = SubjectId::generate();
    let original = key("pistol-monthly-evergreen");

    let id = svc.enqueue(&queue(), subject, &original, t0()).await.unwrap();
    svc.tick(&queue()).await.unwrap();

    let seen = handler.seen.lock().await;
    assert_eq!(seen.len(), 1);
    let (decoded, delivery) = &seen[0];
    assert_eq!(decoded, &original);
    assert_eq!(delivery.notification_id, id);
    assert_eq!(delivery.subject_id, subject);
    assert_eq!(delivery.attempt(), 1);
}

#[tokio::test]
async fn undecodable_rows_are_quarantined_without_stopping_the_batch() {
    let clock = Arc::new(ManualClock::new(t0()));
    let store = memory_store(&clock);
    let handler = ScriptedHandler::new();
    let svc = service(store.clone(), clock, handler.clone(), config(3));
    let subject = SubjectId::generate();

    let unknown_tag = store
        .insert(notiq_core::domain::NewNotification {
            queue_name: queue(),
            key_tag: "billing.retired_key.v0".to_string(),
            key_payload: serde_json::json!({}),
            subject_id: subject,
            effective_date: t0(),
            catalog_effective_date: None,
        })
        .await
        .unwrap();
    let bad_payload = store
        .insert(notiq_core::domain::NewNotification {
            queue_name: queue(),
            key_tag: common::PhaseChange::TAG.to_string(),
            key_payload: serde_json::json!({ "subscription": 5 }),
            subject_id: subject,
            effective_date: t0(),
            catalog_effective_date: None,
        })
        .await
        .unwrap();
    let good = svc.enqueue(&queue(), subject, &key("ok"), t0()).await.unwrap();

    let report = svc.tick(&queue()).await.unwrap();
    assert_eq!(report.claimed, 3);
    assert_eq!(report.quarantined, 2);
    assert_eq!(report.processed, 1);
    assert_eq!(state_of(&store, unknown_tag).await, ProcessingState::Quarantined);
    assert_eq!(state_of(&store, bad_payload).await, ProcessingState::Quarantined);
    assert_eq!(state_of(&store, good).await, ProcessingState::Processed);
}

#[tokio::test]
async fn encode_failure_persists_nothing() {
    use std::collections::HashMap;

    #[derive(serde::Serialize, serde::Deserialize)]
    struct Unencodable {
        by_pair: HashMap<(u8, u8), u8>,
    }
    impl notiq_core::typed::NotificationKey for Unencodable {
        const TAG: &'static str = "test.unencodable.v1";
    }

    let clock = Arc::new(ManualClock::new(t0()));
    let store = memory_store(&clock);
    let svc = service(store.clone(), clock, ScriptedHandler::new(), config(3));

    let mut by_pair = HashMap::new();
    by_pair.insert((1, 1), 1);
    let err = svc
        .enqueue(&queue(), SubjectId::generate(), &Unencodable { by_pair }, t0())
        .await
        .unwrap_err();

    assert!(matches!(err, QueueError::Serialization(_)));
    assert_eq!(store.counts(&queue()).await.unwrap().pending(), 0);
}

#[rstest]
#[case("memory")]
#[case("sqlite")]
#[tokio::test]
async fn lease_passes_to_another_host_only_after_expiry(#[case] backend: &str) {
    let clock = Arc::new(ManualClock::new(t0()));
    let store = store_for(backend, &clock).await;
    let handler_b = ScriptedHandler::new();
    let mut config_b = config(3);
    config_b.host_id = Some("host-b".to_string());
    let svc_b = service(store.clone(), clock.clone(), handler_b.clone(), config_b);

    let id = svc_b
        .enqueue(&queue(), SubjectId::generate(), &key("x"), t0())
        .await
        .unwrap();

    // Host A claims and then goes silent.
    let host_a = HostId::new("host-a");
    let claimed = store
        .claim_batch(&queue(), &host_a, t0(), Duration::from_secs(60), 10)
        .await
        .unwrap();
    assert_eq!(claimed.len(), 1);

    clock.advance(Duration::from_secs(60));
    assert_eq!(svc_b.tick(&queue()).await.unwrap().claimed, 0);

    clock.advance(Duration::from_millis(1));
    let report = svc_b.tick(&queue()).await.unwrap();
    assert_eq!(report.processed, 1);
    assert_eq!(handler_b.seen_phases().await, vec!["x"]);

    // Host A wakes up: its completion no longer applies.
    assert!(!store.mark_processed(&queue(), id, &host_a).await.unwrap());
    assert_eq!(state_of(&store, id).await, ProcessingState::Processed);
}

#[tokio::test]
async fn stored_payload_is_structured_json() {
    let clock = Arc::new(ManualClock::new(t0()));
    let store = memory_store(&clock);
    let svc = service(store.clone(), clock, ScriptedHandler::new(), config(3));

    let id = svc
        .enqueue(&queue(), SubjectId::generate(), &key("x"), t0())
        .await
        .unwrap();
    let row = store.get(&queue(), id).await.unwrap().unwrap();
    let expected = KeyCodec::encode(&key("x")).unwrap();
    assert_eq!(row.key_tag, expected.tag);
    assert_eq!(row.key_payload["phase"], "x");
}

/// In-memory store whose next `failures` calls to `mark_processed` fail.
struct FailingCompletions {
    inner: InMemoryNotificationStore,
    failures: AtomicU32,
}

impl FailingCompletions {
    fn new(clock: &Arc<ManualClock>, failures: u32) -> Self {
        Self {
            inner: InMemoryNotificationStore::with_clock(clock.clone()),
            failures: AtomicU32::new(failures),
        }
    }
}

#[async_trait]
impl NotificationStore for FailingCompletions {
    async fn insert(&self, new: NewNotification) -> Result<NotificationId, StoreError> {
        self.inner.insert(new).await
    }

    async fn claim_batch(
        &self,
        queue: &QueueName,
        host: &HostId,
        now: DateTime<Utc>,
        lease_duration: Duration,
        max_batch: usize,
    ) -> Result<Vec<Notification>, StoreError> {
        self.inner.claim_batch(queue, host, now, lease_duration, max_batch).await
    }

    async fn mark_processed(
        &self,
        queue: &QueueName,
        id: NotificationId,
        owner: &HostId,
    ) -> Result<bool, StoreError> {
        let fail = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        }
        self.inner.mark_processed(queue, id, owner).await
    }

    async fn reschedule(
        &self,
        queue: &QueueName,
        id: NotificationId,
        owner: &HostId,
        next_available: DateTime<Utc>,
        error: &str,
    ) -> Result<bool, StoreError> {
        self.inner.reschedule(queue, id, owner, next_available, error).await
    }

    async fn quarantine(
        &self,
        queue: &QueueName,
        id: NotificationId,
        owner: &HostId,
        error: &str,
    ) -> Result<bool, StoreError> {
        self.inner.quarantine(queue, id, owner, error).await
    }

    async fn cancel_by_key(
        &self,
        queue: &QueueName,
        key_tag: &str,
        key_payload: &serde_json::Value,
        subject_id: SubjectId,
    ) -> Result<u64, StoreError> {
        self.inner.cancel_by_key(queue, key_tag, key_payload, subject_id).await
    }

    async fn cancel_by_id(&self, queue: &QueueName, id: NotificationId) -> Result<u64, StoreError> {
        self.inner.cancel_by_id(queue, id).await
    }

    async fn query(
        &self,
        queue: &QueueName,
        subject_id: SubjectId,
        as_of: DateTime<Utc>,
    ) -> Result<Vec<Notification>, StoreError> {
        self.inner.query(queue, subject_id, as_of).await
    }

    async fn get(&self, queue: &QueueName, id: NotificationId) -> Result<Option<Notification>, StoreError> {
        self.inner.get(queue, id).await
    }

    async fn list_quarantined(&self, queue: &QueueName, limit: usize) -> Result<Vec<Notification>, StoreError> {
        self.inner.list_quarantined(queue, limit).await
    }

    async fn counts(&self, queue: &QueueName) -> Result<QueueCounts, StoreError> {
        self.inner.counts(queue).await
    }
}

#[tokio::test]
async fn store_failure_aborts_the_tick_and_the_row_returns_after_its_lease() {
    let clock = Arc::new(ManualClock::new(t0()));
    let store: Arc<dyn NotificationStore> = Arc::new(FailingCompletions::new(&clock, 1));
    let handler = ScriptedHandler::new();
    let svc = service(store.clone(), clock.clone(), handler.clone(), config(3));

    let id = svc
        .enqueue(&queue(), SubjectId::generate(), &key("x"), t0())
        .await
        .unwrap();

    let err = svc.tick(&queue()).await.unwrap_err();
    assert!(matches!(err, QueueError::Store(StoreError::Database(_))));

    // The completion was never written: still leased, no error recorded.
    let row = store.get(&queue(), id).await.unwrap().unwrap();
    assert_eq!(row.processing_state, ProcessingState::InProcessing);
    assert_eq!(row.error_count, 0);
    assert_eq!(svc.tick(&queue()).await.unwrap().claimed, 0);

    clock.advance(Duration::from_millis(60_001));
    let report = svc.tick(&queue()).await.unwrap();
    assert_eq!(report.processed, 1);
    assert_eq!(handler.seen_phases().await, vec!["x", "x"]);
    assert_eq!(state_of(&store, id).await, ProcessingState::Processed);
}

/// Records the peak number of deliveries running at once.
#[derive(Clone, Default)]
struct OverlapHandler {
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

#[async_trait]
impl Handler<PhaseChange> for OverlapHandler {
    async fn process(&self, _key: PhaseChange, _delivery: &Delivery) -> HandlerOutcome {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        HandlerOutcome::success()
    }
}

#[rstest]
#[case("memory")]
#[case("sqlite")]
#[tokio::test]
async fn batch_fans_out_up_to_worker_count(#[case] backend: &str) {
    let clock = Arc::new(ManualClock::new(t0()));
    let store = store_for(backend, &clock).await;
    let handler = OverlapHandler::default();
    let mut cfg = config(3);
    cfg.worker_count = 3;
    cfg.batch_size = 8;
    let svc = service_with(store.clone(), clock, handler.clone(), cfg);

    let subject = SubjectId::generate();
    for n in 0..8 {
        svc.enqueue(&queue(), subject, &key(&format!("p{n}")), t0())
            .await
            .unwrap();
    }

    let report = svc.tick(&queue()).await.unwrap();
    assert_eq!(report.claimed, 8);
    assert_eq!(report.processed, 8);
    assert_eq!(handler.peak.load(Ordering::SeqCst), 3);
    assert_eq!(store.counts(&queue()).await.unwrap().processed, 8);
}
