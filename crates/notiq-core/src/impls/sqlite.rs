//! SQLite notification store (sqlx).
//!
//! Durable store shared by every host that points at the same database file.
//! Timestamps are stored as epoch microseconds; the key payload as JSON text.
//! Stored instants round up and `now` rounds down, so a row is never
//! claimable before its `effective_date`.
//!
//! Claiming is one guarded `UPDATE ... RETURNING` statement: the candidate
//! subquery and the transition to `IN_PROCESSING` execute atomically, so two
//! hosts can never lease the same row for overlapping windows.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePool, SqlitePoolOptions,
};
use sqlx::{Executor, FromRow, Sqlite};
use tracing::{debug, info};

use crate::domain::{
    HostId, NewNotification, Notification, NotificationId, ProcessingState, QueueName, SubjectId,
    TimedOrdering,
};
use crate::ports::{
    Clock, IdGenerator, NotificationStore, QueueCounts, StoreError, SystemClock, UlidGenerator,
    add_duration,
};

const COLUMNS: &str = "id, queue_name, owner_host, key_tag, key_payload, subject_id, \
     effective_date, total_ordering, catalog_effective_date, processing_state, \
     error_count, last_error, lease_expiry, created_date";

const RULE_ORDER: &str = "ORDER BY effective_date, total_ordering, catalog_effective_date";

#[derive(Debug, FromRow)]
struct NotificationRow {
    id: String,
    queue_name: String,
    owner_host: Option<String>,
    key_tag: String,
    key_payload: String,
    subject_id: String,
    effective_date: i64,
    total_ordering: i64,
    catalog_effective_date: Option<i64>,
    processing_state: String,
    error_count: i64,
    last_error: Option<String>,
    lease_expiry: Option<i64>,
    created_date: i64,
}

fn corrupt(id: &str, message: impl Into<String>) -> StoreError {
    StoreError::CorruptRow {
        id: id.to_string(),
        message: message.into(),
    }
}

/// Storage form of a due time or lease expiry: whole microseconds, rounded up.
fn stored_micros(at: DateTime<Utc>) -> i64 {
    let micros = at.timestamp_micros();
    if at.timestamp_subsec_nanos() % 1_000 == 0 {
        micros
    } else {
        micros.saturating_add(1)
    }
}

/// Storage form of the instant being compared against: rounded down.
fn now_micros(now: DateTime<Utc>) -> i64 {
    now.timestamp_micros()
}

fn from_micros(id: &str, column: &str, micros: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::<Utc>::from_timestamp_micros(micros)
        .ok_or_else(|| corrupt(id, format!("{column} out of range: {micros}")))
}

impl TryFrom<NotificationRow> for Notification {
    type Error = StoreError;

    fn try_from(row: NotificationRow) -> Result<Self, Self::Error> {
        let id_str = row.id.as_str();
        let id = NotificationId::parse(id_str).map_err(|e| corrupt(id_str, format!("id: {e}")))?;
        let subject_id = SubjectId::parse(&row.subject_id)
            .map_err(|e| corrupt(id_str, format!("subject_id: {e}")))?;
        let queue_name =
            QueueName::parse(&row.queue_name).map_err(|e| corrupt(id_str, e.to_string()))?;
        let processing_state = ProcessingState::from_str(&row.processing_state)
            .map_err(|e| corrupt(id_str, e))?;
        let key_payload = serde_json::from_str(&row.key_payload)
            .map_err(|e| corrupt(id_str, format!("key_payload: {e}")))?;
        let error_count = u32::try_from(row.error_count)
            .map_err(|_| corrupt(id_str, format!("error_count: {}", row.error_count)))?;

        Ok(Notification {
            id,
            queue_name,
            key_tag: row.key_tag,
            key_payload,
            subject_id,
            effective_date: from_micros(id_str, "effective_date", row.effective_date)?,
            total_ordering: row.total_ordering,
            catalog_effective_date: row
                .catalog_effective_date
                .map(|us| from_micros(id_str, "catalog_effective_date", us))
                .transpose()?,
            owner_host: row.owner_host.map(HostId::new),
            lease_expiry: row
                .lease_expiry
                .map(|us| from_micros(id_str, "lease_expiry", us))
                .transpose()?,
            processing_state,
            error_count,
            last_error: row.last_error,
            created_date: from_micros(id_str, "created_date", row.created_date)?,
        })
    }
}

fn into_notifications(rows: Vec<NotificationRow>) -> Result<Vec<Notification>, StoreError> {
    rows.into_iter().map(Notification::try_from).collect()
}

fn limit(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

#[derive(Clone)]
pub struct SqliteNotificationStore {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
}

impl SqliteNotificationStore {
    /// Open (creating if missing) the database at `url` and apply migrations.
    ///
    /// `url` is a sqlx SQLite URL, e.g. `sqlite://notiq.db`.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        info!(url, "Opening notification database");
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5))
            .pragma("synchronous", "NORMAL");

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self::from_pool(pool);
        store.migrate().await?;
        Ok(store)
    }

    /// Private in-memory database (for testing).
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;

        // One connection that never recycles: the database lives and dies with it.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let store = Self::from_pool(pool);
        store.migrate().await?;
        Ok(store)
    }

    /// Wrap an existing pool. Does not migrate.
    pub fn from_pool(pool: SqlitePool) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        Self {
            pool,
            ids: Arc::new(UlidGenerator::new(clock.clone())),
            clock,
        }
    }

    /// `created_date` and ID timestamps follow `clock`.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.ids = Arc::new(UlidGenerator::new(clock.clone()));
        self.clock = clock;
        self
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        debug!("Running notification store migrations");
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Insert on the caller's connection, typically inside their own
    /// transaction: the row commits or rolls back with the caller's work.
    ///
    /// ```ignore
    /// let mut tx = store.pool().begin().await?;
    /// // ... the caller's own writes on &mut *tx ...
    /// store.insert_in_transaction(&mut tx, new).await?;
    /// tx.commit().await?;
    /// ```
    pub async fn insert_in_transaction(
        &self,
        conn: &mut SqliteConnection,
        new: NewNotification,
    ) -> Result<NotificationId, StoreError> {
        self.insert_with(conn, new).await
    }

    async fn insert_with<'e, E>(&self, executor: E, new: NewNotification) -> Result<NotificationId, StoreError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let id = self.ids.generate_notification_id();
        let payload = serde_json::to_string(&new.key_payload)?;

        sqlx::query(
            r#"
            INSERT INTO notifications (
                id, queue_name, owner_host, key_tag, key_payload, subject_id,
                effective_date, total_ordering, catalog_effective_date,
                processing_state, error_count, last_error, lease_expiry, created_date
            )
            VALUES (
                ?, ?, NULL, ?, ?, ?, ?,
                (SELECT COALESCE(MAX(total_ordering), 0) + 1 FROM notifications),
                ?, 'AVAILABLE', 0, NULL, NULL, ?
            )
            "#,
        )
        .bind(id.to_storage())
        .bind(new.queue_name.composite())
        .bind(&new.key_tag)
        .bind(payload)
        .bind(new.subject_id.to_storage())
        .bind(stored_micros(new.effective_date))
        .bind(new.catalog_effective_date.map(stored_micros))
        .bind(stored_micros(self.clock.now()))
        .execute(executor)
        .await?;

        Ok(id)
    }

    /// Shared body of the guarded completion updates.
    async fn complete(
        &self,
        set_clause: &str,
        queue: &QueueName,
        id: NotificationId,
        owner: &HostId,
        binds: CompletionBinds<'_>,
    ) -> Result<bool, StoreError> {
        let sql = format!(
            "UPDATE notifications SET {set_clause}, owner_host = NULL, lease_expiry = NULL \
             WHERE queue_name = ? AND id = ? \
               AND processing_state = 'IN_PROCESSING' AND owner_host = ?"
        );
        let mut query = sqlx::query(&sql);
        if let Some(next_available) = binds.next_available {
            query = query.bind(stored_micros(next_available));
        }
        if let Some(error) = binds.error {
            query = query.bind(error);
        }
        let result = query
            .bind(queue.composite())
            .bind(id.to_storage())
            .bind(owner.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn remove_by_id(&self, queue: &QueueName, id: &str) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE notifications \
             SET processing_state = 'REMOVED', owner_host = NULL, lease_expiry = NULL \
             WHERE queue_name = ? AND id = ? \
               AND processing_state IN ('AVAILABLE', 'IN_PROCESSING')",
        )
        .bind(queue.composite())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[derive(Default)]
struct CompletionBinds<'a> {
    next_available: Option<DateTime<Utc>>,
    error: Option<&'a str>,
}

#[async_trait]
impl NotificationStore for SqliteNotificationStore {
    async fn insert(&self, new: NewNotification) -> Result<NotificationId, StoreError> {
        self.insert_with(&self.pool, new).await
    }

    async fn claim_batch(
        &self,
        queue: &QueueName,
        host: &HostId,
        now: DateTime<Utc>,
        lease_duration: Duration,
        max_batch: usize,
    ) -> Result<Vec<Notification>, StoreError> {
        if max_batch == 0 {
            return Ok(Vec::new());
        }
        let now_us = now_micros(now);
        let lease_expiry = stored_micros(add_duration(now, lease_duration));

        let sql = format!(
            "UPDATE notifications \
             SET processing_state = 'IN_PROCESSING', owner_host = ?, lease_expiry = ? \
             WHERE id IN ( \
                 SELECT id FROM notifications \
                 WHERE queue_name = ? \
                   AND ((processing_state = 'AVAILABLE' AND effective_date <= ?) \
                     OR (processing_state = 'IN_PROCESSING' AND lease_expiry < ?)) \
                 {RULE_ORDER} \
                 LIMIT ? \
             ) \
             RETURNING {COLUMNS}"
        );
        let rows: Vec<NotificationRow> = sqlx::query_as(&sql)
            .bind(host.as_str())
            .bind(lease_expiry)
            .bind(queue.composite())
            .bind(now_us)
            .bind(now_us)
            .bind(limit(max_batch))
            .fetch_all(&self.pool)
            .await?;

        // RETURNING order is unspecified.
        let mut claimed = into_notifications(rows)?;
        claimed.sort_by_key(|n| n.ordering_key());
        Ok(claimed)
    }

    async fn mark_processed(
        &self,
        queue: &QueueName,
        id: NotificationId,
        owner: &HostId,
    ) -> Result<bool, StoreError> {
        self.complete(
            "processing_state = 'PROCESSED'",
            queue,
            id,
            owner,
            CompletionBinds::default(),
        )
        .await
    }

    async fn reschedule(
        &self,
        queue: &QueueName,
        id: NotificationId,
        owner: &HostId,
        next_available: DateTime<Utc>,
        error: &str,
    ) -> Result<bool, StoreError> {
        self.complete(
            "processing_state = 'AVAILABLE', effective_date = ?, \
             error_count = error_count + 1, last_error = ?",
            queue,
            id,
            owner,
            CompletionBinds {
                next_available: Some(next_available),
                error: Some(error),
            },
        )
        .await
    }

    async fn quarantine(
        &self,
        queue: &QueueName,
        id: NotificationId,
        owner: &HostId,
        error: &str,
    ) -> Result<bool, StoreError> {
        self.complete(
            "processing_state = 'QUARANTINED', error_count = error_count + 1, last_error = ?",
            queue,
            id,
            owner,
            CompletionBinds {
                next_available: None,
                error: Some(error),
            },
        )
        .await
    }

    async fn cancel_by_key(
        &self,
        queue: &QueueName,
        key_tag: &str,
        key_payload: &serde_json::Value,
        subject_id: SubjectId,
    ) -> Result<u64, StoreError> {
        // Payloads are compared as JSON values, not as text.
        let candidates: Vec<(String, String)> = sqlx::query_as(
            "SELECT id, key_payload FROM notifications \
             WHERE queue_name = ? AND subject_id = ? AND key_tag = ? \
               AND processing_state IN ('AVAILABLE', 'IN_PROCESSING')",
        )
        .bind(queue.composite())
        .bind(subject_id.to_storage())
        .bind(key_tag)
        .fetch_all(&self.pool)
        .await?;

        let mut removed = 0;
        for (id, payload) in candidates {
            let stored: serde_json::Value = serde_json::from_str(&payload)
                .map_err(|e| corrupt(&id, format!("key_payload: {e}")))?;
            if &stored == key_payload {
                removed += self.remove_by_id(queue, &id).await?;
            }
        }
        Ok(removed)
    }

    async fn cancel_by_id(&self, queue: &QueueName, id: NotificationId) -> Result<u64, StoreError> {
        self.remove_by_id(queue, &id.to_storage()).await
    }

    async fn query(
        &self,
        queue: &QueueName,
        subject_id: SubjectId,
        as_of: DateTime<Utc>,
    ) -> Result<Vec<Notification>, StoreError> {
        let sql = format!(
            "SELECT {COLUMNS} FROM notifications \
             WHERE queue_name = ? AND subject_id = ? \
               AND processing_state IN ('AVAILABLE', 'IN_PROCESSING') \
               AND effective_date <= ? \
             {RULE_ORDER}"
        );
        let rows: Vec<NotificationRow> = sqlx::query_as(&sql)
            .bind(queue.composite())
            .bind(subject_id.to_storage())
            .bind(now_micros(as_of))
            .fetch_all(&self.pool)
            .await?;
        into_notifications(rows)
    }

    async fn get(&self, queue: &QueueName, id: NotificationId) -> Result<Option<Notification>, StoreError> {
        let sql = format!("SELECT {COLUMNS} FROM notifications WHERE queue_name = ? AND id = ?");
        let row: Option<NotificationRow> = sqlx::query_as(&sql)
            .bind(queue.composite())
            .bind(id.to_storage())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Notification::try_from).transpose()
    }

    async fn list_quarantined(&self, queue: &QueueName, limit_rows: usize) -> Result<Vec<Notification>, StoreError> {
        let sql = format!(
            "SELECT {COLUMNS} FROM notifications \
             WHERE queue_name = ? AND processing_state = 'QUARANTINED' \
             {RULE_ORDER} LIMIT ?"
        );
        let rows: Vec<NotificationRow> = sqlx::query_as(&sql)
            .bind(queue.composite())
            .bind(limit(limit_rows))
            .fetch_all(&self.pool)
            .await?;
        into_notifications(rows)
    }

    async fn counts(&self, queue: &QueueName) -> Result<QueueCounts, StoreError> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT processing_state, COUNT(*) FROM notifications \
             WHERE queue_name = ? GROUP BY processing_state",
        )
        .bind(queue.composite())
        .fetch_all(&self.pool)
        .await?;

        let mut counts = QueueCounts::default();
        for (state, n) in rows {
            let n = usize::try_from(n).unwrap_or(0);
            match ProcessingState::from_str(&state) {
                Ok(ProcessingState::Available) => counts.available = n,
                Ok(ProcessingState::InProcessing) => counts.in_processing = n,
                Ok(ProcessingState::Processed) => counts.processed = n,
                Ok(ProcessingState::Quarantined) => counts.quarantined = n,
                Ok(ProcessingState::Removed) => counts.removed = n,
                Err(e) => return Err(corrupt(queue.composite().as_str(), e)),
            }
        }
        Ok(counts)
    }
}
