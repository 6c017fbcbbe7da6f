// SQLite Broker Implementation
//
// Single-host broker: records live in `queue_jobs`, terminal events are
// appended to `job_events` in the same transaction and tailed by one
// listener task per subscribed queue. Several processes may share the
// database file.

use crate::error::map_sqlx_error;
use async_trait::async_trait;
use fakturace_core::domain::{JobEvent, JobId, JobOptions, JobOutcome, JobRecord, JobState};
use fakturace_core::error::{AppError, Result};
use fakturace_core::port::broker::{EventReceiver, EVENT_CHANNEL_CAPACITY};
use fakturace_core::port::Broker;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Events older than this are pruned when new ones are written
const EVENT_RETENTION_MS: i64 = 60 * 60 * 1000;

struct Listener {
    sender: broadcast::Sender<JobEvent>,
    handle: JoinHandle<()>,
}

pub struct SqliteBroker {
    pool: SqlitePool,
    poll_interval: Duration,
    listeners: Mutex<HashMap<String, Listener>>,
}

impl SqliteBroker {
    pub fn new(pool: SqlitePool, poll_interval: Duration) -> Self {
        Self {
            pool,
            poll_interval,
            listeners: Mutex::new(HashMap::new()),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl Broker for SqliteBroker {
    async fn wait_until_ready(&self) -> Result<()> {
        sqlx::query("SELECT 1 FROM queue_jobs LIMIT 1")
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn enqueue(&self, record: &JobRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO queue_jobs (
                id, queue, name, payload, state, attempts_made,
                max_attempts, backoff_ms, remove_on_complete, remove_on_fail,
                enqueued_at, available_at, started_at, finished_at,
                result, failed_reason
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.id)
        .bind(&record.queue)
        .bind(&record.name)
        .bind(record.payload.to_string())
        .bind(record.state.as_str())
        .bind(record.attempts_made as i64)
        .bind(record.options.attempts as i64)
        .bind(record.options.backoff_ms as i64)
        .bind(record.options.remove_on_complete)
        .bind(record.options.remove_on_fail)
        .bind(record.enqueued_at)
        .bind(record.available_at)
        .bind(record.started_at)
        .bind(record.finished_at)
        .bind(record.result.as_ref().map(|v| v.to_string()))
        .bind(&record.failed_reason)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn claim_next(&self, queue: &str, now_millis: i64) -> Result<Option<JobRecord>> {
        // Single statement: concurrent workers never claim the same row
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            UPDATE queue_jobs
            SET state = 'active', started_at = ?
            WHERE id = (
                SELECT id FROM queue_jobs
                WHERE queue = ?
                  AND (state = 'queued' OR (state = 'delayed' AND available_at <= ?))
                ORDER BY available_at ASC, enqueued_at ASC, id ASC
                LIMIT 1
            )
            RETURNING *
            "#,
        )
        .bind(now_millis)
        .bind(queue)
        .bind(now_millis)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        row.map(JobRow::into_record).transpose()
    }

    async fn update(&self, record: &JobRecord) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE queue_jobs
            SET state = ?, attempts_made = ?, available_at = ?,
                started_at = ?, finished_at = ?, result = ?, failed_reason = ?
            WHERE id = ?
            "#,
        )
        .bind(record.state.as_str())
        .bind(record.attempts_made as i64)
        .bind(record.available_at)
        .bind(record.started_at)
        .bind(record.finished_at)
        .bind(record.result.as_ref().map(|v| v.to_string()))
        .bind(&record.failed_reason)
        .bind(&record.id)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Job {} not found", record.id)));
        }
        Ok(())
    }

    async fn finish(&self, record: &JobRecord) -> Result<()> {
        let event = JobEvent::from_record(record)
            .ok_or_else(|| AppError::Internal(format!("Job {} is not terminal", record.id)))?;
        let remove = match record.state {
            JobState::Completed => record.options.remove_on_complete,
            _ => record.options.remove_on_fail,
        };
        let finished_at = record.finished_at.unwrap_or(record.enqueued_at);

        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        if remove {
            sqlx::query("DELETE FROM queue_jobs WHERE id = ?")
                .bind(&record.id)
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;
        } else {
            sqlx::query(
                r#"
                UPDATE queue_jobs
                SET state = ?, attempts_made = ?, finished_at = ?, result = ?, failed_reason = ?
                WHERE id = ?
                "#,
            )
            .bind(record.state.as_str())
            .bind(record.attempts_made as i64)
            .bind(record.finished_at)
            .bind(record.result.as_ref().map(|v| v.to_string()))
            .bind(&record.failed_reason)
            .bind(&record.id)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
        }

        let outcome = serde_json::to_string(&event.outcome)?;
        sqlx::query("INSERT INTO job_events (queue, job_id, outcome, created_at) VALUES (?, ?, ?, ?)")
            .bind(&event.queue)
            .bind(&event.job_id)
            .bind(outcome)
            .bind(finished_at)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

        sqlx::query("DELETE FROM job_events WHERE created_at < ?")
            .bind(finished_at - EVENT_RETENTION_MS)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn find(&self, queue: &str, id: &JobId) -> Result<Option<JobRecord>> {
        let row = sqlx::query_as::<_, JobRow>("SELECT * FROM queue_jobs WHERE queue = ? AND id = ?")
            .bind(queue)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        row.map(JobRow::into_record).transpose()
    }

    async fn list_by_state(&self, queue: &str, state: JobState) -> Result<Vec<JobRecord>> {
        let rows: Vec<JobRow> = sqlx::query_as(
            r#"
            SELECT * FROM queue_jobs
            WHERE queue = ? AND state = ?
            ORDER BY enqueued_at ASC
            "#,
        )
        .bind(queue)
        .bind(state.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(JobRow::into_record).collect()
    }

    async fn count_by_state(&self, queue: &str, state: JobState) -> Result<u64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM queue_jobs WHERE queue = ? AND state = ?")
                .bind(queue)
                .bind(state.as_str())
                .fetch_one(&self.pool)
                .await
                .map_err(map_sqlx_error)?;

        Ok(count.max(0) as u64)
    }

    async fn oldest_queued_at(&self, queue: &str) -> Result<Option<i64>> {
        sqlx::query_scalar(
            "SELECT MIN(enqueued_at) FROM queue_jobs WHERE queue = ? AND state = 'queued'",
        )
        .bind(queue)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_error)
    }

    async fn subscribe(&self, queue: &str) -> Result<EventReceiver> {
        let mut listeners = self.listeners.lock().await;
        if let Some(listener) = listeners.get(queue) {
            if !listener.handle.is_finished() {
                return Ok(listener.sender.subscribe());
            }
        }

        // Cursor fixed before returning: later events are never missed
        let cursor: i64 =
            sqlx::query_scalar("SELECT COALESCE(MAX(seq), 0) FROM job_events WHERE queue = ?")
                .bind(queue)
                .fetch_one(&self.pool)
                .await
                .map_err(map_sqlx_error)?;

        let (sender, receiver) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let handle = tokio::spawn(tail_events(
            self.pool.clone(),
            queue.to_string(),
            cursor,
            sender.clone(),
            self.poll_interval,
        ));
        debug!(queue = %queue, cursor = cursor, "Event listener started");
        listeners.insert(queue.to_string(), Listener { sender, handle });
        Ok(receiver)
    }

    async fn close(&self) -> Result<()> {
        let mut listeners = self.listeners.lock().await;
        for (_, listener) in listeners.drain() {
            listener.handle.abort();
        }
        self.pool.close().await;
        Ok(())
    }
}

/// Forward new `job_events` rows of `queue` to subscribers
async fn tail_events(
    pool: SqlitePool,
    queue: String,
    mut cursor: i64,
    sender: broadcast::Sender<JobEvent>,
    poll_interval: Duration,
) {
    loop {
        tokio::time::sleep(poll_interval).await;
        if pool.is_closed() {
            break;
        }

        let rows: Vec<(i64, String, String)> = match sqlx::query_as(
            "SELECT seq, job_id, outcome FROM job_events WHERE queue = ? AND seq > ? ORDER BY seq ASC",
        )
        .bind(&queue)
        .bind(cursor)
        .fetch_all(&pool)
        .await
        {
            Ok(rows) => rows,
            Err(e) => {
                warn!(queue = %queue, error = %e, "Failed to read job events");
                continue;
            }
        };

        for (seq, job_id, outcome) in rows {
            cursor = seq;
            match serde_json::from_str::<JobOutcome>(&outcome) {
                Ok(outcome) => {
                    // No subscribers is fine
                    let _ = sender.send(JobEvent {
                        job_id,
                        queue: queue.clone(),
                        outcome,
                    });
                }
                Err(e) => warn!(queue = %queue, seq = seq, error = %e, "Malformed job event"),
            }
        }
    }
}

/// SQLite row representation
#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    id: String,
    queue: String,
    name: String,
    payload: String,
    state: String,
    attempts_made: i64,
    max_attempts: i64,
    backoff_ms: i64,
    remove_on_complete: bool,
    remove_on_fail: bool,
    enqueued_at: i64,
    available_at: i64,
    started_at: Option<i64>,
    finished_at: Option<i64>,
    result: Option<String>,
    failed_reason: Option<String>,
}

impl JobRow {
    fn into_record(self) -> Result<JobRecord> {
        let state: JobState = self.state.parse()?;
        let payload = serde_json::from_str(&self.payload)?;
        let result = self
            .result
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?;

        Ok(JobRecord {
            id: self.id,
            queue: self.queue,
            name: self.name,
            payload,
            state,
            attempts_made: self.attempts_made.max(0) as u32,
            options: JobOptions {
                attempts: self.max_attempts.max(1) as u32,
                backoff_ms: self.backoff_ms.max(0) as u64,
                remove_on_complete: self.remove_on_complete,
                remove_on_fail: self.remove_on_fail,
            },
            enqueued_at: self.enqueued_at,
            available_at: self.available_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
            result,
            failed_reason: self.failed_reason,
        })
    }
}
