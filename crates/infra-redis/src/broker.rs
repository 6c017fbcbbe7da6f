// Redis Broker Implementation
//
// Distributed queue: any number of processes sharing a Redis instance
// cooperate on the same queues. Claims go through a Lua script so a job id
// is handed to exactly one worker; record transitions are written with
// atomic pipelines; terminal events travel over pub/sub.

use crate::error::map_redis_error;
use crate::keys::QueueKeys;
use async_trait::async_trait;
use fakturace_core::domain::{JobEvent, JobId, JobRecord, JobState};
use fakturace_core::error::{AppError, Result};
use fakturace_core::port::broker::{EventReceiver, EVENT_CHANNEL_CAPACITY};
use fakturace_core::port::Broker;
use futures::StreamExt;
use redis::aio::ConnectionManager;
use redis::Script;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{broadcast, Mutex, OnceCell};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Promote due delayed ids, then pop the oldest waiting id into `active`
const CLAIM_SCRIPT: &str = r#"
local due = redis.call('ZRANGEBYSCORE', KEYS[2], '-inf', ARGV[1])
for i = #due, 1, -1 do
    redis.call('ZREM', KEYS[2], due[i])
    redis.call('RPUSH', KEYS[1], due[i])
end
local id = redis.call('RPOP', KEYS[1])
if not id then
    return false
end
redis.call('SADD', KEYS[3], id)
return id
"#;

/// Store the record only if the id is new, and queue it in the same step
const ENQUEUE_SCRIPT: &str = r#"
if not redis.call('SET', KEYS[1], ARGV[1], 'NX') then
    return 0
end
redis.call('LPUSH', KEYS[2], ARGV[2])
return 1
"#;

struct Listener {
    sender: broadcast::Sender<JobEvent>,
    handle: JoinHandle<()>,
}

pub struct RedisBroker {
    client: redis::Client,
    conn: OnceCell<ConnectionManager>,
    key_prefix: String,
    claim: Script,
    enqueue: Script,
    listeners: Mutex<HashMap<String, Listener>>,
    closed: AtomicBool,
}

impl fmt::Debug for RedisBroker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisBroker")
            .field("key_prefix", &self.key_prefix)
            .field("connection", &"ConnectionManager")
            .finish()
    }
}

impl RedisBroker {
    /// Parse the endpoint; no connection is made until first use
    pub fn new(redis_url: &str, key_prefix: impl Into<String>) -> Result<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| AppError::Config(format!("Invalid Redis URL: {}", e)))?;

        Ok(Self {
            client,
            conn: OnceCell::new(),
            key_prefix: key_prefix.into(),
            claim: Script::new(CLAIM_SCRIPT),
            enqueue: Script::new(ENQUEUE_SCRIPT),
            listeners: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        })
    }

    fn keys(&self, queue: &str) -> QueueKeys {
        QueueKeys::new(&self.key_prefix, queue)
    }

    async fn connection(&self) -> Result<ConnectionManager> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(AppError::Broker("broker is closed".to_string()));
        }
        let conn = self
            .conn
            .get_or_try_init(|| async {
                let conn = ConnectionManager::new(self.client.clone())
                    .await
                    .map_err(map_redis_error)?;
                info!(key_prefix = %self.key_prefix, "Connected to Redis");
                Ok::<_, AppError>(conn)
            })
            .await?;
        Ok(conn.clone())
    }

    async fn load(&self, conn: &mut ConnectionManager, key: &str) -> Result<Option<JobRecord>> {
        let raw: Option<String> = redis::cmd("GET")
            .arg(key)
            .query_async(conn)
            .await
            .map_err(map_redis_error)?;

        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl Broker for RedisBroker {
    async fn wait_until_ready(&self) -> Result<()> {
        let mut conn = self.connection().await?;
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(map_redis_error)?;
        Ok(())
    }

    async fn enqueue(&self, record: &JobRecord) -> Result<()> {
        let mut conn = self.connection().await?;
        let keys = self.keys(&record.queue);
        let json = serde_json::to_string(record)?;

        let created: i64 = self
            .enqueue
            .key(keys.job(&record.id))
            .key(keys.wait())
            .arg(json)
            .arg(&record.id)
            .invoke_async(&mut conn)
            .await
            .map_err(map_redis_error)?;
        if created == 0 {
            return Err(AppError::Conflict(format!("Job {} already exists", record.id)));
        }

        debug!(job_id = %record.id, queue = %record.queue, "Job enqueued");
        Ok(())
    }

    async fn claim_next(&self, queue: &str, now_millis: i64) -> Result<Option<JobRecord>> {
        let mut conn = self.connection().await?;
        let keys = self.keys(queue);

        loop {
            let id: Option<String> = self
                .claim
                .key(keys.wait())
                .key(keys.delayed())
                .key(keys.active())
                .arg(now_millis)
                .invoke_async(&mut conn)
                .await
                .map_err(map_redis_error)?;

            let Some(id) = id else {
                return Ok(None);
            };

            let Some(mut record) = self.load(&mut conn, &keys.job(&id)).await? else {
                // Index entry outlived its record
                warn!(job_id = %id, queue = %queue, "Dropping dangling job id");
                redis::cmd("SREM")
                    .arg(keys.active())
                    .arg(&id)
                    .query_async::<()>(&mut conn)
                    .await
                    .map_err(map_redis_error)?;
                continue;
            };

            record.activate(now_millis)?;
            redis::cmd("SET")
                .arg(keys.job(&id))
                .arg(serde_json::to_string(&record)?)
                .query_async::<()>(&mut conn)
                .await
                .map_err(map_redis_error)?;

            return Ok(Some(record));
        }
    }

    async fn update(&self, record: &JobRecord) -> Result<()> {
        let mut conn = self.connection().await?;
        let keys = self.keys(&record.queue);

        let exists: bool = redis::cmd("EXISTS")
            .arg(keys.job(&record.id))
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error)?;
        if !exists {
            return Err(AppError::NotFound(format!("Job {} not found", record.id)));
        }

        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("SET")
            .arg(keys.job(&record.id))
            .arg(serde_json::to_string(record)?)
            .ignore()
            .cmd("SREM")
            .arg(keys.active())
            .arg(&record.id)
            .ignore();

        match record.state {
            JobState::Delayed => {
                pipe.cmd("ZADD")
                    .arg(keys.delayed())
                    .arg(record.available_at)
                    .arg(&record.id)
                    .ignore();
            }
            // Requeued after a stall: next in line
            JobState::Queued => {
                pipe.cmd("RPUSH").arg(keys.wait()).arg(&record.id).ignore();
            }
            JobState::Active => {
                pipe.cmd("SADD").arg(keys.active()).arg(&record.id).ignore();
            }
            JobState::Completed | JobState::Failed => {
                return Err(AppError::Internal(format!(
                    "Job {} is terminal, use finish",
                    record.id
                )));
            }
        }

        pipe.query_async::<()>(&mut conn)
            .await
            .map_err(map_redis_error)?;
        Ok(())
    }

    async fn finish(&self, record: &JobRecord) -> Result<()> {
        let event = JobEvent::from_record(record)
            .ok_or_else(|| AppError::Internal(format!("Job {} is not terminal", record.id)))?;
        let (remove, index) = match record.state {
            JobState::Completed => (record.options.remove_on_complete, JobState::Completed),
            _ => (record.options.remove_on_fail, JobState::Failed),
        };

        let mut conn = self.connection().await?;
        let keys = self.keys(&record.queue);

        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("SREM")
            .arg(keys.active())
            .arg(&record.id)
            .ignore();
        if remove {
            pipe.cmd("DEL").arg(keys.job(&record.id)).ignore();
        } else {
            pipe.cmd("SET")
                .arg(keys.job(&record.id))
                .arg(serde_json::to_string(record)?)
                .ignore()
                .cmd("SADD")
                .arg(keys.index(index))
                .arg(&record.id)
                .ignore();
        }
        pipe.cmd("PUBLISH")
            .arg(keys.events())
            .arg(serde_json::to_string(&event)?)
            .ignore();

        pipe.query_async::<()>(&mut conn)
            .await
            .map_err(map_redis_error)?;
        Ok(())
    }

    async fn find(&self, queue: &str, id: &JobId) -> Result<Option<JobRecord>> {
        let mut conn = self.connection().await?;
        self.load(&mut conn, &self.keys(queue).job(id)).await
    }

    async fn list_by_state(&self, queue: &str, state: JobState) -> Result<Vec<JobRecord>> {
        let mut conn = self.connection().await?;
        let keys = self.keys(queue);
        let index = keys.index(state);

        let mut command = match state {
            JobState::Queued => redis::cmd("LRANGE"),
            JobState::Delayed => redis::cmd("ZRANGE"),
            _ => redis::cmd("SMEMBERS"),
        };
        command.arg(&index);
        if matches!(state, JobState::Queued | JobState::Delayed) {
            command.arg(0).arg(-1);
        }
        let ids: Vec<String> = command
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error)?;

        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let job_keys: Vec<String> = ids.iter().map(|id| keys.job(id)).collect();
        let raw: Vec<Option<String>> = redis::cmd("MGET")
            .arg(&job_keys)
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error)?;

        let mut records = raw
            .into_iter()
            .flatten()
            .map(|json| serde_json::from_str::<JobRecord>(&json).map_err(AppError::from))
            .collect::<Result<Vec<_>>>()?;
        records.sort_by_key(|r| r.enqueued_at);
        Ok(records)
    }

    async fn count_by_state(&self, queue: &str, state: JobState) -> Result<u64> {
        let mut conn = self.connection().await?;
        let index = self.keys(queue).index(state);
        let command = match state {
            JobState::Queued => "LLEN",
            JobState::Delayed => "ZCARD",
            _ => "SCARD",
        };

        redis::cmd(command)
            .arg(index)
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error)
    }

    /// Age source for the waiting gauge: the record at the claim end of `wait`
    async fn oldest_queued_at(&self, queue: &str) -> Result<Option<i64>> {
        let mut conn = self.connection().await?;
        let keys = self.keys(queue);

        let tail: Option<String> = redis::cmd("LINDEX")
            .arg(keys.wait())
            .arg(-1)
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error)?;
        let Some(id) = tail else {
            return Ok(None);
        };

        let json: Option<String> = redis::cmd("GET")
            .arg(keys.job(&id))
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error)?;
        match json {
            Some(json) => Ok(Some(serde_json::from_str::<JobRecord>(&json)?.enqueued_at)),
            None => Ok(None),
        }
    }

    async fn subscribe(&self, queue: &str) -> Result<EventReceiver> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(AppError::Broker("broker is closed".to_string()));
        }

        let mut listeners = self.listeners.lock().await;
        if let Some(listener) = listeners.get(queue) {
            if !listener.handle.is_finished() {
                return Ok(listener.sender.subscribe());
            }
        }

        let channel = self.keys(queue).events();
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(map_redis_error)?;
        // Returns once the server confirmed the subscription
        pubsub.subscribe(&channel).await.map_err(map_redis_error)?;

        let (sender, receiver) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let forward = sender.clone();
        let queue_name = queue.to_string();
        let handle = tokio::spawn(async move {
            let mut messages = pubsub.into_on_message();
            while let Some(message) = messages.next().await {
                let payload: String = match message.get_payload() {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!(queue = %queue_name, error = %e, "Unreadable event payload");
                        continue;
                    }
                };
                match serde_json::from_str::<JobEvent>(&payload) {
                    Ok(event) => {
                        let _ = forward.send(event);
                    }
                    Err(e) => warn!(queue = %queue_name, error = %e, "Malformed job event"),
                }
            }
            debug!(queue = %queue_name, "Event listener stopped");
        });

        debug!(queue = %queue, channel = %channel, "Event listener started");
        listeners.insert(queue.to_string(), Listener { sender, handle });
        Ok(receiver)
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        let mut listeners = self.listeners.lock().await;
        for (_, listener) in listeners.drain() {
            listener.handle.abort();
        }
        info!(key_prefix = %self.key_prefix, "Redis broker closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fakturace_core::config::BrokerConnection;
    use fakturace_core::domain::{JobOptions, JobOutcome};
    use serde_json::json;
    use std::time::Duration;

    fn broker() -> RedisBroker {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".into());
        let prefix = format!("fakturace-test-{}", uuid::Uuid::new_v4());
        RedisBroker::new(&url, prefix).unwrap()
    }

    fn record(id: &str, at: i64) -> JobRecord {
        JobRecord::new(id, "invoice-pdf", "generate", json!({"n": id}), JobOptions::default(), at)
    }

    #[test]
    fn test_invalid_url_is_config_error() {
        let err = RedisBroker::new("not a url", "fakturace").unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn test_debug_hides_connection() {
        let broker = RedisBroker::new("redis://:secret@127.0.0.1:6379", "fakturace").unwrap();
        let rendered = format!("{:?}", broker);
        assert!(rendered.contains("fakturace"));
        assert!(!rendered.contains("secret"));
    }

    fn resolve_endpoint(vars: &'static [(&'static str, &'static str)]) -> String {
        let conn = BrokerConnection::resolve(|key| {
            vars.iter()
                .find(|(name, _)| *name == key)
                .map(|(_, value)| value.to_string())
        });
        match conn {
            BrokerConnection::Redis(endpoint) => endpoint.url,
            other => panic!("expected redis, got {other:?}"),
        }
    }

    #[test]
    fn test_tls_endpoint_opens() {
        let url = resolve_endpoint(&[
            ("REDIS_HOST", "redis.internal"),
            ("REDIS_USERNAME", "app"),
            ("REDIS_PASSWORD", "s3cret"),
            ("REDIS_USE_TLS", "true"),
        ]);
        assert!(url.starts_with("rediss://"));
        assert!(RedisBroker::new(&url, "fakturace").is_ok());
    }

    #[test]
    fn test_reserved_password_characters_open() {
        let plain: &'static [(&str, &str)] =
            &[("REDIS_HOST", "redis.internal"), ("REDIS_PASSWORD", "p@ss/w#rd:1")];
        let tls: &'static [(&str, &str)] = &[
            ("REDIS_HOST", "redis.internal"),
            ("REDIS_PASSWORD", "p@ss/w#rd:1"),
            ("REDIS_USE_TLS", "true"),
        ];
        for vars in [plain, tls] {
            let url = resolve_endpoint(vars);
            assert!(url.ends_with("@redis.internal:6379"));
            let broker = RedisBroker::new(&url, "fakturace").unwrap();
            assert!(!format!("{broker:?}").contains("p@ss"));
        }
    }

    #[tokio::test]
    #[ignore = "needs a Redis server (REDIS_URL)"]
    async fn test_claim_retry_and_finish() {
        let broker = broker();
        broker.wait_until_ready().await.unwrap();
        let mut events = broker.subscribe("invoice-pdf").await.unwrap();

        broker.enqueue(&record("a", 1)).await.unwrap();
        broker.enqueue(&record("b", 2)).await.unwrap();
        assert!(matches!(
            broker.enqueue(&record("a", 3)).await,
            Err(AppError::Conflict(_))
        ));
        assert_eq!(broker.oldest_queued_at("invoice-pdf").await.unwrap(), Some(1));
        assert_eq!(broker.count_by_state("invoice-pdf", JobState::Queued).await.unwrap(), 2);

        let mut a = broker.claim_next("invoice-pdf", 10).await.unwrap().unwrap();
        assert_eq!(a.id, "a");
        assert_eq!(broker.oldest_queued_at("invoice-pdf").await.unwrap(), Some(2));
        a.schedule_retry("busy", 100).unwrap();
        broker.update(&a).await.unwrap();
        assert_eq!(broker.count_by_state("invoice-pdf", JobState::Delayed).await.unwrap(), 1);

        let b = broker.claim_next("invoice-pdf", 20).await.unwrap().unwrap();
        assert_eq!(b.id, "b");
        assert!(broker.claim_next("invoice-pdf", 50).await.unwrap().is_none());

        let mut a = broker.claim_next("invoice-pdf", 100).await.unwrap().unwrap();
        assert_eq!(a.attempts_made, 1);
        a.complete(110, json!("file://pdf/a.pdf")).unwrap();
        broker.finish(&a).await.unwrap();

        let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.job_id, "a");
        assert!(matches!(event.outcome, JobOutcome::Completed { .. }));
        assert!(broker.find("invoice-pdf", &"a".to_string()).await.unwrap().is_none());
        assert_eq!(broker.count_by_state("invoice-pdf", JobState::Active).await.unwrap(), 1);

        broker.close().await.unwrap();
        assert!(broker.wait_until_ready().await.is_err());
    }
}
