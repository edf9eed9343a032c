//! Redis-backed broker.
//!
//! # Key layout
//!
//! - `{prefix}:{queue}:waiting`: sorted set of job ids; lowest score leases first
//! - `{prefix}:{queue}:delayed`: sorted set of job ids scored by ready time (ms)
//! - `{prefix}:{queue}:seq`: counter giving each push its enqueue sequence;
//!   restarts from 1 whenever the waiting set is empty
//! - `{prefix}:{queue}:paused`: present while the queue is paused
//!
//! Leasing uses `ZPOPMIN`, so a waiting id is handed to exactly one worker.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use uuid::Uuid;

use super::broker::{BrokerDepth, BrokerError, QueueBroker};

/// Default key prefix.
pub const DEFAULT_PREFIX: &str = "commitlens";

/// Priorities are clamped to this magnitude before scoring.
pub const PRIORITY_LIMIT: i32 = 1_000_000;

/// Spacing between priority levels in the waiting score.
const PRIORITY_SPAN: f64 = 1e9;

/// Largest sequence that still orders within one priority level.
pub const SEQ_LIMIT: u64 = 999_999_999;

/// Takes the next sequence, restarting the counter when nothing is waiting.
const NEXT_SEQ_SCRIPT: &str = r#"
if redis.call('ZCARD', KEYS[1]) == 0 then
    redis.call('SET', KEYS[2], 0)
end
return redis.call('INCR', KEYS[2])
"#;

/// Score of a waiting entry: priority descending, then sequence ascending.
///
/// Sequences past [`SEQ_LIMIT`] saturate. Jobs pushed beyond that point
/// without the queue ever draining tie with each other (Redis then orders
/// them by id) but never jump ahead of earlier ones.
pub fn waiting_score(priority: i32, seq: u64) -> f64 {
    let priority = priority.clamp(-PRIORITY_LIMIT, PRIORITY_LIMIT);
    -(f64::from(priority)) * PRIORITY_SPAN + seq.min(SEQ_LIMIT) as f64
}

/// Broker over a shared Redis connection.
#[derive(Clone)]
pub struct RedisBroker {
    /// Redis connection manager (handles reconnection automatically).
    redis: ConnectionManager,
    prefix: String,
    next_seq: redis::Script,
}

impl RedisBroker {
    /// Connects to Redis.
    pub async fn connect(redis_url: &str) -> Result<Self, BrokerError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| BrokerError::ConnectionFailed(e.to_string()))?;

        let redis = ConnectionManager::new(client)
            .await
            .map_err(|e| BrokerError::ConnectionFailed(e.to_string()))?;

        Ok(Self::from_connection(redis))
    }

    /// Creates a broker from an existing ConnectionManager.
    pub fn from_connection(redis: ConnectionManager) -> Self {
        Self {
            redis,
            prefix: DEFAULT_PREFIX.to_string(),
            next_seq: redis::Script::new(NEXT_SEQ_SCRIPT),
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Shared connection, for other Redis-backed components.
    pub fn connection(&self) -> ConnectionManager {
        self.redis.clone()
    }

    fn key(&self, queue: &str, suffix: &str) -> String {
        format!("{}:{}:{}", self.prefix, queue, suffix)
    }
}

fn parse_id(raw: &str) -> Result<Uuid, BrokerError> {
    Uuid::parse_str(raw).map_err(|e| BrokerError::MalformedEntry(format!("{raw}: {e}")))
}

#[async_trait]
impl QueueBroker for RedisBroker {
    async fn push(&self, queue: &str, id: Uuid, priority: i32) -> Result<(), BrokerError> {
        let mut conn = self.redis.clone();
        let seq: u64 = self
            .next_seq
            .key(self.key(queue, "waiting"))
            .key(self.key(queue, "seq"))
            .invoke_async(&mut conn)
            .await?;

        let mut pipe = redis::pipe();
        pipe.atomic()
            .zrem(self.key(queue, "delayed"), id.to_string())
            .ignore()
            .cmd("ZADD")
            .arg(self.key(queue, "waiting"))
            .arg("NX")
            .arg(waiting_score(priority, seq))
            .arg(id.to_string())
            .ignore();
        pipe.query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }

    async fn push_delayed(
        &self,
        queue: &str,
        id: Uuid,
        ready_at: DateTime<Utc>,
    ) -> Result<(), BrokerError> {
        let mut conn = self.redis.clone();
        let mut pipe = redis::pipe();
        pipe.atomic()
            .zrem(self.key(queue, "waiting"), id.to_string())
            .ignore()
            .zadd(
                self.key(queue, "delayed"),
                id.to_string(),
                ready_at.timestamp_millis(),
            )
            .ignore();
        pipe.query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }

    async fn pop(&self, queue: &str) -> Result<Option<Uuid>, BrokerError> {
        let mut conn = self.redis.clone();
        // Reply is [member, score] or empty.
        let popped: Vec<String> = redis::cmd("ZPOPMIN")
            .arg(self.key(queue, "waiting"))
            .arg(1)
            .query_async(&mut conn)
            .await?;

        popped.first().map(|raw| parse_id(raw)).transpose()
    }

    async fn promote_due(&self, queue: &str, now: DateTime<Utc>) -> Result<Vec<Uuid>, BrokerError> {
        let mut conn = self.redis.clone();
        let delayed = self.key(queue, "delayed");
        let due: Vec<String> = conn
            .zrangebyscore(&delayed, "-inf", now.timestamp_millis())
            .await?;

        let mut promoted = Vec::with_capacity(due.len());
        for raw in due {
            // ZREM decides which concurrent caller owns the promotion.
            let removed: usize = conn.zrem(&delayed, &raw).await?;
            if removed == 1 {
                match parse_id(&raw) {
                    Ok(id) => promoted.push(id),
                    Err(e) => tracing::warn!(queue, error = %e, "Dropping malformed delayed entry"),
                }
            }
        }
        Ok(promoted)
    }

    async fn remove(&self, queue: &str, id: Uuid) -> Result<bool, BrokerError> {
        let mut conn = self.redis.clone();
        let (waiting, delayed): (usize, usize) = redis::pipe()
            .zrem(self.key(queue, "waiting"), id.to_string())
            .zrem(self.key(queue, "delayed"), id.to_string())
            .query_async(&mut conn)
            .await?;
        Ok(waiting + delayed > 0)
    }

    async fn set_paused(&self, queue: &str, paused: bool) -> Result<(), BrokerError> {
        let mut conn = self.redis.clone();
        let key = self.key(queue, "paused");
        if paused {
            conn.set::<_, _, ()>(&key, 1).await?;
        } else {
            conn.del::<_, ()>(&key).await?;
        }
        Ok(())
    }

    async fn is_paused(&self, queue: &str) -> Result<bool, BrokerError> {
        let mut conn = self.redis.clone();
        let exists: bool = conn.exists(self.key(queue, "paused")).await?;
        Ok(exists)
    }

    async fn depth(&self, queue: &str) -> Result<BrokerDepth, BrokerError> {
        let mut conn = self.redis.clone();
        let (waiting, delayed): (usize, usize) = redis::pipe()
            .zcard(self.key(queue, "waiting"))
            .zcard(self.key(queue, "delayed"))
            .query_async(&mut conn)
            .await?;
        Ok(BrokerDepth { waiting, delayed })
    }

    async fn ping(&self) -> Result<(), BrokerError> {
        let mut conn = self.redis.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}
