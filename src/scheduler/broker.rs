//! Queue brokers: the visibility layer in front of the job store.
//!
//! A broker only tracks job ids. It decides which job a worker sees next
//! (priority, then enqueue order) and when delayed jobs become visible. The
//! job store remains the authority on state; a stale id popped from a broker
//! is discarded by the store's claim check.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Errors raised by brokers.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("Broker connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Redis operation failed: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Malformed broker entry: {0}")]
    MalformedEntry(String),
}

/// Number of ids a broker holds for one queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerDepth {
    pub waiting: usize,
    pub delayed: usize,
}

/// Ordering and visibility of job ids per logical queue.
#[async_trait]
pub trait QueueBroker: Send + Sync {
    /// Makes a job visible. Pushing an id that is already waiting is a no-op.
    async fn push(&self, queue: &str, id: Uuid, priority: i32) -> Result<(), BrokerError>;

    /// Holds a job back until `ready_at`.
    async fn push_delayed(
        &self,
        queue: &str,
        id: Uuid,
        ready_at: DateTime<Utc>,
    ) -> Result<(), BrokerError>;

    /// Removes and returns the next visible id.
    async fn pop(&self, queue: &str) -> Result<Option<Uuid>, BrokerError>;

    /// Removes delayed ids whose ready time has passed and returns them.
    ///
    /// Each id is returned to exactly one caller.
    async fn promote_due(&self, queue: &str, now: DateTime<Utc>) -> Result<Vec<Uuid>, BrokerError>;

    /// Drops an id from both the waiting and delayed sets.
    async fn remove(&self, queue: &str, id: Uuid) -> Result<bool, BrokerError>;

    async fn set_paused(&self, queue: &str, paused: bool) -> Result<(), BrokerError>;

    async fn is_paused(&self, queue: &str) -> Result<bool, BrokerError>;

    async fn depth(&self, queue: &str) -> Result<BrokerDepth, BrokerError>;

    async fn ping(&self) -> Result<(), BrokerError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Entry {
    priority: i32,
    seq: u64,
    id: Uuid,
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: higher priority first, then lower sequence.
        self.priority
            .cmp(&other.priority)
            .then_with(|| Reverse(self.seq).cmp(&Reverse(other.seq)))
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Default)]
struct QueueState {
    heap: BinaryHeap<Entry>,
    /// Ids currently in `heap`; entries missing here were removed lazily.
    waiting: HashSet<Uuid>,
    delayed: HashMap<Uuid, DateTime<Utc>>,
    paused: bool,
}

/// In-process broker used when no Redis URL is configured.
#[derive(Debug, Default)]
pub struct MemoryBroker {
    queues: Mutex<HashMap<String, QueueState>>,
    seq: Mutex<u64>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_seq(&self) -> u64 {
        let mut seq = self.seq.lock().expect("broker sequence lock poisoned");
        *seq += 1;
        *seq
    }

    fn with_queue<R>(&self, queue: &str, f: impl FnOnce(&mut QueueState) -> R) -> R {
        let mut queues = self.queues.lock().expect("broker lock poisoned");
        f(queues.entry(queue.to_string()).or_default())
    }
}

#[async_trait]
impl QueueBroker for MemoryBroker {
    async fn push(&self, queue: &str, id: Uuid, priority: i32) -> Result<(), BrokerError> {
        let seq = self.next_seq();
        self.with_queue(queue, |state| {
            state.delayed.remove(&id);
            if state.waiting.insert(id) {
                state.heap.push(Entry { priority, seq, id });
            }
        });
        Ok(())
    }

    async fn push_delayed(
        &self,
        queue: &str,
        id: Uuid,
        ready_at: DateTime<Utc>,
    ) -> Result<(), BrokerError> {
        self.with_queue(queue, |state| {
            state.waiting.remove(&id);
            state.delayed.insert(id, ready_at);
        });
        Ok(())
    }

    async fn pop(&self, queue: &str) -> Result<Option<Uuid>, BrokerError> {
        Ok(self.with_queue(queue, |state| {
            while let Some(entry) = state.heap.pop() {
                if state.waiting.remove(&entry.id) {
                    return Some(entry.id);
                }
            }
            None
        }))
    }

    async fn promote_due(&self, queue: &str, now: DateTime<Utc>) -> Result<Vec<Uuid>, BrokerError> {
        Ok(self.with_queue(queue, |state| {
            let mut due: Vec<(DateTime<Utc>, Uuid)> = state
                .delayed
                .iter()
                .filter(|(_, ready_at)| **ready_at <= now)
                .map(|(id, ready_at)| (*ready_at, *id))
                .collect();
            due.sort();
            for (_, id) in &due {
                state.delayed.remove(id);
            }
            due.into_iter().map(|(_, id)| id).collect()
        }))
    }

    async fn remove(&self, queue: &str, id: Uuid) -> Result<bool, BrokerError> {
        Ok(self.with_queue(queue, |state| {
            let waiting = state.waiting.remove(&id);
            let delayed = state.delayed.remove(&id).is_some();
            waiting || delayed
        }))
    }

    async fn set_paused(&self, queue: &str, paused: bool) -> Result<(), BrokerError> {
        self.with_queue(queue, |state| state.paused = paused);
        Ok(())
    }

    async fn is_paused(&self, queue: &str) -> Result<bool, BrokerError> {
        Ok(self.with_queue(queue, |state| state.paused))
    }

    async fn depth(&self, queue: &str) -> Result<BrokerDepth, BrokerError> {
        Ok(self.with_queue(queue, |state| BrokerDepth {
            waiting: state.waiting.len(),
            delayed: state.delayed.len(),
        }))
    }

    async fn ping(&self) -> Result<(), BrokerError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const QUEUE: &str = "commit-analysis";

    #[tokio::test]
    async fn test_priority_then_fifo() {
        let broker = MemoryBroker::new();
        let low = Uuid::new_v4();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        let urgent = Uuid::new_v4();

        broker.push(QUEUE, low, -5).await.expect("push");
        broker.push(QUEUE, first, 0).await.expect("push");
        broker.push(QUEUE, second, 0).await.expect("push");
        broker.push(QUEUE, urgent, 10).await.expect("push");

        let mut order = Vec::new();
        while let Some(id) = broker.pop(QUEUE).await.expect("pop") {
            order.push(id);
        }
        assert_eq!(order, vec![urgent, first, second, low]);
    }

    #[tokio::test]
    async fn test_push_is_idempotent() {
        let broker = MemoryBroker::new();
        let id = Uuid::new_v4();
        broker.push(QUEUE, id, 0).await.expect("push");
        broker.push(QUEUE, id, 5).await.expect("push");

        assert_eq!(broker.depth(QUEUE).await.expect("depth").waiting, 1);
        assert_eq!(broker.pop(QUEUE).await.expect("pop"), Some(id));
        assert_eq!(broker.pop(QUEUE).await.expect("pop"), None);
    }

    #[tokio::test]
    async fn test_delayed_promotion() {
        let broker = MemoryBroker::new();
        let id = Uuid::new_v4();
        let now = Utc::now();
        broker
            .push_delayed(QUEUE, id, now + chrono::Duration::seconds(30))
            .await
            .expect("push");

        assert_eq!(broker.pop(QUEUE).await.expect("pop"), None);
        assert!(broker.promote_due(QUEUE, now).await.expect("promote").is_empty());
        assert_eq!(broker.depth(QUEUE).await.expect("depth").delayed, 1);

        let due = broker
            .promote_due(QUEUE, now + chrono::Duration::seconds(31))
            .await
            .expect("promote");
        assert_eq!(due, vec![id]);
        assert_eq!(broker.depth(QUEUE).await.expect("depth"), BrokerDepth::default());
    }

    #[tokio::test]
    async fn test_remove_skips_lazily() {
        let broker = MemoryBroker::new();
        let gone = Uuid::new_v4();
        let kept = Uuid::new_v4();
        broker.push(QUEUE, gone, 10).await.expect("push");
        broker.push(QUEUE, kept, 0).await.expect("push");

        assert!(broker.remove(QUEUE, gone).await.expect("remove"));
        assert!(!broker.remove(QUEUE, gone).await.expect("remove"));
        assert_eq!(broker.pop(QUEUE).await.expect("pop"), Some(kept));
    }

    #[tokio::test]
    async fn test_queues_are_independent() {
        let broker = MemoryBroker::new();
        broker.push(QUEUE, Uuid::new_v4(), 0).await.expect("push");
        broker.set_paused("documentation", true).await.expect("pause");

        assert!(broker.is_paused("documentation").await.expect("paused"));
        assert!(!broker.is_paused(QUEUE).await.expect("paused"));
        assert_eq!(broker.pop("documentation").await.expect("pop"), None);
        assert!(broker.pop(QUEUE).await.expect("pop").is_some());
    }
}
