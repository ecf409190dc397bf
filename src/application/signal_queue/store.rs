//! The sorted-set abstraction SQ is built on (spec.md §6 "signal queue
//! store": atomic ZADD/ZPOPMIN-style operations). One implementation talks
//! to Redis (`infrastructure::persistence::redis_store`); another lives
//! entirely in memory for tests and for single-process smoke runs.

use crate::domain::errors::QueueError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

/// A Redis sorted set, abstracted to the handful of operations SQ needs.
/// Lower score sorts first — SQ encodes "most urgent" as "most negative".
#[async_trait]
pub trait SortedSetStore: Send + Sync {
    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<(), QueueError>;
    async fn zrem(&self, key: &str, member: &str) -> Result<bool, QueueError>;
    /// All members, ascending by score.
    async fn zrange_with_scores(&self, key: &str) -> Result<Vec<(String, f64)>, QueueError>;
    async fn zcard(&self, key: &str) -> Result<u64, QueueError>;
    async fn clear(&self, key: &str) -> Result<(), QueueError>;
}

/// In-memory store for tests and single-process deployments without Redis.
#[derive(Default)]
pub struct InMemorySortedSetStore {
    sets: Mutex<HashMap<String, Vec<(String, f64)>>>,
}

impl InMemorySortedSetStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SortedSetStore for InMemorySortedSetStore {
    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<(), QueueError> {
        let mut sets = self.sets.lock().expect("sorted-set store mutex poisoned");
        let set = sets.entry(key.to_string()).or_default();
        set.retain(|(m, _)| m != member);
        set.push((member.to_string(), score));
        Ok(())
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<bool, QueueError> {
        let mut sets = self.sets.lock().expect("sorted-set store mutex poisoned");
        match sets.get_mut(key) {
            Some(set) => {
                let before = set.len();
                set.retain(|(m, _)| m != member);
                Ok(set.len() != before)
            }
            None => Ok(false),
        }
    }

    async fn zrange_with_scores(&self, key: &str) -> Result<Vec<(String, f64)>, QueueError> {
        let sets = self.sets.lock().expect("sorted-set store mutex poisoned");
        let mut entries = sets.get(key).cloned().unwrap_or_default();
        entries.sort_by(|a, b| a.1.total_cmp(&b.1));
        Ok(entries)
    }

    async fn zcard(&self, key: &str) -> Result<u64, QueueError> {
        let sets = self.sets.lock().expect("sorted-set store mutex poisoned");
        Ok(sets.get(key).map(|s| s.len()).unwrap_or(0) as u64)
    }

    async fn clear(&self, key: &str) -> Result<(), QueueError> {
        let mut sets = self.sets.lock().expect("sorted-set store mutex poisoned");
        sets.remove(key);
        Ok(())
    }
}
