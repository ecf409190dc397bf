//! The SET+HASH+pub/sub abstraction PM is built on (spec.md §6 "position
//! store"). A Redis implementation lives in
//! `infrastructure::persistence::redis_store`; an in-memory one backs tests.

use crate::domain::errors::PositionError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::broadcast;

#[async_trait]
pub trait PositionStore: Send + Sync {
    async fn sadd(&self, key: &str, member: &str) -> Result<bool, PositionError>;
    async fn srem(&self, key: &str, member: &str) -> Result<bool, PositionError>;
    async fn sismember(&self, key: &str, member: &str) -> Result<bool, PositionError>;
    async fn smembers(&self, key: &str) -> Result<Vec<String>, PositionError>;

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), PositionError>;
    async fn hdel(&self, key: &str, field: &str) -> Result<(), PositionError>;
    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, PositionError>;
    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, PositionError>;

    async fn publish(&self, channel: &str, message: &str) -> Result<(), PositionError>;
    /// Long-lived listener. Each call returns an independent receiver over
    /// the same logical channel (broadcast semantics, not a queue).
    fn subscribe(&self, channel: &str) -> broadcast::Receiver<String>;
}

#[derive(Default)]
struct ChannelHub {
    senders: Mutex<HashMap<String, broadcast::Sender<String>>>,
}

impl ChannelHub {
    fn sender_for(&self, channel: &str) -> broadcast::Sender<String> {
        let mut senders = self.senders.lock().expect("channel hub mutex poisoned");
        senders
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(256).0)
            .clone()
    }
}

#[derive(Default)]
pub struct InMemoryPositionStore {
    sets: Mutex<HashMap<String, std::collections::HashSet<String>>>,
    hashes: Mutex<HashMap<String, HashMap<String, String>>>,
    channels: ChannelHub,
}

impl InMemoryPositionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PositionStore for InMemoryPositionStore {
    async fn sadd(&self, key: &str, member: &str) -> Result<bool, PositionError> {
        let mut sets = self.sets.lock().expect("position store mutex poisoned");
        Ok(sets.entry(key.to_string()).or_default().insert(member.to_string()))
    }

    async fn srem(&self, key: &str, member: &str) -> Result<bool, PositionError> {
        let mut sets = self.sets.lock().expect("position store mutex poisoned");
        Ok(sets.get_mut(key).map(|s| s.remove(member)).unwrap_or(false))
    }

    async fn sismember(&self, key: &str, member: &str) -> Result<bool, PositionError> {
        let sets = self.sets.lock().expect("position store mutex poisoned");
        Ok(sets.get(key).map(|s| s.contains(member)).unwrap_or(false))
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, PositionError> {
        let sets = self.sets.lock().expect("position store mutex poisoned");
        Ok(sets.get(key).map(|s| s.iter().cloned().collect()).unwrap_or_default())
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), PositionError> {
        let mut hashes = self.hashes.lock().expect("position store mutex poisoned");
        hashes.entry(key.to_string()).or_default().insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<(), PositionError> {
        let mut hashes = self.hashes.lock().expect("position store mutex poisoned");
        if let Some(h) = hashes.get_mut(key) {
            h.remove(field);
        }
        Ok(())
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, PositionError> {
        let hashes = self.hashes.lock().expect("position store mutex poisoned");
        Ok(hashes.get(key).and_then(|h| h.get(field).cloned()))
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, PositionError> {
        let hashes = self.hashes.lock().expect("position store mutex poisoned");
        Ok(hashes.get(key).cloned().unwrap_or_default())
    }

    async fn publish(&self, channel: &str, message: &str) -> Result<(), PositionError> {
        let sender = self.channels.sender_for(channel);
        let _ = sender.send(message.to_string()); // no subscribers is not an error
        Ok(())
    }

    fn subscribe(&self, channel: &str) -> broadcast::Receiver<String> {
        self.channels.sender_for(channel).subscribe()
    }
}
