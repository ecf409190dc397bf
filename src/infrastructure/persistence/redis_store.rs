//! Redis-backed `SortedSetStore` and `PositionStore` (spec.md §6: "signal
//! queue store" / "position store"). Grounded on the in-memory reference
//! implementations these traits ship with — same operation set, backed by
//! real ZADD/ZPOPMIN-style sorted sets and SET/HASH/PUBLISH commands instead
//! of a `Mutex<HashMap<..>>`.

use crate::application::position_manager::store::PositionStore;
use crate::application::signal_queue::store::SortedSetStore;
use crate::domain::errors::{PositionError, QueueError};
use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::broadcast;
use tracing::warn;

pub struct RedisSortedSetStore {
    conn: ConnectionManager,
}

impl RedisSortedSetStore {
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl SortedSetStore for RedisSortedSetStore {
    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        conn.zadd::<_, _, _, ()>(key, member, score)
            .await
            .map_err(|e| QueueError::StoreUnavailable { attempts: 1, reason: e.to_string() })
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<bool, QueueError> {
        let mut conn = self.conn.clone();
        let removed: i64 = conn
            .zrem(key, member)
            .await
            .map_err(|e| QueueError::StoreUnavailable { attempts: 1, reason: e.to_string() })?;
        Ok(removed > 0)
    }

    async fn zrange_with_scores(&self, key: &str) -> Result<Vec<(String, f64)>, QueueError> {
        let mut conn = self.conn.clone();
        conn.zrange_withscores(key, 0, -1)
            .await
            .map_err(|e| QueueError::StoreUnavailable { attempts: 1, reason: e.to_string() })
    }

    async fn zcard(&self, key: &str) -> Result<u64, QueueError> {
        let mut conn = self.conn.clone();
        conn.zcard(key)
            .await
            .map_err(|e| QueueError::StoreUnavailable { attempts: 1, reason: e.to_string() })
    }

    async fn clear(&self, key: &str) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(key)
            .await
            .map_err(|e| QueueError::StoreUnavailable { attempts: 1, reason: e.to_string() })
    }
}

/// Local fan-out for same-process subscribers, bridged to Redis pub/sub by a
/// background listener so subscribers in other processes (e.g. a separate SG
/// and OE binary sharing one Redis) also see published updates.
#[derive(Default)]
struct ChannelHub {
    senders: Mutex<HashMap<String, broadcast::Sender<String>>>,
}

impl ChannelHub {
    fn sender_for(&self, channel: &str) -> broadcast::Sender<String> {
        let mut senders = self.senders.lock().expect("channel hub mutex poisoned");
        senders.entry(channel.to_string()).or_insert_with(|| broadcast::channel(256).0).clone()
    }
}

pub struct RedisPositionStore {
    conn: ConnectionManager,
    hub: std::sync::Arc<ChannelHub>,
}

impl RedisPositionStore {
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = client.get_connection_manager().await?;
        let hub = std::sync::Arc::new(ChannelHub::default());

        let pubsub_client = client.clone();
        let hub_for_task = hub.clone();
        tokio::spawn(async move {
            loop {
                match pubsub_client.get_async_pubsub().await {
                    Ok(mut pubsub) => {
                        if let Err(e) = pubsub.psubscribe("*").await {
                            warn!(error = %e, "redis pubsub psubscribe failed, retrying");
                            tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                            continue;
                        }
                        let mut stream = pubsub.on_message();
                        use futures_util::StreamExt;
                        while let Some(msg) = stream.next().await {
                            let channel: String = msg.get_channel_name().to_string();
                            if let Ok(payload) = msg.get_payload::<String>() {
                                let _ = hub_for_task.sender_for(&channel).send(payload);
                            }
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "redis pubsub connection failed, retrying");
                        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                    }
                }
            }
        });

        Ok(Self { conn, hub })
    }
}

#[async_trait]
impl PositionStore for RedisPositionStore {
    async fn sadd(&self, key: &str, member: &str) -> Result<bool, PositionError> {
        let mut conn = self.conn.clone();
        let added: i64 = conn
            .sadd(key, member)
            .await
            .map_err(|e| PositionError::StoreUnavailable { reason: e.to_string() })?;
        Ok(added > 0)
    }

    async fn srem(&self, key: &str, member: &str) -> Result<bool, PositionError> {
        let mut conn = self.conn.clone();
        let removed: i64 = conn
            .srem(key, member)
            .await
            .map_err(|e| PositionError::StoreUnavailable { reason: e.to_string() })?;
        Ok(removed > 0)
    }

    async fn sismember(&self, key: &str, member: &str) -> Result<bool, PositionError> {
        let mut conn = self.conn.clone();
        conn.sismember(key, member)
            .await
            .map_err(|e| PositionError::StoreUnavailable { reason: e.to_string() })
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, PositionError> {
        let mut conn = self.conn.clone();
        conn.smembers(key)
            .await
            .map_err(|e| PositionError::StoreUnavailable { reason: e.to_string() })
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), PositionError> {
        let mut conn = self.conn.clone();
        conn.hset::<_, _, _, ()>(key, field, value)
            .await
            .map_err(|e| PositionError::StoreUnavailable { reason: e.to_string() })
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<(), PositionError> {
        let mut conn = self.conn.clone();
        conn.hdel::<_, _, ()>(key, field)
            .await
            .map_err(|e| PositionError::StoreUnavailable { reason: e.to_string() })
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, PositionError> {
        let mut conn = self.conn.clone();
        conn.hget(key, field)
            .await
            .map_err(|e| PositionError::StoreUnavailable { reason: e.to_string() })
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, PositionError> {
        let mut conn = self.conn.clone();
        conn.hgetall(key)
            .await
            .map_err(|e| PositionError::StoreUnavailable { reason: e.to_string() })
    }

    async fn publish(&self, channel: &str, message: &str) -> Result<(), PositionError> {
        let mut conn = self.conn.clone();
        conn.publish::<_, _, ()>(channel, message)
            .await
            .map_err(|e| PositionError::StoreUnavailable { reason: e.to_string() })?;
        let _ = self.hub.sender_for(channel).send(message.to_string());
        Ok(())
    }

    fn subscribe(&self, channel: &str) -> broadcast::Receiver<String> {
        self.hub.sender_for(channel).subscribe()
    }
}
