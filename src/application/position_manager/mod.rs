//! Cross-process authoritative view of current holdings (spec.md §4.2).
//!
//! Grounded on the original system's Redis-backed `RedisPositionManager`:
//! a SET of held symbols, a HASH of per-symbol details, and a pub/sub
//! channel broadcasting `add`/`remove` events to every SG/OE process
//! sharing the account.

pub mod store;

use crate::domain::errors::PositionError;
use crate::domain::types::Position;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use store::PositionStore;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PositionDetail {
    pub quantity: Decimal,
    pub cost_price: Decimal,
    pub order_id: String,
    pub added_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum UpdateAction {
    Add,
    Remove,
}

#[derive(Debug, Clone)]
pub struct PositionUpdate {
    pub action: UpdateAction,
    pub symbol: String,
    pub detail: Option<PositionDetail>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireUpdate {
    action: String,
    symbol: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<PositionDetail>,
}

pub struct PositionManager<S: PositionStore> {
    store: std::sync::Arc<S>,
    account: String,
    set_key: String,
    hash_key: String,
    channel_key: String,
    /// §4.2 failure semantics: `has()` on a transient store error returns
    /// `false` only when this in-process cache also confirms the symbol is
    /// unknown; `fail_closed=true` disables that fallback entirely.
    local_cache: Mutex<HashSet<String>>,
    fail_closed: bool,
}

impl<S: PositionStore> PositionManager<S> {
    pub fn new(store: std::sync::Arc<S>, account: impl Into<String>, fail_closed: bool) -> Self {
        let account = account.into();
        Self {
            store,
            set_key: format!("trading:current_positions:{account}"),
            hash_key: format!("trading:position_details:{account}"),
            channel_key: format!("trading:position_updates:{account}"),
            account,
            local_cache: Mutex::new(HashSet::new()),
            fail_closed,
        }
    }

    async fn publish_update(&self, update: WireUpdate) {
        match serde_json::to_string(&update) {
            Ok(json) => {
                if let Err(e) = self.store.publish(&self.channel_key, &json).await {
                    warn!(account = %self.account, error = %e, "failed to publish position update");
                }
            }
            Err(e) => error!(error = %e, "failed to serialize position update"),
        }
    }

    /// Idempotent: adding an already-held symbol overwrites its details.
    pub async fn add(&self, symbol: &str, quantity: Decimal, cost_price: Decimal, order_id: &str) -> Result<(), PositionError> {
        let detail = PositionDetail { quantity, cost_price, order_id: order_id.to_string(), added_at: Utc::now() };
        let value = serde_json::to_string(&detail).map_err(|e| PositionError::StoreUnavailable { reason: e.to_string() })?;

        self.store.sadd(&self.set_key, symbol).await?;
        self.store.hset(&self.hash_key, symbol, &value).await?;
        self.local_cache.lock().expect("position cache mutex poisoned").insert(symbol.to_string());

        info!(account = %self.account, symbol, %quantity, %cost_price, "position added");
        self.publish_update(WireUpdate { action: "add".into(), symbol: symbol.to_string(), data: Some(detail) }).await;
        Ok(())
    }

    pub async fn remove(&self, symbol: &str) -> Result<(), PositionError> {
        self.store.srem(&self.set_key, symbol).await?;
        self.store.hdel(&self.hash_key, symbol).await?;
        self.local_cache.lock().expect("position cache mutex poisoned").remove(symbol);

        info!(account = %self.account, symbol, "position removed");
        self.publish_update(WireUpdate { action: "remove".into(), symbol: symbol.to_string(), data: None }).await;
        Ok(())
    }

    /// Safe-open on transient failure only if the local cache independently
    /// confirms the symbol is unknown; otherwise the failure propagates so
    /// the caller aborts the decision rather than risking a duplicate open.
    pub async fn has(&self, symbol: &str) -> Result<bool, PositionError> {
        match self.store.sismember(&self.set_key, symbol).await {
            Ok(present) => {
                let mut cache = self.local_cache.lock().expect("position cache mutex poisoned");
                if present {
                    cache.insert(symbol.to_string());
                } else {
                    cache.remove(symbol);
                }
                Ok(present)
            }
            Err(e) => {
                if self.fail_closed {
                    return Err(e);
                }
                let cache = self.local_cache.lock().expect("position cache mutex poisoned");
                if cache.contains(symbol) {
                    Err(e)
                } else {
                    warn!(account = %self.account, symbol, error = %e, "position store unreachable, falling back to safe-open");
                    Ok(false)
                }
            }
        }
    }

    pub async fn all(&self) -> Result<HashSet<String>, PositionError> {
        Ok(self.store.smembers(&self.set_key).await?.into_iter().collect())
    }

    pub async fn detail(&self, symbol: &str) -> Result<Option<PositionDetail>, PositionError> {
        match self.store.hget(&self.hash_key, symbol).await? {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| PositionError::StoreUnavailable { reason: e.to_string() }),
            None => Ok(None),
        }
    }

    pub async fn all_details(&self) -> Result<HashMap<String, PositionDetail>, PositionError> {
        let raw = self.store.hgetall(&self.hash_key).await?;
        let mut out = HashMap::with_capacity(raw.len());
        for (symbol, value) in raw {
            let detail: PositionDetail =
                serde_json::from_str(&value).map_err(|e| PositionError::StoreUnavailable { reason: e.to_string() })?;
            out.insert(symbol, detail);
        }
        Ok(out)
    }

    /// Reconcile with an authoritative broker snapshot: compute the
    /// symmetric difference against the current set and apply `add`/`remove`
    /// for each side, without publishing notifications for the batch.
    pub async fn sync_from_broker(&self, snapshot: &[Position]) -> Result<(), PositionError> {
        let broker_symbols: HashSet<&str> = snapshot.iter().map(|p| p.symbol.as_str()).collect();
        let known = self.all().await?;

        for position in snapshot {
            if !known.contains(position.symbol.as_str()) {
                self.store.sadd(&self.set_key, &position.symbol).await?;
            }
            let detail = PositionDetail {
                quantity: position.quantity,
                cost_price: position.cost_price,
                order_id: String::new(),
                added_at: position.entry_time,
            };
            let value = serde_json::to_string(&detail).map_err(|e| PositionError::StoreUnavailable { reason: e.to_string() })?;
            self.store.hset(&self.hash_key, &position.symbol, &value).await?;
            self.local_cache.lock().expect("position cache mutex poisoned").insert(position.symbol.clone());
        }

        for symbol in known.iter().filter(|s| !broker_symbols.contains(s.as_str())) {
            self.store.srem(&self.set_key, symbol).await?;
            self.store.hdel(&self.hash_key, symbol).await?;
            self.local_cache.lock().expect("position cache mutex poisoned").remove(symbol);
        }

        info!(account = %self.account, broker_count = snapshot.len(), "position manager synchronized from broker snapshot");
        Ok(())
    }

    /// Long-lived listener; each call gets its own independent broadcast receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.store.subscribe(&self.channel_key)
    }
}

/// Parse a raw pub/sub payload into a typed update, for callers driving
/// `subscribe()`'s receiver (spec.md §4.2 "callback invoked with (action, symbol, data)").
pub fn parse_update(raw: &str) -> Result<PositionUpdate, PositionError> {
    let wire: WireUpdate =
        serde_json::from_str(raw).map_err(|e| PositionError::StoreUnavailable { reason: e.to_string() })?;
    let action = match wire.action.as_str() {
        "add" => UpdateAction::Add,
        "remove" => UpdateAction::Remove,
        other => return Err(PositionError::StoreUnavailable { reason: format!("unknown update action: {other}") }),
    };
    Ok(PositionUpdate { action, symbol: wire.symbol, detail: wire.data })
}
