//! Durable, cross-process, per-account priority queue (spec.md §4.1).
//!
//! Three logical partitions share one `SortedSetStore`: `pending` (ordered by
//! priority, ties broken by enqueue time), `processing` (ordered by take
//! time, so stranded entries can be swept by age), and `failed` (terminal,
//! ordered by the time they landed there).

pub mod store;

use crate::config::QueueEnvConfig;
use crate::domain::errors::QueueError;
use crate::domain::types::Signal;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use store::SortedSetStore;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Partition {
    Pending,
    Processing,
    Failed,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct QueueStats {
    pub pending: u64,
    pub processing: u64,
    pub failed: u64,
    pub processed_total: u64,
    pub succeeded_total: u64,
}

/// Priority dominates the sort; enqueue time only breaks ties between equal
/// priorities. The multiplier must clear the largest plausible millisecond
/// timestamp by a wide margin so it never leaks into the priority term.
const PRIORITY_SCALE: f64 = 1.0e15;

fn score_for(priority: i64, queued_at: chrono::DateTime<Utc>) -> f64 {
    -(priority as f64) * PRIORITY_SCALE + queued_at.timestamp_millis() as f64
}

pub struct SignalQueue<S: SortedSetStore> {
    store: Arc<S>,
    config: QueueEnvConfig,
    account: String,
    processed_total: AtomicU64,
    succeeded_total: AtomicU64,
    last_published: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl<S: SortedSetStore> SignalQueue<S> {
    pub fn new(store: Arc<S>, config: QueueEnvConfig, account: impl Into<String>) -> Self {
        Self {
            store,
            config,
            account: account.into(),
            processed_total: AtomicU64::new(0),
            succeeded_total: AtomicU64::new(0),
            last_published: Mutex::new(HashMap::new()),
        }
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    fn pending_key(&self) -> String {
        format!("{}:{}", self.config.queue_key, self.account)
    }

    fn processing_key(&self) -> String {
        format!("{}:{}", self.config.processing_key, self.account)
    }

    fn failed_key(&self) -> String {
        format!("{}:{}", self.config.failed_key, self.account)
    }

    /// Stamp bookkeeping, compute priority, and insert into `pending`.
    /// Never blocks; returns `Ok(true)` on success.
    pub async fn publish(&self, mut signal: Signal, priority: Option<i64>) -> Result<bool, QueueError> {
        if signal.symbol.trim().is_empty() {
            return Err(QueueError::MissingField { field: "symbol" });
        }
        signal.account = self.account.clone();
        if signal.queued_at.is_none() {
            signal.queued_at = Some(Utc::now());
        }
        let priority = priority.unwrap_or_else(|| signal.default_priority());
        signal.queue_priority = Some(priority);
        signal.original_json = None;

        let json = serde_json::to_string(&signal).map_err(|e| QueueError::Serialization { reason: e.to_string() })?;
        let score = score_for(priority, signal.queued_at.unwrap());
        self.store.zadd(&self.pending_key(), &json, score).await?;
        info!(symbol = %signal.symbol, priority, "signal published to queue");
        Ok(true)
    }

    /// Dedup a producer that may re-fire for the same `(symbol, signal_type)`
    /// faster than it should (spec.md §11 "Failure-queue salvage" sibling
    /// note on the soft-exit engine): skip if one was published within
    /// `cooldown`, else publish and stamp the cooldown window. Used by the
    /// soft-exit engine so Chandelier/Donchian triggers and SG's own exit
    /// scoring don't both flood the queue for the same symbol.
    pub async fn publish_deduped(&self, signal: Signal, cooldown: Duration) -> Result<bool, QueueError> {
        let dedup_key = format!("{}:{}", signal.symbol, signal.signal_type);
        let now = Utc::now();
        {
            let mut last = self.last_published.lock().expect("dedup mutex poisoned");
            if let Some(last_at) = last.get(&dedup_key)
                && now.signed_duration_since(*last_at) < chrono::Duration::from_std(cooldown).unwrap_or_default()
            {
                return Ok(false);
            }
            last.insert(dedup_key, now);
        }
        self.publish(signal, None).await
    }

    /// Pop the highest-priority ready signal, skipping entries whose
    /// `retry_after` is still in the future. If `pending` yields nothing
    /// ready and `auto_recover` is set, sweep zombies once and retry.
    pub async fn consume(&self, auto_recover: bool) -> Result<Option<Signal>, QueueError> {
        if let Some(signal) = self.try_consume_once().await? {
            return Ok(Some(signal));
        }
        if auto_recover {
            let recovered = self.recover_zombie_signals(Duration::ZERO).await?;
            if recovered > 0 {
                return self.try_consume_once().await;
            }
        }
        Ok(None)
    }

    async fn try_consume_once(&self) -> Result<Option<Signal>, QueueError> {
        let now = Utc::now();
        let entries = self.store.zrange_with_scores(&self.pending_key()).await?;
        for (json, _score) in entries {
            let mut signal: Signal =
                serde_json::from_str(&json).map_err(|e| QueueError::Serialization { reason: e.to_string() })?;
            if signal.retry_after.is_some_and(|t| t > now) {
                continue;
            }
            if !self.store.zrem(&self.pending_key(), &json).await? {
                // another worker claimed it between zrange and zrem; move on
                continue;
            }
            signal.original_json = Some(json);
            let processing_json = serde_json::to_string(&signal)
                .map_err(|e| QueueError::Serialization { reason: e.to_string() })?;
            self.store
                .zadd(&self.processing_key(), &processing_json, now.timestamp_millis() as f64)
                .await?;
            self.processed_total.fetch_add(1, Ordering::Relaxed);
            return Ok(Some(signal));
        }
        Ok(None)
    }

    /// Remove `signal` from `processing` by its exact stored JSON.
    pub async fn ack(&self, signal: &Signal) -> Result<(), QueueError> {
        let original = signal.original_json.as_ref().ok_or(QueueError::NotInProcessing { symbol: signal.symbol.clone() })?;
        if !self.store.zrem(&self.processing_key(), original).await? {
            return Err(QueueError::NotInProcessing { symbol: signal.symbol.clone() });
        }
        self.succeeded_total.fetch_add(1, Ordering::Relaxed);
        info!(symbol = %signal.symbol, "signal acknowledged");
        Ok(())
    }

    /// Remove `signal` from `processing`; reinsert into `pending` with
    /// decreased priority and a backoff delay if retries remain, else move
    /// to `failed`.
    pub async fn nack(&self, mut signal: Signal, error: impl Into<String>, retry: bool) -> Result<(), QueueError> {
        let original = signal.original_json.clone().ok_or(QueueError::NotInProcessing { symbol: signal.symbol.clone() })?;
        if !self.store.zrem(&self.processing_key(), &original).await? {
            return Err(QueueError::NotInProcessing { symbol: signal.symbol.clone() });
        }
        let error = error.into();
        signal.original_json = None;

        if retry && signal.retry_count < self.config.max_retries {
            signal.retry_count += 1;
            signal.last_error = Some(error.clone());
            signal.retry_after = Some(Utc::now() + self.config.backoff(signal.retry_count));
            let decreased_priority = signal.queue_priority.unwrap_or(0) - signal.retry_count as i64;
            signal.queue_priority = Some(decreased_priority);

            let json = serde_json::to_string(&signal).map_err(|e| QueueError::Serialization { reason: e.to_string() })?;
            let score = score_for(decreased_priority, signal.queued_at.unwrap_or_else(Utc::now));
            self.store.zadd(&self.pending_key(), &json, score).await?;
            warn!(symbol = %signal.symbol, retry_count = signal.retry_count, %error, "signal nacked, retry scheduled");
        } else {
            signal.last_error = Some(error.clone());
            let json = serde_json::to_string(&signal).map_err(|e| QueueError::Serialization { reason: e.to_string() })?;
            self.store.zadd(&self.failed_key(), &json, Utc::now().timestamp_millis() as f64).await?;
            warn!(symbol = %signal.symbol, %error, "signal moved to failed partition");
        }
        Ok(())
    }

    /// Reinsert `signal` into `pending` at an explicit `retry_after`,
    /// without touching `retry_count` or priority — used by OE's market-hours
    /// gate (spec.md §4.3 step 2), which schedules against the next session
    /// open rather than the exponential backoff curve.
    pub async fn nack_scheduled(&self, mut signal: Signal, error: impl Into<String>, retry_after: DateTime<Utc>) -> Result<(), QueueError> {
        let original = signal.original_json.clone().ok_or(QueueError::NotInProcessing { symbol: signal.symbol.clone() })?;
        if !self.store.zrem(&self.processing_key(), &original).await? {
            return Err(QueueError::NotInProcessing { symbol: signal.symbol.clone() });
        }
        signal.original_json = None;
        signal.last_error = Some(error.into());
        signal.retry_after = Some(retry_after);
        let priority = signal.queue_priority.unwrap_or_else(|| signal.default_priority());
        let json = serde_json::to_string(&signal).map_err(|e| QueueError::Serialization { reason: e.to_string() })?;
        let score = score_for(priority, signal.queued_at.unwrap_or_else(Utc::now));
        self.store.zadd(&self.pending_key(), &json, score).await?;
        warn!(symbol = %signal.symbol, retry_after = %retry_after, "signal rescheduled");
        Ok(())
    }

    /// Pending signals whose `retry_after` is still in the future.
    pub async fn get_delayed_signals(&self) -> Result<Vec<Signal>, QueueError> {
        let now = Utc::now();
        let entries = self.store.zrange_with_scores(&self.pending_key()).await?;
        let mut delayed = Vec::new();
        for (json, _) in entries {
            let signal: Signal =
                serde_json::from_str(&json).map_err(|e| QueueError::Serialization { reason: e.to_string() })?;
            if signal.retry_after.is_some_and(|t| t > now) {
                delayed.push(signal);
            }
        }
        Ok(delayed)
    }

    /// Move every signal from `processing` older than `timeout` back to
    /// `pending` (with `retry_count` unchanged and ready immediately), or to
    /// `failed` if it has already exhausted its retries. `timeout` of zero
    /// means "all" — used at OE startup to reclaim a crashed worker's signals.
    pub async fn recover_zombie_signals(&self, timeout: Duration) -> Result<usize, QueueError> {
        let now = Utc::now();
        let cutoff_millis = now.timestamp_millis() as f64 - timeout.as_millis() as f64;
        let entries = self.store.zrange_with_scores(&self.processing_key()).await?;

        let mut recovered = 0usize;
        for (json, take_time) in entries {
            if timeout != Duration::ZERO && take_time > cutoff_millis {
                continue; // not stale enough yet
            }
            if !self.store.zrem(&self.processing_key(), &json).await? {
                continue;
            }
            let mut signal: Signal =
                serde_json::from_str(&json).map_err(|e| QueueError::Serialization { reason: e.to_string() })?;
            signal.original_json = None;

            if signal.retry_count >= self.config.max_retries {
                signal.last_error = Some("zombie recovery: retries exhausted".into());
                let failed_json = serde_json::to_string(&signal).map_err(|e| QueueError::Serialization { reason: e.to_string() })?;
                self.store.zadd(&self.failed_key(), &failed_json, now.timestamp_millis() as f64).await?;
            } else {
                signal.retry_after = None;
                let pending_json = serde_json::to_string(&signal).map_err(|e| QueueError::Serialization { reason: e.to_string() })?;
                let score = score_for(signal.queue_priority.unwrap_or(0), signal.queued_at.unwrap_or(now));
                self.store.zadd(&self.pending_key(), &pending_json, score).await?;
            }
            recovered += 1;
        }
        if recovered > 0 {
            warn!(account = %self.account, recovered, "recovered zombie signals from processing");
        }
        Ok(recovered)
    }

    pub async fn stats(&self) -> Result<QueueStats, QueueError> {
        Ok(QueueStats {
            pending: self.store.zcard(&self.pending_key()).await?,
            processing: self.store.zcard(&self.processing_key()).await?,
            failed: self.store.zcard(&self.failed_key()).await?,
            processed_total: self.processed_total.load(Ordering::Relaxed),
            succeeded_total: self.succeeded_total.load(Ordering::Relaxed),
        })
    }

    pub async fn clear(&self, partition: Partition) -> Result<(), QueueError> {
        let key = match partition {
            Partition::Pending => self.pending_key(),
            Partition::Processing => self.processing_key(),
            Partition::Failed => self.failed_key(),
        };
        self.store.clear(&key).await
    }

    /// Sweep `failed` for signals `keep` still wants resurrected, and
    /// republish them to `pending` (spec.md §4.4 "Failure-queue salvage").
    /// A signal older than `max_age` is never resurrected even if `keep`
    /// would otherwise accept it, to avoid acting on stale `reasons`.
    pub async fn salvage_failed(&self, max_age: Duration, keep: impl Fn(&Signal) -> bool) -> Result<usize, QueueError> {
        let now = Utc::now();
        let max_age_millis = max_age.as_millis() as i64;
        let entries = self.store.zrange_with_scores(&self.failed_key()).await?;
        let mut salvaged = 0usize;
        for (json, _score) in entries {
            let mut signal: Signal =
                serde_json::from_str(&json).map_err(|e| QueueError::Serialization { reason: e.to_string() })?;
            let age_ok = signal.queued_at.is_some_and(|t| (now - t).num_milliseconds() <= max_age_millis);
            if !age_ok || !keep(&signal) {
                continue;
            }
            if !self.store.zrem(&self.failed_key(), &json).await? {
                continue;
            }
            signal.original_json = None;
            signal.retry_after = None;
            let priority = signal.default_priority();
            signal.queue_priority = Some(priority);
            let pending_json = serde_json::to_string(&signal).map_err(|e| QueueError::Serialization { reason: e.to_string() })?;
            let score = score_for(priority, signal.queued_at.unwrap_or(now));
            self.store.zadd(&self.pending_key(), &pending_json, score).await?;
            salvaged += 1;
        }
        if salvaged > 0 {
            info!(account = %self.account, salvaged, "salvaged signals from failed partition");
        }
        Ok(salvaged)
    }
}

#[cfg(test)]
mod tests {
    use super::store::InMemorySortedSetStore;
    use super::*;
    use crate::domain::types::{Signal, SignalSide, SignalType};

    fn test_config() -> QueueEnvConfig {
        QueueEnvConfig {
            redis_url: String::new(),
            queue_key: "trading:signals".into(),
            processing_key: "trading:signals:processing".into(),
            failed_key: "trading:signals:failed".into(),
            max_retries: 3,
            backoff_base_secs: 30,
            backoff_cap_secs: 3600,
            zombie_timeout: Duration::from_secs(300),
        }
    }

    fn queue() -> SignalQueue<InMemorySortedSetStore> {
        SignalQueue::new(Arc::new(InMemorySortedSetStore::new()), test_config(), "acct-1")
    }

    fn buy(symbol: &str, score: i32) -> Signal {
        Signal::new(
            symbol,
            SignalSide::Buy,
            SignalType::Buy,
            score,
            rust_decimal_macros::dec!(10.0),
            "test_strategy",
            "acct-1",
        )
    }

    #[tokio::test]
    async fn priority_monotonicity_higher_score_consumed_first() {
        let q = queue();
        q.publish(buy("A.US", 40), None).await.unwrap();
        q.publish(buy("B.US", 90), None).await.unwrap();
        let first = q.consume(true).await.unwrap().unwrap();
        assert_eq!(first.symbol, "B.US");
        let second = q.consume(true).await.unwrap().unwrap();
        assert_eq!(second.symbol, "A.US");
    }

    #[tokio::test]
    async fn exit_class_outranks_buy_regardless_of_score() {
        let q = queue();
        q.publish(buy("HOT.US", 99), None).await.unwrap();
        let stop = Signal::new(
            "COLD.US",
            SignalSide::Sell,
            SignalType::StopLoss,
            0,
            rust_decimal_macros::dec!(5.0),
            "stop_engine",
            "acct-1",
        );
        q.publish(stop, None).await.unwrap();

        let first = q.consume(true).await.unwrap().unwrap();
        assert_eq!(first.symbol, "COLD.US");
        assert_eq!(first.signal_type, SignalType::StopLoss);
    }

    #[tokio::test]
    async fn ack_removes_from_processing_and_counts_success() {
        let q = queue();
        q.publish(buy("A.US", 50), None).await.unwrap();
        let claimed = q.consume(true).await.unwrap().unwrap();
        assert!(claimed.original_json.is_some());
        q.ack(&claimed).await.unwrap();
        let stats = q.stats().await.unwrap();
        assert_eq!(stats.processing, 0);
        assert_eq!(stats.succeeded_total, 1);
    }

    #[tokio::test]
    async fn nack_with_retry_reinserts_with_decreased_priority_and_delay() {
        let q = queue();
        q.publish(buy("A.US", 50), None).await.unwrap();
        let claimed = q.consume(true).await.unwrap().unwrap();
        let original_priority = claimed.queue_priority.unwrap();
        q.nack(claimed, "transient gateway error", true).await.unwrap();

        let delayed = q.get_delayed_signals().await.unwrap();
        assert_eq!(delayed.len(), 1);
        assert_eq!(delayed[0].retry_count, 1);
        assert!(delayed[0].queue_priority.unwrap() < original_priority);
        assert!(delayed[0].retry_after.unwrap() > Utc::now());
    }

    #[tokio::test]
    async fn nack_without_retry_or_exhausted_retries_moves_to_failed() {
        let q = queue();
        q.publish(buy("A.US", 50), None).await.unwrap();
        let claimed = q.consume(true).await.unwrap().unwrap();
        q.nack(claimed, "already held", false).await.unwrap();

        let stats = q.stats().await.unwrap();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.pending, 0);
    }

    #[tokio::test]
    async fn delayed_signal_is_not_returned_by_consume() {
        let q = queue();
        q.publish(buy("A.US", 50), None).await.unwrap();
        let claimed = q.consume(true).await.unwrap().unwrap();
        q.nack(claimed, "rate limited", true).await.unwrap();

        // retry_after is in the future; consume must skip it.
        assert!(q.consume(false).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn zombie_recovery_moves_stale_processing_back_to_pending_unchanged_retry_count() {
        let q = queue();
        q.publish(buy("A.US", 50), None).await.unwrap();
        let claimed = q.consume(true).await.unwrap().unwrap();
        assert_eq!(claimed.retry_count, 0);
        // simulate a crashed worker: the signal stays in `processing` forever.

        let recovered = q.recover_zombie_signals(Duration::ZERO).await.unwrap();
        assert_eq!(recovered, 1);

        let stats = q.stats().await.unwrap();
        assert_eq!(stats.processing, 0);
        assert_eq!(stats.pending, 1);

        let requeued = q.consume(false).await.unwrap().unwrap();
        assert_eq!(requeued.retry_count, 0);
        assert!(requeued.retry_after.is_none());
    }

    #[tokio::test]
    async fn no_orphan_processing_after_ack_or_nack() {
        let q = queue();
        for i in 0..5 {
            q.publish(buy(&format!("S{i}.US"), 50 + i), None).await.unwrap();
        }
        let mut claimed = Vec::new();
        while let Some(s) = q.consume(false).await.unwrap() {
            claimed.push(s);
        }
        for (i, s) in claimed.into_iter().enumerate() {
            if i % 2 == 0 {
                q.ack(&s).await.unwrap();
            } else {
                q.nack(s, "boom", false).await.unwrap();
            }
        }
        let stats = q.stats().await.unwrap();
        assert_eq!(stats.processing, 0);
    }

    #[tokio::test]
    async fn salvage_republishes_qualifying_failed_signals_within_max_age() {
        let q = queue();
        q.publish(buy("OLD.US", 80), None).await.unwrap();
        let stuck = q.consume(false).await.unwrap().unwrap();
        q.nack(stuck, "gateway down", false).await.unwrap();
        assert_eq!(q.stats().await.unwrap().failed, 1);

        let salvaged = q.salvage_failed(Duration::from_secs(3600), |s| s.score >= 60).await.unwrap();
        assert_eq!(salvaged, 1);
        assert_eq!(q.stats().await.unwrap().failed, 0);
        assert_eq!(q.stats().await.unwrap().pending, 1);
    }

    #[tokio::test]
    async fn publish_deduped_suppresses_a_repeat_within_the_cooldown_window() {
        let q = queue();
        let stop = Signal::new("A.US", SignalSide::Sell, SignalType::StopLoss, 90, rust_decimal_macros::dec!(10), "soft_exit", "acct-1");
        assert!(q.publish_deduped(stop.clone(), Duration::from_secs(900)).await.unwrap());
        assert!(!q.publish_deduped(stop, Duration::from_secs(900)).await.unwrap());
        assert_eq!(q.stats().await.unwrap().pending, 1);
    }

    #[tokio::test]
    async fn salvage_skips_signals_below_the_score_gate() {
        let q = queue();
        q.publish(buy("WEAK.US", 20), None).await.unwrap();
        let stuck = q.consume(false).await.unwrap().unwrap();
        q.nack(stuck, "gateway down", false).await.unwrap();

        let salvaged = q.salvage_failed(Duration::from_secs(3600), |s| s.score >= 60).await.unwrap();
        assert_eq!(salvaged, 0);
        assert_eq!(q.stats().await.unwrap().failed, 1);
    }
}
