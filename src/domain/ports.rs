//! Abstract collaborators the core consumes but does not implement: the
//! trading gateway, quote gateway, and notifier (spec.md §6).

use crate::domain::errors::GatewayError;
use crate::domain::types::{AccountSnapshot, OrderRecord, SignalSide};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

#[derive(Debug, Clone)]
pub struct OrderSpec {
    pub symbol: String,
    pub side: SignalSide,
    pub quantity: Decimal,
    pub price: Decimal,
    pub time_in_force: TimeInForce,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeInForce {
    Day,
    GoodTillCancelled,
}

/// The only component permitted to call the trading gateway is the order
/// executor (§4.3). Error classes per spec.md §6 are carried by `GatewayError`.
#[async_trait]
pub trait TradingGateway: Send + Sync {
    async fn account_balance(&self) -> Result<AccountSnapshot, GatewayError>;
    async fn stock_positions(&self) -> Result<Vec<crate::domain::types::Position>, GatewayError>;
    async fn today_orders(&self, symbol: &str) -> Result<Vec<OrderRecord>, GatewayError>;
    async fn submit_order(&self, spec: OrderSpec) -> Result<String, GatewayError>;
    async fn replace_order(&self, order_id: &str, quantity: Decimal, price: Decimal) -> Result<(), GatewayError>;
    async fn cancel_order(&self, order_id: &str) -> Result<(), GatewayError>;
    async fn cancel_orders_batch(&self, order_ids: &[String]) -> Result<(), GatewayError>;
}

#[derive(Debug, Clone)]
pub struct Candle {
    pub symbol: String,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub trade_date: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdjustType {
    NoAdjust,
    Forward,
}

#[derive(Debug, Clone, Copy)]
pub struct StaticInfo {
    pub board_lot: Option<Decimal>,
}

#[async_trait]
pub trait QuoteGateway: Send + Sync {
    async fn get_realtime_quote(&self, symbols: &[String]) -> Result<std::collections::HashMap<String, Decimal>, GatewayError>;
    async fn get_history_candles(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        adjust: AdjustType,
    ) -> Result<Vec<Candle>, GatewayError>;
    async fn get_candlesticks(&self, symbol: &str, count: usize, adjust: AdjustType) -> Result<Vec<Candle>, GatewayError>;
    async fn get_static_info(&self, symbols: &[String]) -> Result<std::collections::HashMap<String, StaticInfo>, GatewayError>;
}

/// Local long-tail candle history, backing the hybrid merge in SG's
/// indicator computation (spec.md §4.4: "long tail from the local store...
/// joined with the latest K days from the gateway").
#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn recent_candles(&self, symbol: &str, since_days: u32) -> anyhow::Result<Vec<Candle>>;
}

/// Transparent failover from primary to secondary channel on rate-limit or
/// transient failure (spec.md §6 Notifier).
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, message: &str) -> anyhow::Result<()>;
}

pub struct FailoverNotifier {
    primary: Box<dyn Notifier>,
    secondary: Option<Box<dyn Notifier>>,
}

impl FailoverNotifier {
    pub fn new(primary: Box<dyn Notifier>, secondary: Option<Box<dyn Notifier>>) -> Self {
        Self { primary, secondary }
    }
}

#[async_trait]
impl Notifier for FailoverNotifier {
    async fn send(&self, message: &str) -> anyhow::Result<()> {
        match self.primary.send(message).await {
            Ok(()) => Ok(()),
            Err(primary_err) => {
                if let Some(secondary) = &self.secondary {
                    tracing::warn!(error = %primary_err, "primary notifier failed, failing over to secondary");
                    secondary.send(message).await
                } else {
                    Err(primary_err)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingNotifier {
        calls: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl Notifier for CountingNotifier {
        async fn send(&self, _message: &str) -> anyhow::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("primary down");
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn failover_notifier_uses_secondary_on_primary_failure() {
        let primary_calls = Arc::new(AtomicUsize::new(0));
        let secondary_calls = Arc::new(AtomicUsize::new(0));

        let notifier = FailoverNotifier::new(
            Box::new(CountingNotifier { calls: primary_calls.clone(), fail: true }),
            Some(Box::new(CountingNotifier { calls: secondary_calls.clone(), fail: false })),
        );

        notifier.send("hello").await.unwrap();
        assert_eq!(primary_calls.load(Ordering::SeqCst), 1);
        assert_eq!(secondary_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failover_notifier_propagates_when_no_secondary() {
        let primary_calls = Arc::new(AtomicUsize::new(0));
        let notifier = FailoverNotifier::new(
            Box::new(CountingNotifier { calls: primary_calls, fail: true }),
            None,
        );
        assert!(notifier.send("hello").await.is_err());
    }
}
