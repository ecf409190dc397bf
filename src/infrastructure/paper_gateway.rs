//! Paper-trading gateway (spec.md §11: broker wire protocol is a named
//! Non-goal, so entrypoints wire this in place of a real broker SDK client).
//! Grounded on the teacher's `infrastructure::mock` module: in-memory,
//! `RwLock`-guarded state, orders fill immediately at the quoted price, and
//! a deterministic random-walk stands in for live market data.
//!
//! Not meant for production execution — only for running the pipeline
//! end-to-end without a brokerage account.

use crate::domain::errors::GatewayError;
use crate::domain::ports::{AdjustType, Candle, QuoteGateway, StaticInfo, TradingGateway};
use crate::domain::types::{AccountSnapshot, OrderRecord, OrderSpec, OrderStatus, Position, SignalSide};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::info;

const DEFAULT_CURRENCY: &str = "USD";

pub struct PaperGateway {
    cash: RwLock<Decimal>,
    positions: RwLock<HashMap<String, Position>>,
    orders: RwLock<Vec<OrderRecord>>,
    prices: RwLock<HashMap<String, Decimal>>,
    next_order_id: AtomicU64,
}

impl PaperGateway {
    pub fn new(starting_cash: Decimal) -> Self {
        Self {
            cash: RwLock::new(starting_cash),
            positions: RwLock::new(HashMap::new()),
            orders: RwLock::new(Vec::new()),
            prices: RwLock::new(HashMap::new()),
            next_order_id: AtomicU64::new(1),
        }
    }

    fn next_id(&self) -> String {
        let n = self.next_order_id.fetch_add(1, Ordering::Relaxed);
        format!("paper-{n}")
    }

    /// Deterministic-looking base price so an unseen symbol always quotes
    /// the same way within a process lifetime; reseeded per symbol via a
    /// cheap hash rather than a real market feed.
    fn base_price(symbol: &str) -> f64 {
        let hash: u64 = symbol.bytes().fold(7u64, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u64));
        50.0 + (hash % 200) as f64
    }

    async fn price_for(&self, symbol: &str) -> Decimal {
        if let Some(price) = self.prices.read().await.get(symbol).copied() {
            return price;
        }
        let price = Decimal::from_f64(Self::base_price(symbol)).unwrap_or(Decimal::from(100));
        self.prices.write().await.insert(symbol.to_string(), price);
        price
    }
}

#[async_trait]
impl TradingGateway for PaperGateway {
    async fn account_balance(&self) -> Result<AccountSnapshot, GatewayError> {
        let cash = *self.cash.read().await;
        let positions: Vec<Position> = self.positions.read().await.values().cloned().collect();
        let mut snapshot = AccountSnapshot::default();
        snapshot.cash_by_currency.insert(DEFAULT_CURRENCY.to_string(), cash);
        snapshot.buy_power_by_currency.insert(DEFAULT_CURRENCY.to_string(), cash);
        snapshot.remaining_finance_by_currency.insert(DEFAULT_CURRENCY.to_string(), cash);
        snapshot.net_assets_by_currency.insert(DEFAULT_CURRENCY.to_string(), cash);
        snapshot.positions = positions;
        Ok(snapshot)
    }

    async fn stock_positions(&self) -> Result<Vec<Position>, GatewayError> {
        Ok(self.positions.read().await.values().cloned().collect())
    }

    async fn today_orders(&self, symbol: &str) -> Result<Vec<OrderRecord>, GatewayError> {
        let today = Utc::now().date_naive();
        Ok(self
            .orders
            .read()
            .await
            .iter()
            .filter(|o| o.symbol == symbol && o.created_at.date_naive() == today)
            .cloned()
            .collect())
    }

    async fn submit_order(&self, spec: OrderSpec) -> Result<String, GatewayError> {
        if spec.quantity <= Decimal::ZERO {
            return Err(GatewayError::InvalidQuantity { reason: "quantity must be positive".into() });
        }
        if spec.price <= Decimal::ZERO {
            return Err(GatewayError::InvalidPrice { reason: "price must be positive".into() });
        }

        let notional = spec.price * spec.quantity;
        {
            let mut cash = self.cash.write().await;
            match spec.side {
                SignalSide::Buy => {
                    if *cash < notional {
                        return Err(GatewayError::InsufficientFunds);
                    }
                    *cash -= notional;
                }
                SignalSide::Sell => *cash += notional,
            }
        }

        {
            let mut positions = self.positions.write().await;
            let entry = positions.entry(spec.symbol.clone()).or_insert_with(|| Position {
                symbol: spec.symbol.clone(),
                quantity: Decimal::ZERO,
                available_quantity: Decimal::ZERO,
                cost_price: spec.price,
                currency: DEFAULT_CURRENCY.to_string(),
                entry_time: Utc::now(),
            });
            match spec.side {
                SignalSide::Buy => {
                    let total_cost = entry.cost_price * entry.quantity + spec.price * spec.quantity;
                    let total_qty = entry.quantity + spec.quantity;
                    if total_qty > Decimal::ZERO {
                        entry.cost_price = total_cost / total_qty;
                    }
                    entry.quantity = total_qty;
                    entry.available_quantity = total_qty;
                }
                SignalSide::Sell => {
                    entry.quantity -= spec.quantity;
                    entry.available_quantity = entry.quantity;
                }
            }
            if entry.quantity <= Decimal::ZERO {
                positions.remove(&spec.symbol);
            }
        }

        let order_id = self.next_id();
        let now = Utc::now();
        self.orders.write().await.push(OrderRecord {
            order_id: order_id.clone(),
            symbol: spec.symbol.clone(),
            side: spec.side,
            quantity: spec.quantity,
            price: spec.price,
            status: OrderStatus::Filled,
            created_at: now,
            updated_at: now,
        });
        self.prices.write().await.insert(spec.symbol.clone(), spec.price);

        info!(order_id, symbol = %spec.symbol, side = %spec.side, quantity = %spec.quantity, price = %spec.price, "paper order filled");
        Ok(order_id)
    }

    async fn replace_order(&self, order_id: &str, quantity: Decimal, price: Decimal) -> Result<(), GatewayError> {
        let mut orders = self.orders.write().await;
        let order = orders
            .iter_mut()
            .find(|o| o.order_id == order_id)
            .ok_or_else(|| GatewayError::NotFound { symbol: order_id.to_string() })?;
        order.quantity = quantity;
        order.price = price;
        order.updated_at = Utc::now();
        Ok(())
    }

    async fn cancel_order(&self, order_id: &str) -> Result<(), GatewayError> {
        let mut orders = self.orders.write().await;
        let order = orders
            .iter_mut()
            .find(|o| o.order_id == order_id)
            .ok_or_else(|| GatewayError::NotFound { symbol: order_id.to_string() })?;
        order.status = OrderStatus::Cancelled;
        order.updated_at = Utc::now();
        Ok(())
    }

    async fn cancel_orders_batch(&self, order_ids: &[String]) -> Result<(), GatewayError> {
        for id in order_ids {
            self.cancel_order(id).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl QuoteGateway for PaperGateway {
    async fn get_realtime_quote(&self, symbols: &[String]) -> Result<HashMap<String, Decimal>, GatewayError> {
        let mut out = HashMap::with_capacity(symbols.len());
        for symbol in symbols {
            out.insert(symbol.clone(), self.price_for(symbol).await);
        }
        Ok(out)
    }

    async fn get_history_candles(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        _adjust: AdjustType,
    ) -> Result<Vec<Candle>, GatewayError> {
        let days = (end - start).num_days().max(1) as usize;
        Ok(synthetic_walk(symbol, days, end))
    }

    async fn get_candlesticks(&self, symbol: &str, count: usize, _adjust: AdjustType) -> Result<Vec<Candle>, GatewayError> {
        Ok(synthetic_walk(symbol, count.max(1), Utc::now()))
    }

    async fn get_static_info(&self, symbols: &[String]) -> Result<HashMap<String, StaticInfo>, GatewayError> {
        Ok(symbols.iter().map(|s| (s.clone(), StaticInfo { board_lot: Some(Decimal::ONE) })).collect())
    }
}

/// A plausible-looking daily OHLCV series ending at `end`, seeded off the
/// symbol so repeated calls for the same symbol stay roughly self-consistent.
fn synthetic_walk(symbol: &str, count: usize, end: DateTime<Utc>) -> Vec<Candle> {
    let mut rng = rand::rng();
    let mut price = PaperGateway::base_price(symbol);
    let mut candles = Vec::with_capacity(count);
    for i in 0..count {
        let change_pct: f64 = rng.random_range(-0.02..0.02);
        let open = price;
        price *= 1.0 + change_pct;
        let close = price;
        let high = open.max(close) * 1.005;
        let low = open.min(close) * 0.995;
        let volume = rng.random_range(500_000.0..2_000_000.0);
        candles.push(Candle {
            symbol: symbol.to_string(),
            open: Decimal::from_f64(open).unwrap_or_default(),
            high: Decimal::from_f64(high).unwrap_or_default(),
            low: Decimal::from_f64(low).unwrap_or_default(),
            close: Decimal::from_f64(close).unwrap_or_default(),
            volume: Decimal::from_f64(volume).unwrap_or_default(),
            trade_date: end - chrono::Duration::days((count - 1 - i) as i64),
        });
    }
    candles
}
