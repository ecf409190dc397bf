//! Core data model: signals, positions, account snapshots, and regime.
//!
//! Grounded on the original system's `models/signal_history.py` (signal shape)
//! and `persistence/position_manager.py` (position/detail shape), re-expressed
//! as typed Rust values per spec.md §3.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalSide {
    Buy,
    Sell,
}

impl fmt::Display for SignalSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalSide::Buy => write!(f, "BUY"),
            SignalSide::Sell => write!(f, "SELL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalType {
    Buy,
    StrongBuy,
    WeakBuy,
    Sell,
    StopLoss,
    TakeProfit,
    PartialExit,
    GradualExit,
    UrgentSell,
    AddPosition,
    RotationSell,
    RotationBuy,
}

impl fmt::Display for SignalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SignalType::Buy => "BUY",
            SignalType::StrongBuy => "STRONG_BUY",
            SignalType::WeakBuy => "WEAK_BUY",
            SignalType::Sell => "SELL",
            SignalType::StopLoss => "STOP_LOSS",
            SignalType::TakeProfit => "TAKE_PROFIT",
            SignalType::PartialExit => "PARTIAL_EXIT",
            SignalType::GradualExit => "GRADUAL_EXIT",
            SignalType::UrgentSell => "URGENT_SELL",
            SignalType::AddPosition => "ADD_POSITION",
            SignalType::RotationSell => "ROTATION_SELL",
            SignalType::RotationBuy => "ROTATION_BUY",
        };
        write!(f, "{s}")
    }
}

impl SignalType {
    /// Exit-class signals are boosted above all BUY-class signals in SQ priority ordering.
    pub fn is_exit_class(self) -> bool {
        matches!(
            self,
            SignalType::StopLoss
                | SignalType::TakeProfit
                | SignalType::PartialExit
                | SignalType::GradualExit
                | SignalType::UrgentSell
                | SignalType::RotationSell
        )
    }

    /// The severity used in `exit_priority = 10_000 - severity` (§4.1 Priority semantics).
    /// Lower severity places a signal further above the pack.
    pub fn exit_severity(self) -> i64 {
        match self {
            SignalType::StopLoss | SignalType::UrgentSell => 0,
            SignalType::TakeProfit => 5,
            SignalType::RotationSell => 10,
            SignalType::PartialExit => 20,
            SignalType::GradualExit => 30,
            _ => 50,
        }
    }
}

/// A structured record passed end-to-end through the signal queue.
///
/// Bookkeeping fields (`queued_at`, `queue_priority`, `retry_count`,
/// `retry_after`, `last_error`, `original_json`) are stamped by the queue, not
/// by producers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub symbol: String,
    pub side: SignalSide,
    pub signal_type: SignalType,
    /// 0-100, higher = stronger.
    pub score: i32,
    pub price: Decimal,
    pub quantity: Option<Decimal>,
    pub reasons: Vec<String>,
    pub strategy: String,

    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    pub budget_pct: Option<Decimal>,
    pub budget_notional: Option<Decimal>,

    pub account: String,

    #[serde(default)]
    pub queued_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub queue_priority: Option<i64>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub retry_after: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_error: Option<String>,

    /// Opaque exact serialization used as the primary key for `ack`/`nack`
    /// deletion. Never compared for equality in `round-trip` property tests.
    #[serde(skip)]
    pub original_json: Option<String>,
}

impl Signal {
    pub fn new(
        symbol: impl Into<String>,
        side: SignalSide,
        signal_type: SignalType,
        score: i32,
        price: Decimal,
        strategy: impl Into<String>,
        account: impl Into<String>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            signal_type,
            score,
            price,
            quantity: None,
            reasons: Vec::new(),
            strategy: strategy.into(),
            stop_loss: None,
            take_profit: None,
            budget_pct: None,
            budget_notional: None,
            account: account.into(),
            queued_at: None,
            queue_priority: None,
            retry_count: 0,
            retry_after: None,
            last_error: None,
            original_json: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reasons.push(reason.into());
        self
    }

    /// Priority as specified in §4.1: exits are boosted above all BUY
    /// entries via `10_000 - severity`; everything else uses `score`.
    pub fn default_priority(&self) -> i64 {
        if self.signal_type.is_exit_class() {
            10_000 - self.signal_type.exit_severity()
        } else {
            self.score as i64
        }
    }

    /// Equality ignoring bookkeeping/`original_json`, for the round-trip
    /// JSON property test (§8 property 7).
    pub fn content_eq(&self, other: &Signal) -> bool {
        self.symbol == other.symbol
            && self.side == other.side
            && self.signal_type == other.signal_type
            && self.score == other.score
            && self.price == other.price
            && self.quantity == other.quantity
            && self.reasons == other.reasons
            && self.strategy == other.strategy
            && self.stop_loss == other.stop_loss
            && self.take_profit == other.take_profit
            && self.budget_pct == other.budget_pct
            && self.budget_notional == other.budget_notional
            && self.account == other.account
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Position {
    pub symbol: String,
    pub quantity: Decimal,
    pub available_quantity: Decimal,
    pub cost_price: Decimal,
    pub currency: String,
    pub entry_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopStatus {
    Active,
    Closed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PositionStop {
    pub symbol: String,
    pub entry_price: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    pub atr: Option<Decimal>,
    pub status: StopStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PositionStop {
    /// Default stop/target per §4.3.1 post-fill: entry*(1-5%) / entry*(1+10%),
    /// or ATR-based `entry ± k*ATR` when `atr` is supplied.
    pub fn from_fill(symbol: impl Into<String>, entry_price: Decimal, atr: Option<Decimal>, k: Decimal) -> Self {
        use rust_decimal_macros::dec;
        let now = Utc::now();
        let (stop_loss, take_profit) = match atr {
            Some(atr) if atr > Decimal::ZERO => (entry_price - k * atr, entry_price + k * atr * dec!(2)),
            _ => (entry_price * dec!(0.95), entry_price * dec!(1.10)),
        };
        Self {
            symbol: symbol.into(),
            entry_price,
            stop_loss,
            take_profit,
            atr,
            status: StopStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn close(&mut self) {
        self.status = StopStatus::Closed;
        self.updated_at = Utc::now();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRecord {
    pub order_id: String,
    pub symbol: String,
    pub side: SignalSide,
    pub quantity: Decimal,
    pub price: Decimal,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A point-in-time account snapshot, fetched on demand and never cached
/// beyond a single decision (§3 invariant re: stale caches).
#[derive(Debug, Clone, Default)]
pub struct AccountSnapshot {
    pub cash_by_currency: std::collections::HashMap<String, Decimal>,
    pub buy_power_by_currency: std::collections::HashMap<String, Decimal>,
    pub remaining_finance_by_currency: std::collections::HashMap<String, Decimal>,
    pub net_assets_by_currency: std::collections::HashMap<String, Decimal>,
    pub positions: Vec<Position>,
}

impl AccountSnapshot {
    /// Usable funds per §4.3 step 8: if cash is negative (margin debt), use
    /// `remaining_finance` (not `buy_power`, which may also be negative);
    /// otherwise use `available_cash`.
    pub fn usable_funds(&self, currency: &str) -> Decimal {
        let cash = self
            .cash_by_currency
            .get(currency)
            .copied()
            .unwrap_or(Decimal::ZERO);
        if cash < Decimal::ZERO {
            self.remaining_finance_by_currency
                .get(currency)
                .copied()
                .unwrap_or(Decimal::ZERO)
        } else {
            cash
        }
    }

    pub fn net_assets(&self, currency: &str) -> Decimal {
        self.net_assets_by_currency
            .get(currency)
            .copied()
            .unwrap_or(Decimal::ZERO)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegimeKind {
    Bull,
    Bear,
    Range,
}

impl fmt::Display for RegimeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegimeKind::Bull => write!(f, "BULL"),
            RegimeKind::Bear => write!(f, "BEAR"),
            RegimeKind::Range => write!(f, "RANGE"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Regime {
    pub regime: RegimeKind,
    pub details: String,
    pub active_market: crate::domain::market::Market,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn exit_signals_outrank_any_buy() {
        let stop_loss = Signal::new("AAPL.US", SignalSide::Sell, SignalType::StopLoss, 100, dec!(10), "s", "acct1");
        let strong_buy = Signal::new("MSFT.US", SignalSide::Buy, SignalType::StrongBuy, 100, dec!(10), "s", "acct1");
        assert!(stop_loss.default_priority() > strong_buy.default_priority());
    }

    #[test]
    fn buy_priority_equals_score() {
        let sig = Signal::new("AAPL.US", SignalSide::Buy, SignalType::Buy, 73, dec!(10), "s", "acct1");
        assert_eq!(sig.default_priority(), 73);
    }

    #[test]
    fn round_trip_json_ignores_original_json() {
        let sig = Signal::new("AAPL.US", SignalSide::Buy, SignalType::Buy, 80, dec!(190.5), "momentum", "acct1")
            .with_reason("RSI oversold recovery");
        let json = serde_json::to_string(&sig).unwrap();
        let back: Signal = serde_json::from_str(&json).unwrap();
        assert!(sig.content_eq(&back));
    }

    #[test]
    fn position_stop_from_fill_defaults() {
        let stop = PositionStop::from_fill("AAPL.US", dec!(100), None, dec!(2));
        assert_eq!(stop.stop_loss, dec!(95.00));
        assert_eq!(stop.take_profit, dec!(110.00));
        assert_eq!(stop.status, StopStatus::Active);
    }

    #[test]
    fn usable_funds_prefers_remaining_finance_when_cash_negative() {
        let mut snap = AccountSnapshot::default();
        snap.cash_by_currency.insert("HKD".into(), dec!(-38770));
        snap.buy_power_by_currency.insert("HKD".into(), dec!(-38770));
        snap.remaining_finance_by_currency.insert("HKD".into(), dec!(320460));
        assert_eq!(snap.usable_funds("HKD"), dec!(320460));
    }
}
