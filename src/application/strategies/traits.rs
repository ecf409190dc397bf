//! The pluggable signal-producer interface (spec.md §9 "Dynamic dispatch /
//! strategy plugins" and Non-goals: "the core does not define strategies
//! themselves").
//!
//! Grounded on the teacher's `TradingStrategy` trait
//! (`application/strategies/traits.rs`), narrowed to the minimal shape the
//! spec calls for: `{on_start, on_quote, analyze(symbol) -> Signal?}`.

use crate::application::signal_generator::indicators::IndicatorSnapshot;
use crate::domain::types::Regime;
use rust_decimal::Decimal;

/// Everything a strategy needs to score a symbol it does not currently hold.
#[derive(Debug, Clone)]
pub struct AnalysisContext {
    pub symbol: String,
    pub price: Decimal,
    pub indicators: IndicatorSnapshot,
    pub regime: Regime,
}

/// A `{score, reasons[], type}` verdict, before it becomes a queued `Signal`.
#[derive(Debug, Clone)]
pub struct ScoredSignal {
    pub score: i32,
    pub reasons: Vec<String>,
}

/// Minimal pluggable strategy interface (spec.md §9). Implementors are
/// stateless scorers; `on_start`/`on_quote` are lifecycle hooks a strategy
/// may use to warm up or track streaming state — most, like the built-in
/// rubric, need neither.
pub trait Strategy: Send + Sync {
    /// Stable identifier used as the registry key and `Signal::strategy` value.
    fn name(&self) -> &str;

    /// Called once when the signal generator starts a watchlist cycle.
    fn on_start(&self) {}

    /// Called on each streamed real-time quote, for strategies that keep
    /// incremental state. The built-in rubric recomputes from scratch on
    /// `analyze` instead and ignores this hook.
    fn on_quote(&self, _symbol: &str, _price: Decimal) {}

    /// Score `ctx.symbol` as a prospective entry. `None` means "no opinion";
    /// callers apply the per-strategy threshold before publishing a signal.
    fn analyze(&self, ctx: &AnalysisContext) -> Option<ScoredSignal>;

    /// Minimum score this strategy requires before its verdict becomes a
    /// queued signal (spec.md §4.4 "Only symbols crossing a per-strategy
    /// threshold produce a signal").
    fn threshold(&self) -> i32 {
        60
    }
}
