//! Signal Generator: scans the watchlist for entries, evaluates held
//! positions for exits, and runs the add-position/rotation/salvage
//! auxiliary loops (spec.md §4.4).

pub mod candles;
pub mod exit;
pub mod indicators;
pub mod soft_exit;

use crate::application::position_manager::PositionDetail;
use crate::application::position_manager::store::PositionStore;
use crate::application::position_manager::PositionManager;
use crate::application::risk_regime::RegimeClassifier;
use crate::application::risk_regime::cooldown::CooldownTracker;
use crate::application::signal_queue::SignalQueue;
use crate::application::signal_queue::store::SortedSetStore;
use crate::application::strategies::{AnalysisContext, StrategyRegistry};
use crate::config::{RegimeEnvConfig, SignalGeneratorEnvConfig};
use crate::domain::errors::GatewayError;
use crate::domain::ports::{HistoryStore, QuoteGateway};
use crate::domain::types::{PositionStop, Regime, RegimeKind, Signal, SignalSide, SignalType};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tracing::{debug, info, warn};

pub struct SignalGenerator<Q, H, S, P>
where
    Q: QuoteGateway,
    H: HistoryStore,
    S: SortedSetStore,
    P: PositionStore,
{
    quotes: Arc<Q>,
    history: Option<Arc<H>>,
    queue: Arc<SignalQueue<S>>,
    positions: Arc<PositionManager<P>>,
    regime_classifier: RegimeClassifier<Q>,
    strategies: StrategyRegistry,
    cooldowns: CooldownTracker,
    sg_config: SignalGeneratorEnvConfig,
    regime_config: RegimeEnvConfig,
}

impl<Q, H, S, P> SignalGenerator<Q, H, S, P>
where
    Q: QuoteGateway,
    H: HistoryStore,
    S: SortedSetStore,
    P: PositionStore,
{
    pub fn new(
        quotes: Arc<Q>,
        history: Option<Arc<H>>,
        queue: Arc<SignalQueue<S>>,
        positions: Arc<PositionManager<P>>,
        strategies: StrategyRegistry,
        sg_config: SignalGeneratorEnvConfig,
        regime_config: RegimeEnvConfig,
    ) -> Self {
        let regime_classifier = RegimeClassifier::new(quotes.clone(), regime_config.clone());
        Self {
            quotes,
            history,
            queue,
            positions,
            regime_classifier,
            strategies,
            cooldowns: CooldownTracker::new(),
            sg_config,
            regime_config,
        }
    }

    pub async fn classify_regime(&self) -> Regime {
        self.regime_classifier.classify().await
    }

    /// Score one watchlisted symbol not currently held and publish an entry
    /// signal if any mounted strategy clears its threshold (spec.md §4.4
    /// "Entry scoring"). Suppressed while the symbol's BUY side is cooling
    /// down (spec.md §4.5 "Cooldowns").
    pub async fn scan_entry(&self, symbol: &str, regime: &Regime) -> Result<Option<Signal>, GatewayError> {
        if self.cooldowns.is_cooling_down(symbol, SignalSide::Buy, ChronoDuration::minutes(30)) {
            debug!(symbol, "entry suppressed by cooldown");
            return Ok(None);
        }

        let candles = candles::fetch_hybrid(self.history.as_deref(), self.quotes.as_ref(), symbol, &self.sg_config).await?;
        let Some(snapshot) = indicators::compute(&candles) else {
            return Ok(None);
        };
        let price = candles.last().map(|c| c.close).unwrap_or_default();
        let ctx = AnalysisContext { symbol: symbol.to_string(), price, indicators: snapshot, regime: regime.clone() };

        let mut best: Option<(i32, Vec<String>, String)> = None;
        for strategy in self.strategies.strategies() {
            if let Some(verdict) = strategy.analyze(&ctx) {
                let better = best.as_ref().map(|(score, ..)| verdict.score > *score).unwrap_or(true);
                if better {
                    best = Some((verdict.score, verdict.reasons, strategy.name().to_string()));
                }
            }
        }
        let Some((score, reasons, strategy_name)) = best else {
            return Ok(None);
        };

        let signal_type = if score >= 80 {
            SignalType::StrongBuy
        } else if score >= 60 {
            SignalType::Buy
        } else {
            SignalType::WeakBuy
        };

        let mut signal = Signal::new(symbol, SignalSide::Buy, signal_type, score, price, strategy_name, self.queue.account());
        for reason in reasons {
            signal = signal.with_reason(reason);
        }
        self.cooldowns.record_signal(symbol, SignalSide::Buy);
        info!(symbol, score, %signal_type, "entry signal scored");
        Ok(Some(signal))
    }

    /// Evaluate one held position for exit and map the result onto a queued
    /// signal, applying the same per-symbol cooldown as entries (spec.md
    /// §4.4 "Exit evaluation" / "Action mapping").
    pub async fn scan_exit(
        &self,
        symbol: &str,
        stop: Option<&PositionStop>,
        position_added_at: DateTime<Utc>,
        regime: &Regime,
    ) -> Result<Option<Signal>, GatewayError> {
        let candles = candles::fetch_hybrid(self.history.as_deref(), self.quotes.as_ref(), symbol, &self.sg_config).await?;
        let Some(snapshot) = indicators::compute(&candles) else {
            return Ok(None);
        };
        let price = candles.last().map(|c| c.close).unwrap_or_default();

        let verdict = exit::evaluate(price, &snapshot, stop, position_added_at, regime.regime, &self.regime_config);
        let (signal_type, quantity_fraction) = match verdict.action {
            exit::ExitAction::Hold => return Ok(None),
            exit::ExitAction::FullExit(t) => (t, rust_decimal_macros::dec!(1.0)),
            exit::ExitAction::PartialExit => (SignalType::PartialExit, rust_decimal_macros::dec!(0.50)),
            exit::ExitAction::GradualExit => (SignalType::GradualExit, rust_decimal_macros::dec!(0.25)),
        };

        if self.cooldowns.is_cooling_down(symbol, SignalSide::Sell, ChronoDuration::minutes(5)) {
            debug!(symbol, "exit suppressed by cooldown");
            return Ok(None);
        }

        let mut signal =
            Signal::new(symbol, SignalSide::Sell, signal_type, verdict.score.max(0), price, "exit_evaluator", self.queue.account());
        signal.budget_pct = Some(quantity_fraction);
        for reason in verdict.reasons {
            signal = signal.with_reason(reason);
        }
        self.cooldowns.record_signal(symbol, SignalSide::Sell);
        info!(symbol, score = verdict.score, %signal_type, "exit signal scored");
        Ok(Some(signal))
    }

    /// Add to a healthy, profitable, already-held position on a fresh
    /// strong BUY (spec.md §4.4 "Add-position logic").
    #[allow(clippy::too_many_arguments)]
    pub fn evaluate_add_position(
        &self,
        symbol: &str,
        detail: &PositionDetail,
        current_price: Decimal,
        latest_exit_score: i32,
        fresh_buy_score: i32,
        regime: RegimeKind,
        last_add_at: Option<DateTime<Utc>>,
    ) -> Option<Signal> {
        if !self.regime_config.add_position_enabled {
            return None;
        }
        if detail.cost_price <= Decimal::ZERO {
            return None;
        }
        let profit_pct = (current_price - detail.cost_price) / detail.cost_price * Decimal::from(100);
        let healthy = latest_exit_score > -30;
        let strong_signal = fresh_buy_score >= self.regime_config.add_position_min_signal_score;
        let regime_ok = matches!(regime, RegimeKind::Bull | RegimeKind::Range);
        let cooled = last_add_at.is_some_and(|t| {
            Utc::now() - t < ChronoDuration::minutes(self.regime_config.add_position_cooldown_minutes)
        });

        if profit_pct < self.regime_config.add_position_min_profit_pct || !healthy || !strong_signal || !regime_ok || cooled {
            return None;
        }

        let mut signal =
            Signal::new(symbol, SignalSide::Buy, SignalType::AddPosition, fresh_buy_score, current_price, "add_position", self.queue.account());
        signal.budget_pct = Some(self.regime_config.add_position_pct / Decimal::from(100));
        signal = signal.with_reason(format!("adding to a {profit_pct:.1}% profitable position on a fresh strong BUY"));
        info!(symbol, %profit_pct, "add-position signal generated");
        Some(signal)
    }

    /// If a fresh BUY is strong enough to unseat the weakest currently held
    /// position, publish an URGENT_SELL for the weak holding and a delayed
    /// ROTATION_BUY for the new symbol (spec.md §4.4 "Real-time rotation").
    pub fn evaluate_rotation(
        &self,
        candidate_symbol: &str,
        candidate_score: i32,
        candidate_price: Decimal,
        weakest_held_symbol: &str,
        weakest_held_exit_score: i32,
        weakest_held_price: Decimal,
    ) -> Option<(Signal, Signal)> {
        if !self.regime_config.realtime_rotation_enabled {
            return None;
        }
        if self.cooldowns.rotation_cooling_down(ChronoDuration::minutes(self.regime_config.add_position_cooldown_minutes)) {
            return None;
        }
        if candidate_score < self.regime_config.realtime_rotation_min_signal_score {
            return None;
        }
        if weakest_held_exit_score + self.regime_config.realtime_rotation_min_score_diff >= candidate_score {
            return None;
        }

        let urgent_sell = Signal::new(
            weakest_held_symbol,
            SignalSide::Sell,
            SignalType::RotationSell,
            100,
            weakest_held_price,
            "rotation",
            self.queue.account(),
        )
        .with_reason(format!("rotating out for stronger candidate {candidate_symbol} (score {candidate_score})"));

        let delayed_buy = Signal::new(
            candidate_symbol,
            SignalSide::Buy,
            SignalType::RotationBuy,
            candidate_score,
            candidate_price,
            "rotation",
            self.queue.account(),
        )
        .with_reason(format!("rotation candidate, waiting on {weakest_held_symbol} to clear"));

        self.cooldowns.record_rotation();
        info!(candidate_symbol, weakest_held_symbol, "rotation dispatched");
        Some((urgent_sell, delayed_buy))
    }

    /// Periodically re-examine `failed` for signals whose score still
    /// clears the strategy's own threshold and whose age is within the
    /// configured salvage horizon (spec.md §4.4 "Failure-queue salvage").
    pub async fn salvage_failed(&self) -> Result<usize, crate::domain::errors::QueueError> {
        let max_age = StdDuration::from_secs(self.sg_config.failed_salvage_max_age_secs.max(0) as u64);
        let min_score = self.strategies.strategies().iter().map(|s| s.threshold()).min().unwrap_or(45);
        let salvaged = self.queue.salvage_failed(max_age, |signal| signal.score >= min_score).await?;
        if salvaged > 0 {
            warn!(salvaged, "salvaged signals from failed partition");
        }
        Ok(salvaged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::position_manager::store::InMemoryPositionStore;
    use crate::application::signal_queue::store::InMemorySortedSetStore;
    use crate::config::QueueEnvConfig;
    use crate::domain::errors::GatewayError;
    use crate::domain::market::Market;
    use crate::domain::ports::{AdjustType, Candle, StaticInfo};
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;
    use std::time::Duration as StdDuration;

    struct NoQuotes;
    #[async_trait]
    impl QuoteGateway for NoQuotes {
        async fn get_realtime_quote(&self, _symbols: &[String]) -> Result<HashMap<String, Decimal>, GatewayError> {
            Ok(HashMap::new())
        }
        async fn get_history_candles(
            &self,
            _symbol: &str,
            _start: DateTime<Utc>,
            _end: DateTime<Utc>,
            _adjust: AdjustType,
        ) -> Result<Vec<Candle>, GatewayError> {
            Ok(Vec::new())
        }
        async fn get_candlesticks(&self, _symbol: &str, _count: usize, _adjust: AdjustType) -> Result<Vec<Candle>, GatewayError> {
            Ok(Vec::new())
        }
        async fn get_static_info(&self, _symbols: &[String]) -> Result<HashMap<String, StaticInfo>, GatewayError> {
            Ok(HashMap::new())
        }
    }

    struct NoHistory;
    #[async_trait]
    impl HistoryStore for NoHistory {
        async fn recent_candles(&self, _symbol: &str, _since_days: u32) -> anyhow::Result<Vec<Candle>> {
            Ok(Vec::new())
        }
    }

    fn regime_config() -> RegimeEnvConfig {
        RegimeEnvConfig {
            index_symbols: vec![],
            inverse_symbols: vec![],
            ma_period: 200,
            exit_score_adjustment_enabled: true,
            gradual_exit_enabled: true,
            gradual_exit_threshold_25: 40,
            gradual_exit_threshold_50: 50,
            add_position_enabled: true,
            add_position_min_profit_pct: dec!(2),
            add_position_min_signal_score: 60,
            add_position_pct: dec!(5),
            add_position_cooldown_minutes: 60,
            realtime_rotation_enabled: true,
            realtime_rotation_min_signal_score: 75,
            realtime_rotation_min_score_diff: 20,
        }
    }

    fn sg_config() -> SignalGeneratorEnvConfig {
        SignalGeneratorEnvConfig {
            poll_interval_secs: 60,
            use_db_klines: false,
            db_klines_history_days: 90,
            api_klines_latest_days: 3,
            rotation_check_interval_secs: 30,
            failed_salvage_interval_secs: 300,
            failed_salvage_max_age_secs: 86_400,
        }
    }

    fn generator() -> SignalGenerator<NoQuotes, NoHistory, InMemorySortedSetStore, InMemoryPositionStore> {
        let queue_config = QueueEnvConfig {
            redis_url: String::new(),
            queue_key: "trading:signals".into(),
            processing_key: "trading:signals:processing".into(),
            failed_key: "trading:signals:failed".into(),
            max_retries: 3,
            backoff_base_secs: 30,
            backoff_cap_secs: 3600,
            zombie_timeout: StdDuration::from_secs(300),
        };
        SignalGenerator::new(
            Arc::new(NoQuotes),
            Some(Arc::new(NoHistory)),
            Arc::new(SignalQueue::new(Arc::new(InMemorySortedSetStore::new()), queue_config, "acct-1")),
            Arc::new(PositionManager::new(Arc::new(InMemoryPositionStore::new()), "acct-1", true)),
            crate::application::strategies::StrategyRegistry::default(),
            sg_config(),
            regime_config(),
        )
    }

    fn detail(cost_price: Decimal) -> PositionDetail {
        PositionDetail { quantity: dec!(100), cost_price, order_id: "o1".into(), added_at: Utc::now() }
    }

    #[test]
    fn add_position_requires_profit_health_signal_and_regime() {
        let gen = generator();
        let held = detail(dec!(100));
        // profitable, healthy, strong signal, BULL regime -> add
        let signal = gen.evaluate_add_position("AAPL.US", &held, dec!(105), -10, 70, RegimeKind::Bull, None);
        assert!(signal.is_some());

        // not profitable enough
        assert!(gen.evaluate_add_position("AAPL.US", &held, dec!(100.5), -10, 70, RegimeKind::Bull, None).is_none());
        // unhealthy exit score
        assert!(gen.evaluate_add_position("AAPL.US", &held, dec!(105), -40, 70, RegimeKind::Bull, None).is_none());
        // weak signal
        assert!(gen.evaluate_add_position("AAPL.US", &held, dec!(105), -10, 50, RegimeKind::Bull, None).is_none());
        // wrong regime
        assert!(gen.evaluate_add_position("AAPL.US", &held, dec!(105), -10, 70, RegimeKind::Bear, None).is_none());
        // cooling down
        assert!(gen.evaluate_add_position("AAPL.US", &held, dec!(105), -10, 70, RegimeKind::Bull, Some(Utc::now())).is_none());
    }

    #[test]
    fn rotation_requires_a_meaningful_score_gap_and_threshold() {
        let gen = generator();
        // strong enough and weak holding clears the gap
        let rotation = gen.evaluate_rotation("NEW.US", 80, dec!(50), "OLD.US", 30, dec!(20));
        assert!(rotation.is_some());
        let (sell, buy) = rotation.unwrap();
        assert_eq!(sell.signal_type, SignalType::RotationSell);
        assert_eq!(buy.signal_type, SignalType::RotationBuy);

        // below the rotation score threshold
        assert!(gen.evaluate_rotation("NEW.US", 50, dec!(50), "OLD.US", 10, dec!(20)).is_none());
        // gap too small
        assert!(gen.evaluate_rotation("NEW.US", 80, dec!(50), "OLD.US", 65, dec!(20)).is_none());
    }

    #[test]
    fn rotation_respects_the_account_wide_cooldown() {
        let gen = generator();
        assert!(gen.evaluate_rotation("A.US", 80, dec!(50), "B.US", 10, dec!(20)).is_some());
        // second rotation immediately after is suppressed by the account-wide cooldown
        assert!(gen.evaluate_rotation("C.US", 90, dec!(50), "D.US", 10, dec!(20)).is_none());
    }
}
